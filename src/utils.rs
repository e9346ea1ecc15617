use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use regex::Regex;
use url::Url;

static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"[\\/*?:"<>|]"#).unwrap());

// Função para limpar um título e usá-lo como nome de arquivo
pub fn sanitize_title(title: &str) -> String {
    let cleaned = UNSAFE_CHARS.replace_all(title.trim(), "_");
    cleaned.replace(' ', "_")
}

// Função para montar o nome final: `{base}_SS.{ext}`, com mp4 como padrão
pub fn output_filename(name: &str) -> String {
    let (base, ext) = split_extension(name);
    format!("{}_SS.{}", base, ext.unwrap_or("mp4"))
}

// Só conta como extensão um sufixo curto, alfanumérico e com alguma letra ("Vol.2" não tem extensão)
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => {
            let ext = &name[pos + 1..];
            if (1..=4).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
                && ext.chars().any(|c| c.is_ascii_alphabetic())
            {
                (&name[..pos], Some(ext))
            } else {
                (name, None)
            }
        }
        _ => (name, None),
    }
}

// Função para obter o nome do arquivo a partir de uma URL
pub fn get_filename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    Some(decoded)
}

// Nome usado quando a página não tem título
pub fn fallback_name(page_url: &str) -> String {
    get_filename_from_url(page_url)
        .map(|name| sanitize_title(&name))
        .unwrap_or_else(|| format!("download_{}", current_timestamp()))
}

// Obtém o timestamp atual em segundos
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// `scheme://host[:port]` de uma URL absoluta
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    })
}

// Resolve alvos de redirect/iframe: `//host/x` vira https, caminhos relativos
// são colados na origem da página original
pub fn resolve_against_origin(base: &str, target: &str) -> String {
    let target = target.trim();
    if target.starts_with("//") {
        return format!("https:{}", target);
    }
    if target.starts_with("http://") || target.starts_with("https://") {
        return target.to_string();
    }
    match origin_of(base) {
        Some(origin) if target.starts_with('/') => format!("{}{}", origin, target),
        Some(origin) => format!("{}/{}", origin, target),
        None => target.to_string(),
    }
}

// Função para verificar se um programa está instalado
pub fn is_program_installed(program: &str) -> bool {
    Command::new("which")
        .arg(program)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

// Função para criar um diretório se não existir
pub fn ensure_directory(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Falha ao criar diretório: {}", path.display()))?;
    }
    Ok(())
}

// Remove arquivos `.part` deixados pelo fetcher externo
pub fn remove_part_files(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Falha ao listar diretório: {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "part") {
            std::fs::remove_file(&path)
                .with_context(|| format!("Falha ao remover {}", path.display()))?;
            removed += 1;
        }
    }
    Ok(removed)
}
