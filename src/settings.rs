use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bait::BaitFilter;

// Configurações persistidas em JSON; campos ausentes usam o padrão
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub download_folder: PathBuf,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub max_workers: usize,
    pub chunk_floor_mb: u64,
    pub max_concurrent_downloads: usize,
    pub max_hops: usize,
    pub debug_dir: PathBuf,
    pub overwrite: bool,
    pub extra_bait_filenames: Vec<String>,
    pub extra_bait_domains: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_folder: PathBuf::from("downloads"),
            timeout_secs: 30,
            connect_timeout_secs: 10,
            probe_timeout_secs: 15,
            max_workers: 16,
            chunk_floor_mb: 8,
            max_concurrent_downloads: 4,
            max_hops: 10,
            debug_dir: PathBuf::from("."),
            overwrite: false,
            extra_bait_filenames: Vec::new(),
            extra_bait_domains: Vec::new(),
        }
    }
}

impl Settings {
    // Carrega as configurações do arquivo padrão, ou usa os padrões se não existir
    pub fn load() -> Result<Self> {
        Self::load_from(&settings_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Settings::default());
        }

        let mut file = File::open(path)
            .with_context(|| format!("Falha ao abrir configurações: {}", path.display()))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .context("Falha ao ler arquivo de configurações")?;

        if contents.trim().is_empty() {
            return Ok(Settings::default());
        }

        serde_json::from_str(&contents).context("Falha ao deserializar configurações")
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = settings_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context("Falha ao criar diretório para configurações")?;
        }

        let json = serde_json::to_string_pretty(self)
            .context("Falha ao serializar configurações")?;

        let mut file = File::create(path)
            .context("Falha ao abrir arquivo de configurações para escrita")?;

        file.write_all(json.as_bytes())
            .context("Falha ao escrever configurações no arquivo")?;

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn chunk_floor(&self) -> u64 {
        self.chunk_floor_mb * 1024 * 1024
    }

    pub fn bait_filter(&self) -> BaitFilter {
        BaitFilter::default().with_extra(&self.extra_bait_filenames, &self.extra_bait_domains)
    }
}

// Obtém o caminho para o arquivo de configurações
pub fn settings_path() -> Result<PathBuf> {
    let mut path = dirs::config_dir()
        .context("Não foi possível determinar o diretório de configuração")?;

    path.push("anigrab");
    path.push("settings.json");

    Ok(path)
}
