// src/strategies.rs
//
// Estratégias de detecção de fonte, na ordem de prioridade em que o
// pipeline as executa. Cada uma só lê a página e nunca falha: ausência de
// padrão, JSON quebrado ou decodificação inválida viram `None`.

use std::sync::LazyLock;

use regex::Regex;
use scraper::Selector;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::bait::BaitFilter;
use crate::decoder::{Decoded, Scheme, decode_base64_text};
use crate::extractor::{MediaSource, SourceKind};
use crate::page::Page;

static M3U8_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^"'\s<>]+\.m3u8[^"'\s<>]*"#).unwrap());
static MP4_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^"'\s<>]+\.mp4[^"'\s<>]*"#).unwrap());
static BASE64_BLOB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"base64[,:]([A-Za-z0-9+/=]+)").unwrap());
static SCHEME_A_BLOB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"a168c\s*=\s*'([^']+)'").unwrap());
static SCHEME_B_BLOB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)MKGMa="(.*?)""#).unwrap());
static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",\s*([}\]])").unwrap());
static BARE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([{,]\s*)([A-Za-z_$][A-Za-z0-9_$]*)\s*:").unwrap());
static BASE64_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/=]+$").unwrap());
static VIDEO_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("video").unwrap());
static SOURCE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("source[src]").unwrap());

const SOURCES_VARIABLE: &str = "var sources";
const SOURCES_PATTERNS: &[&str] = &[
    "var sources",
    "sources =",
    "sources:",
    "\"sources\":",
    "'sources':",
];

pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Primeira fonte aceita pela estratégia, já normalizada e filtrada contra iscas.
    fn try_extract(&self, page: &Page, bait: &BaitFilter) -> Option<MediaSource>;
}

/// As oito estratégias, da mais para a menos confiável.
pub fn default_strategies() -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(SourcesVariable),
        Box::new(SourcesPatternScan),
        Box::new(MediaElement),
        Box::new(RawUrlScan),
        Box::new(Base64Blob),
        Box::new(ObfuscatedVariable {
            scheme: Scheme::SchemeA,
        }),
        Box::new(ObfuscatedVariable {
            scheme: Scheme::SchemeB,
        }),
        Box::new(EmbeddedJson),
    ]
}

// Normaliza e passa pelo filtro; iscas são registradas e descartadas
fn accept(
    strategy: &str,
    page: &Page,
    bait: &BaitFilter,
    kind: SourceKind,
    raw: &str,
) -> Option<MediaSource> {
    let location = normalize_location(raw, &page.url)?;
    if bait.is_bait(&location) {
        warn!(strategy, location = %location, "ignoring bait source");
        return None;
    }
    Some(MediaSource { kind, location })
}

/// Decodifica valores que parecem base64, completa `//` e resolve caminhos relativos.
pub fn normalize_location(raw: &str, page_url: &str) -> Option<String> {
    let mut link = raw.trim().to_string();
    if link.is_empty() {
        return None;
    }

    if link.starts_with("eyJ") || BASE64_ONLY.is_match(&link) {
        match decode_base64_text(&link) {
            Ok(decoded) if looks_like_url(decoded.trim()) => link = decoded.trim().to_string(),
            Ok(_) => {}
            Err(e) => debug!(error = %e, "source value is not base64, keeping it"),
        }
    }

    if link.starts_with("//") {
        return Some(format!("https:{}", link));
    }
    if link.starts_with("http://") || link.starts_with("https://") {
        return Some(link);
    }
    url::Url::parse(page_url)
        .and_then(|base| base.join(&link))
        .ok()
        .map(|u| u.to_string())
}

fn looks_like_url(text: &str) -> bool {
    text.starts_with("http://") || text.starts_with("https://") || text.starts_with("//")
}

/// Fatia o objeto literal que começa no primeiro `{` depois de `from`,
/// contando chaves fora de strings.
pub fn balanced_object(text: &str, from: usize) -> Option<&str> {
    let start = from + text.get(from..)?.find('{')?;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Aceita JSON estrito ou um literal JS: aspas simples, chaves sem aspas, vírgula final.
pub fn parse_js_object(literal: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str(literal) {
        return Some(map);
    }

    let normalized = literal
        .replace("\\n", "")
        .replace('\\', "")
        .replace('\'', "\"");
    let normalized = TRAILING_COMMA.replace_all(&normalized, "$1");
    let normalized = BARE_KEY.replace_all(&normalized, "$1\"$2\":");
    match serde_json::from_str(&normalized) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "sources object is not parseable");
            None
        }
    }
}

fn string_key<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

// Objeto `sources`: `mp4` tem preferência sobre `hls`
fn media_from_sources(map: &Map<String, Value>) -> Option<(SourceKind, &str)> {
    string_key(map, "mp4")
        .map(|s| (SourceKind::Mp4, s))
        .or_else(|| string_key(map, "hls").map(|s| (SourceKind::Hls, s)))
}

// Payload decodificado: chaves conhecidas primeiro, depois as de `sources`
fn media_from_json(map: &Map<String, Value>) -> Option<(SourceKind, &str)> {
    string_key(map, "direct_access_url")
        .map(|s| (SourceKind::Mp4, s))
        .or_else(|| string_key(map, "source").map(|s| (SourceKind::Hls, s)))
        .or_else(|| media_from_sources(map))
}

static TEXT_MP4_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s"]+\.mp4[^\s"]*"#).unwrap());
static TEXT_M3U8_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s"]+\.m3u8[^\s"]*"#).unwrap());

pub fn media_from_text(text: &str) -> Option<(SourceKind, String)> {
    if let Some(m) = TEXT_MP4_URL.find(text) {
        return Some((SourceKind::Mp4, m.as_str().to_string()));
    }
    TEXT_M3U8_URL
        .find(text)
        .map(|m| (SourceKind::Hls, m.as_str().to_string()))
}

pub fn media_from_decoded(decoded: &Decoded) -> Option<(SourceKind, String)> {
    match decoded {
        Decoded::Json(map) => media_from_json(map).map(|(kind, s)| (kind, s.to_string())),
        Decoded::Text(text) => media_from_text(text),
    }
}

fn sources_after(
    strategy: &str,
    page: &Page,
    bait: &BaitFilter,
    script: &str,
    pattern: &str,
) -> Option<MediaSource> {
    let at = script.find(pattern)?;
    let literal = balanced_object(script, at + pattern.len())?;
    let map = parse_js_object(literal)?;
    let (kind, raw) = media_from_sources(&map)?;
    let found = accept(strategy, page, bait, kind, raw)?;
    debug!(strategy, pattern, "found sources object");
    Some(found)
}

/// 1. `var sources = {...}` em scripts inline.
pub struct SourcesVariable;

impl Strategy for SourcesVariable {
    fn name(&self) -> &'static str {
        "sources-variable"
    }

    fn try_extract(&self, page: &Page, bait: &BaitFilter) -> Option<MediaSource> {
        page.inline_scripts()
            .iter()
            .filter(|script| script.contains(SOURCES_VARIABLE))
            .find_map(|script| sources_after(self.name(), page, bait, script, SOURCES_VARIABLE))
    }
}

/// 2. Qualquer um dos nomes conhecidos para o objeto de fontes.
pub struct SourcesPatternScan;

impl Strategy for SourcesPatternScan {
    fn name(&self) -> &'static str {
        "sources-pattern"
    }

    fn try_extract(&self, page: &Page, bait: &BaitFilter) -> Option<MediaSource> {
        page.inline_scripts().iter().find_map(|script| {
            SOURCES_PATTERNS
                .iter()
                .filter(|pattern| script.contains(*pattern))
                .find_map(|pattern| sources_after(self.name(), page, bait, script, pattern))
        })
    }
}

/// 3. `<video src>` ou `<source src type>` aninhado.
pub struct MediaElement;

pub fn kind_from_type(type_attr: &str) -> SourceKind {
    let lowered = type_attr.to_lowercase();
    if lowered.contains("mp4") {
        SourceKind::Mp4
    } else if lowered.contains("m3u8") || lowered.contains("hls") || lowered.contains("mpegurl") {
        SourceKind::Hls
    } else {
        SourceKind::Mp4
    }
}

impl Strategy for MediaElement {
    fn name(&self) -> &'static str {
        "media-element"
    }

    fn try_extract(&self, page: &Page, bait: &BaitFilter) -> Option<MediaSource> {
        for video in page.document.select(&VIDEO_SELECTOR) {
            if let Some(src) = video.value().attr("src").filter(|s| !s.trim().is_empty()) {
                // Vídeo isca: pula o elemento inteiro, inclusive os <source> dele
                match accept(self.name(), page, bait, SourceKind::Mp4, src) {
                    Some(found) => return Some(found),
                    None => continue,
                }
            }

            for source in video.select(&SOURCE_SELECTOR) {
                let Some(src) = source.value().attr("src") else {
                    continue;
                };
                let kind = kind_from_type(source.value().attr("type").unwrap_or(""));
                if let Some(found) = accept(self.name(), page, bait, kind, src) {
                    return Some(found);
                }
            }
        }
        None
    }
}

/// 4. URLs absolutas `.m3u8` (primeiro) e `.mp4` no texto cru.
pub struct RawUrlScan;

impl Strategy for RawUrlScan {
    fn name(&self) -> &'static str {
        "raw-url"
    }

    fn try_extract(&self, page: &Page, bait: &BaitFilter) -> Option<MediaSource> {
        [(SourceKind::Hls, &*M3U8_URL), (SourceKind::Mp4, &*MP4_URL)]
            .into_iter()
            .find_map(|(kind, re)| {
                re.find_iter(&page.body)
                    .find_map(|m| accept(self.name(), page, bait, kind, m.as_str()))
            })
    }
}

/// 5. Blobs `base64,...` cujo conteúdo cita `.mp4` ou `.m3u8`.
pub struct Base64Blob;

impl Strategy for Base64Blob {
    fn name(&self) -> &'static str {
        "base64-blob"
    }

    fn try_extract(&self, page: &Page, bait: &BaitFilter) -> Option<MediaSource> {
        for caps in BASE64_BLOB.captures_iter(&page.body) {
            let Ok(decoded) = decode_base64_text(&caps[1]) else {
                continue;
            };
            let kind = if decoded.contains(".mp4") {
                SourceKind::Mp4
            } else if decoded.contains(".m3u8") {
                SourceKind::Hls
            } else {
                continue;
            };
            let location = media_from_text(&decoded)
                .map(|(_, url)| url)
                .unwrap_or_else(|| decoded.trim().to_string());
            if let Some(found) = accept(self.name(), page, bait, kind, &location) {
                return Some(found);
            }
        }
        None
    }
}

/// 6 e 7. Blob atribuído a uma variável com nome fixo, decodificado por um esquema.
pub struct ObfuscatedVariable {
    pub scheme: Scheme,
}

impl ObfuscatedVariable {
    fn pattern(&self) -> &'static Regex {
        match self.scheme {
            Scheme::SchemeB => &*SCHEME_B_BLOB,
            _ => &*SCHEME_A_BLOB,
        }
    }
}

impl Strategy for ObfuscatedVariable {
    fn name(&self) -> &'static str {
        self.scheme.name()
    }

    fn try_extract(&self, page: &Page, bait: &BaitFilter) -> Option<MediaSource> {
        let caps = self.pattern().captures(&page.body)?;
        let decoded = match self.scheme.decode(&caps[1]) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(strategy = self.name(), error = %e, "failed to decode obfuscated blob");
                return None;
            }
        };
        let (kind, raw) = media_from_decoded(&decoded)?;
        accept(self.name(), page, bait, kind, &raw)
    }
}

/// 8. `<script type="application/json">["..."]</script>` ofuscado.
pub struct EmbeddedJson;

impl Strategy for EmbeddedJson {
    fn name(&self) -> &'static str {
        Scheme::SchemeJson.name()
    }

    fn try_extract(&self, page: &Page, bait: &BaitFilter) -> Option<MediaSource> {
        page.json_scripts().iter().find_map(|script| {
            let decoded = match Scheme::SchemeJson.decode(script) {
                Ok(decoded) => decoded,
                Err(e) => {
                    debug!(strategy = self.name(), error = %e, "json script is not an obfuscated payload");
                    return None;
                }
            };
            let (kind, raw) = media_from_decoded(&decoded)?;
            accept(self.name(), page, bait, kind, &raw)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::tests::{encode_scheme_a, encode_scheme_b, encode_scheme_json};

    fn page(body: &str) -> Page {
        Page::parse("https://site.example/e/abc", body.to_string())
    }

    fn run(strategy: &dyn Strategy, body: &str) -> Option<MediaSource> {
        strategy.try_extract(&page(body), &BaitFilter::default())
    }

    fn mp4(location: &str) -> Option<MediaSource> {
        Some(MediaSource {
            kind: SourceKind::Mp4,
            location: location.to_string(),
        })
    }

    fn hls(location: &str) -> Option<MediaSource> {
        Some(MediaSource {
            kind: SourceKind::Hls,
            location: location.to_string(),
        })
    }

    #[test]
    fn balanced_object_handles_nesting_and_strings() {
        let text = r#"var sources = {"a": {"b": "}"}, 'c': '{'}; var x = {};"#;
        assert_eq!(
            balanced_object(text, 0),
            Some(r#"{"a": {"b": "}"}, 'c': '{'}"#)
        );
        assert_eq!(balanced_object("var sources = {\"a\": 1", 0), None);
        assert_eq!(balanced_object("no braces", 0), None);
    }

    #[test]
    fn parse_js_object_accepts_loose_literals() {
        let map = parse_js_object("{mp4: 'https://cdn.example.com/v.mp4', hls: 'x',}").unwrap();
        assert_eq!(map["mp4"], "https://cdn.example.com/v.mp4");
        assert!(parse_js_object("{not: [valid").is_none());
    }

    #[test]
    fn sources_variable_prefers_mp4() {
        let body = r#"<script>var sources = {'hls': 'https://cdn.example.com/m.m3u8', 'mp4': 'https://cdn.example.com/v.mp4'};</script>"#;
        assert_eq!(run(&SourcesVariable, body), mp4("https://cdn.example.com/v.mp4"));
    }

    #[test]
    fn sources_value_in_base64_is_decoded() {
        // aHR0cHM6Ly9jZG4uZXhhbXBsZS5jb20vdi5tM3U4 = https://cdn.example.com/v.m3u8
        let body = r#"<script>var sources = {"hls": "aHR0cHM6Ly9jZG4uZXhhbXBsZS5jb20vdi5tM3U4"};</script>"#;
        assert_eq!(run(&SourcesVariable, body), hls("https://cdn.example.com/v.m3u8"));
    }

    #[test]
    fn sources_pattern_finds_object_property() {
        let body = r#"<script>player.setup({ "sources": { "hls": "//cdn.example.com/master.m3u8" } });</script>"#;
        assert_eq!(run(&SourcesVariable, body), None);
        assert_eq!(
            run(&SourcesPatternScan, body),
            hls("https://cdn.example.com/master.m3u8")
        );
    }

    #[test]
    fn sources_object_without_known_keys_is_no_result() {
        let body = r#"<script>var sources = {"dash": "https://cdn.example.com/v.mpd"};</script>"#;
        assert_eq!(run(&SourcesVariable, body), None);
        assert_eq!(run(&SourcesPatternScan, body), None);
    }

    #[test]
    fn media_element_direct_src() {
        let body = r#"<video src="https://cdn.x.com/a.mp4"></video>"#;
        assert_eq!(run(&MediaElement, body), mp4("https://cdn.x.com/a.mp4"));
    }

    #[test]
    fn media_element_source_type_mapping() {
        let body = r#"<video><source src="/hls/master.m3u8" type="application/vnd.apple.mpegurl+hls"></video>"#;
        assert_eq!(run(&MediaElement, body), hls("https://site.example/hls/master.m3u8"));
        assert_eq!(kind_from_type("video/mp4"), SourceKind::Mp4);
        assert_eq!(kind_from_type("application/x-mpegURL; m3u8"), SourceKind::Hls);
        assert_eq!(kind_from_type("video/webm"), SourceKind::Mp4);
    }

    #[test]
    fn media_element_skips_bait_video() {
        let body = r#"<video src="https://cdn.example.com/BigBuckBunny.mp4"></video>
            <video><source src="https://cdn.example.com/real.mp4" type="video/mp4"></video>"#;
        assert_eq!(run(&MediaElement, body), mp4("https://cdn.example.com/real.mp4"));
    }

    #[test]
    fn raw_scan_prefers_m3u8_and_skips_bait() {
        let body = r#"<a href="https://cdn.example.com/v.mp4">x</a>
            "https://commondatastorage.googleapis.com/bucket/a.m3u8"
            'https://edge.example.net/hls/index.m3u8?token=1'"#;
        assert_eq!(
            run(&RawUrlScan, body),
            hls("https://edge.example.net/hls/index.m3u8?token=1")
        );
    }

    #[test]
    fn base64_blob_with_media_url() {
        // aHR0cHM6Ly9jZG4uZXhhbXBsZS5jb20vdi5tcDQ= = https://cdn.example.com/v.mp4
        let body = r#"<div data-src="data:text/plain;base64,aHR0cHM6Ly9jZG4uZXhhbXBsZS5jb20vdi5tcDQ="></div>"#;
        assert_eq!(run(&Base64Blob, body), mp4("https://cdn.example.com/v.mp4"));
        assert_eq!(run(&Base64Blob, "base64,aGVsbG8="), None);
    }

    #[test]
    fn scheme_a_variable() {
        let blob = encode_scheme_a(r#"{"direct_access_url":"https://cdn.example.com/a.mp4"}"#);
        let body = format!("<script>let a168c = '{}';</script>", blob);
        let strategy = ObfuscatedVariable {
            scheme: Scheme::SchemeA,
        };
        assert_eq!(run(&strategy, &body), mp4("https://cdn.example.com/a.mp4"));
    }

    #[test]
    fn scheme_b_attribute_source_key() {
        let blob = encode_scheme_b(r#"{"source":"https://cdn.example.com/b.m3u8"}"#);
        let body = format!(r#"<div MKGMa="{}"></div>"#, blob);
        let strategy = ObfuscatedVariable {
            scheme: Scheme::SchemeB,
        };
        assert_eq!(run(&strategy, &body), hls("https://cdn.example.com/b.m3u8"));
    }

    #[test]
    fn scheme_b_garbage_is_no_result() {
        let strategy = ObfuscatedVariable {
            scheme: Scheme::SchemeB,
        };
        assert_eq!(run(&strategy, r#"<div MKGMa="%%%%"></div>"#), None);
    }

    #[test]
    fn embedded_json_text_payload() {
        let payload = encode_scheme_json("file: https://cdn.example.com/c.mp4 ok");
        let body = format!(
            r#"<script type="application/json">["x"]</script><script type="application/json">{}</script>"#,
            payload
        );
        assert_eq!(run(&EmbeddedJson, &body), mp4("https://cdn.example.com/c.mp4"));
    }

    #[test]
    fn embedded_json_direct_keys() {
        let payload = encode_scheme_json(r#"{"hls":"https://cdn.example.com/d.m3u8"}"#);
        let body = format!(r#"<script type="application/json">{}</script>"#, payload);
        assert_eq!(run(&EmbeddedJson, &body), hls("https://cdn.example.com/d.m3u8"));
    }

    #[test]
    fn normalize_location_variants() {
        let base = "https://site.example/e/abc";
        assert_eq!(
            normalize_location("//cdn.example.com/a.mp4", base).as_deref(),
            Some("https://cdn.example.com/a.mp4")
        );
        assert_eq!(
            normalize_location("media/a.mp4", base).as_deref(),
            Some("https://site.example/e/media/a.mp4")
        );
        assert_eq!(normalize_location("   ", base), None);
    }
}
