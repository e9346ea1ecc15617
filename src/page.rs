// src/page.rs

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

static SCRIPT_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script").unwrap());
static JSON_SCRIPT_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"script[type="application/json"]"#).unwrap());
static TITLE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").unwrap());
static IFRAME_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("iframe[src]").unwrap());

// Metadados verificados em ordem, tanto em `property` quanto em `name`
const TITLE_META_KEYS: &[&str] = &["og:title", "twitter:title", "title"];

/// Uma página buscada: o texto cru e a árvore já parseada.
/// Vive só durante uma extração; as estratégias apenas leem.
pub struct Page {
    pub url: String,
    pub body: String,
    pub document: Html,
}

impl Page {
    pub fn parse(url: &str, body: String) -> Self {
        let document = Html::parse_document(&body);
        Self {
            url: url.to_string(),
            body,
            document,
        }
    }

    /// Conteúdo de todos os `<script>` não vazios, na ordem do documento.
    pub fn inline_scripts(&self) -> Vec<String> {
        self.document
            .select(&SCRIPT_SELECTOR)
            .map(element_text)
            .filter(|text| !text.trim().is_empty())
            .collect()
    }

    pub fn json_scripts(&self) -> Vec<String> {
        self.document
            .select(&JSON_SCRIPT_SELECTOR)
            .map(element_text)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .collect()
    }

    pub fn title(&self) -> Option<String> {
        for key in TITLE_META_KEYS {
            for attr in ["property", "name"] {
                let selector = match Selector::parse(&format!(r#"meta[{}="{}"]"#, attr, key)) {
                    Ok(selector) => selector,
                    Err(_) => continue,
                };
                let content = self
                    .document
                    .select(&selector)
                    .filter_map(|el| el.value().attr("content"))
                    .map(str::trim)
                    .find(|content| !content.is_empty());
                if let Some(content) = content {
                    return Some(content.to_string());
                }
            }
        }

        self.document
            .select(&TITLE_SELECTOR)
            .map(element_text)
            .map(|text| text.trim().to_string())
            .find(|text| !text.is_empty())
    }

    pub fn first_iframe_src(&self) -> Option<String> {
        self.document
            .select(&IFRAME_SELECTOR)
            .filter_map(|el| el.value().attr("src"))
            .map(str::trim)
            .find(|src| !src.is_empty())
            .map(str::to_string)
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_prefers_og_meta() {
        let page = Page::parse(
            "https://site.example/e/1",
            r#"<html><head><title>Fallback</title>
            <meta property="og:title" content="Episode 01"></head></html>"#
                .to_string(),
        );
        assert_eq!(page.title().as_deref(), Some("Episode 01"));
    }

    #[test]
    fn title_accepts_name_attribute() {
        let page = Page::parse(
            "https://site.example/e/1",
            r#"<html><head><meta name="twitter:title" content="Clip"></head></html>"#.to_string(),
        );
        assert_eq!(page.title().as_deref(), Some("Clip"));
    }

    #[test]
    fn title_falls_back_to_title_tag() {
        let page = Page::parse(
            "https://site.example/e/1",
            "<html><head><title> Movie Night </title></head></html>".to_string(),
        );
        assert_eq!(page.title().as_deref(), Some("Movie Night"));
    }

    #[test]
    fn title_missing() {
        let page = Page::parse("https://site.example/", "<html></html>".to_string());
        assert!(page.title().is_none());
    }

    #[test]
    fn scripts_are_collected_in_order() {
        let page = Page::parse(
            "https://site.example/",
            r#"<script>var a = 1;</script><script src="x.js"></script>
            <script type="application/json">["abc"]</script>"#
                .to_string(),
        );
        assert_eq!(page.inline_scripts(), vec!["var a = 1;", r#"["abc"]"#]);
        assert_eq!(page.json_scripts(), vec![r#"["abc"]"#]);
    }

    #[test]
    fn iframe_src_skips_empty() {
        let page = Page::parse(
            "https://site.example/",
            r#"<iframe src=""></iframe><iframe src="/embed/42"></iframe>"#.to_string(),
        );
        assert_eq!(page.first_iframe_src().as_deref(), Some("/embed/42"));
    }
}
