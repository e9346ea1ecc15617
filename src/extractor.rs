// src/extractor.rs

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::bait::BaitFilter;
use crate::error::ExtractError;
use crate::page::Page;
use crate::progress::Progress;
use crate::strategies::{Strategy, default_strategies};
use crate::utils::{current_timestamp, resolve_against_origin};

// Navegação feita por JavaScript: `window.location = "..."`, `location.href = '...'`.
// `location` precisa ser o objeto global, não o fim de outro identificador
static LOCATION_ASSIGN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:\b(?:window|document|top|self)\.location(?:\.href)?|(?:^|[^\w.$])location\.href)\s*=\s*(?:'([^']*)'|"([^"]*)")"#,
    )
    .unwrap()
});
// `location.replace('...')` e `location.assign("...")`
static LOCATION_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|[^\w$])location\.(?:replace|assign)\(\s*(?:'([^']*)'|"([^"]*)")\s*\)"#)
        .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Mp4,
    Hls,
}

impl SourceKind {
    pub fn label(self) -> &'static str {
        match self {
            SourceKind::Mp4 => "MP4",
            SourceKind::Hls => "HLS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSource {
    pub kind: SourceKind,
    pub location: String,
}

/// O que uma única página revelou.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionResult {
    Direct { kind: SourceKind, location: String },
    RedirectTo(String),
    IframeTo(String),
    NotFound,
}

/// Busca o HTML de uma página. A sessão HTTP implementa isto; os testes usam um mapa em memória.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<String, ExtractError>;
}

pub struct Pipeline {
    strategies: Vec<Box<dyn Strategy>>,
    bait: BaitFilter,
}

impl Pipeline {
    pub fn new(bait: BaitFilter) -> Self {
        Self::with_strategies(default_strategies(), bait)
    }

    pub fn with_strategies(strategies: Vec<Box<dyn Strategy>>, bait: BaitFilter) -> Self {
        Self { strategies, bait }
    }

    /// Redirect primeiro, depois as estratégias em ordem, depois o iframe.
    pub fn extract(&self, page: &Page) -> ExtractionResult {
        if let Some(target) = find_redirect(page) {
            debug!(from = %page.url, to = %target, "client-side redirect");
            return ExtractionResult::RedirectTo(target);
        }

        for strategy in &self.strategies {
            let Some(found) = strategy.try_extract(page, &self.bait) else {
                continue;
            };
            // Estratégias já filtram, mas o resultado final passa pelo filtro de novo
            if self.bait.is_bait(&found.location) {
                warn!(strategy = strategy.name(), location = %found.location, "ignoring bait source");
                continue;
            }
            info!(
                strategy = strategy.name(),
                kind = found.kind.label(),
                location = %found.location,
                "media source found"
            );
            return ExtractionResult::Direct {
                kind: found.kind,
                location: found.location,
            };
        }

        if let Some(src) = page.first_iframe_src() {
            let target = resolve_against_origin(&page.url, &src);
            debug!(from = %page.url, to = %target, "following iframe");
            return ExtractionResult::IframeTo(target);
        }

        ExtractionResult::NotFound
    }
}

fn find_redirect(page: &Page) -> Option<String> {
    page.inline_scripts().iter().find_map(|script| {
        [&*LOCATION_ASSIGN, &*LOCATION_CALL]
            .into_iter()
            .flat_map(|re| re.captures_iter(script))
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
            .map(|m| m.as_str().trim())
            .find(|target| !target.is_empty() && !target.starts_with('#'))
            .map(|target| resolve_against_origin(&page.url, target))
    })
}

/// Fonte resolvida, com a página onde foi encontrada e o título da primeira página.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub kind: SourceKind,
    pub location: String,
    pub page_url: String,
    pub title: Option<String>,
}

pub struct Resolver {
    pipeline: Pipeline,
    max_hops: usize,
    debug_dir: PathBuf,
}

impl Resolver {
    pub fn new(pipeline: Pipeline, max_hops: usize, debug_dir: PathBuf) -> Self {
        Self {
            pipeline,
            max_hops,
            debug_dir,
        }
    }

    // Parse síncrono: o `Html` do scraper não pode atravessar um `.await`
    fn inspect(&self, url: &str, body: String) -> (ExtractionResult, Option<String>, String) {
        let page = Page::parse(url, body);
        let result = self.pipeline.extract(&page);
        let title = page.title();
        (result, title, page.body)
    }

    /// Segue redirects e iframes até achar uma fonte, com limite de saltos.
    pub async fn resolve(
        &self,
        fetcher: &dyn PageFetcher,
        url: &str,
        progress: &Progress,
    ) -> Result<Resolved, ExtractError> {
        let mut current = url.to_string();
        let mut title: Option<String> = None;
        let mut hops = 0;

        loop {
            progress.phase(format!("Analyzing {}", current));
            let body = fetcher.fetch_page(&current).await?;
            let (result, page_title, body) = self.inspect(&current, body);
            if title.is_none() {
                title = page_title;
            }

            let next = match result {
                ExtractionResult::Direct { kind, location } => {
                    return Ok(Resolved {
                        kind,
                        location,
                        page_url: current,
                        title,
                    });
                }
                ExtractionResult::RedirectTo(next) | ExtractionResult::IframeTo(next) => next,
                ExtractionResult::NotFound => {
                    let debug_dump = self.dump_page(&body).await;
                    return Err(ExtractError::NotFound {
                        url: current,
                        debug_dump,
                    });
                }
            };

            hops += 1;
            if hops > self.max_hops {
                return Err(ExtractError::RedirectLoop { hops, url: next });
            }
            current = next;
        }
    }

    async fn dump_page(&self, body: &str) -> Option<PathBuf> {
        let path = debug_path(&self.debug_dir);
        match tokio::fs::write(&path, body).await {
            Ok(()) => {
                warn!(path = %path.display(), "no source found, page saved for inspection");
                Some(path)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to save debug page");
                None
            }
        }
    }
}

fn debug_path(dir: &Path) -> PathBuf {
    dir.join(format!("debug_page_{}.html", current_timestamp()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::tests::{encode_scheme_a, encode_scheme_b, encode_scheme_json};
    use std::collections::HashMap;

    struct MapFetcher(HashMap<String, String>);

    impl MapFetcher {
        fn new(pages: &[(&str, &str)]) -> Self {
            Self(
                pages
                    .iter()
                    .map(|(url, body)| (url.to_string(), body.to_string()))
                    .collect(),
            )
        }
    }

    #[async_trait]
    impl PageFetcher for MapFetcher {
        async fn fetch_page(&self, url: &str) -> Result<String, ExtractError> {
            self.0.get(url).cloned().ok_or_else(|| ExtractError::Status {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    fn extract(body: &str) -> ExtractionResult {
        let page = Page::parse("https://site.example/e/abc", body.to_string());
        Pipeline::new(BaitFilter::default()).extract(&page)
    }

    fn direct(kind: SourceKind, location: &str) -> ExtractionResult {
        ExtractionResult::Direct {
            kind,
            location: location.to_string(),
        }
    }

    fn resolver(dir: &Path) -> Resolver {
        Resolver::new(Pipeline::new(BaitFilter::default()), 10, dir.to_path_buf())
    }

    #[test]
    fn sources_variable_beats_raw_scan() {
        let body = r#"<script>var sources = {"mp4": "https://cdn.example.com/v.mp4"};</script>
            <p>https://other.example.net/z.m3u8</p>"#;
        assert_eq!(extract(body), direct(SourceKind::Mp4, "https://cdn.example.com/v.mp4"));
    }

    #[test]
    fn bait_only_page_is_not_found() {
        let body = r#"<video src="https://cdn.example.com/BigBuckBunny.mp4"></video>
            <script>var sources = {"mp4": "https://commondatastorage.googleapis.com/gtv/bbb.mp4"};</script>"#;
        assert_eq!(extract(body), ExtractionResult::NotFound);
    }

    #[test]
    fn video_element_source() {
        assert_eq!(
            extract(r#"<video src="https://cdn.x.com/a.mp4"></video>"#),
            direct(SourceKind::Mp4, "https://cdn.x.com/a.mp4")
        );
    }

    #[test]
    fn raw_scan_prefers_m3u8() {
        let body = "see https://cdn.example.com/a.mp4 or https://cdn.example.com/a.m3u8";
        assert_eq!(extract(body), direct(SourceKind::Hls, "https://cdn.example.com/a.m3u8"));
    }

    #[test]
    fn redirect_runs_before_strategies() {
        let body = r#"<script>window.location.href = 'https://site.com/embed/xyz';</script>
            <video src="https://cdn.example.com/a.mp4"></video>"#;
        assert_eq!(
            extract(body),
            ExtractionResult::RedirectTo("https://site.com/embed/xyz".to_string())
        );
    }

    #[test]
    fn redirect_call_forms_and_relative_targets() {
        assert_eq!(
            extract(r#"<script>location.replace("/embed/1")</script>"#),
            ExtractionResult::RedirectTo("https://site.example/embed/1".to_string())
        );
        assert_eq!(
            extract(r#"<script>document.location.assign('//player.example/e/2');</script>"#),
            ExtractionResult::RedirectTo("https://player.example/e/2".to_string())
        );
        assert_eq!(
            extract(r##"<script>location.href = "#";</script>"##),
            ExtractionResult::NotFound
        );
    }

    #[test]
    fn identifiers_ending_in_location_are_not_redirects() {
        let body = r#"<script>var geolocation = 'US'; var sources = {"mp4": "https://cdn.example.com/v.mp4"};</script>"#;
        assert_eq!(extract(body), direct(SourceKind::Mp4, "https://cdn.example.com/v.mp4"));

        for script in [
            r#"var location = "/elsewhere";"#,
            "player_location = '/embed/9';",
            "var $location = '/x';",
            "mylocation.assign('/z');",
        ] {
            assert_eq!(
                extract(&format!("<script>{}</script>", script)),
                ExtractionResult::NotFound,
                "{script}"
            );
        }
    }

    #[test]
    fn global_location_forms_are_redirects() {
        for script in [
            r#"window.location = "/a";"#,
            "top.location.href='/a';",
            "location.href = '/a'",
            "if (x) { window.location.replace('/a'); }",
        ] {
            assert_eq!(
                extract(&format!("<script>{}</script>", script)),
                ExtractionResult::RedirectTo("https://site.example/a".to_string()),
                "{script}"
            );
        }
    }

    #[test]
    fn iframe_is_last_resort() {
        assert_eq!(
            extract(r#"<iframe src="//player.example/embed/9"></iframe>"#),
            ExtractionResult::IframeTo("https://player.example/embed/9".to_string())
        );
    }

    #[test]
    fn obfuscated_schemes_are_found() {
        let a = encode_scheme_a(r#"{"direct_access_url":"https://cdn.example.com/a.mp4"}"#);
        assert_eq!(
            extract(&format!("<script>var a168c = '{}';</script>", a)),
            direct(SourceKind::Mp4, "https://cdn.example.com/a.mp4")
        );

        let b = encode_scheme_b(r#"{"source":"https://cdn.example.com/b.m3u8"}"#);
        assert_eq!(
            extract(&format!(r#"<div MKGMa="{}"></div>"#, b)),
            direct(SourceKind::Hls, "https://cdn.example.com/b.m3u8")
        );

        let json = encode_scheme_json(r#"{"mp4":"https://cdn.example.com/c.mp4"}"#);
        assert_eq!(
            extract(&format!(r#"<script type="application/json">{}</script>"#, json)),
            direct(SourceKind::Mp4, "https://cdn.example.com/c.mp4")
        );
    }

    #[tokio::test]
    async fn resolver_follows_redirect_then_iframe() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MapFetcher::new(&[
            (
                "https://site.example/watch/1",
                r#"<html><head><title>Episode 1</title></head>
                <script>window.location.href = 'https://site.com/embed/xyz';</script></html>"#,
            ),
            (
                "https://site.com/embed/xyz",
                r#"<title>Player</title><iframe src="/frame/7"></iframe>"#,
            ),
            (
                "https://site.com/frame/7",
                r#"<video><source src="https://cdn.example.com/master.m3u8" type="application/x-mpegURL"></video>"#,
            ),
        ]);

        let resolved = resolver(dir.path())
            .resolve(&fetcher, "https://site.example/watch/1", &Progress::hidden())
            .await
            .unwrap();

        assert_eq!(resolved.kind, SourceKind::Hls);
        assert_eq!(resolved.location, "https://cdn.example.com/master.m3u8");
        assert_eq!(resolved.page_url, "https://site.com/frame/7");
        assert_eq!(resolved.title.as_deref(), Some("Episode 1"));
    }

    #[tokio::test]
    async fn self_redirect_hits_hop_limit() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MapFetcher::new(&[(
            "https://site.example/loop",
            r#"<script>location.href = "/loop";</script>"#,
        )]);

        let err = resolver(dir.path())
            .resolve(&fetcher, "https://site.example/loop", &Progress::hidden())
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractError::RedirectLoop { hops: 11, .. }));
    }

    #[tokio::test]
    async fn not_found_writes_debug_page() {
        let dir = tempfile::tempdir().unwrap();
        let body = "<html><p>nothing to see</p></html>";
        let fetcher = MapFetcher::new(&[("https://site.example/empty", body)]);

        let err = resolver(dir.path())
            .resolve(&fetcher, "https://site.example/empty", &Progress::hidden())
            .await
            .unwrap_err();

        match err {
            ExtractError::NotFound { url, debug_dump } => {
                assert_eq!(url, "https://site.example/empty");
                let path = debug_dump.expect("debug page");
                assert!(path.starts_with(dir.path()));
                assert_eq!(std::fs::read_to_string(path).unwrap(), body);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn fetch_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MapFetcher::new(&[]);
        let err = resolver(dir.path())
            .resolve(&fetcher, "https://site.example/gone", &Progress::hidden())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Status { status: 404, .. }));
    }
}
