// src/http.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, HeaderMap, HeaderName, HeaderValue, REFERER,
    USER_AGENT,
};
use tracing::{debug, warn};

use crate::error::ExtractError;
use crate::extractor::PageFetcher;
use crate::settings::Settings;
use crate::utils::origin_of;

// Agentes usados em rodízio para parecer um navegador comum
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

const ACCESS_DENIED_PAUSE: Duration = Duration::from_secs(3);
const POOL_SIZE: usize = 20;

/// Sessão HTTP única, configurada uma vez e passada por referência.
pub struct Session {
    client: Client,
    page_timeout: Duration,
    ua_cursor: AtomicUsize,
}

impl Session {
    pub fn new(settings: &Settings) -> reqwest::Result<Self> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout())
            .pool_max_idle_per_host(POOL_SIZE)
            .build()?;

        Ok(Self {
            client,
            page_timeout: settings.timeout(),
            ua_cursor: AtomicUsize::new(0),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn next_user_agent(&self) -> &'static str {
        let i = self.ua_cursor.fetch_add(1, Ordering::Relaxed);
        USER_AGENTS[i % USER_AGENTS.len()]
    }

    /// Cabeçalhos de navegador; o `Referer` é a origem de `referer_url`, quando houver.
    pub fn browser_headers(&self, referer_url: Option<&str>) -> HeaderMap {
        browser_headers(self.next_user_agent(), referer_url)
    }

    async fn get_page(&self, url: &str) -> Result<(u16, String), ExtractError> {
        let response = self
            .client
            .get(url)
            .headers(self.browser_headers(Some(url)))
            .timeout(self.page_timeout)
            .send()
            .await
            .map_err(|source| ExtractError::Fetch {
                url: url.to_string(),
                source,
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|source| ExtractError::Fetch {
            url: url.to_string(),
            source,
        })?;
        Ok((status, body))
    }
}

fn browser_headers(user_agent: &'static str, referer_url: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(user_agent));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers.insert(HeaderName::from_static("dnt"), HeaderValue::from_static("1"));
    headers.insert(
        HeaderName::from_static("upgrade-insecure-requests"),
        HeaderValue::from_static("1"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-dest"),
        HeaderValue::from_static("document"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-mode"),
        HeaderValue::from_static("navigate"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-user"),
        HeaderValue::from_static("?1"),
    );

    let referer = referer_url
        .and_then(origin_of)
        .and_then(|origin| HeaderValue::from_str(&format!("{}/", origin)).ok());
    match referer {
        Some(value) => {
            headers.insert(REFERER, value);
            headers.insert(
                HeaderName::from_static("sec-fetch-site"),
                HeaderValue::from_static("same-origin"),
            );
        }
        None => {
            headers.insert(
                HeaderName::from_static("sec-fetch-site"),
                HeaderValue::from_static("none"),
            );
        }
    }
    headers
}

// Converte para pares texto, no formato que o fetcher externo espera
pub fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn looks_blocked(status: u16, body: &str) -> bool {
    status == 403 || body.to_lowercase().contains("captcha")
}

#[async_trait]
impl PageFetcher for Session {
    async fn fetch_page(&self, url: &str) -> Result<String, ExtractError> {
        debug!(url, "fetching page");
        let (mut status, mut body) = self.get_page(url).await?;

        // Uma única nova tentativa, com outro user agent
        if looks_blocked(status, &body) {
            warn!(url, status, "access denied or captcha, retrying with different headers");
            tokio::time::sleep(ACCESS_DENIED_PAUSE).await;
            (status, body) = self.get_page(url).await?;
        }

        if !(200..300).contains(&status) {
            return Err(ExtractError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(body)
    }
}
