// src/grabber.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::{StreamExt, stream};
use indicatif::{MultiProgress, ProgressBar};
use tracing::{info, warn};

use crate::bait::BaitFilter;
use crate::downloader::{DownloadPlan, Downloader, DownloaderConfig, HttpSource};
use crate::extractor::{PageFetcher, Pipeline, Resolved, Resolver, SourceKind};
use crate::fallback::{StreamFetcher, YtDlpFetcher};
use crate::http::{Session, header_pairs};
use crate::progress::{Progress, ProgressCallback};
use crate::settings::Settings;
use crate::ui;
use crate::utils::ensure_directory;

/// Resultado de uma URL: sucesso e, quando não, o motivo legível.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub target: String,
    pub success: bool,
    pub path: Option<PathBuf>,
    pub reason: Option<String>,
}

impl DownloadOutcome {
    fn done(target: &str, path: &Path) -> Self {
        Self {
            target: target.to_string(),
            success: true,
            path: Some(path.to_path_buf()),
            reason: None,
        }
    }

    fn skipped(target: &str, path: &Path) -> Self {
        Self {
            reason: Some("already exists, skipped".to_string()),
            ..Self::done(target, path)
        }
    }

    fn failed(target: &str, reason: impl ToString) -> Self {
        Self {
            target: target.to_string(),
            success: false,
            path: None,
            reason: Some(reason.to_string()),
        }
    }
}

// HLS só vai direto ao fetcher externo quando o link é mesmo uma playlist
fn looks_direct(url: &str) -> bool {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_lowercase())
        .unwrap_or_else(|_| url.to_lowercase());
    path.ends_with(".mp4") || !path.ends_with(".m3u8")
}

/// Orquestra resolução, download direto e fallback para uma ou várias URLs.
pub struct Grabber {
    settings: Settings,
    session: Arc<Session>,
    pages: Arc<dyn PageFetcher>,
    resolver: Resolver,
    downloader: Downloader,
    fallback: Box<dyn StreamFetcher>,
    multi: MultiProgress,
    events: Option<ProgressCallback>,
    interactive: bool,
}

impl Grabber {
    pub fn new(settings: Settings, interactive: bool) -> Result<Self> {
        let session = Arc::new(Session::new(&settings).context("Falha ao criar cliente HTTP")?);
        let bait: BaitFilter = settings.bait_filter();
        let resolver = Resolver::new(
            Pipeline::new(bait),
            settings.max_hops,
            settings.debug_dir.clone(),
        );
        let downloader = Downloader::new(DownloaderConfig::from_settings(&settings));

        Ok(Self {
            pages: session.clone(),
            session,
            resolver,
            downloader,
            fallback: Box::new(YtDlpFetcher::default()),
            multi: MultiProgress::new(),
            events: None,
            interactive,
            settings,
        })
    }

    /// Repassa fases e contagem de bytes de cada download para `callback`.
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.events = Some(callback);
        self
    }

    #[cfg(test)]
    fn with_fakes(mut self, pages: Arc<dyn PageFetcher>, fallback: Box<dyn StreamFetcher>) -> Self {
        self.multi.set_draw_target(indicatif::ProgressDrawTarget::hidden());
        self.pages = pages;
        self.fallback = fallback;
        self
    }

    pub async fn grab_all(&self, urls: &[String]) -> Vec<DownloadOutcome> {
        let limit = self.settings.max_concurrent_downloads.max(1);
        stream::iter(urls)
            .map(|url| self.grab(url))
            .buffer_unordered(limit)
            .collect()
            .await
    }

    pub async fn grab(&self, url: &str) -> DownloadOutcome {
        let bar = self.multi.add(ProgressBar::new_spinner());
        let progress = Arc::new(Progress::new(bar, self.events.clone()));

        let resolved = match self.resolver.resolve(self.pages.as_ref(), url, &progress).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(url, error = %e, "extraction failed");
                progress.abandon("No source found");
                return DownloadOutcome::failed(url, e);
            }
        };

        let outcome = match self.download(url, &resolved, &progress).await {
            Ok(outcome) => outcome,
            Err(e) => DownloadOutcome::failed(url, e),
        };
        match &outcome.reason {
            None => progress.finish("Done"),
            Some(reason) => progress.abandon(reason.clone()),
        }
        outcome
    }

    async fn download(
        &self,
        url: &str,
        resolved: &Resolved,
        progress: &Arc<Progress>,
    ) -> Result<DownloadOutcome> {
        ensure_directory(&self.settings.download_folder)?;
        let plan = DownloadPlan::new(
            &resolved.location,
            resolved.title.as_deref(),
            &resolved.page_url,
            &self.settings.download_folder,
        );

        if plan.output.exists() && !self.may_overwrite(&plan.output) {
            info!(path = %plan.output.display(), "output exists, skipping");
            return Ok(DownloadOutcome::skipped(url, &plan.output));
        }

        let headers = self.session.browser_headers(Some(&plan.referer));

        if resolved.kind == SourceKind::Hls && !looks_direct(&plan.url) {
            progress.phase("Fetching stream");
            return Ok(self.run_fallback(url, &plan, &header_pairs(&headers)).await);
        }

        let source = Arc::new(HttpSource::new(
            self.session.client().clone(),
            &plan.url,
            headers.clone(),
            self.settings.probe_timeout(),
            self.downloader.read_timeout(),
        ));
        match self
            .downloader
            .download(source, &plan.output, Arc::clone(progress))
            .await
        {
            Ok(size) => {
                info!(path = %plan.output.display(), size, "download complete");
                Ok(DownloadOutcome::done(url, &plan.output))
            }
            Err(e) if e.is_fatal() => Ok(DownloadOutcome::failed(url, e)),
            Err(e) => {
                warn!(error = %e, "direct download failed, trying stream fetcher");
                progress.phase("Fetching stream");
                Ok(self.run_fallback(url, &plan, &header_pairs(&headers)).await)
            }
        }
    }

    async fn run_fallback(
        &self,
        url: &str,
        plan: &DownloadPlan,
        headers: &[(String, String)],
    ) -> DownloadOutcome {
        match self.fallback.fetch(&plan.url, &plan.output, headers).await {
            Ok(()) => DownloadOutcome::done(url, &plan.output),
            Err(e) => {
                warn!(url = %plan.url, error = %e, "stream fetcher failed");
                DownloadOutcome::failed(url, e)
            }
        }
    }

    fn may_overwrite(&self, path: &Path) -> bool {
        if self.settings.overwrite {
            return true;
        }
        if !self.interactive {
            return false;
        }
        let prompt = format!("{} already exists. Overwrite?", path.display());
        ui::confirm(&prompt, false).unwrap_or(false)
    }
}
