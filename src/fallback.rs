// src/fallback.rs

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::DownloadError;
use crate::utils::is_program_installed;

/// Baixa streams (HLS) ou qualquer URL que o download direto não conseguiu.
#[async_trait]
pub trait StreamFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        headers: &[(String, String)],
    ) -> Result<(), DownloadError>;
}

pub struct YtDlpFetcher {
    program: String,
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
        }
    }
}

impl YtDlpFetcher {
    pub fn is_available(&self) -> bool {
        is_program_installed(&self.program)
    }

    // Monta os argumentos; `%` no caminho é escapado porque o yt-dlp usa templates
    fn build_args(url: &str, dest: &Path, headers: &[(String, String)]) -> Vec<String> {
        let mut args = vec![
            "--no-warnings".to_string(),
            "--no-playlist".to_string(),
            "-o".to_string(),
            dest.to_string_lossy().replace('%', "%%"),
        ];
        for (name, value) in headers {
            args.push("--add-header".to_string());
            args.push(format!("{}:{}", name, value));
        }
        args.push(url.to_string());
        args
    }
}

#[async_trait]
impl StreamFetcher for YtDlpFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        headers: &[(String, String)],
    ) -> Result<(), DownloadError> {
        info!(url, dest = %dest.display(), "handing off to yt-dlp");
        let output = Command::new(&self.program)
            .args(Self::build_args(url, dest, headers))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DownloadError::Fallback(format!("failed to start {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, "yt-dlp failed");
            return Err(DownloadError::Fallback(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        match tokio::fs::metadata(dest).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(DownloadError::EmptyOutput),
        }
    }
}
