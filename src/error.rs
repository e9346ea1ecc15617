use std::path::PathBuf;

use thiserror::Error;

// Falhas ao buscar ou extrair a fonte de uma página
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("request to {url} failed: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP {status} while fetching {url}")]
    Status { url: String, status: u16 },
    #[error("gave up after {hops} redirect/iframe hops (last: {url})")]
    RedirectLoop { hops: usize, url: String },
    #[error("no media source found in {url}")]
    NotFound {
        url: String,
        debug_dump: Option<PathBuf>,
    },
}

// Um passo de uma cadeia de decodificação produziu dados inválidos
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("decoded bytes are not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("character {ch:?} cannot be shifted down by {offset}")]
    ShiftOutOfRange { ch: char, offset: u32 },
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected payload shape")]
    Shape,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("server returned HTTP {0}")]
    Status(u16),
    #[error("no data received for {0:?}")]
    Stalled(std::time::Duration),
    #[error("chunk {index} failed: {reason}")]
    ChunkFailure { index: usize, reason: String },
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("output file is empty or missing")]
    EmptyOutput,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("fallback fetcher failed: {0}")]
    Fallback(String),
}

impl DownloadError {
    // Só falta de recursos locais encerra o download inteiro
    pub fn is_fatal(&self) -> bool {
        matches!(self, DownloadError::Io(_))
    }
}
