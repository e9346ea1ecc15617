// src/downloader.rs
//
// Download direto de MP4: chunks em paralelo quando o tamanho é conhecido e
// grande o bastante, stream sequencial nos demais casos ou quando o
// paralelo falha.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, RANGE};
use reqwest::{Client, StatusCode};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::DownloadError;
use crate::progress::Progress;
use crate::settings::Settings;
use crate::utils::{fallback_name, output_filename, sanitize_title};

pub const MIB: u64 = 1024 * 1024;
const TARGET_CHUNK: u64 = 16 * MIB;

/// Destino resolvido de um download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    pub url: String,
    pub output: PathBuf,
    pub referer: String,
}

impl DownloadPlan {
    // O nome vem do título da página; sem título, da URL ou de um timestamp
    pub fn new(url: &str, title: Option<&str>, page_url: &str, output_dir: &Path) -> Self {
        let base = title
            .map(sanitize_title)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| fallback_name(page_url));
        Self {
            url: url.to_string(),
            output: output_dir.join(output_filename(&base)),
            referer: page_url.to_string(),
        }
    }
}

/// Intervalo `[start, end)` do arquivo baixado por um worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    // Cabeçalho Range é inclusivo nas duas pontas
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end - 1)
    }
}

/// `min(max, max(2, total / target))`, nunca mais workers do que bytes.
pub fn worker_count(total: u64, target_chunk: u64, max_workers: usize) -> usize {
    let wanted = (total / target_chunk.max(1)).max(2);
    let workers = wanted.min(max_workers.max(1) as u64).min(total.max(1));
    workers as usize
}

/// Particiona `[0, total)` em pedaços contíguos; o último absorve o resto.
pub fn partition(total: u64, workers: usize) -> Vec<ChunkRange> {
    let workers = (workers.max(1) as u64).min(total.max(1));
    let chunk = total / workers;
    (0..workers)
        .map(|i| ChunkRange {
            index: i as usize,
            start: i * chunk,
            end: if i == workers - 1 { total } else { (i + 1) * chunk },
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub max_workers: usize,
    pub chunk_floor: u64,
    pub target_chunk: u64,
    pub read_timeout: Duration,
}

impl DownloaderConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_workers: settings.max_workers,
            chunk_floor: settings.chunk_floor(),
            target_chunk: TARGET_CHUNK,
            read_timeout: settings.timeout(),
        }
    }
}

/// De onde vêm os bytes. HTTP em produção, memória nos testes.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Tamanho total, quando o servidor informa.
    async fn probe_size(&self) -> Option<u64>;

    async fn fetch_range(&self, range: ChunkRange, progress: &Progress) -> Result<Vec<u8>, DownloadError>;

    /// Stream único direto para `dest`; retorna os bytes escritos.
    async fn fetch_all(&self, dest: &Path, progress: &Progress) -> Result<u64, DownloadError>;
}

pub struct HttpSource {
    client: Client,
    url: String,
    headers: HeaderMap,
    probe_timeout: Duration,
    read_timeout: Duration,
}

impl HttpSource {
    pub fn new(
        client: Client,
        url: &str,
        headers: HeaderMap,
        probe_timeout: Duration,
        read_timeout: Duration,
    ) -> Self {
        Self {
            client,
            url: url.to_string(),
            headers,
            probe_timeout,
            read_timeout,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, DownloadError> {
        match tokio::time::timeout(self.read_timeout, request.headers(self.headers.clone()).send()).await {
            Ok(response) => Ok(response?),
            Err(_) => Err(DownloadError::Stalled(self.read_timeout)),
        }
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|len| *len > 0)
}

#[async_trait]
impl ByteSource for HttpSource {
    async fn probe_size(&self) -> Option<u64> {
        let head = self.client.head(&self.url).headers(self.headers.clone()).send();
        if let Ok(Ok(response)) = tokio::time::timeout(self.probe_timeout, head).await {
            if response.status().is_success() {
                if let Some(len) = content_length(response.headers()) {
                    return Some(len);
                }
            }
        }

        // HEAD sem tamanho: abre um GET só para ler o cabeçalho e descarta a conexão
        let get = self.client.get(&self.url).headers(self.headers.clone()).send();
        match tokio::time::timeout(self.probe_timeout, get).await {
            Ok(Ok(response)) if response.status().is_success() => {
                content_length(response.headers())
            }
            Ok(Ok(response)) => {
                debug!(status = response.status().as_u16(), "size request rejected");
                None
            }
            Ok(Err(e)) => {
                debug!(error = %e, "size request failed");
                None
            }
            Err(_) => None,
        }
    }

    async fn fetch_range(&self, range: ChunkRange, progress: &Progress) -> Result<Vec<u8>, DownloadError> {
        let response = self
            .send(self.client.get(&self.url).header(RANGE, range.header_value()))
            .await?;
        if response.status() != StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::Status(response.status().as_u16()));
        }

        // O buffer cresce com os dados recebidos; o tamanho prometido pelo
        // servidor não é reservado de antemão
        let mut buffer: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        loop {
            match tokio::time::timeout(self.read_timeout, stream.next()).await {
                Ok(Some(Ok(data))) => {
                    if buffer.len() as u64 + data.len() as u64 > range.len() {
                        return Err(DownloadError::ChunkFailure {
                            index: range.index,
                            reason: format!("server sent more than {} bytes", range.len()),
                        });
                    }
                    buffer
                        .try_reserve(data.len())
                        .map_err(|e| DownloadError::ChunkFailure {
                            index: range.index,
                            reason: e.to_string(),
                        })?;
                    buffer.extend_from_slice(&data);
                    progress.advance(data.len() as u64);
                }
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(None) => break,
                Err(_) => return Err(DownloadError::Stalled(self.read_timeout)),
            }
        }
        Ok(buffer)
    }

    async fn fetch_all(&self, dest: &Path, progress: &Progress) -> Result<u64, DownloadError> {
        let response = self.send(self.client.get(&self.url)).await?;
        if !response.status().is_success() {
            return Err(DownloadError::Status(response.status().as_u16()));
        }

        let mut file = BufWriter::new(tokio::fs::File::create(dest).await?);
        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        loop {
            match tokio::time::timeout(self.read_timeout, stream.next()).await {
                Ok(Some(Ok(data))) => {
                    file.write_all(&data).await?;
                    written += data.len() as u64;
                    progress.advance(data.len() as u64);
                }
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(None) => break,
                Err(_) => return Err(DownloadError::Stalled(self.read_timeout)),
            }
        }
        file.flush().await?;
        Ok(written)
    }
}

pub struct Downloader {
    config: DownloaderConfig,
}

impl Downloader {
    pub fn new(config: DownloaderConfig) -> Self {
        Self { config }
    }

    pub fn read_timeout(&self) -> Duration {
        self.config.read_timeout
    }

    /// Baixa a fonte para `dest`. Sucesso significa arquivo não vazio e,
    /// quando o tamanho foi informado, exatamente desse tamanho.
    pub async fn download(
        &self,
        source: Arc<dyn ByteSource>,
        dest: &Path,
        progress: Arc<Progress>,
    ) -> Result<u64, DownloadError> {
        progress.phase("Probing size");
        let total = source.probe_size().await;

        match total {
            Some(total) if total > self.config.chunk_floor => {
                match self.download_parallel(&source, dest, total, &progress).await {
                    Ok(()) => match verify_output(dest, Some(total)).await {
                        Ok(size) => return Ok(size),
                        Err(e) => {
                            warn!(error = %e, "parallel output failed verification, retrying sequentially");
                            remove_quietly(dest).await;
                        }
                    },
                    Err(e) if e.is_fatal() => {
                        remove_quietly(dest).await;
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(error = %e, "parallel download failed, falling back to sequential");
                    }
                }
            }
            Some(total) => debug!(total, "small file, downloading sequentially"),
            None => debug!("size unknown, downloading sequentially"),
        }

        self.download_sequential(source.as_ref(), dest, total, &progress).await
    }

    async fn download_parallel(
        &self,
        source: &Arc<dyn ByteSource>,
        dest: &Path,
        total: u64,
        progress: &Arc<Progress>,
    ) -> Result<(), DownloadError> {
        let workers = worker_count(total, self.config.target_chunk, self.config.max_workers);
        let ranges = partition(total, workers);
        info!(total, workers, "starting parallel download");
        progress.phase(format!("Downloading ({} workers)", workers));
        progress.start(Some(total));

        let mut tasks = JoinSet::new();
        let mut chunks = HashMap::new();
        for range in ranges.iter().copied() {
            let source = Arc::clone(source);
            let progress = Arc::clone(progress);
            let handle = tasks.spawn(async move { source.fetch_range(range, &progress).await });
            chunks.insert(handle.id(), range);
        }

        // Chunks terminam em qualquer ordem; cada buffer fica no seu índice
        let mut buffers: Vec<Option<Vec<u8>>> = vec![None; ranges.len()];
        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result.map_err(|e| e.to_string())),
                Err(e) => (e.id(), Err(e.to_string())),
            };
            let Some(range) = chunks.get(&id).copied() else {
                continue;
            };

            let failure = match result {
                Ok(bytes) if bytes.len() as u64 == range.len() => {
                    buffers[range.index] = Some(bytes);
                    continue;
                }
                Ok(bytes) => format!("expected {} bytes, got {}", range.len(), bytes.len()),
                Err(reason) => reason,
            };

            warn!(chunk = range.index, reason = %failure, "chunk failed, aborting parallel download");
            tasks.abort_all();
            return Err(DownloadError::ChunkFailure {
                index: range.index,
                reason: failure,
            });
        }

        debug!(received = progress.downloaded(), "all chunks received");
        progress.phase("Writing file");
        if let Err(e) = write_in_order(dest, buffers).await {
            remove_quietly(dest).await;
            return Err(e);
        }
        Ok(())
    }

    async fn download_sequential(
        &self,
        source: &dyn ByteSource,
        dest: &Path,
        total: Option<u64>,
        progress: &Progress,
    ) -> Result<u64, DownloadError> {
        progress.phase("Downloading");
        progress.start(total);

        if let Err(e) = source.fetch_all(dest, progress).await {
            remove_quietly(dest).await;
            return Err(e);
        }

        match verify_output(dest, total).await {
            Ok(size) => Ok(size),
            Err(e) => {
                remove_quietly(dest).await;
                Err(e)
            }
        }
    }
}

// Grava os buffers na ordem dos índices, liberando cada um logo após escrever
async fn write_in_order(dest: &Path, buffers: Vec<Option<Vec<u8>>>) -> Result<(), DownloadError> {
    let mut file = BufWriter::new(tokio::fs::File::create(dest).await?);
    for (index, slot) in buffers.into_iter().enumerate() {
        let Some(bytes) = slot else {
            return Err(DownloadError::ChunkFailure {
                index,
                reason: "missing chunk data".to_string(),
            });
        };
        file.write_all(&bytes).await?;
    }
    file.flush().await?;
    Ok(())
}

/// Arquivo existe, não está vazio e, se `expected` foi dado, tem esse tamanho.
pub async fn verify_output(dest: &Path, expected: Option<u64>) -> Result<u64, DownloadError> {
    let actual = match tokio::fs::metadata(dest).await {
        Ok(meta) => meta.len(),
        Err(_) => return Err(DownloadError::EmptyOutput),
    };
    if actual == 0 {
        return Err(DownloadError::EmptyOutput);
    }
    match expected {
        Some(expected) if expected != actual => Err(DownloadError::SizeMismatch { expected, actual }),
        _ => Ok(actual),
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove partial file");
        }
    }
}
