// src/progress.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use indicatif::{ProgressBar, ProgressStyle};

const BAR_TEMPLATE: &str =
    "{msg:.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";
const SPINNER_TEMPLATE: &str = "{spinner} {msg:.cyan} {bytes} ({bytes_per_sec})";

/// Eventos emitidos durante extração e download, para quem não usa o terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Phase(String),
    Bytes { done: u64, total: Option<u64> },
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

// Contador compartilhado entre os workers de chunk + barra do indicatif
pub struct Progress {
    downloaded: AtomicU64,
    total: AtomicU64,
    bar: ProgressBar,
    callback: Option<ProgressCallback>,
}

impl Progress {
    pub fn new(bar: ProgressBar, callback: Option<ProgressCallback>) -> Self {
        Self {
            downloaded: AtomicU64::new(0),
            total: AtomicU64::new(0),
            bar,
            callback,
        }
    }

    #[cfg(test)]
    pub fn hidden() -> Self {
        Self::new(ProgressBar::hidden(), None)
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(cb) = &self.callback {
            cb(&event);
        }
    }

    pub fn phase(&self, message: impl Into<String>) {
        let message = message.into();
        self.bar.set_message(message.clone());
        self.emit(ProgressEvent::Phase(message));
    }

    /// Zera o contador. `None` deixa a barra sem limite (spinner).
    pub fn start(&self, total: Option<u64>) {
        self.downloaded.store(0, Ordering::SeqCst);
        self.total.store(total.unwrap_or(0), Ordering::SeqCst);
        self.bar.set_position(0);
        match total {
            Some(total) => {
                self.bar.set_style(
                    ProgressStyle::with_template(BAR_TEMPLATE)
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("=> "),
                );
                self.bar.set_length(total);
            }
            None => {
                self.bar.set_style(
                    ProgressStyle::with_template(SPINNER_TEMPLATE)
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
            }
        }
    }

    pub fn advance(&self, bytes: u64) {
        let done = self.downloaded.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.bar.set_position(done);
        let total = match self.total.load(Ordering::Relaxed) {
            0 => None,
            t => Some(t),
        };
        self.emit(ProgressEvent::Bytes { done, total });
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::SeqCst)
    }

    pub fn finish(&self, message: impl Into<String>) {
        self.bar.finish_with_message(message.into());
    }

    pub fn abandon(&self, message: impl Into<String>) {
        self.bar.abandon_with_message(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn advance_accumulates_and_reports() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let progress = Progress::new(
            ProgressBar::hidden(),
            Some(Arc::new(move |e: &ProgressEvent| {
                sink.lock().unwrap().push(e.clone());
            })),
        );

        progress.phase("downloading");
        progress.start(Some(10));
        progress.advance(4);
        progress.advance(6);

        assert_eq!(progress.downloaded(), 10);
        let events = events.lock().unwrap();
        assert_eq!(events[0], ProgressEvent::Phase("downloading".to_string()));
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::Bytes { done: 10, total: Some(10) })
        );
    }

    #[test]
    fn start_resets_counter() {
        let progress = Progress::hidden();
        progress.start(None);
        progress.advance(100);
        progress.start(Some(50));
        assert_eq!(progress.downloaded(), 0);
    }
}
