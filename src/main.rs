use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod bait;
mod decoder;
mod downloader;
mod error;
mod extractor;
mod fallback;
mod grabber;
mod http;
mod page;
mod progress;
mod settings;
mod strategies;
mod ui;
mod utils;

use fallback::YtDlpFetcher;
use grabber::{DownloadOutcome, Grabber};
use progress::ProgressEvent;
use settings::Settings;

#[derive(Parser)]
#[command(name = "anigrab", version, about = "Extrai e baixa vídeos de páginas de players embutidos")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Page URLs to extract and download
    urls: Vec<String>,

    /// File with one URL per line (blank lines and `#` comments are skipped)
    #[arg(short, long)]
    list: Option<PathBuf>,

    /// Number of URLs downloaded at the same time
    #[arg(short, long)]
    workers: Option<usize>,

    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Maximum number of parallel chunk workers per file
    #[arg(long)]
    max_workers: Option<usize>,

    /// Maximum redirect/iframe hops per URL
    #[arg(long)]
    max_hops: Option<usize>,

    /// Overwrite existing files without asking
    #[arg(long)]
    overwrite: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective settings
    Settings,

    /// Save the effective settings to the config file
    SaveSettings,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = effective_settings(&cli);

    match &cli.command {
        Some(Commands::Settings) => {
            let json = serde_json::to_string_pretty(&settings)
                .context("Falha ao serializar configurações")?;
            println!("{}", json);
            return Ok(());
        }
        Some(Commands::SaveSettings) => {
            let path = settings.save()?;
            println!("Settings saved to {}", path.display());
            return Ok(());
        }
        None => {}
    }

    check_dependencies();

    let from_list = cli.list.is_some();
    let mut urls = cli.urls.clone();
    if let Some(list) = &cli.list {
        urls.extend(read_url_list(list)?);
    }
    if urls.is_empty() {
        let url = ui::prompt_input("Enter the page URL")?;
        if url.is_empty() {
            return Err(anyhow!("No URL given"));
        }
        urls.push(url);
    }

    // Confirmação interativa só faz sentido com uma única URL
    let interactive = urls.len() == 1 && !from_list;
    let download_folder = settings.download_folder.clone();
    let grabber =
        Grabber::new(settings, interactive)?.with_progress_callback(Arc::new(log_phase));

    info!(count = urls.len(), "starting");
    let outcomes = grabber.grab_all(&urls).await;

    if from_list {
        match utils::remove_part_files(&download_folder) {
            Ok(0) => {}
            Ok(n) => info!(removed = n, "removed leftover .part files"),
            Err(e) => warn!(error = %e, "failed to clean up .part files"),
        }
    }

    let failed = print_summary(&outcomes);
    if failed > 0 {
        return Err(anyhow!("{} of {} downloads failed", failed, outcomes.len()));
    }
    Ok(())
}

// Fases de cada download vão para o log; os bytes já aparecem na barra
fn log_phase(event: &ProgressEvent) {
    if let ProgressEvent::Phase(phase) = event {
        debug!(phase = %phase, "progress");
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

// Arquivo de configuração + sobrescritas da linha de comando
fn effective_settings(cli: &Cli) -> Settings {
    let mut settings = Settings::load().unwrap_or_else(|e| {
        warn!(error = %e, "could not load settings, using defaults");
        Settings::default()
    });

    if let Some(workers) = cli.workers {
        settings.max_concurrent_downloads = workers.max(1);
    }
    if let Some(output) = &cli.output {
        settings.download_folder = output.clone();
    }
    if let Some(max_workers) = cli.max_workers {
        settings.max_workers = max_workers.max(1);
    }
    if let Some(max_hops) = cli.max_hops {
        settings.max_hops = max_hops;
    }
    if cli.overwrite {
        settings.overwrite = true;
    }
    settings
}

// Uma URL por linha; ignora linhas vazias e comentários
fn read_url_list(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Falha ao ler lista de URLs: {}", path.display()))?;
    Ok(parse_url_list(&contents))
}

fn parse_url_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn print_summary(outcomes: &[DownloadOutcome]) -> usize {
    let succeeded = outcomes.iter().filter(|o| o.success).count();
    let failed = outcomes.len() - succeeded;

    println!();
    println!("Summary: {} succeeded, {} failed", succeeded, failed);
    for outcome in outcomes {
        match (&outcome.path, &outcome.reason) {
            (Some(path), None) => println!("  [ok]   {} -> {}", outcome.target, path.display()),
            (Some(path), Some(note)) => {
                println!("  [ok]   {} -> {} ({})", outcome.target, path.display(), note)
            }
            (None, reason) => println!(
                "  [fail] {}: {}",
                outcome.target,
                reason.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    failed
}

fn check_dependencies() {
    if !YtDlpFetcher::default().is_available() {
        warn!("yt-dlp is not installed; HLS streams and fallback downloads will fail");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_list_skips_blank_and_comment_lines() {
        let contents = "\n# season 1\nhttps://site.example/e/1\n   \n  https://site.example/e/2  \n#https://site.example/e/3\n";
        assert_eq!(
            parse_url_list(contents),
            vec!["https://site.example/e/1", "https://site.example/e/2"]
        );
    }

    #[test]
    fn cli_overrides() {
        let cli = Cli::parse_from([
            "anigrab",
            "-w",
            "2",
            "--max-workers",
            "8",
            "--overwrite",
            "-o",
            "/tmp/out",
            "https://site.example/e/1",
        ]);
        assert_eq!(cli.urls, vec!["https://site.example/e/1"]);

        let settings = effective_settings(&cli);
        assert_eq!(settings.max_concurrent_downloads, 2);
        assert_eq!(settings.max_workers, 8);
        assert!(settings.overwrite);
        assert_eq!(settings.download_folder, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn summary_counts_failures() {
        let outcomes = vec![
            DownloadOutcome {
                target: "a".to_string(),
                success: true,
                path: Some(PathBuf::from("a_SS.mp4")),
                reason: None,
            },
            DownloadOutcome {
                target: "b".to_string(),
                success: false,
                path: None,
                reason: Some("no media source found in b".to_string()),
            },
        ];
        assert_eq!(print_summary(&outcomes), 1);
    }
}
