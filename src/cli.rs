use crate::{
    capture_batch, format_bytes, format_duration, install_prometheus_exporter, run_server,
    AppState, Config, HistoryStore, SnapshotService,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "page-snapshot")]
#[command(about = "Archive web pages as self-contained static HTML snapshots")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Configuration file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Directory for archived snapshots")]
    pub snapshot_root: Option<PathBuf>,

    #[arg(long, global = true, help = "Public base URL for served snapshots")]
    pub base_url: Option<String>,

    #[arg(long, global = true, help = "HTTP fetch timeout in seconds")]
    pub request_timeout: Option<u64>,

    #[arg(long, global = true, help = "Browser navigation timeout in seconds")]
    pub browser_timeout: Option<u64>,

    #[arg(long, global = true, help = "Show the browser window")]
    pub headful: bool,

    #[arg(long, global = true, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, global = true, help = "Disable the browser strategy")]
    pub no_browser: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API
    Serve {
        #[arg(long, help = "Bind address, e.g. 0.0.0.0:8000")]
        bind: Option<String>,

        #[arg(long, help = "Expose Prometheus metrics on this port")]
        metrics_port: Option<u16>,
    },

    /// Capture one or more URLs
    Capture {
        #[arg(long, help = "Render every URL in the browser")]
        force_browser: bool,

        #[arg(short, long, help = "File with one URL per line")]
        input: Option<PathBuf>,

        #[arg(help = "URLs to capture")]
        urls: Vec<String>,
    },

    /// Inspect or prune the capture history
    History {
        #[command(subcommand)]
        action: HistoryCommand,
    },

    /// Validate configuration
    Validate {
        #[arg(short, long, help = "Configuration file to validate")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum HistoryCommand {
    /// Most recent entries, newest first
    List {
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Remove entries by id
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

impl Cli {
    /// Apply command-line overrides on top of a loaded config.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(root) = &self.snapshot_root {
            config.snapshot_root = root.clone();
        }
        if let Some(base_url) = &self.base_url {
            config.snapshot_base_url = base_url.clone();
        }
        if let Some(timeout) = self.request_timeout {
            config.request_timeout = Duration::from_secs(timeout);
        }
        if let Some(timeout) = self.browser_timeout {
            config.browser_timeout = Duration::from_secs(timeout);
        }
        if self.headful {
            config.headless = Some(false);
        }
        if let Some(chrome_path) = &self.chrome_path {
            config.chrome_path = Some(chrome_path.clone());
        }
        if let Commands::Serve { bind, metrics_port } = &self.command {
            if let Some(bind) = bind {
                config.bind_address = bind.clone();
            }
            if metrics_port.is_some() {
                config.metrics_port = *metrics_port;
            }
        }
    }
}

/// Load the config file (or defaults), apply CLI overrides and validate.
pub async fn load_config(args: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .await
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };

    args.apply_overrides(&mut config);
    config.validate()?;

    info!("Configuration loaded successfully");
    info!("Snapshot root: {}", config.snapshot_root.display());
    info!("History file: {}", config.history_file.display());
    info!("Request timeout: {:?}", config.request_timeout);
    info!("Browser timeout: {:?}", config.browser_timeout);

    Ok(config)
}

pub struct CliRunner {
    pub config: Arc<Config>,
    pub service: Arc<SnapshotService>,
    pub store: Arc<HistoryStore>,
}

impl CliRunner {
    pub fn new(config: Config, args: &Cli) -> Result<Self, Box<dyn std::error::Error>> {
        let config = Arc::new(config);

        let mut service = SnapshotService::new(config.clone())?;
        if args.no_browser {
            warn!("Browser strategy disabled; JS-heavy hosts will fail");
            service = service.without_browser();
        }

        let store = HistoryStore::new(config.history_file.clone())?;

        Ok(Self {
            config,
            service: Arc::new(service),
            store: Arc::new(store),
        })
    }

    pub async fn run(&self, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
        match command {
            Commands::Serve { .. } => self.serve().await,
            Commands::Capture {
                force_browser,
                input,
                urls,
            } => self.capture(urls, input, force_browser).await,
            Commands::History { action } => match action {
                HistoryCommand::List { limit } => self.list_history(limit).await,
                HistoryCommand::Delete { ids } => self.delete_history(ids).await,
            },
            Commands::Validate { config } => Self::validate_config(&config).await,
        }
    }

    pub async fn serve(&self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(port) = self.config.metrics_port {
            install_prometheus_exporter(port)?;
        }

        let listener = TcpListener::bind(&self.config.bind_address)
            .await
            .with_context(|| format!("binding {}", self.config.bind_address))?;

        let state = AppState {
            service: self.service.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
        };

        run_server(state, listener, shutdown_signal()).await
    }

    pub async fn capture(
        &self,
        mut urls: Vec<String>,
        input: Option<PathBuf>,
        force_browser: bool,
    ) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(path) = input {
            urls.extend(read_urls_from_file(&path).await?);
        }
        if urls.is_empty() {
            return Err("no URLs given; pass them as arguments or with --input".into());
        }

        let started = Instant::now();
        let results = capture_batch(&self.service, &self.store, &urls, force_browser).await;

        let mut failed = 0;
        for item in &results {
            match (&item.archived_url, &item.error) {
                (Some(archived), _) if item.is_success() => {
                    println!("ok    {} -> {}", item.original_url, archived)
                }
                (_, error) => {
                    failed += 1;
                    println!(
                        "FAIL  {}: {}",
                        item.original_url,
                        error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }

        info!(
            "Captured {}/{} URLs in {}",
            results.len() - failed,
            results.len(),
            format_duration(started.elapsed())
        );

        if failed > 0 {
            return Err(format!("{failed} of {} captures failed", results.len()).into());
        }
        Ok(())
    }

    pub async fn list_history(&self, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
        let entries = self.store.list_recent(limit).await?;
        if entries.is_empty() {
            println!("No history entries");
            return Ok(());
        }

        for entry in entries {
            let detail = entry
                .archived_url
                .as_deref()
                .or(entry.error.as_deref())
                .unwrap_or("");
            println!(
                "{}  {:<7}  {}  {}  {}",
                entry.captured_at,
                if entry.is_success() { "success" } else { "failed" },
                entry.id,
                entry.original_url,
                detail
            );
        }
        Ok(())
    }

    pub async fn delete_history(&self, ids: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
        let deleted = self.store.delete(ids).await?;
        println!("Deleted {deleted} history entries");
        Ok(())
    }

    pub async fn validate_config(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        println!("Validating configuration: {}", config_path.display());

        let config = Config::load(config_path).await?;
        config.validate()?;

        println!("Configuration is valid:");
        println!("  Snapshot root: {}", config.snapshot_root.display());
        println!("  Base URL: {}", config.snapshot_base_url);
        println!("  History file: {}", config.history_file.display());
        println!("  Request timeout: {:?}", config.request_timeout);
        println!("  Browser timeout: {:?}", config.browser_timeout);
        println!(
            "  Viewport: {}x{}",
            config.viewport.width, config.viewport.height
        );
        println!("  JS-heavy hosts: {}", config.js_heavy_hosts.join(", "));
        if let Ok(meta) = fs::metadata(&config.history_file).await {
            println!("  History size: {}", format_bytes(meta.len() as usize));
        }

        Ok(())
    }
}

pub async fn read_urls_from_file(path: &Path) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading URL list {}", path.display()))?;
    let urls: Vec<String> = content
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.to_string())
        .collect();

    Ok(urls)
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

pub fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .map_err(|e| -> Box<dyn std::error::Error> { e })?;

    Ok(())
}
