use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use chzzk_rec::config::store::CONFIG_FILE_NAME;
use chzzk_rec::config::{ConfigStore, CredentialsProvider, RecorderSettings};
use chzzk_rec::dashboard::Dashboard;
use chzzk_rec::logging::{LoggingOptions, init_logging};
use chzzk_rec::manager::{TaskManager, desired_tasks};
use chzzk_rec::monitor::ChzzkClient;
use chzzk_rec::panic_hook;
use chzzk_rec::pipeline::{PipelineConfig, PipelineSupervisor};
use chzzk_rec::recorder::{TaskContext, TaskSettings};
use chzzk_rec::resolver::ChzzkResolver;

/// Exit code when no channel is configured or active.
const EXIT_NO_CHANNELS: u8 = 2;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "CHZZK_REC_CONFIG", default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    /// Directory for daily log files
    #[arg(long, env = "CHZZK_REC_LOG_DIR", default_value = "logs")]
    log_dir: PathBuf,

    /// Log to the terminal instead of showing the live dashboard
    #[arg(long)]
    no_dashboard: bool,

    /// Log filter directive, e.g. "chzzk_rec=debug"
    #[arg(long)]
    log_filter: Option<String>,

    /// Check the configuration and external tools, then exit
    #[arg(long)]
    check: bool,
}

#[derive(Debug)]
struct Binaries {
    streamlink: Option<String>,
    ffmpeg: Option<String>,
}

impl Binaries {
    fn all_found(&self) -> bool {
        self.streamlink.is_some() && self.ffmpeg.is_some()
    }
}

async fn detect_binaries(settings: &RecorderSettings) -> Binaries {
    let streamlink = settings.streamlink_program();
    let ffmpeg = settings.ffmpeg_program();
    let detected = tokio::task::spawn_blocking(move || Binaries {
        streamlink: process_utils::detect_version(&streamlink, "--version"),
        ffmpeg: process_utils::detect_version(&ffmpeg, "-version"),
    })
    .await;

    let binaries = detected.unwrap_or(Binaries {
        streamlink: None,
        ffmpeg: None,
    });
    match &binaries.streamlink {
        Some(version) => info!(version = %version, "Found streamlink"),
        None => error!(path = %settings.streamlink_program().display(), "streamlink not found, recordings will fail to start"),
    }
    match &binaries.ffmpeg {
        Some(version) => info!(version = %version, "Found ffmpeg"),
        None => error!(path = %settings.ffmpeg_program().display(), "ffmpeg not found, recordings will fail to start"),
    }
    binaries
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                _ = terminate.recv() => info!("Received SIGTERM"),
            }
        }
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            info!("Received SIGINT");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl-C");
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let store = ConfigStore::new(&args.config);
    let created = store.ensure_exists();
    let logging_enabled = store.load_logging_enabled();
    let show_dashboard = !args.no_dashboard && !args.check && std::io::stdout().is_terminal();

    let (logging, _guard) = init_logging(&LoggingOptions {
        log_dir: args.log_dir.clone(),
        console: !show_dashboard,
        file: logging_enabled,
    })
    .context("Failed to initialize logging")?;
    if let Some(filter) = &args.log_filter {
        logging.set_filter(filter)?;
    }
    panic_hook::install(logging_enabled.then(|| args.log_dir.clone()));

    info!(version = env!("CARGO_PKG_VERSION"), config = %store.path().display(), "chzzk-rec starting");

    if let Err(e) = created {
        warn!(error = %e, "Could not create configuration file, using defaults");
    }

    // Reload after logging is up so configuration problems get logged.
    let config = store.load();
    let binaries = detect_binaries(&config.settings).await;
    let desired = desired_tasks(&config);

    if args.check {
        println!("{} {}", "Configuration:".green().bold(), store.path().display());
        println!("{} {} configured, {} active", "Channels:".green(), config.channels.len(), desired.len());
        println!("{} {}", "Logged in:".green(), !config.credentials.is_empty());
        for (name, version) in [("streamlink", &binaries.streamlink), ("ffmpeg", &binaries.ffmpeg)] {
            match version {
                Some(v) => println!("{} {}", format!("{name}:").green(), v.cyan()),
                None => println!("{} {}", format!("{name}:").green(), "not found".red()),
            }
        }
        return Ok(if binaries.all_found() && !desired.is_empty() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    if desired.is_empty() {
        error!(config = %store.path().display(), "No active channels configured");
        if show_dashboard {
            eprintln!("{} no active channels in {}", "Error:".red().bold(), store.path().display());
        }
        return Ok(ExitCode::from(EXIT_NO_CHANNELS));
    }

    let cancel = CancellationToken::new();
    if logging_enabled {
        logging.start_retention_cleanup(cancel.child_token());
    }

    let credentials = Arc::new(CredentialsProvider::from_store(store.clone()));
    let client = ChzzkClient::new().context("Failed to build HTTP client")?;
    let resolver = Arc::new(ChzzkResolver::new(client.clone()));
    let pipeline_config = PipelineConfig::from_settings(&config.settings);
    let shutdown_timeout = pipeline_config.stop_grace * 3 + Duration::from_secs(5);
    let runner = Arc::new(PipelineSupervisor::new(
        pipeline_config,
        client.http().clone(),
        resolver.clone(),
        credentials.clone(),
    ));

    let ctx = TaskContext {
        client: Arc::new(client),
        resolver,
        runner,
        credentials: credentials.clone(),
    };
    let mut manager = TaskManager::new(ctx, TaskSettings::from_settings(&config.settings), shutdown_timeout);
    manager.start(desired);

    if show_dashboard {
        let dashboard = Dashboard::new(manager.board(), logging.subscribe());
        tokio::spawn(dashboard.run(cancel.child_token()));
    }

    let shutdown = cancel.child_token();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_token.cancel();
    });

    let reload_interval = config.settings.config_reload_interval();
    let report = manager
        .run(store, credentials, config, reload_interval, shutdown)
        .await;
    cancel.cancel();

    if !report.all_graceful() {
        warn!(forced = report.forced_terminations, "Some tasks had to be aborted");
    }
    info!("chzzk-rec stopped");
    Ok(ExitCode::SUCCESS)
}
