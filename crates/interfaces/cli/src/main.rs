mod cycle;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use notifybot_config::{AppConfig, TelemetryConfig};

#[derive(Debug, Parser)]
#[command(
    name = "notifybot",
    version,
    about = "Direct-messages Squabbles watchers about new posts and busy chats"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "config/default.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one notification cycle and exit.
    Run {
        /// Log messages instead of sending them; do not save watermarks.
        #[arg(long)]
        dry_run: bool,
    },
    /// Run a cycle every `--every` seconds until interrupted.
    Watch {
        #[arg(long, default_value_t = 300)]
        every: u64,
        #[arg(long)]
        dry_run: bool,
    },
    /// Load the watermark document and print every source.
    Check,
    /// Print the effective configuration with secrets hidden.
    #[command(name = "config")]
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config)?;
    let _log_guard = init_tracing(&config.telemetry)?;

    match cli.command.unwrap_or(Commands::Run { dry_run: false }) {
        Commands::Run { dry_run } => cycle::run_once(&config, dry_run).await?,
        Commands::Watch { every, dry_run } => {
            if every == 0 {
                bail!("--every must be at least 1 second");
            }
            cycle::watch(&config, Duration::from_secs(every), dry_run).await?
        }
        Commands::Check => cycle::check(&config).await?,
        Commands::ShowConfig => {
            print!("{}", config.redacted().render()?);
        }
    }
    Ok(())
}

/// `RUST_LOG` wins over `telemetry.log_level`.  With `telemetry.log_file`
/// set, lines are also appended to that file; the returned guard must live
/// until exit so buffered lines are flushed.
fn init_tracing(telemetry: &TelemetryConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&telemetry.log_level))?;

    let Some(log_file) = telemetry.log_file.as_deref() else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(None);
    };

    let path = Path::new(log_file);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let Some(file_name) = path.file_name() else {
        bail!("telemetry.log_file must name a file, got {log_file:?}");
    };
    std::fs::create_dir_all(dir)?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Ok(Some(guard))
}
