//! lagwatch - network latency monitor.
//!
//! Pings a set of targets on a fixed interval and pushes rate-limited
//! webhook alerts when round-trip latency crosses a threshold.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lagwatch::config::{self, CliOverrides, Config, EnvOverrides};
use lagwatch::monitor::Monitor;
use lagwatch::notify::{Notifier, NotifyOutcome};

#[derive(Parser, Debug)]
#[command(
    name = "lagwatch",
    version,
    about = "Network latency monitor with webhook alerts"
)]
struct Cli {
    /// Path to the JSON config file (a starter file is created if missing)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Latency threshold in milliseconds, overrides the config file
    #[arg(short = 't', long)]
    threshold: Option<f64>,

    /// Poll interval in seconds, overrides the config file
    #[arg(short = 'i', long)]
    interval: Option<u64>,

    /// Targets to monitor, overrides the config file
    #[arg(long, num_args = 1..)]
    targets: Option<Vec<String>>,

    /// Send a test message through the configured webhook and exit
    #[arg(long)]
    test_notification: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lagwatch=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    // Any configuration failure here aborts startup with a non-zero
    // exit; after this point nothing is allowed to kill the process.
    let file = config::load_file(&cli.config)?;
    let cfg = config::resolve(
        file,
        EnvOverrides::capture(),
        CliOverrides {
            latency_threshold_ms: cli.threshold,
            poll_interval_s: cli.interval,
            targets: cli.targets,
        },
    )?;

    if cli.test_notification {
        return run_notification_test(&cfg).await;
    }

    let monitor = Monitor::new(cfg);
    monitor.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("stop requested, finishing the current cycle");
    monitor.stop().await;

    Ok(())
}

/// Send one test message through the configured webhook so a fresh
/// install can verify its integration before anything alerts for real.
async fn run_notification_test(
    cfg: &Config,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let notifier = Notifier::from_config(cfg);
    let message = format!(
        "🧪 Webhook test\n\n\
         Client: {}\n\
         This is a test notification from lagwatch.\n\
         Time: {}",
        cfg.client_label,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
    );

    match notifier.notify(&message).await {
        Ok(NotifyOutcome::Delivered) => {
            tracing::info!("test notification delivered");
            Ok(())
        }
        Ok(NotifyOutcome::Skipped) => {
            tracing::warn!("notifications are disabled or no webhook is configured");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "test notification failed");
            Err(e.into())
        }
    }
}
