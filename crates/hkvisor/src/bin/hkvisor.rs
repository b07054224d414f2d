//! hkvisor: emails a snapshot whenever a camera reports a motion event.
//!
//! Usage:
//!   hkvisor
//!   hkvisor -c /etc/hkvisor.yml --verbose

use argh::FromArgs;
use std::path::PathBuf;
use tokio::sync::watch;

use hkvisor::config::Config;

/// Watch camera alert streams and email a snapshot for each new event.
#[derive(FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c', default = "default_config_path()")]
    config: PathBuf,

    /// enable debug logging
    #[argh(switch, short = 'v')]
    verbose: bool,
}

fn default_config_path() -> PathBuf {
    PathBuf::from("hkvisor.yml")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    log::info!("Loading config from: {}", args.config.display());
    let config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    log::info!(
        "{} camera(s), timezone {}, snapshots in {}",
        config.cameras.len(),
        config.timezone,
        config.snapshot_dir.display()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    ctrlc::set_handler(move || {
        log::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    })?;

    hkvisor::daemon::run(config, shutdown_rx).await?;

    log::info!("hkvisor stopped");
    Ok(())
}
