//! Signing service entry point.
//!
//! Loads settings, opens the configured signer, keeps its keys rotated and exits on
//! Ctrl-C.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use error_stack::{Report, ResultExt};
use log::LevelFilter;
use tokio_util::sync::CancellationToken;

use signet_common::constants::{DEFAULT_CONFIG_PATH, ENV_CONFIG_PATH};
use signet_common::error::SignerError;
use signet_common::rotation::start_key_rotation;
use signet_common::settings::Settings;
use signet_common::signer::Signer as _;

#[derive(Parser)]
#[command(name = "signet")]
#[command(about = "Token signing service backed by local or transit-held keys")]
#[command(version)]
struct Cli {
    /// Path to the TOML settings file
    #[arg(long, short, env = ENV_CONFIG_PATH)]
    #[arg(default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if log::log_enabled!(log::Level::Error) {
                log::error!("{:?}", e);
            } else {
                eprintln!("Error: {:?}", e);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Report<SignerError>> {
    let settings = Settings::load(&cli.config)?;
    init_logger(settings.logging.level_filter())?;
    log::info!("loaded settings from {}", cli.config.display());

    let signer = settings.signer.open_signer().await?;

    let cancel = CancellationToken::new();
    let rotation = start_key_rotation(
        Arc::clone(&signer),
        settings.rotation.interval(),
        cancel.clone(),
    )
    .await;

    match signer.signing_keys().await {
        Ok(keys) => log::info!("publishing {} signing keys", keys.jwks.keys.len()),
        Err(e) => log::warn!("no signing keys available yet: {:?}", e),
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for shutdown signal: {}", e);
    }
    log::info!("shutting down");

    cancel.cancel();
    if let Some(handle) = rotation {
        if let Err(e) = handle.await {
            log::error!("key rotation task failed: {}", e);
        }
    }

    Ok(())
}

fn init_logger(level: LevelFilter) -> Result<(), Report<SignerError>> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}  {} {}",
                chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()
        .change_context(SignerError::Configuration {
            message: "Failed to initialize logger".to_string(),
        })
}
