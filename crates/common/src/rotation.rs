//! Periodic key rotation.
//!
//! [`start_key_rotation`] rotates once before returning, so a cold local backend has keys
//! before the service takes traffic, then keeps rotating on a fixed interval from a
//! background task until cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::SignerError;
use crate::signer::Signer;

/// Default time between rotation attempts.
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(30);

/// Runs an initial rotation and starts the periodic rotation task.
///
/// Returns `None` when the backend does not support rotation; in that case no task is
/// started. Failures never abort the caller, they are only logged.
pub async fn start_key_rotation(
    signer: Arc<dyn Signer>,
    interval: Duration,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    match signer.rotate_key().await {
        Ok(()) => {}
        Err(e) => match e.current_context() {
            SignerError::RotationUnsupported => {
                log::info!("key rotation not supported by signer, periodic rotation disabled");
                return None;
            }
            SignerError::RotationRaced => {
                log::info!("key rotation already performed by another instance");
            }
            _ => {
                log::error!("failed to rotate keys: {:?}", e);
            }
        },
    }

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("key rotation task shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = signer.rotate_key().await {
                        if e.current_context().is_rotation_sentinel() {
                            log::debug!("key rotation skipped: {}", e.current_context());
                        } else {
                            log::error!("failed to rotate keys: {:?}", e);
                        }
                    }
                }
            }
        }
    });

    Some(handle)
}
