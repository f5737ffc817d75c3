//! Background liveness monitor: detects agent processes that died
//! without a tracked `stop`.
//!
//! Each pass runs [`SessionController::sweep_liveness`]; sessions whose
//! process is gone move to `failed` and every client is notified through the
//! controller's event channel.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::controller::SessionController;

/// Spawn the liveness monitor, polling every `interval` until `cancel` fires.
#[must_use]
pub fn spawn_liveness_monitor(
    controller: Arc<SessionController>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs_f64(), "liveness monitor started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("liveness monitor shutting down");
                    break;
                }
                () = tokio::time::sleep(interval) => {}
            }

            let failed = controller.sweep_liveness().await;
            if failed > 0 {
                info!(failed, "liveness sweep failed sessions");
            } else {
                debug!("liveness sweep clean");
            }
        }
    })
}
