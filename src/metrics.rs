use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::model::{MetricsSnapshot, MetricsUpdate};

/// Recurring metrics fetch for the project currently on screen.
pub struct MetricsRefreshLoop;

impl MetricsRefreshLoop {
    /// Starts fetching immediately and then every `tick` until `cancel` fires.
    ///
    /// Successful fetches are sent on the returned channel. Only the first
    /// fetch reports its error; later failures are logged and dropped so the
    /// previous snapshot stays on screen. The channel closes once the loop
    /// has stopped.
    pub fn start<F, Fut>(cancel: CancellationToken, tick: Duration, fetch: F) -> mpsc::Receiver<MetricsUpdate>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<MetricsSnapshot, ApiError>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let mut ticker = time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut first = true;
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = fetch() => result,
                };
                let update = match result {
                    Ok(snapshot) => Ok(Arc::new(snapshot)),
                    Err(e) if first => Err(e),
                    Err(e) => {
                        warn!("Metrics refresh failed, keeping previous snapshot: {}", e);
                        continue;
                    }
                };
                first = false;
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = tx.send(update) => sent,
                };
                if sent.is_err() {
                    break;
                }
            }
            debug!("Metrics refresh loop stopped");
        });
        rx
    }
}
