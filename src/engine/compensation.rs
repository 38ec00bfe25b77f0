use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::engine::queue::{enqueue_compensation, LoadCompensation};
use crate::state::AppState;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

/// Drains the compensation queue, re-queueing corrections that fail again
/// until `max_attempts` is reached.
pub async fn run_compensation_worker(
    state: Arc<AppState>,
    mut rx: mpsc::Receiver<LoadCompensation>,
    policy: RetryPolicy,
) {
    info!(
        max_attempts = policy.max_attempts,
        "compensation worker started"
    );

    while let Some(job) = rx.recv().await {
        state.metrics.pending_compensations.dec();

        let attempt = job.attempt + 1;
        match state
            .store
            .adjust_partner_load(job.partner_id, job.delta)
            .await
        {
            Ok(load) => {
                info!(
                    partner_id = %job.partner_id,
                    delta = job.delta,
                    attempt,
                    current_load = load,
                    "partner load corrected"
                );
            }
            Err(err) if attempt >= policy.max_attempts => {
                error!(
                    partner_id = %job.partner_id,
                    delta = job.delta,
                    attempt,
                    error = %err,
                    "giving up on partner load correction; counter has drifted"
                );
            }
            Err(err) => {
                warn!(
                    partner_id = %job.partner_id,
                    attempt,
                    error = %err,
                    "partner load correction failed; retrying"
                );
                sleep(policy.delay).await;

                let retry = LoadCompensation { attempt, ..job };
                if let Err(err) = enqueue_compensation(&state, retry) {
                    error!(error = %err, "failed to re-queue partner load correction");
                }
            }
        }
    }

    warn!("compensation worker stopped: queue channel closed");
}
