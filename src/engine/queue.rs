use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// A partner load correction that could not be applied inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadCompensation {
    pub partner_id: Uuid,
    pub delta: i32,
    pub attempt: u32,
}

impl LoadCompensation {
    pub fn release(partner_id: Uuid) -> Self {
        Self {
            partner_id,
            delta: -1,
            attempt: 0,
        }
    }
}

pub fn enqueue_compensation(state: &AppState, job: LoadCompensation) -> Result<(), AppError> {
    state.compensation_tx.try_send(job).map_err(|err| match err {
        TrySendError::Full(job) => AppError::Internal(format!(
            "compensation queue full, dropped load correction for partner {}",
            job.partner_id
        )),
        TrySendError::Closed(job) => AppError::Internal(format!(
            "compensation queue closed, dropped load correction for partner {}",
            job.partner_id
        )),
    })?;

    state.metrics.pending_compensations.inc();
    Ok(())
}
