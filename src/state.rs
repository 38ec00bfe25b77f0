use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::engine::queue::LoadCompensation;
use crate::engine::suggest::PartnerSuggester;
use crate::models::assignment::AssignmentEvent;
use crate::observability::metrics::Metrics;
use crate::store::Store;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub suggester: Arc<dyn PartnerSuggester>,
    pub compensation_tx: mpsc::Sender<LoadCompensation>,
    pub assignment_events_tx: broadcast::Sender<AssignmentEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        suggester: Arc<dyn PartnerSuggester>,
        compensation_queue_size: usize,
        event_buffer_size: usize,
    ) -> (Self, mpsc::Receiver<LoadCompensation>) {
        let (compensation_tx, compensation_rx) = mpsc::channel(compensation_queue_size);
        let (assignment_events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        (
            Self {
                store,
                suggester,
                compensation_tx,
                assignment_events_tx,
                metrics: Metrics::new(),
            },
            compensation_rx,
        )
    }

    pub fn publish(&self, event: AssignmentEvent) {
        // Err only means no live feed is connected.
        let _ = self.assignment_events_tx.send(event);
    }
}
