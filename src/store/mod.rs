pub mod memory;
pub mod rest;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::order::{Order, OrderStatus};
use crate::models::partner::Partner;

pub use memory::MemoryStore;
pub use rest::RestStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store request timed out")]
    Timeout,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed store response: {0}")]
    Malformed(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Closes the active attempt of an order and moves the order in one step.
#[derive(Debug, Clone)]
pub struct ResolveAssignment {
    pub order_id: Uuid,
    pub assignment_id: Uuid,
    pub outcome: AssignmentStatus,
    pub reason: Option<String>,
    pub order_status: OrderStatus,
}

/// Persistence for orders, partners and assignment history.
///
/// Listing operations return rows newest first with the id as tiebreak, so
/// repeated reads without writes are identical.
#[async_trait]
pub trait Store: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn list_orders(&self) -> Result<Vec<Order>, StoreError>;

    async fn get_order(&self, id: Uuid) -> Result<Order, StoreError>;

    async fn insert_order(&self, order: Order) -> Result<Order, StoreError>;

    /// Moves an order from `expected` to `next` without touching assignments.
    /// Fails with `Conflict` when the order is no longer in `expected`.
    async fn update_order_status(
        &self,
        id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Order, StoreError>;

    async fn list_partners(&self) -> Result<Vec<Partner>, StoreError>;

    async fn get_partner(&self, id: Uuid) -> Result<Partner, StoreError>;

    async fn insert_partner(&self, partner: Partner) -> Result<Partner, StoreError>;

    /// Replaces the editable partner fields. The load counter is left alone.
    async fn update_partner(&self, partner: Partner) -> Result<Partner, StoreError>;

    async fn delete_partner(&self, id: Uuid) -> Result<(), StoreError>;

    /// Adds `delta` to the partner's open load, floored at zero. Returns the
    /// new load.
    async fn adjust_partner_load(&self, id: Uuid, delta: i32) -> Result<u32, StoreError>;

    async fn latest_assignment(&self, order_id: Uuid) -> Result<Option<Assignment>, StoreError>;

    async fn list_assignments(
        &self,
        status: Option<AssignmentStatus>,
    ) -> Result<Vec<Assignment>, StoreError>;

    /// Records a new attempt: the order must be pending and the partner
    /// active with spare capacity. Links the order and bumps the load.
    async fn commit_assignment(&self, assignment: Assignment) -> Result<Order, StoreError>;

    /// Settles an active assignment and applies the order status. The
    /// partner load is not touched.
    async fn resolve_assignment(&self, resolve: ResolveAssignment) -> Result<Order, StoreError>;
}

pub(crate) fn sort_newest_first<T, F>(rows: &mut [T], key: F)
where
    F: Fn(&T) -> (chrono::DateTime<chrono::Utc>, Uuid),
{
    rows.sort_by(|a, b| {
        let (a_at, a_id) = key(a);
        let (b_at, b_id) = key(b);
        b_at.cmp(&a_at).then_with(|| a_id.cmp(&b_id))
    });
}

pub(crate) fn apply_load_delta(current: u32, delta: i32) -> u32 {
    if delta >= 0 {
        current.saturating_add(delta.unsigned_abs())
    } else {
        current.saturating_sub(delta.unsigned_abs())
    }
}
