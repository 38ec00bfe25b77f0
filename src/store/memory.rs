use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::{apply_load_delta, sort_newest_first, ResolveAssignment, Store, StoreError};
use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::order::{Order, OrderStatus};
use crate::models::partner::Partner;

/// In-process tables. Multi-row writes lock the order first, then the
/// partner, then the assignment.
#[derive(Default)]
pub struct MemoryStore {
    orders: DashMap<Uuid, Order>,
    partners: DashMap<Uuid, Partner>,
    assignments: DashMap<Uuid, Assignment>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn list_orders(&self) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        sort_newest_first(&mut orders, |o| (o.created_at, o.id));
        Ok(orders)
    }

    async fn get_order(&self, id: Uuid) -> Result<Order, StoreError> {
        self.orders
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::not_found("order", id))
    }

    async fn insert_order(&self, order: Order) -> Result<Order, StoreError> {
        self.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn update_order_status(
        &self,
        id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Order, StoreError> {
        let mut order = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("order", id))?;

        if order.status != expected {
            return Err(StoreError::Conflict(format!(
                "order {id} is {} not {expected}",
                order.status
            )));
        }

        order.apply_status(next);
        Ok(order.clone())
    }

    async fn list_partners(&self) -> Result<Vec<Partner>, StoreError> {
        let mut partners: Vec<Partner> = self
            .partners
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        sort_newest_first(&mut partners, |p| (p.created_at, p.id));
        Ok(partners)
    }

    async fn get_partner(&self, id: Uuid) -> Result<Partner, StoreError> {
        self.partners
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::not_found("partner", id))
    }

    async fn insert_partner(&self, partner: Partner) -> Result<Partner, StoreError> {
        self.partners.insert(partner.id, partner.clone());
        Ok(partner)
    }

    async fn update_partner(&self, partner: Partner) -> Result<Partner, StoreError> {
        let mut existing = self
            .partners
            .get_mut(&partner.id)
            .ok_or_else(|| StoreError::not_found("partner", partner.id))?;

        let current_load = existing.current_load;
        let created_at = existing.created_at;
        *existing = Partner {
            current_load,
            created_at,
            ..partner
        };
        Ok(existing.clone())
    }

    async fn delete_partner(&self, id: Uuid) -> Result<(), StoreError> {
        self.partners
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("partner", id))
    }

    async fn adjust_partner_load(&self, id: Uuid, delta: i32) -> Result<u32, StoreError> {
        let mut partner = self
            .partners
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("partner", id))?;

        partner.current_load = apply_load_delta(partner.current_load, delta);
        Ok(partner.current_load)
    }

    async fn latest_assignment(&self, order_id: Uuid) -> Result<Option<Assignment>, StoreError> {
        let mut history: Vec<Assignment> = self
            .assignments
            .iter()
            .filter(|entry| entry.value().order_id == order_id)
            .map(|entry| entry.value().clone())
            .collect();
        sort_newest_first(&mut history, |a| (a.created_at, a.id));
        Ok(history.into_iter().next())
    }

    async fn list_assignments(
        &self,
        status: Option<AssignmentStatus>,
    ) -> Result<Vec<Assignment>, StoreError> {
        let mut assignments: Vec<Assignment> = self
            .assignments
            .iter()
            .filter(|entry| status.is_none_or(|wanted| entry.value().status == wanted))
            .map(|entry| entry.value().clone())
            .collect();
        sort_newest_first(&mut assignments, |a| (a.created_at, a.id));
        Ok(assignments)
    }

    async fn commit_assignment(&self, assignment: Assignment) -> Result<Order, StoreError> {
        let partner_id = assignment
            .partner_id
            .ok_or_else(|| StoreError::Conflict("assignment has no partner".to_string()))?;

        let mut order = self
            .orders
            .get_mut(&assignment.order_id)
            .ok_or_else(|| StoreError::not_found("order", assignment.order_id))?;

        if order.status != OrderStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "order {} is {}, only pending orders can be assigned",
                order.id, order.status
            )));
        }

        let mut partner = self
            .partners
            .get_mut(&partner_id)
            .ok_or_else(|| StoreError::not_found("partner", partner_id))?;

        if !partner.is_active() {
            return Err(StoreError::Conflict(format!(
                "partner {} is {}",
                partner.id,
                partner.status.as_str()
            )));
        }
        if !partner.has_capacity() {
            return Err(StoreError::Conflict(format!(
                "partner {} is at capacity ({} open deliveries)",
                partner.id, partner.current_load
            )));
        }

        partner.current_load = apply_load_delta(partner.current_load, 1);
        order.assign_to(partner_id);
        self.assignments.insert(assignment.id, assignment);

        Ok(order.clone())
    }

    async fn resolve_assignment(&self, resolve: ResolveAssignment) -> Result<Order, StoreError> {
        let mut order = self
            .orders
            .get_mut(&resolve.order_id)
            .ok_or_else(|| StoreError::not_found("order", resolve.order_id))?;

        let mut assignment = self
            .assignments
            .get_mut(&resolve.assignment_id)
            .ok_or_else(|| StoreError::not_found("assignment", resolve.assignment_id))?;

        if assignment.order_id != resolve.order_id {
            return Err(StoreError::Conflict(format!(
                "assignment {} belongs to order {}",
                assignment.id, assignment.order_id
            )));
        }
        if assignment.status != AssignmentStatus::Active {
            return Err(StoreError::Conflict(format!(
                "assignment {} is already {}",
                assignment.id,
                assignment.status.as_str()
            )));
        }

        assignment.status = resolve.outcome;
        assignment.failure_reason = resolve.reason;
        order.apply_status(resolve.order_status);

        Ok(order.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveTime, Utc};
    use uuid::Uuid;

    use super::MemoryStore;
    use crate::models::assignment::{Assignment, AssignmentStatus};
    use crate::models::order::{Order, OrderStatus};
    use crate::models::partner::{Partner, PartnerStatus, MAX_PARTNER_LOAD};
    use crate::store::{ResolveAssignment, Store, StoreError};

    fn order() -> Order {
        Order {
            id: Uuid::new_v4(),
            customer_name: "Meera".to_string(),
            customer_phone: "+91 90000 11111".to_string(),
            items: Vec::new(),
            area: "Indiranagar".to_string(),
            address: "100 Feet Road".to_string(),
            value: 450.0,
            status: OrderStatus::Pending,
            assigned_partner_id: None,
            created_at: Utc::now(),
        }
    }

    fn partner(load: u32) -> Partner {
        Partner {
            id: Uuid::new_v4(),
            name: "Kiran".to_string(),
            phone: "+91 90000 22222".to_string(),
            email: None,
            status: PartnerStatus::Active,
            assigned_areas: vec!["Indiranagar".to_string()],
            shift_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            shift_end: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
            current_load: load,
            rating: 4.2,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn commit_links_order_and_bumps_load() {
        let store = MemoryStore::new();
        let order = store.insert_order(order()).await.unwrap();
        let partner = store.insert_partner(partner(2)).await.unwrap();

        let committed = store
            .commit_assignment(Assignment::new(order.id, partner.id))
            .await
            .unwrap();

        assert_eq!(committed.status, OrderStatus::Assigned);
        assert_eq!(committed.assigned_partner_id, Some(partner.id));
        assert_eq!(store.get_partner(partner.id).await.unwrap().current_load, 3);
    }

    #[tokio::test]
    async fn commit_rejects_partner_at_capacity() {
        let store = MemoryStore::new();
        let order = store.insert_order(order()).await.unwrap();
        let partner = store.insert_partner(partner(MAX_PARTNER_LOAD)).await.unwrap();

        let err = store
            .commit_assignment(Assignment::new(order.id, partner.id))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.get_order(order.id).await.unwrap().status, OrderStatus::Pending);
        assert!(store.latest_assignment(order.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resolve_only_settles_active_attempts() {
        let store = MemoryStore::new();
        let order = store.insert_order(order()).await.unwrap();
        let partner = store.insert_partner(partner(0)).await.unwrap();
        let assignment = Assignment::new(order.id, partner.id);
        let assignment_id = assignment.id;
        store.commit_assignment(assignment).await.unwrap();

        let resolve = ResolveAssignment {
            order_id: order.id,
            assignment_id,
            outcome: AssignmentStatus::Failed,
            reason: Some("customer not at home".to_string()),
            order_status: OrderStatus::Pending,
        };

        let reverted = store.resolve_assignment(resolve.clone()).await.unwrap();
        assert_eq!(reverted.status, OrderStatus::Pending);
        assert_eq!(reverted.assigned_partner_id, None);

        let err = store.resolve_assignment(resolve).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn latest_assignment_is_newest_by_creation_time() {
        let store = MemoryStore::new();
        let order = store.insert_order(order()).await.unwrap();
        let partner_id = Uuid::new_v4();

        let mut older = Assignment::new(order.id, partner_id);
        older.created_at = Utc::now() - Duration::minutes(10);
        older.status = AssignmentStatus::Failed;
        let newer = Assignment::new(order.id, partner_id);
        store.assignments.insert(older.id, older);
        store.assignments.insert(newer.id, newer.clone());

        let latest = store.latest_assignment(order.id).await.unwrap().unwrap();
        assert_eq!(latest.id, newer.id);
    }

    #[tokio::test]
    async fn load_never_goes_negative() {
        let store = MemoryStore::new();
        let partner = store.insert_partner(partner(0)).await.unwrap();

        assert_eq!(store.adjust_partner_load(partner.id, -1).await.unwrap(), 0);
        assert_eq!(store.adjust_partner_load(partner.id, 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_partner_keeps_load() {
        let store = MemoryStore::new();
        let partner = store.insert_partner(partner(3)).await.unwrap();

        let mut edited = partner.clone();
        edited.name = "Kiran K".to_string();
        edited.current_load = 0;

        let updated = store.update_partner(edited).await.unwrap();
        assert_eq!(updated.name, "Kiran K");
        assert_eq!(updated.current_load, 3);
    }

    #[tokio::test]
    async fn update_order_status_is_conditional() {
        let store = MemoryStore::new();
        let order = store.insert_order(order()).await.unwrap();

        let err = store
            .update_order_status(order.id, OrderStatus::Assigned, OrderStatus::Picked)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let cancelled = store
            .update_order_status(order.id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
    }
}
