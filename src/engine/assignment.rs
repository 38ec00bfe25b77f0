use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::queue::{enqueue_compensation, LoadCompensation};
use crate::engine::suggest::Suggestion;
use crate::error::AppError;
use crate::models::assignment::{
    Assignment, AssignmentEvent, AssignmentEventKind, AssignmentStatus,
};
use crate::models::order::{Order, OrderStatus};
use crate::models::partner::Partner;
use crate::state::AppState;
use crate::store::ResolveAssignment;

pub const CANCELLATION_REASON: &str = "order cancelled by operator";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignOutcome {
    pub assigned: bool,
    pub order_id: Uuid,
    pub partner_id: Option<Uuid>,
    pub assignment_id: Option<Uuid>,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct StatusChange {
    pub order: Order,
    pub warning: Option<String>,
}

/// Runs the configured suggester over the active candidates. Nothing is
/// written.
pub async fn suggest_partner(
    state: &AppState,
    order: &Order,
    partners: &[Partner],
) -> Result<Suggestion, AppError> {
    let candidates: Vec<Partner> = partners.iter().filter(|p| p.is_active()).cloned().collect();
    if candidates.is_empty() {
        return Ok(Suggestion::none("No active partners are available."));
    }

    let source = state.suggester.source();
    let start = Instant::now();
    let result = state.suggester.suggest(order, &candidates).await;
    state
        .metrics
        .suggestion_latency_seconds
        .with_label_values(&[source])
        .observe(start.elapsed().as_secs_f64());

    let outcome = match &result {
        Ok(s) if s.suggestion_made => "suggested",
        Ok(_) => "declined",
        Err(_) => "error",
    };
    state
        .metrics
        .suggestions_total
        .with_label_values(&[source, outcome])
        .inc();

    match result {
        Ok(suggestion) => {
            info!(
                order_id = %order.id,
                source,
                partner_id = ?suggestion.suggested_partner_id,
                candidates = candidates.len(),
                "partner suggestion ready"
            );
            Ok(suggestion)
        }
        Err(err) => {
            warn!(order_id = %order.id, source, error = %err, "partner suggestion failed");
            Err(err.into())
        }
    }
}

/// Records an attempt, links the order and bumps the partner's load.
pub async fn commit_assignment(
    state: &AppState,
    order_id: Uuid,
    partner_id: Uuid,
) -> Result<(Order, Assignment), AppError> {
    let assignment = Assignment::new(order_id, partner_id);

    match state.store.commit_assignment(assignment.clone()).await {
        Ok(order) => {
            state
                .metrics
                .assignments_total
                .with_label_values(&["success"])
                .inc();
            info!(
                order_id = %order_id,
                partner_id = %partner_id,
                assignment_id = %assignment.id,
                "order assigned"
            );
            state.publish(AssignmentEvent {
                kind: AssignmentEventKind::Assigned,
                assignment: assignment.clone(),
            });
            Ok((order, assignment))
        }
        Err(err) => {
            state
                .metrics
                .assignments_total
                .with_label_values(&["error"])
                .inc();
            Err(err.into())
        }
    }
}

/// Assigns a pending order, either to the requested partner or to the one
/// the suggester picks.
pub async fn assign_order(
    state: &AppState,
    order_id: Uuid,
    partner_id: Option<Uuid>,
) -> Result<AssignOutcome, AppError> {
    let order = state.store.get_order(order_id).await?;
    if order.status != OrderStatus::Pending {
        return Err(AppError::Conflict(format!(
            "order {order_id} is {}, only pending orders can be assigned",
            order.status
        )));
    }

    let (partner_id, reason) = match partner_id {
        Some(partner_id) => (partner_id, "Assigned manually.".to_string()),
        None => {
            let partners = state.store.list_partners().await?;
            let suggestion = suggest_partner(state, &order, &partners).await?;
            match suggestion.suggested_partner_id {
                Some(partner_id) if suggestion.suggestion_made => (partner_id, suggestion.reason),
                _ => {
                    return Ok(AssignOutcome {
                        assigned: false,
                        order_id,
                        partner_id: None,
                        assignment_id: None,
                        reason: suggestion.reason,
                    });
                }
            }
        }
    };

    let (_, assignment) = commit_assignment(state, order_id, partner_id).await?;

    Ok(AssignOutcome {
        assigned: true,
        order_id,
        partner_id: Some(partner_id),
        assignment_id: Some(assignment.id),
        reason,
    })
}

/// Applies an operator status change. Completing or cancelling a linked
/// order settles its active attempt and releases the partner's load.
pub async fn update_order_status(
    state: &AppState,
    order_id: Uuid,
    next: OrderStatus,
) -> Result<StatusChange, AppError> {
    let order = state.store.get_order(order_id).await?;

    if order.status == next {
        return Ok(StatusChange {
            order,
            warning: None,
        });
    }
    if !order.status.can_transition_to(next) {
        return Err(AppError::Validation(format!(
            "cannot move order from {} to {next}",
            order.status
        )));
    }

    let releasing = match (next, order.assigned_partner_id) {
        (OrderStatus::Delivered | OrderStatus::Cancelled, Some(partner_id)) => Some(partner_id),
        _ => None,
    };

    let Some(partner_id) = releasing else {
        let updated = state
            .store
            .update_order_status(order_id, order.status, next)
            .await?;
        info!(order_id = %order_id, from = %order.status, to = %next, "order status updated");
        return Ok(StatusChange {
            order: updated,
            warning: None,
        });
    };

    let (outcome, reason, kind) = if next == OrderStatus::Delivered {
        (AssignmentStatus::Success, None, AssignmentEventKind::Completed)
    } else {
        (
            AssignmentStatus::Failed,
            Some(CANCELLATION_REASON.to_string()),
            AssignmentEventKind::Cancelled,
        )
    };

    let active = state
        .store
        .latest_assignment(order_id)
        .await?
        .filter(|a| a.status == AssignmentStatus::Active);

    let updated = match active {
        Some(mut assignment) => {
            let updated = state
                .store
                .resolve_assignment(ResolveAssignment {
                    order_id,
                    assignment_id: assignment.id,
                    outcome,
                    reason: reason.clone(),
                    order_status: next,
                })
                .await?;
            assignment.status = outcome;
            assignment.failure_reason = reason;
            state.publish(AssignmentEvent { kind, assignment });
            updated
        }
        None => {
            warn!(order_id = %order_id, "linked order has no active assignment; updating status only");
            state
                .store
                .update_order_status(order_id, order.status, next)
                .await?
        }
    };

    info!(order_id = %order_id, partner_id = %partner_id, from = %order.status, to = %next, "order status updated");
    let warning = release_partner_load(state, partner_id).await;

    Ok(StatusChange {
        order: updated,
        warning,
    })
}

/// Decrements a partner's load. A failure is queued for retry and reported
/// back as a warning instead of an error.
pub async fn release_partner_load(state: &AppState, partner_id: Uuid) -> Option<String> {
    let err = match state.store.adjust_partner_load(partner_id, -1).await {
        Ok(load) => {
            info!(partner_id = %partner_id, current_load = load, "partner load released");
            return None;
        }
        Err(err) => err,
    };

    warn!(partner_id = %partner_id, error = %err, "failed to release partner load");
    match enqueue_compensation(state, LoadCompensation::release(partner_id)) {
        Ok(()) => Some(format!(
            "partner {partner_id} load could not be updated ({err}); a retry has been queued"
        )),
        Err(queue_err) => {
            warn!(partner_id = %partner_id, error = %queue_err, "partner load correction not queued");
            Some(format!(
                "partner {partner_id} load could not be updated ({err}) and needs manual correction"
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveTime, Utc};
    use uuid::Uuid;

    use super::{assign_order, suggest_partner, update_order_status};
    use crate::engine::scoring::RuleBasedSuggester;
    use crate::error::AppError;
    use crate::models::assignment::AssignmentStatus;
    use crate::models::order::{Order, OrderStatus};
    use crate::models::partner::{Partner, PartnerStatus};
    use crate::state::AppState;
    use crate::store::{MemoryStore, Store};

    fn state() -> AppState {
        let (state, _rx) = AppState::new(
            Arc::new(MemoryStore::new()),
            Arc::new(RuleBasedSuggester::at(NaiveTime::from_hms_opt(12, 0, 0).unwrap())),
            16,
            16,
        );
        state
    }

    fn order(area: &str) -> Order {
        Order {
            id: Uuid::new_v4(),
            customer_name: "Asha".to_string(),
            customer_phone: "+91 98450 00000".to_string(),
            items: Vec::new(),
            area: area.to_string(),
            address: "5th Block".to_string(),
            value: 300.0,
            status: OrderStatus::Pending,
            assigned_partner_id: None,
            created_at: Utc::now(),
        }
    }

    fn partner(area: &str, load: u32, status: PartnerStatus) -> Partner {
        Partner {
            id: Uuid::new_v4(),
            name: "Ravi".to_string(),
            phone: "+91 90000 00000".to_string(),
            email: None,
            status,
            assigned_areas: vec![area.to_string()],
            shift_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            shift_end: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            current_load: load,
            rating: 4.5,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn inactive_candidates_are_dropped_before_suggesting() {
        let state = state();
        let suggestion = suggest_partner(
            &state,
            &order("Koramangala"),
            &[partner("Koramangala", 0, PartnerStatus::Inactive)],
        )
        .await
        .unwrap();

        assert!(!suggestion.suggestion_made);
    }

    #[tokio::test]
    async fn assign_commits_the_suggested_partner() {
        let state = state();
        let order = state.store.insert_order(order("Koramangala")).await.unwrap();
        let partner = state
            .store
            .insert_partner(partner("Koramangala", 2, PartnerStatus::Active))
            .await
            .unwrap();

        let outcome = assign_order(&state, order.id, None).await.unwrap();

        assert!(outcome.assigned);
        assert_eq!(outcome.partner_id, Some(partner.id));
        let stored = state.store.get_order(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Assigned);
        assert_eq!(state.store.get_partner(partner.id).await.unwrap().current_load, 3);
    }

    #[tokio::test]
    async fn assign_without_eligible_partner_changes_nothing() {
        let state = state();
        let order = state.store.insert_order(order("Koramangala")).await.unwrap();
        state
            .store
            .insert_partner(partner("Whitefield", 0, PartnerStatus::Active))
            .await
            .unwrap();

        let outcome = assign_order(&state, order.id, None).await.unwrap();

        assert!(!outcome.assigned);
        assert!(state.store.latest_assignment(order.id).await.unwrap().is_none());
        assert_eq!(
            state.store.get_order(order.id).await.unwrap().status,
            OrderStatus::Pending
        );
    }

    #[tokio::test]
    async fn delivery_settles_attempt_and_releases_load() {
        let state = state();
        let order = state.store.insert_order(order("Koramangala")).await.unwrap();
        let partner = state
            .store
            .insert_partner(partner("Koramangala", 0, PartnerStatus::Active))
            .await
            .unwrap();
        assign_order(&state, order.id, Some(partner.id)).await.unwrap();

        update_order_status(&state, order.id, OrderStatus::Picked).await.unwrap();
        let change = update_order_status(&state, order.id, OrderStatus::Delivered)
            .await
            .unwrap();

        assert_eq!(change.order.status, OrderStatus::Delivered);
        assert_eq!(change.order.assigned_partner_id, Some(partner.id));
        assert!(change.warning.is_none());
        let attempt = state.store.latest_assignment(order.id).await.unwrap().unwrap();
        assert_eq!(attempt.status, AssignmentStatus::Success);
        assert_eq!(state.store.get_partner(partner.id).await.unwrap().current_load, 0);
    }

    #[tokio::test]
    async fn cancelling_linked_order_fails_attempt() {
        let state = state();
        let order = state.store.insert_order(order("Koramangala")).await.unwrap();
        let partner = state
            .store
            .insert_partner(partner("Koramangala", 1, PartnerStatus::Active))
            .await
            .unwrap();
        assign_order(&state, order.id, Some(partner.id)).await.unwrap();

        let change = update_order_status(&state, order.id, OrderStatus::Cancelled)
            .await
            .unwrap();

        assert_eq!(change.order.assigned_partner_id, None);
        let attempt = state.store.latest_assignment(order.id).await.unwrap().unwrap();
        assert_eq!(attempt.status, AssignmentStatus::Failed);
        assert_eq!(attempt.failure_reason.as_deref(), Some(super::CANCELLATION_REASON));
        assert_eq!(state.store.get_partner(partner.id).await.unwrap().current_load, 1);
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected() {
        let state = state();
        let order = state.store.insert_order(order("Koramangala")).await.unwrap();

        let err = update_order_status(&state, order.id, OrderStatus::Delivered)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn assigning_a_non_pending_order_conflicts() {
        let state = state();
        let order = state.store.insert_order(order("Koramangala")).await.unwrap();
        let partner = state
            .store
            .insert_partner(partner("Koramangala", 0, PartnerStatus::Active))
            .await
            .unwrap();
        assign_order(&state, order.id, Some(partner.id)).await.unwrap();

        let err = assign_order(&state, order.id, Some(partner.id)).await.unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(state.store.get_partner(partner.id).await.unwrap().current_load, 1);
    }
}
