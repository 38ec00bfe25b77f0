use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::assignment::release_partner_load;
use crate::error::AppError;
use crate::models::assignment::{
    validate_failure_reason, AssignmentEvent, AssignmentEventKind, AssignmentStatus,
};
use crate::models::order::OrderStatus;
use crate::state::AppState;
use crate::store::ResolveAssignment;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Marks the order's latest attempt as failed, puts the order back to
/// pending and releases the partner's load.
///
/// The first two writes happen together and any error there is returned.
/// The load release is best effort: on failure the report still succeeds,
/// carries a warning, and the correction is retried in the background.
pub async fn report_failure(
    state: &AppState,
    order_id: Uuid,
    reason: &str,
) -> Result<FailureReport, AppError> {
    let result = run(state, order_id, reason).await;

    let outcome = match &result {
        Ok(report) if report.warning.is_some() => "reverted_with_warning",
        Ok(_) => "reverted",
        Err(_) => "error",
    };
    state
        .metrics
        .failure_reports_total
        .with_label_values(&[outcome])
        .inc();

    result
}

async fn run(state: &AppState, order_id: Uuid, reason: &str) -> Result<FailureReport, AppError> {
    let reason = validate_failure_reason(reason).map_err(AppError::Validation)?;

    let mut assignment = state
        .store
        .latest_assignment(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no assignment found for order {order_id}")))?;

    state
        .store
        .resolve_assignment(ResolveAssignment {
            order_id,
            assignment_id: assignment.id,
            outcome: AssignmentStatus::Failed,
            reason: Some(reason.clone()),
            order_status: OrderStatus::Pending,
        })
        .await?;

    info!(
        order_id = %order_id,
        assignment_id = %assignment.id,
        partner_id = ?assignment.partner_id,
        "delivery failure recorded; order back to pending"
    );

    let warning = match assignment.partner_id {
        Some(partner_id) => release_partner_load(state, partner_id).await,
        None => None,
    };
    if let Some(warning) = &warning {
        warn!(order_id = %order_id, warning = %warning, "failure reported with load drift");
    }

    assignment.status = AssignmentStatus::Failed;
    assignment.failure_reason = Some(reason);
    state.publish(AssignmentEvent {
        kind: AssignmentEventKind::Failed,
        assignment,
    });

    Ok(FailureReport {
        message: format!("Failure reported. Order {order_id} is pending again."),
        warning,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveTime, Utc};
    use uuid::Uuid;

    use super::report_failure;
    use crate::engine::assignment::commit_assignment;
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
            Arc::new(RuleBasedSuggester::new()),
            16,
            16,
        );
        state
    }

    fn order() -> Order {
        Order {
            id: Uuid::new_v4(),
            customer_name: "Asha".to_string(),
            customer_phone: "+91 98450 00000".to_string(),
            items: Vec::new(),
            area: "Koramangala".to_string(),
            address: "5th Block".to_string(),
            value: 300.0,
            status: OrderStatus::Pending,
            assigned_partner_id: None,
            created_at: Utc::now(),
        }
    }

    fn partner(load: u32) -> Partner {
        Partner {
            id: Uuid::new_v4(),
            name: "Ravi".to_string(),
            phone: "+91 90000 00000".to_string(),
            email: None,
            status: PartnerStatus::Active,
            assigned_areas: vec!["Koramangala".to_string()],
            shift_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            shift_end: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            current_load: load,
            rating: 4.5,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn failure_reverts_order_and_releases_load() {
        let state = state();
        let order = state.store.insert_order(order()).await.unwrap();
        let partner = state.store.insert_partner(partner(2)).await.unwrap();
        commit_assignment(&state, order.id, partner.id).await.unwrap();
        assert_eq!(state.store.get_partner(partner.id).await.unwrap().current_load, 3);

        let report = report_failure(&state, order.id, "Customer unreachable at door")
            .await
            .unwrap();

        assert!(report.warning.is_none());
        let order = state.store.get_order(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.assigned_partner_id, None);
        let attempt = state.store.latest_assignment(order.id).await.unwrap().unwrap();
        assert_eq!(attempt.status, AssignmentStatus::Failed);
        assert_eq!(attempt.failure_reason.as_deref(), Some("Customer unreachable at door"));
        assert_eq!(state.store.get_partner(partner.id).await.unwrap().current_load, 2);
    }

    #[tokio::test]
    async fn order_without_attempts_is_not_found() {
        let state = state();
        let order = state.store.insert_order(order()).await.unwrap();

        let err = report_failure(&state, order.id, "Customer unreachable at door")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
        let stored = state.store.get_order(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn short_reason_is_rejected_before_any_write() {
        let state = state();
        let order = state.store.insert_order(order()).await.unwrap();
        let partner = state.store.insert_partner(partner(0)).await.unwrap();
        commit_assignment(&state, order.id, partner.id).await.unwrap();

        let err = report_failure(&state, order.id, "late").await.unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(
            state.store.get_order(order.id).await.unwrap().status,
            OrderStatus::Assigned
        );
    }

    #[tokio::test]
    async fn second_report_for_same_attempt_conflicts() {
        let state = state();
        let order = state.store.insert_order(order()).await.unwrap();
        let partner = state.store.insert_partner(partner(0)).await.unwrap();
        commit_assignment(&state, order.id, partner.id).await.unwrap();

        report_failure(&state, order.id, "Customer unreachable at door")
            .await
            .unwrap();
        let err = report_failure(&state, order.id, "Customer unreachable at door")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(state.store.get_partner(partner.id).await.unwrap().current_load, 0);
    }
}
