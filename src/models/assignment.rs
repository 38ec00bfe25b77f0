use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MIN_FAILURE_REASON_LEN: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    Active,
    Success,
    Failed,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Active => "active",
            AssignmentStatus::Success => "success",
            AssignmentStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for AssignmentStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "active" => Ok(AssignmentStatus::Active),
            "success" => Ok(AssignmentStatus::Success),
            "failed" => Ok(AssignmentStatus::Failed),
            other => Err(format!("unknown assignment status {other}")),
        }
    }
}

/// One delivery attempt of an order by a partner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub partner_id: Option<Uuid>,
    pub status: AssignmentStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Assignment {
    pub fn new(order_id: Uuid, partner_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            partner_id: Some(partner_id),
            status: AssignmentStatus::Active,
            failure_reason: None,
            created_at: Utc::now(),
        }
    }
}

/// Trims and checks a failure reason.
pub fn validate_failure_reason(raw: &str) -> Result<String, String> {
    let reason = raw.trim();
    if reason.chars().count() < MIN_FAILURE_REASON_LEN {
        return Err(format!(
            "reason must be at least {MIN_FAILURE_REASON_LEN} characters"
        ));
    }
    Ok(reason.to_string())
}

/// Assignment joined with the order fields the failure dashboard shows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentView {
    pub assignment_id: Uuid,
    pub order_id: Uuid,
    pub partner_id: Option<Uuid>,
    pub status: AssignmentStatus,
    pub customer_name: Option<String>,
    pub area: Option<String>,
    pub failure_reason: Option<String>,
    pub reported_at: DateTime<Utc>,
}

/// Published on the live feed whenever an assignment changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentEvent {
    pub kind: AssignmentEventKind,
    pub assignment: Assignment,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentEventKind {
    Assigned,
    Completed,
    Failed,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::validate_failure_reason;

    #[test]
    fn short_reasons_are_rejected_after_trimming() {
        assert!(validate_failure_reason("   no show   ").is_err());
        assert!(validate_failure_reason("customer unreachable").is_ok());
    }

    #[test]
    fn reason_is_trimmed() {
        let reason = validate_failure_reason("  address not found  ").unwrap();
        assert_eq!(reason, "address not found");
    }
}
