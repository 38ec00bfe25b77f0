use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::order::Order;
use crate::models::partner::Partner;

/// A recommended partner for an order. Nothing is persisted until the
/// suggestion is committed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub suggestion_made: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_partner_id: Option<Uuid>,
    pub reason: String,
}

impl Suggestion {
    pub fn partner(partner_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            suggestion_made: true,
            suggested_partner_id: Some(partner_id),
            reason: reason.into(),
        }
    }

    pub fn none(reason: impl Into<String>) -> Self {
        Self {
            suggestion_made: false,
            suggested_partner_id: None,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SuggestError {
    #[error("suggestion service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("suggestion service timed out")]
    Timeout,

    #[error("malformed suggestion: {0}")]
    MalformedResponse(String),
}

/// Picks a partner for an order out of active candidates.
#[async_trait]
pub trait PartnerSuggester: Send + Sync {
    /// Label used in logs and metrics.
    fn source(&self) -> &'static str;

    async fn suggest(&self, order: &Order, candidates: &[Partner]) -> Result<Suggestion, SuggestError>;
}
