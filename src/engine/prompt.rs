//! Prompt construction and response parsing for model-backed suggestions.

use serde::Deserialize;
use uuid::Uuid;

use crate::engine::suggest::{Suggestion, SuggestError};
use crate::models::order::Order;
use crate::models::partner::{Partner, MAX_PARTNER_LOAD};

pub fn build_prompt(order: &Order, candidates: &[Partner]) -> String {
    let items = order
        .items
        .iter()
        .map(|item| format!("{} x{}", item.name, item.quantity))
        .collect::<Vec<_>>()
        .join(", ");
    let partners = candidates
        .iter()
        .map(|partner| {
            format!(
                "- id={} name={} areas=[{}] current_load={} shift={} rating={:.1}\n",
                partner.id,
                partner.name,
                partner.assigned_areas.join(", "),
                partner.current_load,
                partner.shift_label(),
                partner.rating
            )
        })
        .collect::<String>();

    format!(
        "You are the dispatcher of a local delivery service. Choose the best delivery partner for the order below.

Order {id}:
- Delivery area: {area}
- Address: {address}
- Order value: {value:.2}
- Items: {items}

Active partners:
{partners}
Rules:
1. Never choose a partner whose areas do not include the order's delivery area.
2. Prefer lower current_load. Never choose a partner with current_load of {MAX_PARTNER_LOAD} or more.
3. Prefer partners whose shift window covers the delivery.
4. If no partner qualifies, make no suggestion and explain why.

Answer with JSON only, no prose: {{\"suggestionMade\": boolean, \"suggestedPartnerId\": string or null, \"reason\": string}}
",
        id = order.id,
        area = order.area,
        address = order.address,
        value = order.value,
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSuggestion {
    suggestion_made: bool,
    #[serde(default)]
    suggested_partner_id: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Reads the model's answer and checks it against the order and the
/// candidates it was given.
pub fn parse_suggestion(
    text: &str,
    order: &Order,
    candidates: &[Partner],
) -> Result<Suggestion, SuggestError> {
    let json = extract_json_object(text)
        .ok_or_else(|| SuggestError::MalformedResponse("no JSON object in model output".to_string()))?;

    let raw: RawSuggestion = serde_json::from_str(json)
        .map_err(|err| SuggestError::MalformedResponse(format!("unexpected suggestion shape: {err}")))?;

    let reason = raw
        .reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());

    if !raw.suggestion_made {
        return Ok(Suggestion::none(
            reason.unwrap_or_else(|| "No suitable partner was found.".to_string()),
        ));
    }

    let raw_id = raw
        .suggested_partner_id
        .ok_or_else(|| SuggestError::MalformedResponse("suggestion made without a partner id".to_string()))?;
    let partner_id = Uuid::parse_str(raw_id.trim())
        .map_err(|_| SuggestError::MalformedResponse(format!("invalid partner id {raw_id}")))?;

    let partner = candidates
        .iter()
        .find(|p| p.id == partner_id)
        .ok_or_else(|| SuggestError::MalformedResponse(format!("partner {partner_id} was not a candidate")))?;

    if !partner.covers_area(&order.area) {
        return Err(SuggestError::MalformedResponse(format!(
            "partner {partner_id} does not cover {}",
            order.area
        )));
    }
    if !partner.has_capacity() {
        return Err(SuggestError::MalformedResponse(format!(
            "partner {partner_id} is at capacity"
        )));
    }

    Ok(Suggestion::partner(
        partner_id,
        reason.unwrap_or_else(|| format!("{} was selected.", partner.name)),
    ))
}

/// Outermost `{...}` span, which also strips markdown code fences.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
