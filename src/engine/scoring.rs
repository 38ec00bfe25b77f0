use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{Local, NaiveTime};

use crate::engine::suggest::{PartnerSuggester, Suggestion, SuggestError};
use crate::models::order::Order;
use crate::models::partner::{Partner, MAX_PARTNER_LOAD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    NotActive,
    OutOfArea,
    AtCapacity,
}

#[derive(Debug, Clone, Copy)]
pub struct CandidateScore<'a> {
    pub partner: &'a Partner,
    pub on_shift: bool,
}

pub fn check_eligibility(partner: &Partner, order: &Order) -> Result<(), Exclusion> {
    if !partner.is_active() {
        return Err(Exclusion::NotActive);
    }
    if !partner.covers_area(&order.area) {
        return Err(Exclusion::OutOfArea);
    }
    if !partner.has_capacity() {
        return Err(Exclusion::AtCapacity);
    }
    Ok(())
}

/// Eligible candidates, best first: lowest load, then on shift, then
/// highest rating, then id.
pub fn rank_candidates<'a>(
    order: &Order,
    candidates: &'a [Partner],
    at: NaiveTime,
) -> Vec<CandidateScore<'a>> {
    let mut ranked: Vec<CandidateScore<'a>> = candidates
        .iter()
        .filter(|partner| check_eligibility(partner, order).is_ok())
        .map(|partner| CandidateScore {
            partner,
            on_shift: partner.on_shift_at(at),
        })
        .collect();

    ranked.sort_by(compare_scores);
    ranked
}

fn compare_scores(a: &CandidateScore<'_>, b: &CandidateScore<'_>) -> Ordering {
    a.partner
        .current_load
        .cmp(&b.partner.current_load)
        .then_with(|| b.on_shift.cmp(&a.on_shift))
        .then_with(|| b.partner.rating.total_cmp(&a.partner.rating))
        .then_with(|| a.partner.id.cmp(&b.partner.id))
}

pub fn suggest_by_rules(order: &Order, candidates: &[Partner], at: NaiveTime) -> Suggestion {
    let ranked = rank_candidates(order, candidates, at);

    match ranked.first() {
        Some(best) => Suggestion::partner(best.partner.id, describe_pick(order, best)),
        None => Suggestion::none(describe_miss(order, candidates)),
    }
}

fn describe_pick(order: &Order, best: &CandidateScore<'_>) -> String {
    let partner = best.partner;
    let shift = if best.on_shift {
        format!("is on shift ({})", partner.shift_label())
    } else {
        format!("is outside their shift window ({})", partner.shift_label())
    };

    format!(
        "{} covers {}, has {} of {} open deliveries and {}.",
        partner.name, order.area, partner.current_load, MAX_PARTNER_LOAD, shift
    )
}

fn describe_miss(order: &Order, candidates: &[Partner]) -> String {
    let active: Vec<&Partner> = candidates.iter().filter(|p| p.is_active()).collect();
    if active.is_empty() {
        return "No active partners are available.".to_string();
    }

    let in_area = active.iter().filter(|p| p.covers_area(&order.area)).count();
    if in_area == 0 {
        format!("No active partner covers {}.", order.area)
    } else {
        format!(
            "All {in_area} partner(s) covering {} already have {MAX_PARTNER_LOAD} open deliveries.",
            order.area
        )
    }
}

/// Deterministic suggester used when no model is configured and in tests.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedSuggester {
    reference_time: Option<NaiveTime>,
}

impl RuleBasedSuggester {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(reference_time: NaiveTime) -> Self {
        Self {
            reference_time: Some(reference_time),
        }
    }
}

#[async_trait]
impl PartnerSuggester for RuleBasedSuggester {
    fn source(&self) -> &'static str {
        "rules"
    }

    async fn suggest(&self, order: &Order, candidates: &[Partner]) -> Result<Suggestion, SuggestError> {
        let at = self
            .reference_time
            .unwrap_or_else(|| Local::now().time());
        Ok(suggest_by_rules(order, candidates, at))
    }
}
