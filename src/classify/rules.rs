//! The classifier's rules, in evaluation order.
//!
//! Each rule is a standalone predicate over one record; the first rule that
//! matches decides the verdict. The categorical rules (new code, drop to zero,
//! grand total) run before the magnitude rule.

use crate::classify::severity::{
    DROP_TO_ZERO_SCORE, GRAND_TOTAL_SCORE, NEW_CODE_SCORE, breach_score,
};
use crate::domain::{AnomalyDirection, AnomalyRule, BillingRecord, ComputedMetrics};
use crate::thresholds::Thresholds;

/// Evaluation order. First match wins.
pub const RULE_ORDER: [AnomalyRule; 4] = [
    AnomalyRule::NewCode,
    AnomalyRule::DropToZero,
    AnomalyRule::GrandTotal,
    AnomalyRule::ThresholdBreach,
];

/// Everything a rule may look at.
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub record: &'a BillingRecord,
    pub metrics: &'a ComputedMetrics,
    pub thresholds: Thresholds,
    pub grand_total_label: &'a str,
}

/// A matched rule, before jitter is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleHit {
    pub rule: AnomalyRule,
    pub direction: Option<AnomalyDirection>,
    pub score: f64,
    pub reason: String,
}

pub fn evaluate(rule: AnomalyRule, input: &RuleInput<'_>) -> Option<RuleHit> {
    match rule {
        AnomalyRule::NewCode => new_code(input),
        AnomalyRule::DropToZero => drop_to_zero(input),
        AnomalyRule::GrandTotal => grand_total(input),
        AnomalyRule::ThresholdBreach => threshold_breach(input),
    }
}

/// Run the rules in order and return the first hit.
pub fn first_hit(input: &RuleInput<'_>) -> Option<RuleHit> {
    RULE_ORDER.into_iter().find_map(|rule| evaluate(rule, input))
}

fn new_code(input: &RuleInput<'_>) -> Option<RuleHit> {
    if !input.record.series.all_missing() {
        return None;
    }
    Some(RuleHit {
        rule: AnomalyRule::NewCode,
        direction: Some(AnomalyDirection::Spike),
        score: NEW_CODE_SCORE,
        reason: "new code this cycle".to_string(),
    })
}

fn drop_to_zero(input: &RuleInput<'_>) -> Option<RuleHit> {
    let series = &input.record.series;
    if !(series.any_positive() && series.current() == 0.0) {
        return None;
    }
    Some(RuleHit {
        rule: AnomalyRule::DropToZero,
        direction: Some(AnomalyDirection::Drop),
        score: DROP_TO_ZERO_SCORE,
        reason: "dropped to zero".to_string(),
    })
}

/// Whether `code` names the grand-total row (trimmed, case-insensitive).
pub fn is_grand_total_code(code: &str, label: &str) -> bool {
    code.trim().eq_ignore_ascii_case(label.trim())
}

fn grand_total(input: &RuleInput<'_>) -> Option<RuleHit> {
    if !is_grand_total_code(&input.record.code, input.grand_total_label) {
        return None;
    }
    Some(RuleHit {
        rule: AnomalyRule::GrandTotal,
        direction: input.metrics.avg_delta.and_then(direction_of),
        score: GRAND_TOTAL_SCORE,
        reason: "grand total row: mandatory analyst review".to_string(),
    })
}

fn threshold_breach(input: &RuleInput<'_>) -> Option<RuleHit> {
    // A zero rolling average leaves the percent undefined; only the
    // categorical rules can flag such a code.
    let delta = input.metrics.avg_delta?;
    let percent = input.metrics.avg_percent?;
    let t = input.thresholds;

    if delta.abs() < t.absolute_change || percent.abs() < t.percent_change {
        return None;
    }

    let direction = if delta > 0.0 {
        AnomalyDirection::Spike
    } else {
        AnomalyDirection::Drop
    };

    Some(RuleHit {
        rule: AnomalyRule::ThresholdBreach,
        direction: Some(direction),
        score: breach_score(delta, percent, &t),
        reason: format!(
            "{} of {:+.2} ({:+.1}%) vs rolling average breaches {} thresholds ({:.0} / {:.1}%)",
            direction.label(),
            delta,
            percent * 100.0,
            input.record.category.display_name(),
            t.absolute_change,
            t.percent_change * 100.0,
        ),
    })
}

fn direction_of(delta: f64) -> Option<AnomalyDirection> {
    if delta > 0.0 {
        Some(AnomalyDirection::Spike)
    } else if delta < 0.0 {
        Some(AnomalyDirection::Drop)
    } else {
        None
    }
}
