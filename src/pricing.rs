//! Turns a triggered action into a final price.

use crate::rules::Action;

/// Which way an action moves the price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Discount,
    Increase,
    Other,
}

impl ActionKind {
    pub fn of(kind: &str) -> Self {
        match kind.trim().to_ascii_lowercase().as_str() {
            "discount" | "decrease" => ActionKind::Discount,
            "increase" | "surge_pricing" | "surge" => ActionKind::Increase,
            _ => ActionKind::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingPolicy {
    /// When an action carries both a percentage and an amount, use the percentage.
    pub prefer_percentage: bool,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self { prefer_percentage: true }
    }
}

enum Adjustment {
    Percent(f64),
    Amount(f64),
}

fn adjustment(pct: Option<f64>, amount: Option<f64>, policy: &PricingPolicy) -> Option<Adjustment> {
    // zero counts as absent
    let pct = pct.filter(|p| *p != 0.0 && p.is_finite());
    let amount = amount.filter(|a| *a != 0.0 && a.is_finite());
    match (pct, amount) {
        (Some(p), Some(a)) => Some(if policy.prefer_percentage {
            Adjustment::Percent(p)
        } else {
            Adjustment::Amount(a)
        }),
        (Some(p), None) => Some(Adjustment::Percent(p)),
        (None, Some(a)) => Some(Adjustment::Amount(a)),
        (None, None) => None,
    }
}

/// Apply one action to `base_price`. The result is never negative.
pub fn apply_action(base_price: f64, action: &Action, policy: &PricingPolicy) -> f64 {
    let params = &action.params;
    let price = match ActionKind::of(&action.kind) {
        ActionKind::Discount => match adjustment(params.percentage, params.amount, policy) {
            Some(Adjustment::Percent(p)) => base_price * (1.0 - p / 100.0),
            Some(Adjustment::Amount(a)) => base_price - a,
            None => base_price,
        },
        ActionKind::Increase => {
            let pct = params.markup_percentage.or(params.percentage);
            match adjustment(pct, params.amount, policy) {
                Some(Adjustment::Percent(p)) => base_price * (1.0 + p / 100.0),
                Some(Adjustment::Amount(a)) => base_price + a,
                None => base_price,
            }
        }
        ActionKind::Other => base_price,
    };
    if price.is_nan() {
        return base_price.max(0.0);
    }
    price.max(0.0)
}

/// Price after the first triggered action, or the base price if none fired.
pub fn project(base_price: f64, action: Option<&Action>, policy: &PricingPolicy) -> f64 {
    match action {
        Some(action) => apply_action(base_price, action, policy),
        None => base_price,
    }
}
