//! Expected-outcome prediction and post-fill analysis.
//!
//! Predictions are advisory: they feed the outcome comparison that flags
//! surprising fills, they never gate a submission.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::{OrderSide, OrderType};

use super::OrderDraft;

/// Predicted outcome for a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedOutcome {
    /// Lower bound of the plausible fill price.
    pub min_price: Decimal,
    /// Upper bound of the plausible fill price.
    pub max_price: Decimal,
    /// Whether an immediate fill is expected.
    pub should_fill_immediately: bool,
    /// Rough fill-time estimate.
    pub est_fill_time_ms: u64,
    /// Known risks for this order type.
    pub risks: Vec<String>,
}

impl ExpectedOutcome {
    /// Midpoint of the predicted price range.
    #[must_use]
    pub fn mid_price(&self) -> Decimal {
        (self.min_price + self.max_price) / dec!(2)
    }
}

/// Observed outcome for a submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActualOutcome {
    /// Whether the order (fully) filled.
    pub filled: bool,
    /// Average fill price.
    pub fill_price: Option<Decimal>,
    /// Cumulative filled quantity.
    pub fill_qty: Decimal,
    /// `fill_qty * fill_price`.
    pub total_cost: Decimal,
    /// Wall-clock from first submit to the terminal snapshot.
    pub fill_time_ms: u64,
    /// Signed percent deviation of the fill price from the predicted
    /// midpoint.
    pub slippage_pct: Option<Decimal>,
    /// Deviations from the prediction worth surfacing.
    pub unexpected_events: Vec<String>,
}

/// Predict a plausible outcome for a draft given the last trade price.
///
/// Returns `None` when the order type needs a market reference that is
/// unavailable.
#[must_use]
pub fn predict_outcome(draft: &OrderDraft, last_price: Option<Decimal>) -> Option<ExpectedOutcome> {
    match draft.order_type {
        OrderType::Market => {
            let last = last_price?;
            Some(ExpectedOutcome {
                min_price: last * dec!(0.995),
                max_price: last * dec!(1.005),
                should_fill_immediately: true,
                est_fill_time_ms: 500,
                risks: vec!["slippage".to_string()],
            })
        }
        OrderType::Limit => {
            let limit = draft.limit_price?;
            let immediate = last_price.is_some_and(|last| match draft.side {
                OrderSide::Buy => limit >= last,
                OrderSide::Sell => limit <= last,
            });
            Some(ExpectedOutcome {
                min_price: limit,
                max_price: limit,
                should_fill_immediately: immediate,
                est_fill_time_ms: if immediate { 1_000 } else { 300_000 },
                risks: vec!["may not fill".to_string()],
            })
        }
        OrderType::Stop => {
            let stop = draft.stop_price?;
            Some(ExpectedOutcome {
                min_price: stop * dec!(0.99),
                max_price: stop * dec!(1.01),
                should_fill_immediately: false,
                est_fill_time_ms: 600_000,
                risks: vec![
                    "triggers as market order".to_string(),
                    "slippage".to_string(),
                ],
            })
        }
        OrderType::StopLimit => {
            let limit = draft.limit_price?;
            Some(ExpectedOutcome {
                min_price: limit,
                max_price: limit,
                should_fill_immediately: false,
                est_fill_time_ms: 600_000,
                risks: vec!["may not fill past limit on gap".to_string()],
            })
        }
        OrderType::TrailingStop => {
            let last = last_price?;
            Some(ExpectedOutcome {
                min_price: last * dec!(0.90),
                max_price: last * dec!(1.10),
                should_fill_immediately: false,
                est_fill_time_ms: 3_600_000,
                risks: vec!["normal-volatility trigger".to_string()],
            })
        }
    }
}

/// Factor over the estimate past which an "immediate" fill counts as slow.
const IMMEDIATE_FILL_GRACE: u64 = 4;

/// Fraction of the requested quantity under which a fill counts as partial.
const PARTIAL_FILL_THRESHOLD: Decimal = dec!(0.99);

/// Compare the observed terminal order against the prediction.
#[must_use]
pub fn analyze_outcome(
    expected: Option<&ExpectedOutcome>,
    filled: bool,
    fill_price: Option<Decimal>,
    fill_qty: Decimal,
    requested_qty: Option<Decimal>,
    fill_time_ms: u64,
    notes: Vec<String>,
) -> ActualOutcome {
    let mut unexpected_events = notes;
    let mut slippage_pct = None;

    if let Some(expected) = expected {
        if let Some(price) = fill_price {
            if price < expected.min_price || price > expected.max_price {
                unexpected_events.push(format!(
                    "fill price {price} outside expected range [{}, {}]",
                    expected.min_price, expected.max_price
                ));
            }
            let mid = expected.mid_price();
            if !mid.is_zero() {
                slippage_pct = Some((price - mid) / mid * dec!(100));
            }
        }

        if expected.should_fill_immediately
            && filled
            && fill_time_ms > expected.est_fill_time_ms * IMMEDIATE_FILL_GRACE
        {
            unexpected_events.push(format!(
                "expected immediate fill, took {fill_time_ms}ms"
            ));
        }
    }

    if let Some(requested) = requested_qty
        && !requested.is_zero()
        && fill_qty > Decimal::ZERO
        && fill_qty < requested * PARTIAL_FILL_THRESHOLD
    {
        unexpected_events.push(format!(
            "partial fill: {fill_qty} of {requested}"
        ));
    }

    let total_cost = fill_price.map_or(Decimal::ZERO, |p| p * fill_qty);

    ActualOutcome {
        filled,
        fill_price,
        fill_qty,
        total_cost,
        fill_time_ms,
        slippage_pct,
        unexpected_events,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market_draft() -> OrderDraft {
        OrderDraft::market("AAPL", OrderSide::Buy, dec!(10))
    }

    #[test]
    fn market_prediction_brackets_last_trade() {
        let expected = predict_outcome(&market_draft(), Some(dec!(100))).unwrap();
        assert_eq!(expected.min_price, dec!(99.500));
        assert_eq!(expected.max_price, dec!(100.500));
        assert!(expected.should_fill_immediately);
        assert_eq!(expected.est_fill_time_ms, 500);
    }

    #[test]
    fn market_prediction_needs_last_price() {
        assert!(predict_outcome(&market_draft(), None).is_none());
    }

    #[test]
    fn limit_prediction_immediacy_depends_on_side() {
        let mut draft = market_draft();
        draft.order_type = OrderType::Limit;
        draft.limit_price = Some(dec!(101));

        // Buy limit above market: marketable.
        let expected = predict_outcome(&draft, Some(dec!(100))).unwrap();
        assert!(expected.should_fill_immediately);
        assert_eq!(expected.min_price, dec!(101));

        // Buy limit below market: resting.
        draft.limit_price = Some(dec!(95));
        let expected = predict_outcome(&draft, Some(dec!(100))).unwrap();
        assert!(!expected.should_fill_immediately);
        assert_eq!(expected.est_fill_time_ms, 300_000);

        // Sell limit below market: marketable.
        draft.side = OrderSide::Sell;
        let expected = predict_outcome(&draft, Some(dec!(100))).unwrap();
        assert!(expected.should_fill_immediately);
    }

    #[test]
    fn stop_prediction_brackets_stop_price() {
        let mut draft = market_draft();
        draft.order_type = OrderType::Stop;
        draft.stop_price = Some(dec!(100));
        let expected = predict_outcome(&draft, None).unwrap();
        assert_eq!(expected.min_price, dec!(99.00));
        assert_eq!(expected.max_price, dec!(101.00));
        assert!(!expected.should_fill_immediately);
    }

    #[test]
    fn analysis_flags_out_of_range_price() {
        let expected = predict_outcome(&market_draft(), Some(dec!(100))).unwrap();
        let actual = analyze_outcome(
            Some(&expected),
            true,
            Some(dec!(103)),
            dec!(10),
            Some(dec!(10)),
            400,
            vec![],
        );
        assert!(
            actual
                .unexpected_events
                .iter()
                .any(|e| e.contains("outside expected range"))
        );
        assert!(actual.slippage_pct.unwrap() > dec!(2.9));
    }

    #[test]
    fn analysis_flags_partial_fill() {
        let actual = analyze_outcome(
            None,
            false,
            Some(dec!(100)),
            dec!(5),
            Some(dec!(10)),
            400,
            vec![],
        );
        assert!(
            actual
                .unexpected_events
                .iter()
                .any(|e| e.contains("partial fill"))
        );
        assert_eq!(actual.total_cost, dec!(500));
    }

    #[test]
    fn analysis_flags_slow_immediate_fill() {
        let expected = predict_outcome(&market_draft(), Some(dec!(100))).unwrap();
        let actual = analyze_outcome(
            Some(&expected),
            true,
            Some(dec!(100)),
            dec!(10),
            Some(dec!(10)),
            30_000,
            vec![],
        );
        assert!(
            actual
                .unexpected_events
                .iter()
                .any(|e| e.contains("expected immediate fill"))
        );
    }

    #[test]
    fn clean_fill_has_no_flags() {
        let expected = predict_outcome(&market_draft(), Some(dec!(100))).unwrap();
        let actual = analyze_outcome(
            Some(&expected),
            true,
            Some(dec!(100.10)),
            dec!(10),
            Some(dec!(10)),
            450,
            vec![],
        );
        assert!(actual.unexpected_events.is_empty());
        assert!(actual.filled);
    }
}
