//! Order validation: schema, tradability, session rules, and price sanity.
//!
//! Hard errors stop a submission; warnings ride along into the execution
//! report. Sells bypass the tradability gate so a position stays closeable
//! after its symbol leaves the candidate universe.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::broker::{Asset, MarketStatus};
use crate::models::{OrderClass, OrderSide, OrderType, TimeInForce};

use super::OrderDraft;

/// Buy limits this far above market (and sell limits this far below) draw a
/// warning.
const LIMIT_PRICE_BAND: Decimal = dec!(0.10);

/// Validation result.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Hard errors; any entry fails the submission.
    pub errors: Vec<String>,
    /// Soft findings surfaced on the execution report.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Whether the draft may be submitted.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Market context consulted during validation.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    /// Asset info from the universe cache; `None` means unknown symbol.
    pub asset: Option<Asset>,
    /// Last trade price, when a snapshot was available.
    pub last_trade_price: Option<Decimal>,
    /// Market session status, when available.
    pub market: Option<MarketStatus>,
}

/// Normalize a draft before validation.
///
/// Bracket orders must be `day`; a `gtc` bracket is corrected rather than
/// rejected. Returns the correction warnings.
#[must_use]
pub fn normalize_draft(draft: &mut OrderDraft) -> Vec<String> {
    let mut warnings = Vec::new();
    if draft.order_class == OrderClass::Bracket && draft.time_in_force == TimeInForce::Gtc {
        draft.time_in_force = TimeInForce::Day;
        warnings.push("bracket time-in-force corrected from gtc to day".to_string());
    }
    warnings
}

/// Validate a draft against the market context.
pub fn validate_draft(draft: &OrderDraft, ctx: &ValidationContext) -> ValidationReport {
    let mut report = ValidationReport::default();

    validate_schema(draft, &mut report);
    if !report.valid() {
        // Schema failures make the later checks meaningless.
        return report;
    }

    validate_tradability(draft, ctx, &mut report);
    validate_tif_matrix(draft, &mut report);
    validate_price_sanity(draft, ctx, &mut report);
    validate_session(draft, ctx, &mut report);

    report
}

fn validate_schema(draft: &OrderDraft, report: &mut ValidationReport) {
    if draft.symbol.trim().is_empty() {
        report.error("symbol is required");
    }

    match (draft.qty, draft.notional) {
        (None, None) => report.error("one of qty or notional is required"),
        (Some(_), Some(_)) => report.error("qty and notional are mutually exclusive"),
        (Some(qty), None) if qty <= Decimal::ZERO => report.error("qty must be positive"),
        (None, Some(notional)) if notional <= Decimal::ZERO => {
            report.error("notional must be positive");
        }
        _ => {}
    }

    if draft.notional.is_some() && draft.order_type != OrderType::Market {
        report.error("notional orders must be market orders");
    }

    match draft.order_type {
        OrderType::Market => {
            if draft.limit_price.is_some() || draft.stop_price.is_some() {
                report.error("market orders take neither limit_price nor stop_price");
            }
        }
        OrderType::Limit => {
            match draft.limit_price {
                Some(p) if p > Decimal::ZERO => {}
                _ => report.error("limit orders require a positive limit_price"),
            }
            if draft.stop_price.is_some() {
                report.error("limit orders take no stop_price");
            }
        }
        OrderType::Stop => {
            match draft.stop_price {
                Some(p) if p > Decimal::ZERO => {}
                _ => report.error("stop orders require a positive stop_price"),
            }
            if draft.limit_price.is_some() {
                report.error("stop orders take no limit_price");
            }
        }
        OrderType::StopLimit => {
            if !draft.limit_price.is_some_and(|p| p > Decimal::ZERO) {
                report.error("stop-limit orders require a positive limit_price");
            }
            if !draft.stop_price.is_some_and(|p| p > Decimal::ZERO) {
                report.error("stop-limit orders require a positive stop_price");
            }
        }
        OrderType::TrailingStop => match (draft.trail_percent, draft.trail_price) {
            (Some(_), Some(_)) => {
                report.error("trailing stops take exactly one of trail_percent or trail_price");
            }
            (None, None) => {
                report.error("trailing stops require trail_percent or trail_price");
            }
            (Some(pct), None) => {
                if pct <= Decimal::ZERO || pct > dec!(100) {
                    report.error("trail_percent must be in (0, 100]");
                }
            }
            (None, Some(price)) => {
                if price <= Decimal::ZERO {
                    report.error("trail_price must be positive");
                }
            }
        },
    }

    if draft.order_class == OrderClass::Bracket {
        if draft.take_profit_limit_price.is_none() || draft.stop_loss_stop_price.is_none() {
            report.error("bracket orders require take_profit_limit_price and stop_loss_stop_price");
        }
        if draft.notional.is_some() {
            report.error("bracket orders require qty, not notional");
        }
        if !matches!(draft.order_type, OrderType::Market | OrderType::Limit) {
            report.error("bracket entry must be a market or limit order");
        }
    }
}

fn validate_tradability(
    draft: &OrderDraft,
    ctx: &ValidationContext,
    report: &mut ValidationReport,
) {
    // A position must stay closeable even after the symbol leaves the
    // universe.
    if draft.side == OrderSide::Sell {
        return;
    }

    match &ctx.asset {
        None => report.error(format!("{} is not in the tradable universe", draft.symbol)),
        Some(asset) => {
            if !asset.tradable {
                report.error(format!("{} is not currently tradable", draft.symbol));
            }
            if draft.notional.is_some() && !asset.fractionable {
                report.warn(format!(
                    "{} is not fractionable; notional order may be rejected",
                    draft.symbol
                ));
            }
            if !asset.marginable {
                report.warn(format!("{} is not marginable", draft.symbol));
            }
        }
    }
}

fn validate_tif_matrix(draft: &OrderDraft, report: &mut ValidationReport) {
    use TimeInForce::{Cls, Day, Fok, Gtc, Ioc, Opg};

    let tif = draft.time_in_force;
    let allowed = match draft.order_type {
        OrderType::Market => matches!(tif, Day | Opg | Cls | Ioc | Fok),
        OrderType::Limit => true,
        OrderType::Stop | OrderType::TrailingStop | OrderType::StopLimit => {
            matches!(tif, Day | Gtc)
        }
    };
    if !allowed {
        report.error(format!(
            "{} orders do not support time_in_force {}",
            draft.order_type, tif
        ));
    }

    if draft.extended_hours {
        let ext_ok = matches!(draft.order_type, OrderType::Limit | OrderType::StopLimit);
        if !ext_ok {
            report.error(format!(
                "{} orders cannot trade extended hours",
                draft.order_type
            ));
        }
    }

    // Brackets are normalized gtc -> day upstream; anything else non-day is
    // caller error.
    if draft.order_class == OrderClass::Bracket && draft.time_in_force != Day {
        report.error("bracket orders must use time_in_force day");
    }
}

fn validate_price_sanity(
    draft: &OrderDraft,
    ctx: &ValidationContext,
    report: &mut ValidationReport,
) {
    let Some(last) = ctx.last_trade_price else {
        validate_bracket_legs(draft, None, report);
        return;
    };

    if let Some(stop) = draft.stop_price
        && matches!(draft.order_type, OrderType::Stop | OrderType::StopLimit)
    {
        match draft.side {
            OrderSide::Buy if stop <= last => {
                report.warn(format!(
                    "buy stop {stop} at or below market {last} will trigger immediately"
                ));
            }
            OrderSide::Sell if stop >= last => {
                report.warn(format!(
                    "sell stop {stop} at or above market {last} will trigger immediately"
                ));
            }
            _ => {}
        }
    }

    if let Some(limit) = draft.limit_price
        && matches!(draft.order_type, OrderType::Limit | OrderType::StopLimit)
    {
        match draft.side {
            OrderSide::Buy if limit > last * (Decimal::ONE + LIMIT_PRICE_BAND) => {
                report.warn(format!(
                    "buy limit {limit} is more than 10% above market {last}"
                ));
            }
            OrderSide::Sell if limit < last * (Decimal::ONE - LIMIT_PRICE_BAND) => {
                report.warn(format!(
                    "sell limit {limit} is more than 10% below market {last}"
                ));
            }
            _ => {}
        }
    }

    validate_bracket_legs(draft, Some(last), report);
}

fn validate_bracket_legs(
    draft: &OrderDraft,
    last: Option<Decimal>,
    report: &mut ValidationReport,
) {
    if draft.order_class != OrderClass::Bracket {
        return;
    }
    let (Some(take_profit), Some(stop_loss)) =
        (draft.take_profit_limit_price, draft.stop_loss_stop_price)
    else {
        return; // schema already failed this
    };
    let Some(entry) = draft.limit_price.or(last) else {
        return;
    };

    let ordered = match draft.side {
        OrderSide::Buy => take_profit > entry && entry > stop_loss,
        OrderSide::Sell => take_profit < entry && entry < stop_loss,
    };
    if !ordered {
        report.error(format!(
            "bracket legs out of order for {}: take_profit {take_profit}, entry {entry}, stop_loss {stop_loss}",
            draft.side
        ));
    }
}

fn validate_session(draft: &OrderDraft, ctx: &ValidationContext, report: &mut ValidationReport) {
    if draft.extended_hours {
        return;
    }
    if let Some(market) = ctx.market
        && !market.accepts_orders_now()
    {
        report.warn("market is closed; day orders will queue until the next session");
    }
}
