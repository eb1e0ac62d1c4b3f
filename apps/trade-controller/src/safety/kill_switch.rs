//! Kill switch: cancel everything, optionally flatten, halt submissions.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::broker::{BrokerClient, BrokerError};

/// Process-wide halt flag.
///
/// While engaged, new ORDER_SUBMIT work fails permanently; operators replay
/// it through the dead-letter queue after disengaging.
#[derive(Debug, Default)]
pub struct KillSwitch {
    active: AtomicBool,
}

impl KillSwitch {
    /// Create a disengaged kill switch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the switch is engaged.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Engage the switch.
    pub fn engage(&self) {
        if !self.active.swap(true, Ordering::SeqCst) {
            tracing::warn!("Kill switch engaged, order submissions halted");
        }
    }

    /// Disengage the switch (operator action).
    pub fn disengage(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            tracing::info!("Kill switch disengaged, order submissions resumed");
        }
    }
}

/// Result of a kill-switch execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitchReport {
    /// Whether the cancel-all call succeeded.
    pub orders_canceled: bool,
    /// Positions successfully closed.
    pub positions_closed: u32,
    /// Per-position close failures; these never fail the kill switch itself.
    pub position_errors: Vec<String>,
}

/// Cancel all open orders, optionally close every position, and engage the
/// halt flag.
///
/// The cancel-all is unconditional and its failure propagates; individual
/// position-close failures are recorded and logged only.
pub async fn engage_kill_switch(
    broker: &dyn BrokerClient,
    kill_switch: &KillSwitch,
    close_positions: bool,
) -> Result<KillSwitchReport, BrokerError> {
    broker.cancel_all_orders().await?;
    tracing::warn!("Kill switch: all open orders canceled");

    let mut positions_closed = 0;
    let mut position_errors = Vec::new();

    if close_positions {
        let positions = broker.get_positions().await?;
        for position in positions {
            match broker.close_position(&position.symbol).await {
                Ok(()) => {
                    positions_closed += 1;
                    tracing::info!(symbol = %position.symbol, "Kill switch: position closed");
                }
                Err(e) => {
                    tracing::error!(
                        symbol = %position.symbol,
                        error = %e,
                        "Kill switch: position close failed"
                    );
                    position_errors.push(format!("{}: {e}", position.symbol));
                }
            }
        }
    }

    kill_switch.engage();

    Ok(KillSwitchReport {
        orders_canceled: true,
        positions_closed,
        position_errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Position, ScriptedBroker};
    use rust_decimal_macros::dec;

    fn position(symbol: &str) -> Position {
        Position {
            symbol: symbol.to_string(),
            qty: dec!(10),
            avg_entry_price: dec!(100),
        }
    }

    #[tokio::test]
    async fn cancels_all_and_engages_flag() {
        let broker = ScriptedBroker::new();
        let kill_switch = KillSwitch::new();

        let report = engage_kill_switch(&broker, &kill_switch, false)
            .await
            .unwrap();

        assert!(report.orders_canceled);
        assert_eq!(report.positions_closed, 0);
        assert_eq!(broker.cancel_all_calls(), 1);
        assert!(kill_switch.is_active());
    }

    #[tokio::test]
    async fn closes_positions_best_effort() {
        let broker = ScriptedBroker::new();
        broker.set_positions(vec![position("AAPL"), position("TSLA"), position("MSFT")]);
        broker.fail_close_position("TSLA", BrokerError::Network("reset".into()));
        let kill_switch = KillSwitch::new();

        let report = engage_kill_switch(&broker, &kill_switch, true)
            .await
            .unwrap();

        assert_eq!(report.positions_closed, 2);
        assert_eq!(report.position_errors.len(), 1);
        assert!(report.position_errors[0].contains("TSLA"));
        assert!(kill_switch.is_active());
    }

    #[test]
    fn disengage_resets_flag() {
        let kill_switch = KillSwitch::new();
        kill_switch.engage();
        assert!(kill_switch.is_active());
        kill_switch.disengage();
        assert!(!kill_switch.is_active());
    }
}
