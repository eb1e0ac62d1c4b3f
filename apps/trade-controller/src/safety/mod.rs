//! Kill switch and trading-halt safety controls.

mod kill_switch;

pub use kill_switch::{KillSwitch, KillSwitchReport, engage_kill_switch};
