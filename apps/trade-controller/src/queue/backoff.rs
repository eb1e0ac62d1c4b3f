//! Per-type retry schedules with jitter.

use std::time::Duration;

use rand::Rng;

use crate::models::WorkItemType;

/// Jitter factor applied on top of the base delay, in `[0, 0.2 * base]`.
const JITTER_FACTOR: f64 = 0.2;

/// Base delay schedule for a work item type, in milliseconds.
///
/// The delay for attempt `n` (0-indexed) is `schedule[min(n, len - 1)]`.
#[must_use]
pub const fn schedule_for(item_type: WorkItemType) -> &'static [u64] {
    match item_type {
        WorkItemType::OrderSubmit | WorkItemType::PositionClose => &[1_000, 5_000, 15_000],
        WorkItemType::OrderCancel => &[1_000, 3_000, 10_000],
        WorkItemType::OrderSync => &[5_000, 15_000, 60_000],
        WorkItemType::KillSwitch => &[500, 2_000, 5_000],
        WorkItemType::DecisionEvaluation => &[2_000, 10_000, 30_000],
        WorkItemType::AssetUniverseSync => &[60_000, 300_000, 600_000],
    }
}

/// Base delay for attempt `n` (0-indexed), without jitter.
#[must_use]
pub fn base_delay(item_type: WorkItemType, attempt: u32) -> Duration {
    let schedule = schedule_for(item_type);
    let index = (attempt as usize).min(schedule.len() - 1);
    Duration::from_millis(schedule[index])
}

/// Jittered delay for attempt `n` (0-indexed).
#[must_use]
pub fn delay(item_type: WorkItemType, attempt: u32) -> Duration {
    with_jitter(base_delay(item_type, attempt))
}

/// Add uniform jitter in `[0, JITTER_FACTOR * base]`.
#[must_use]
pub fn with_jitter(base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let jitter_range = (base_ms as f64 * JITTER_FACTOR) as u64;
    if jitter_range == 0 {
        return base;
    }
    let jitter = rand::rng().random_range(0..=jitter_range);
    Duration::from_millis(base_ms + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn schedules_match_policy() {
        assert_eq!(schedule_for(WorkItemType::OrderSubmit), &[1_000, 5_000, 15_000]);
        assert_eq!(schedule_for(WorkItemType::OrderCancel), &[1_000, 3_000, 10_000]);
        assert_eq!(schedule_for(WorkItemType::OrderSync), &[5_000, 15_000, 60_000]);
        assert_eq!(
            schedule_for(WorkItemType::PositionClose),
            &[1_000, 5_000, 15_000]
        );
        assert_eq!(schedule_for(WorkItemType::KillSwitch), &[500, 2_000, 5_000]);
        assert_eq!(
            schedule_for(WorkItemType::DecisionEvaluation),
            &[2_000, 10_000, 30_000]
        );
        assert_eq!(
            schedule_for(WorkItemType::AssetUniverseSync),
            &[60_000, 300_000, 600_000]
        );
    }

    #[test]
    fn base_delay_clamps_to_last_entry() {
        assert_eq!(
            base_delay(WorkItemType::OrderSubmit, 0),
            Duration::from_millis(1_000)
        );
        assert_eq!(
            base_delay(WorkItemType::OrderSubmit, 2),
            Duration::from_millis(15_000)
        );
        assert_eq!(
            base_delay(WorkItemType::OrderSubmit, 99),
            Duration::from_millis(15_000)
        );
    }

    #[test]
    fn kill_switch_has_the_shortest_first_delay() {
        let kill = schedule_for(WorkItemType::KillSwitch)[0];
        for t in crate::models::WorkItemType::all() {
            assert!(kill <= schedule_for(t)[0]);
        }
    }

    proptest! {
        #[test]
        fn jitter_stays_in_bounds(base_ms in 1u64..1_000_000, attempt in 0u32..10) {
            let _ = attempt;
            let base = Duration::from_millis(base_ms);
            let jittered = with_jitter(base);
            prop_assert!(jittered >= base);
            let max = base_ms + (base_ms as f64 * JITTER_FACTOR) as u64;
            prop_assert!(jittered.as_millis() as u64 <= max);
        }
    }
}
