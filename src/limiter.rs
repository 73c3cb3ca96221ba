//! Pacing of outbound calls against the upstream's bursty rate budget.
//!
//! Every GraphQL response carries a fresh budget snapshot. The limiter
//! spreads the remaining points evenly over the remaining window, and
//! takes a full break when the budget is exhausted, instead of burning
//! through the quota and idling until the reset.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;

/// Budget snapshot reported by the upstream on every response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateBudget {
    pub limit: i64,
    pub remaining: i64,
    pub reset_at: Option<DateTime<Utc>>,
    pub cost: i64,
    pub node_count: i64,
    pub used: i64,
}

/// Gate shared by every worker on the same credential. The budget
/// read/sleep/issue sequence runs inside one critical section, so
/// concurrent workers cannot overdraw a window they both observed.
#[derive(Default)]
pub struct Limiter {
    gate: Mutex<()>,
}

impl Limiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns once it is safe to issue the next call costing `cost`
    /// points against the observed budget.
    pub async fn pace(&self, budget: &RateBudget, cost: i64) {
        let _issue = self.gate.lock().await;
        let wait = pause_for(budget, cost, Utc::now());
        if wait.is_zero() {
            return;
        }
        if budget.remaining <= cost {
            eprintln!(
                "\x1b[33mRate budget exhausted ({}/{}), taking a {}s break...\x1b[0m",
                budget.remaining,
                budget.limit,
                wait.as_secs()
            );
        }
        tokio::time::sleep(wait).await;
    }
}

/// How long to hold off before spending `cost` points, given the
/// budget observed at `now`. The extra second on top of the reset
/// instant absorbs clock skew at the window boundary.
fn pause_for(budget: &RateBudget, cost: i64, now: DateTime<Utc>) -> Duration {
    let Some(reset_at) = budget.reset_at else {
        return Duration::ZERO;
    };
    let delta = reset_at + chrono::Duration::seconds(1) - now;
    if delta <= chrono::Duration::zero() {
        return Duration::ZERO;
    }
    let cost = cost.max(1);
    let wait = if budget.remaining > cost {
        delta / budget.remaining as i32 * cost as i32
    } else {
        delta
    };
    wait.to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn budget(remaining: i64, reset_in_secs: i64, now: DateTime<Utc>) -> RateBudget {
        RateBudget {
            limit: 5000,
            remaining,
            reset_at: Some(now + chrono::Duration::seconds(reset_in_secs)),
            cost: 1,
            ..Default::default()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_no_snapshot_means_no_wait() {
        assert_eq!(pause_for(&RateBudget::default(), 1, now()), Duration::ZERO);
    }

    #[test]
    fn test_reset_already_passed_means_no_wait() {
        let b = budget(0, -120, now());
        assert_eq!(pause_for(&b, 1, now()), Duration::ZERO);
    }

    #[test]
    fn test_points_spread_evenly_over_window() {
        // 100 remaining points over a 99s (+1s skew) window: ~1s each
        let b = budget(100, 99, now());
        assert_eq!(pause_for(&b, 1, now()), Duration::from_secs(1));
        // A call costing 10 points waits ten times as long
        assert_eq!(pause_for(&b, 10, now()), Duration::from_secs(10));
    }

    #[test]
    fn test_exhaustion_waits_for_full_reset() {
        // remaining=0, reset in 60s: next call is delayed >= 60s
        let b = budget(0, 60, now());
        assert_eq!(pause_for(&b, 1, now()), Duration::from_secs(61));
    }

    #[test]
    fn test_remaining_equal_to_cost_waits_for_full_reset() {
        let b = budget(5, 30, now());
        assert_eq!(pause_for(&b, 5, now()), Duration::from_secs(31));
    }

    #[test]
    fn test_total_sleep_converges_to_window_length() {
        // Spending the whole budget point by point should sleep for
        // about the window length in total, not materially more.
        let start = now();
        let window = chrono::Duration::seconds(600);
        let reset_at = start + window;
        let mut clock = start;
        let mut slept = Duration::ZERO;
        for remaining in (0..=100).rev() {
            let b = RateBudget {
                limit: 5000,
                remaining,
                reset_at: Some(reset_at),
                cost: 1,
                ..Default::default()
            };
            let pause = pause_for(&b, 1, clock);
            slept += pause;
            clock += chrono::Duration::from_std(pause).unwrap();
        }
        let total = window.to_std().unwrap();
        assert!(slept >= total, "slept {:?} < window {:?}", slept, total);
        // The +1s skew margin accrues once per spread step at most
        assert!(slept <= total + Duration::from_secs(102));
    }
}
