//! Run scoring.
//!
//! A pure mapping from run metrics to a score breakdown. Penalties are
//! stored as non-positive numbers so the serialized breakdown sums to the
//! total directly; the total is clamped at zero.

use serde::{Deserialize, Serialize};

/// Metrics a finished run is scored on.
///
/// `iteration_count` counts repair iterations only; the initial analysis
/// (iteration 0) is excluded.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInput {
    pub total_time_ms: u64,
    pub commit_count: usize,
    pub fix_count: usize,
    pub iteration_count: usize,
}

/// Score components; `total = max(0, sum of the rest)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub base: i64,
    pub speed_bonus: i64,
    pub fix_bonus: i64,
    /// Non-positive.
    pub commit_penalty: i64,
    /// Non-positive.
    pub iteration_penalty: i64,
    pub total: i64,
}

const BASE: i64 = 100;
const SPEED_BONUS: i64 = 10;
const SPEED_THRESHOLD_MS: u64 = 300_000;
const FIX_BONUS_CAP: usize = 20;
const FREE_COMMITS: usize = 20;
const FREE_ITERATIONS: usize = 3;

/// Scores a run.
pub fn score(input: ScoreInput) -> ScoreBreakdown {
    let speed_bonus = if input.total_time_ms < SPEED_THRESHOLD_MS {
        SPEED_BONUS
    } else {
        0
    };
    let fix_bonus = input.fix_count.min(FIX_BONUS_CAP) as i64 * 2;
    let commit_penalty = -(input.commit_count.saturating_sub(FREE_COMMITS) as i64 * 2);
    let iteration_penalty = -(input.iteration_count.saturating_sub(FREE_ITERATIONS) as i64 * 5);

    let total = (BASE + speed_bonus + fix_bonus + commit_penalty + iteration_penalty).max(0);

    ScoreBreakdown {
        base: BASE,
        speed_bonus,
        fix_bonus,
        commit_penalty,
        iteration_penalty,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_clean_run_scores_base_plus_speed() {
        let breakdown = score(ScoreInput {
            total_time_ms: 100_000,
            commit_count: 0,
            fix_count: 0,
            iteration_count: 0,
        });
        assert_eq!(breakdown.total, 110);
    }

    #[test]
    fn commit_cap_scenario() {
        // 25 commits, 10 fixes, 3 iterations, 200s: 100 + 10 + 20 - 10 - 0.
        let breakdown = score(ScoreInput {
            total_time_ms: 200_000,
            commit_count: 25,
            fix_count: 10,
            iteration_count: 3,
        });
        assert_eq!(breakdown.speed_bonus, 10);
        assert_eq!(breakdown.fix_bonus, 20);
        assert_eq!(breakdown.commit_penalty, -10);
        assert_eq!(breakdown.iteration_penalty, 0);
        assert_eq!(breakdown.total, 120);
    }

    #[test]
    fn budget_exhausted_scenario() {
        // Five iterations: penalty (5-3)*5 = 10.
        let breakdown = score(ScoreInput {
            total_time_ms: 400_000,
            commit_count: 5,
            fix_count: 5,
            iteration_count: 5,
        });
        assert_eq!(breakdown.speed_bonus, 0);
        assert_eq!(breakdown.iteration_penalty, -10);
        assert_eq!(breakdown.total, 100 + 10 - 10);
    }

    #[test]
    fn fix_bonus_is_capped() {
        let breakdown = score(ScoreInput {
            total_time_ms: 0,
            commit_count: 0,
            fix_count: 100,
            iteration_count: 0,
        });
        assert_eq!(breakdown.fix_bonus, 40);
    }

    #[test]
    fn total_never_negative() {
        let breakdown = score(ScoreInput {
            total_time_ms: 10_000_000,
            commit_count: 500,
            fix_count: 0,
            iteration_count: 50,
        });
        assert_eq!(breakdown.total, 0);
        assert!(breakdown.commit_penalty <= 0);
        assert!(breakdown.iteration_penalty <= 0);
    }

    #[test]
    fn total_bounded_by_bonuses() {
        for (time, commits, fixes, iterations) in [
            (0u64, 0usize, 0usize, 0usize),
            (1_000_000, 30, 25, 10),
            (299_999, 21, 19, 4),
        ] {
            let b = score(ScoreInput {
                total_time_ms: time,
                commit_count: commits,
                fix_count: fixes,
                iteration_count: iterations,
            });
            assert!(b.total >= 0);
            assert!(b.total <= b.base + b.speed_bonus + b.fix_bonus);
        }
    }

    #[test]
    fn breakdown_serializes_camel_case() {
        let json = serde_json::to_value(score(ScoreInput {
            total_time_ms: 0,
            commit_count: 0,
            fix_count: 0,
            iteration_count: 0,
        }))
        .unwrap();
        assert!(json.get("speedBonus").is_some());
        assert!(json.get("commitPenalty").is_some());
        assert!(json.get("iterationPenalty").is_some());
    }
}
