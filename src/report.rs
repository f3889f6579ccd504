//! Run results
//!
//! A `RunResult` is produced once per run and never changes afterwards. The
//! CI line and the JSON form are what the leaderboard tooling consumes.

use serde::{Deserialize, Serialize};

use crate::sim::judge::Verdict;

/// Exit status for a completed race
pub const EXIT_SUCCESS: i32 = 0;
/// Exit status for any other terminal verdict
pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub verdict: Verdict,
    /// Human-readable explanation of the verdict
    pub reason: String,
    pub ticks: u64,
    /// Simulated time when the run ended (seconds)
    pub elapsed_secs: f64,
    /// Race time, only for completed runs (seconds)
    pub race_time_secs: Option<f64>,
    pub track_seed: u64,
    /// Centerline length (metres)
    pub track_length: f64,
    /// Ticks where the strategy missed its compute budget
    pub budget_overruns: u64,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.verdict == Verdict::Completed && self.race_time_secs.is_some()
    }

    /// Single line for CI logs: `FINAL_SCORE: <seconds>` or `FAIL: <reason>`
    pub fn ci_line(&self) -> String {
        match self.race_time_secs {
            Some(time) if self.verdict == Verdict::Completed => format!("FINAL_SCORE: {time:.4}"),
            _ => format!("FAIL: {} - {}", self.verdict, self.reason),
        }
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            EXIT_SUCCESS
        } else {
            EXIT_FAILURE
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
