//! Final run reports.
//!
//! The report is the run's durable artifact: a JSON document with stable
//! keys, stored in the run registry, carried on the terminal
//! `pipeline_done` event, and written to `results/{run_id}.json`.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::patch::FixStatus;
use crate::score::ScoreBreakdown;

/// Terminal verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalStatus {
    #[serde(rename = "PASSED")]
    Passed,
    #[serde(rename = "FAILED")]
    Failed,
}

/// Status of one timeline entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IterationStatus {
    Passed,
    Failed,
    NoFixes,
    ApplyFailed,
    CiPassed,
    Error,
}

/// One state-machine transition: iteration 0 is the initial analysis,
/// iteration N>0 the Nth repair attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub status: IterationStatus,
    pub timestamp: DateTime<Utc>,
}

impl IterationRecord {
    pub fn now(iteration: u32, status: IterationStatus) -> Self {
        Self {
            iteration,
            status,
            timestamp: Utc::now(),
        }
    }
}

/// A fix as it appears in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportFix {
    pub file: String,
    pub bug_type: String,
    pub line_number: Option<usize>,
    pub commit_message: String,
    pub description: String,
    pub status: FixStatus,
}

/// The scored structured report of a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalReport {
    pub run_id: String,
    pub repo_url: String,
    pub team_name: String,
    pub leader_name: String,
    pub branch: String,
    pub total_failures: usize,
    pub total_fixes: usize,
    pub total_commits: usize,
    pub final_status: FinalStatus,
    /// Human form of the elapsed time, `"Xm Ys"`.
    pub total_time: String,
    pub total_time_ms: u64,
    pub score_breakdown: ScoreBreakdown,
    pub fixes: Vec<ReportFix>,
    pub timeline: Vec<IterationRecord>,
    pub generated_at: DateTime<Utc>,
}

impl FinalReport {
    /// Writes the report to `path`, creating parent directories as needed.
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }
}

/// Formats milliseconds as `"Xm Ys"`.
pub fn format_duration(ms: u64) -> String {
    let total_secs = ms / 1000;
    format!("{}m {}s", total_secs / 60, total_secs % 60)
}
