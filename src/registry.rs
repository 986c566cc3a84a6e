//! In-process run registry.
//!
//! One owned structure behind a mutex: the HTTP layer reads snapshots, the
//! owning pipeline task writes. Runs live for the process lifetime and are
//! never persisted across restarts; the durable artifact is the report file
//! the orchestrator writes on completion. Lock scopes are short and never
//! held across awaits.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::events::PipelineEvent;
use crate::report::FinalReport;

/// Number of buffered events returned to polling clients.
pub const POLL_LOG_TAIL: usize = 20;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Error,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// A registered run and everything known about it.
#[derive(Debug, Clone)]
pub struct Run {
    pub id: String,
    pub repo_url: String,
    pub team_name: String,
    pub leader_name: String,
    pub branch: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Append-only ordered event log.
    pub events: Vec<PipelineEvent>,
    /// Present once the run is terminal.
    pub report: Option<FinalReport>,
}

/// Summary row for the listing endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub repo_url: String,
    pub team_name: String,
    pub branch: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_fixes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_commits: Option<usize>,
}

/// Process-wide run store.
pub struct RunRegistry {
    runs: Mutex<HashMap<String, Run>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a new running run and returns its id.
    pub fn create(
        &self,
        repo_url: &str,
        team_name: &str,
        leader_name: &str,
        branch: &str,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let run = Run {
            id: id.clone(),
            repo_url: repo_url.to_string(),
            team_name: team_name.to_string(),
            leader_name: leader_name.to_string(),
            branch: branch.to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            events: Vec::new(),
            report: None,
        };
        self.runs.lock().expect("registry lock").insert(id.clone(), run);
        id
    }

    /// Appends an event to the run's ordered log.
    ///
    /// Terminal runs are immutable; appends after finalization are dropped.
    pub fn append_event(&self, event: &PipelineEvent) {
        let mut runs = self.runs.lock().expect("registry lock");
        if let Some(run) = runs.get_mut(&event.run_id)
            && !run.status.is_terminal()
        {
            run.events.push(event.clone());
        }
    }

    /// Moves a run to a terminal state and attaches its report.
    pub fn finalize(&self, run_id: &str, status: RunStatus, report: FinalReport) {
        let mut runs = self.runs.lock().expect("registry lock");
        if let Some(run) = runs.get_mut(run_id)
            && !run.status.is_terminal()
        {
            run.status = status;
            run.completed_at = Some(Utc::now());
            run.report = Some(report);
        }
    }

    /// Full snapshot of one run, cloned out of the lock.
    pub fn get(&self, run_id: &str) -> Option<Run> {
        self.runs.lock().expect("registry lock").get(run_id).cloned()
    }

    /// The last [`POLL_LOG_TAIL`] events of a run.
    pub fn tail_events(&self, run_id: &str) -> Option<Vec<PipelineEvent>> {
        let runs = self.runs.lock().expect("registry lock");
        runs.get(run_id).map(|run| {
            let skip = run.events.len().saturating_sub(POLL_LOG_TAIL);
            run.events[skip..].to_vec()
        })
    }

    /// Summaries of all known runs, newest first.
    pub fn summaries(&self) -> Vec<RunSummary> {
        let runs = self.runs.lock().expect("registry lock");
        let mut summaries: Vec<RunSummary> = runs
            .values()
            .map(|run| RunSummary {
                run_id: run.id.clone(),
                repo_url: run.repo_url.clone(),
                team_name: run.team_name.clone(),
                branch: run.branch.clone(),
                status: run.status,
                started_at: run.started_at,
                completed_at: run.completed_at,
                total_fixes: run.report.as_ref().map(|r| r.total_fixes),
                total_commits: run.report.as_ref().map(|r| r.total_commits),
            })
            .collect();
        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        summaries
    }
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}
