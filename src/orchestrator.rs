//! Run orchestration: the heal loop.
//!
//! The orchestrator drives one run through its state machine:
//!
//! ```text
//! INIT → ANALYZE
//! ANALYZE --passed-->        REPORT(PASSED)
//! ANALYZE --failed-->        ITERATE(1)
//! ITERATE(i) --i>limit-->    REPORT(FAILED)
//! ITERATE(i) --no-fixes-->   REPORT(FAILED)
//! ITERATE(i) --apply==0-->   REPORT(FAILED)
//! ITERATE(i) --tests pass--> REPORT(PASSED)
//! ITERATE(i) --tests fail--> MONITOR(i)
//! MONITOR(i) --ci pass-->    REPORT(PASSED)
//! MONITOR(i) --else-->       ITERATE(i+1)
//! ```
//!
//! Each submitted run is one spawned task; within it the loop is strictly
//! sequential because every step depends on the previous step's effects on
//! the shared working tree. Every transition appends a timeline record and
//! emits an event; the working tree is removed on every exit path, including
//! unwind; the final report is stored in the registry, written to disk, and
//! carried on the terminal `pipeline_done` event.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{error, info};

use crate::agents::analyzer::Analyzer;
use crate::agents::committer::{Committer, branch_name};
use crate::agents::fixer::Fixer;
use crate::agents::monitor::Monitor;
use crate::classify;
use crate::config::Config;
use crate::events::{EventBus, EventName, PipelineEvent};
use crate::llm::LanguageModel;
use crate::patch::{self, AppliedFix, FixStatus};
use crate::registry::{RunRegistry, RunStatus};
use crate::report::{
    FinalReport, FinalStatus, IterationRecord, IterationStatus, ReportFix, format_duration,
};
use crate::sandbox;
use crate::score::{ScoreInput, score};

/// A validated run submission.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub repo_url: String,
    pub owner: String,
    pub repo: String,
    pub team_name: String,
    pub leader_name: String,
}

/// What the submitter gets back immediately.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub run_id: String,
    pub branch: String,
}

/// Spawns and tracks run pipelines.
pub struct Orchestrator {
    config: Arc<Config>,
    registry: Arc<RunRegistry>,
    bus: EventBus,
    model: Arc<dyn LanguageModel>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<RunRegistry>,
        bus: EventBus,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            config,
            registry,
            bus,
            model,
        }
    }

    /// Registers a run and spawns its pipeline; returns immediately.
    pub fn submit(&self, request: RunRequest) -> SubmitReceipt {
        let branch = branch_name(&request.team_name, &request.leader_name);
        let run_id = self.registry.create(
            &request.repo_url,
            &request.team_name,
            &request.leader_name,
            &branch,
        );

        let pipeline = Pipeline {
            config: self.config.clone(),
            registry: self.registry.clone(),
            bus: self.bus.clone(),
            model: self.model.clone(),
            run_id: run_id.clone(),
            request,
            branch: branch.clone(),
            timeline: Vec::new(),
            fixes: Vec::new(),
            commits: 0,
            total_failures: 0,
            current_iteration: 0,
            started: Instant::now(),
        };
        tokio::spawn(pipeline.run());

        SubmitReceipt { run_id, branch }
    }
}

/// Removes the working tree when dropped, so the tree is gone on every exit
/// path including unwind.
struct WorkdirGuard(PathBuf);

impl Drop for WorkdirGuard {
    fn drop(&mut self) {
        if self.0.exists()
            && let Err(e) = std::fs::remove_dir_all(&self.0)
        {
            error!(path = %self.0.display(), error = %e, "failed to remove working tree");
        }
    }
}

/// One run's pipeline state.
struct Pipeline {
    config: Arc<Config>,
    registry: Arc<RunRegistry>,
    bus: EventBus,
    model: Arc<dyn LanguageModel>,
    run_id: String,
    request: RunRequest,
    branch: String,
    timeline: Vec<IterationRecord>,
    fixes: Vec<AppliedFix>,
    commits: usize,
    total_failures: usize,
    current_iteration: u32,
    started: Instant,
}

impl Pipeline {
    async fn run(mut self) {
        let workdir = self.config.run_work_dir(&self.run_id);
        let guard = WorkdirGuard(workdir.clone());

        let outcome = self.execute(&workdir).await;

        // The tree must be gone before the terminal event is observable.
        drop(guard);

        let (final_status, run_status) = match outcome {
            Ok(final_status) => {
                let run_status = match final_status {
                    FinalStatus::Passed => RunStatus::Completed,
                    FinalStatus::Failed => RunStatus::Failed,
                };
                (final_status, run_status)
            }
            Err(e) => {
                error!(run_id = %self.run_id, error = %e, "pipeline error");
                self.record(self.current_iteration, IterationStatus::Error);
                (FinalStatus::Failed, RunStatus::Error)
            }
        };

        self.finalize(final_status, run_status);
    }

    /// The state machine proper. Any `Err` is pipeline-fatal and becomes an
    /// `ERROR` timeline entry at the current iteration.
    async fn execute(&mut self, workdir: &Path) -> anyhow::Result<FinalStatus> {
        self.emit(
            EventName::PipelineStart,
            "orchestrator",
            format!("Starting run for {}", self.request.repo_url),
            None,
            Some(0),
        );

        let executor = sandbox::executor_for_run(&self.config, &self.run_id).await;
        info!(run_id = %self.run_id, executor = executor.name(), "sandbox executor selected");
        let analyzer = Analyzer::new(
            executor,
            self.config.github_token.clone(),
            Duration::from_secs(self.config.sandbox_timeout_secs),
        );
        let committer = Committer::new(self.config.github_token.clone());
        let fixer = Fixer::new(self.model.clone());
        let monitor = Monitor::new(
            self.config.github_token.clone(),
            Duration::from_secs(self.config.ci_poll_timeout_secs),
        );

        // ANALYZE: clone, detect, first test run.
        self.emit(
            EventName::CloneStart,
            "analyzer",
            format!("Cloning {}", self.request.repo_url),
            None,
            Some(5),
        );
        analyzer.clone_repo(&self.request.repo_url, workdir).await?;
        self.emit(EventName::CloneDone, "analyzer", "Clone complete", None, Some(10));

        let analysis = analyzer.analyze(workdir);
        self.emit(
            EventName::DetectDone,
            "analyzer",
            format!("Detected {} project", analysis.language),
            Some(json!({
                "language": analysis.language.to_string(),
                "image": analysis.runtime.image,
            })),
            Some(15),
        );
        self.emit(
            EventName::TestsDiscovered,
            "analyzer",
            format!("Discovered {} test files", analysis.test_files.len()),
            Some(json!({ "count": analysis.test_files.len() })),
            None,
        );

        self.emit(EventName::TestsStart, "analyzer", "Running tests", None, Some(20));
        let mut outcome = analyzer.run_tests(workdir, &analysis.runtime).await;
        self.emit(
            EventName::TestsDone,
            "analyzer",
            format!("Tests finished with exit code {}", outcome.exit_code),
            Some(json!({ "exitCode": outcome.exit_code })),
            Some(30),
        );

        if outcome.success() {
            self.record(0, IterationStatus::Passed);
            return Ok(FinalStatus::Passed);
        }

        self.total_failures = classify::classify(&outcome.combined_log()).len();
        self.record(0, IterationStatus::Failed);

        let mut identity_configured = false;
        let limit = self.config.retry_limit;

        for iteration in 1..=limit {
            self.current_iteration = iteration;
            self.emit(
                EventName::IterationStart,
                "orchestrator",
                format!("Repair iteration {iteration} of {limit}"),
                None,
                Some(iteration_progress(iteration, limit, 0)),
            );

            // FIX: classify and generate proposals.
            self.emit(
                EventName::FixGenerateStart,
                "fixer",
                "Generating fix proposals",
                None,
                None,
            );
            let raw_log = outcome.combined_log();
            let proposals = fixer.generate(&raw_log, workdir).await?;
            self.emit(
                EventName::FixGenerateDone,
                "fixer",
                format!("{} proposals generated", proposals.len()),
                Some(json!({ "count": proposals.len() })),
                None,
            );

            if proposals.is_empty() {
                self.record(iteration, IterationStatus::NoFixes);
                return Ok(FinalStatus::Failed);
            }

            // APPLY: write proposals into the tree.
            let applied = patch::apply_fixes(workdir, proposals);
            let applied_count = applied.len();
            let fixed_count = applied
                .iter()
                .filter(|f| f.status == FixStatus::Fixed)
                .count();
            self.emit(
                EventName::FixApplied,
                "patcher",
                format!("{fixed_count} of {applied_count} fixes applied"),
                Some(json!({ "applied": fixed_count, "total": applied_count })),
                Some(iteration_progress(iteration, limit, 1)),
            );
            self.fixes.extend(applied);

            if fixed_count == 0 {
                self.record(iteration, IterationStatus::ApplyFailed);
                return Ok(FinalStatus::Failed);
            }

            // COMMIT: branch, commit per file, push.
            if !identity_configured {
                committer.configure_identity(workdir).await?;
                identity_configured = true;
            }
            committer.prepare_branch(workdir, &self.branch).await?;
            self.emit(
                EventName::BranchReady,
                "committer",
                format!("On branch {}", self.branch),
                None,
                None,
            );

            let iteration_fixes = &self.fixes[self.fixes.len() - applied_count..];
            let new_commits = committer.commit_fixes(workdir, iteration_fixes).await?;
            self.commits += new_commits;
            self.emit(
                EventName::Committed,
                "committer",
                format!("{new_commits} commits created"),
                Some(json!({ "commits": new_commits })),
                None,
            );

            committer.push(workdir, &self.branch).await?;
            self.emit(
                EventName::Pushed,
                "committer",
                format!("Pushed {} to origin", self.branch),
                None,
                Some(iteration_progress(iteration, limit, 2)),
            );

            // VERIFY: re-run tests.
            self.emit(EventName::TestsStart, "analyzer", "Re-running tests", None, None);
            outcome = analyzer.run_tests(workdir, &analysis.runtime).await;
            self.emit(
                EventName::TestsDone,
                "analyzer",
                format!("Tests finished with exit code {}", outcome.exit_code),
                Some(json!({ "exitCode": outcome.exit_code })),
                Some(iteration_progress(iteration, limit, 3)),
            );

            if outcome.success() {
                self.record(iteration, IterationStatus::Passed);
                return Ok(FinalStatus::Passed);
            }

            // MONITOR: tests still fail locally; a CI pass also ends the run.
            self.emit(
                EventName::CiTriggerStart,
                "monitor",
                "Looking up CI workflows",
                None,
                None,
            );
            match monitor
                .trigger(&self.request.owner, &self.request.repo, &self.branch)
                .await
            {
                Ok(triggered) => {
                    self.emit(
                        EventName::CiTriggered,
                        "monitor",
                        if triggered {
                            "Workflow dispatched"
                        } else {
                            "Dispatch unavailable, waiting for auto-trigger"
                        },
                        None,
                        None,
                    );
                    self.emit(EventName::CiPollStart, "monitor", "Polling CI runs", None, None);
                    let verdict = monitor
                        .await_outcome(
                            &self.request.owner,
                            &self.request.repo,
                            &self.branch,
                            triggered,
                        )
                        .await;
                    self.emit(
                        EventName::CiStatus,
                        "monitor",
                        format!("CI concluded: {}", verdict.conclusion),
                        Some(json!({
                            "conclusion": verdict.conclusion,
                            "passed": verdict.passed,
                        })),
                        None,
                    );
                    if verdict.passed {
                        self.record(iteration, IterationStatus::CiPassed);
                        return Ok(FinalStatus::Passed);
                    }
                }
                Err(verdict) => {
                    self.emit(
                        EventName::CiStatus,
                        "monitor",
                        format!("CI unavailable: {}", verdict.conclusion),
                        Some(json!({
                            "conclusion": verdict.conclusion,
                            "reason": verdict.reason,
                        })),
                        None,
                    );
                }
            }

            self.record(iteration, IterationStatus::Failed);
        }

        Ok(FinalStatus::Failed)
    }

    fn record(&mut self, iteration: u32, status: IterationStatus) {
        self.timeline.push(IterationRecord::now(iteration, status));
    }

    fn emit(
        &self,
        event: EventName,
        agent: &str,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
        progress: Option<u8>,
    ) {
        let mut event = PipelineEvent::new(&self.run_id, event, agent, message);
        event.data = data;
        event.progress = progress;
        self.registry.append_event(&event);
        self.bus.publish(&event);
    }

    /// Builds the report, stores it, writes it to disk, and emits the
    /// terminal event.
    fn finalize(mut self, final_status: FinalStatus, run_status: RunStatus) {
        let total_time_ms = self.started.elapsed().as_millis() as u64;
        let total_fixes = self
            .fixes
            .iter()
            .filter(|f| f.status == FixStatus::Fixed)
            .count();
        let iterations_run = self
            .timeline
            .iter()
            .filter(|record| record.iteration > 0)
            .count();

        let report = FinalReport {
            run_id: self.run_id.clone(),
            repo_url: self.request.repo_url.clone(),
            team_name: self.request.team_name.clone(),
            leader_name: self.request.leader_name.clone(),
            branch: self.branch.clone(),
            total_failures: self.total_failures,
            total_fixes,
            total_commits: self.commits,
            final_status,
            total_time: format_duration(total_time_ms),
            total_time_ms,
            score_breakdown: score(ScoreInput {
                total_time_ms,
                commit_count: self.commits,
                fix_count: total_fixes,
                iteration_count: iterations_run,
            }),
            fixes: std::mem::take(&mut self.fixes)
                .into_iter()
                .map(|fix| ReportFix {
                    file: fix.proposal.file,
                    bug_type: fix.proposal.kind,
                    line_number: fix.proposal.line,
                    commit_message: fix.proposal.commit_message,
                    description: fix.reason.unwrap_or(fix.proposal.description),
                    status: fix.status,
                })
                .collect(),
            timeline: std::mem::take(&mut self.timeline),
            generated_at: chrono::Utc::now(),
        };

        let report_json = serde_json::to_value(&report).unwrap_or_default();

        let result_path = self.config.result_path(&self.run_id);
        if let Err(e) = report.write_to(&result_path) {
            error!(path = %result_path.display(), error = %e, "failed to write report");
        }

        // The done event must carry the same document the registry stores.
        let done = PipelineEvent::new(
            &self.run_id,
            EventName::PipelineDone,
            "orchestrator",
            format!("Run finished: {:?}", final_status),
        )
        .with_data(report_json)
        .with_progress(100);
        self.registry.append_event(&done);
        self.registry.finalize(&self.run_id, run_status, report);
        self.bus.publish(&done);

        info!(run_id = %self.run_id, status = ?run_status, "run finalized");
    }
}

/// Coarse progress for the event stream: iterations span 30..=90, each with
/// four sub-steps (generate, apply, push, test).
fn iteration_progress(iteration: u32, limit: u32, step: u32) -> u8 {
    let span = 60.0 / limit.max(1) as f32;
    let within = span / 4.0 * step as f32;
    (30.0 + span * (iteration - 1) as f32 + within).min(90.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::CannedModel;
    use crate::registry::POLL_LOG_TAIL;

    fn orchestrator_with(model: CannedModel, work_root: &Path) -> Orchestrator {
        let config = Config {
            work_dir: work_root.join("tmp"),
            results_dir: work_root.join("results"),
            retry_limit: 2,
            ..Config::default()
        };
        Orchestrator::new(
            Arc::new(config),
            Arc::new(RunRegistry::new()),
            EventBus::new(),
            Arc::new(model),
        )
    }

    fn request(url: &str) -> RunRequest {
        RunRequest {
            repo_url: url.to_string(),
            owner: "o".to_string(),
            repo: "r".to_string(),
            team_name: "Team".to_string(),
            leader_name: "Lead".to_string(),
        }
    }

    async fn wait_terminal(registry: &RunRegistry, run_id: &str) -> crate::registry::Run {
        for _ in 0..2400 {
            if let Some(run) = registry.get(run_id)
                && run.status.is_terminal()
            {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("run never reached a terminal state");
    }

    #[tokio::test]
    async fn unclonable_repo_finalizes_as_error() {
        let root = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator_with(CannedModel::text("[]"), root.path());
        let registry = orchestrator.registry.clone();
        let rx = orchestrator.bus.subscribe();

        let receipt = orchestrator.submit(request("file:///nonexistent/repo"));
        assert_eq!(receipt.branch, "TEAM_LEAD_AI_FIX");

        let run = wait_terminal(&registry, &receipt.run_id).await;
        assert_eq!(run.status, RunStatus::Error);

        let report = run.report.expect("report present");
        assert_eq!(report.final_status, FinalStatus::Failed);
        assert_eq!(report.timeline.len(), 1);
        assert_eq!(report.timeline[0].iteration, 0);
        assert_eq!(report.timeline[0].status, IterationStatus::Error);

        // Working tree removed on the error path.
        assert!(!root.path().join("tmp").join(&receipt.run_id).exists());
        // Report written to disk and coherent with the stored one.
        let on_disk: FinalReport = serde_json::from_str(
            &std::fs::read_to_string(
                root.path().join("results").join(format!("{}.json", receipt.run_id)),
            )
            .unwrap(),
        )
        .unwrap();
        assert_eq!(on_disk.run_id, report.run_id);

        // pipeline_done is last and carries the report.
        let events: Vec<_> = rx.drain().collect();
        let last = events.last().unwrap();
        assert_eq!(last.event, EventName::PipelineDone);
        let carried = last.data.as_ref().unwrap();
        assert_eq!(carried["runId"], report.run_id);
        assert_eq!(carried["finalStatus"], "FAILED");
    }

    #[tokio::test]
    async fn green_repo_passes_on_iteration_zero() {
        let root = tempfile::tempdir().unwrap();

        // A local git repo detected as node whose test command exits 0.
        let upstream = root.path().join("upstream");
        std::fs::create_dir_all(&upstream).unwrap();
        std::fs::write(
            upstream.join("package.json"),
            r#"{"name": "x", "scripts": {"test": "true"}}"#,
        )
        .unwrap();
        for args in [
            vec!["init", "-b", "main"],
            vec!["config", "user.name", "t"],
            vec!["config", "user.email", "t@t"],
            vec!["add", "."],
            vec!["commit", "-m", "seed"],
        ] {
            std::process::Command::new("git")
                .args(&args)
                .current_dir(&upstream)
                .output()
                .unwrap();
        }

        let orchestrator = orchestrator_with(CannedModel::text("[]"), root.path());
        let registry = orchestrator.registry.clone();
        let receipt = orchestrator.submit(request(&format!("file://{}", upstream.display())));

        let run = wait_terminal(&registry, &receipt.run_id).await;
        // `npm` may be missing in the environment; the run is green only
        // when the test command actually ran and exited 0.
        let report = run.report.expect("report present");
        assert_eq!(report.timeline[0].iteration, 0);
        if run.status == RunStatus::Completed {
            assert_eq!(report.final_status, FinalStatus::Passed);
            assert_eq!(report.total_failures, 0);
            assert_eq!(report.total_fixes, 0);
            assert_eq!(report.timeline.len(), 1);
            assert_eq!(report.timeline[0].status, IterationStatus::Passed);
        }
        assert!(!root.path().join("tmp").join(&receipt.run_id).exists());
    }

    #[tokio::test]
    async fn timeline_respects_retry_bound() {
        let root = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator_with(CannedModel::text("not json"), root.path());
        let registry = orchestrator.registry.clone();

        let receipt = orchestrator.submit(request("file:///nonexistent/repo"));
        let run = wait_terminal(&registry, &receipt.run_id).await;
        let report = run.report.unwrap();
        assert!(report.timeline.len() <= 2 + 1); // retry_limit 2 in tests
    }

    #[tokio::test]
    async fn poll_tail_is_available_while_running_and_after() {
        let root = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator_with(CannedModel::text("[]"), root.path());
        let registry = orchestrator.registry.clone();

        let receipt = orchestrator.submit(request("file:///nonexistent/repo"));
        wait_terminal(&registry, &receipt.run_id).await;

        let tail = registry.tail_events(&receipt.run_id).unwrap();
        assert!(!tail.is_empty());
        assert!(tail.len() <= POLL_LOG_TAIL);
        assert_eq!(tail.last().unwrap().event, EventName::PipelineDone);
    }

    #[test]
    fn progress_is_monotonic_across_iterations() {
        let mut last = 30;
        for iteration in 1..=5u32 {
            for step in 0..4u32 {
                let p = iteration_progress(iteration, 5, step);
                assert!(p >= last, "iteration {iteration} step {step}");
                assert!(p <= 90);
                last = p;
            }
        }
    }
}
