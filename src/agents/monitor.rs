//! Remote CI observation.
//!
//! After a push, the monitor looks up the repository's GitHub Actions
//! workflows, dispatches one on the branch when the workflow allows it, and
//! polls the branch's runs until one completes or the observation window
//! closes. CI observation is strictly best-effort: every failure here is
//! logged and folded into the verdict, never surfaced as an error.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

/// Outcome of observing CI for a branch.
#[derive(Debug, Clone)]
pub struct CiVerdict {
    /// Whether a workflow dispatch was accepted.
    pub triggered: bool,
    /// Whether a completed run concluded successfully.
    pub passed: bool,
    /// Terminal conclusion: `success`, `failure`, `timeout`, `no_ci`, ...
    pub conclusion: String,
    /// Explanation for verdicts that never saw a run.
    pub reason: Option<String>,
}

impl CiVerdict {
    fn no_ci(reason: impl Into<String>) -> Self {
        Self {
            triggered: false,
            passed: false,
            conclusion: "no_ci".to_string(),
            reason: Some(reason.into()),
        }
    }

    fn timeout(triggered: bool) -> Self {
        Self {
            triggered,
            passed: false,
            conclusion: "timeout".to_string(),
            reason: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorkflowList {
    #[serde(default)]
    workflows: Vec<Workflow>,
}

#[derive(Debug, Deserialize)]
struct Workflow {
    id: u64,
    name: String,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct RunList {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRun {
    #[serde(default)]
    status: String,
    conclusion: Option<String>,
}

/// The CI observation agent.
pub struct Monitor {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    poll_timeout: Duration,
    poll_interval: Duration,
    settle_delay: Duration,
}

impl Monitor {
    pub fn new(token: Option<String>, poll_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "https://api.github.com".to_string(),
            token,
            poll_timeout,
            poll_interval: Duration::from_secs(10),
            settle_delay: Duration::from_secs(5),
        }
    }

    /// Overrides the API endpoint and timing (test hook).
    #[cfg(test)]
    fn with_endpoint(mut self, base_url: String, interval: Duration, settle: Duration) -> Self {
        self.base_url = base_url;
        self.poll_interval = interval;
        self.settle_delay = settle;
        self
    }

    /// Observes CI for `branch` until a run completes or the window closes.
    pub async fn observe(&self, owner: &str, repo: &str, branch: &str) -> CiVerdict {
        match self.trigger(owner, repo, branch).await {
            Ok(triggered) => self.await_outcome(owner, repo, branch, triggered).await,
            Err(verdict) => verdict,
        }
    }

    /// Discovers the repository's workflows and dispatches one on `branch`.
    ///
    /// Returns whether a dispatch was accepted, or the terminal verdict when
    /// the repository has no observable CI.
    pub async fn trigger(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<bool, CiVerdict> {
        let workflows = match self.list_workflows(owner, repo).await {
            Ok(workflows) => workflows,
            Err(e) => {
                tracing::warn!(error = %e, "workflow listing failed");
                return Err(CiVerdict::no_ci(format!("Workflow listing failed: {e}")));
            }
        };

        if workflows.is_empty() {
            return Err(CiVerdict::no_ci("No workflows configured"));
        }

        // Prefer the first active workflow, fall back to the first listed.
        let workflow = workflows
            .iter()
            .find(|w| w.state == "active")
            .unwrap_or(&workflows[0]);

        match self.dispatch(owner, repo, workflow.id, branch).await {
            Ok(()) => {
                tracing::info!(workflow = %workflow.name, branch, "workflow dispatched");
                Ok(true)
            }
            Err(e) => {
                // Dispatch is optional; a push-triggered run may still appear.
                tracing::info!(error = %e, "workflow dispatch unsupported, waiting for auto-trigger");
                Ok(false)
            }
        }
    }

    /// Polls the branch's runs until one completes or the window closes.
    pub async fn await_outcome(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        triggered: bool,
    ) -> CiVerdict {
        tokio::time::sleep(self.settle_delay).await;

        let deadline = tokio::time::Instant::now() + self.poll_timeout;
        loop {
            match self.latest_completed_run(owner, repo, branch).await {
                Ok(Some(conclusion)) => {
                    let passed = conclusion == "success";
                    return CiVerdict {
                        triggered,
                        passed,
                        conclusion,
                        reason: None,
                    };
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "run poll failed");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return CiVerdict::timeout(triggered);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn list_workflows(&self, owner: &str, repo: &str) -> reqwest::Result<Vec<Workflow>> {
        let url = format!("{}/repos/{owner}/{repo}/actions/workflows", self.base_url);
        let list: WorkflowList = self
            .request(self.client.get(url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(list.workflows)
    }

    async fn dispatch(
        &self,
        owner: &str,
        repo: &str,
        workflow_id: u64,
        branch: &str,
    ) -> reqwest::Result<()> {
        let url = format!(
            "{}/repos/{owner}/{repo}/actions/workflows/{workflow_id}/dispatches",
            self.base_url
        );
        self.request(self.client.post(url))
            .json(&json!({ "ref": branch }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Returns the conclusion of the most recent completed run, if any.
    async fn latest_completed_run(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> reqwest::Result<Option<String>> {
        let url = format!(
            "{}/repos/{owner}/{repo}/actions/runs?branch={branch}&per_page=10",
            self.base_url
        );
        let list: RunList = self
            .request(self.client.get(url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(list
            .workflow_runs
            .iter()
            .find(|run| run.status == "completed")
            .map(|run| run.conclusion.clone().unwrap_or_else(|| "unknown".to_string())))
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder
            .header("User-Agent", "mender")
            .header("Accept", "application/vnd.github+json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn monitor(server: &MockServer, timeout: Duration) -> Monitor {
        Monitor::new(None, timeout).with_endpoint(
            server.uri(),
            Duration::from_millis(5),
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn no_workflows_yields_no_ci() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/o/r/actions/workflows"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"workflows": []})),
            )
            .mount(&server)
            .await;

        let verdict = monitor(&server, Duration::from_secs(1))
            .observe("o", "r", "B")
            .await;
        assert!(!verdict.triggered);
        assert!(!verdict.passed);
        assert_eq!(verdict.conclusion, "no_ci");
        assert_eq!(verdict.reason.as_deref(), Some("No workflows configured"));
    }

    #[tokio::test]
    async fn completed_successful_run_passes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/o/r/actions/workflows"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "workflows": [
                    {"id": 7, "name": "old", "state": "disabled"},
                    {"id": 9, "name": "ci", "state": "active"}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/repos/o/r/actions/workflows/9/dispatches"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/o/r/actions/runs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "workflow_runs": [
                    {"status": "completed", "conclusion": "success"},
                    {"status": "completed", "conclusion": "failure"}
                ]
            })))
            .mount(&server)
            .await;

        let verdict = monitor(&server, Duration::from_secs(2))
            .observe("o", "r", "B")
            .await;
        assert!(verdict.triggered);
        assert!(verdict.passed);
        assert_eq!(verdict.conclusion, "success");
    }

    #[tokio::test]
    async fn dispatch_rejection_still_polls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/o/r/actions/workflows"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "workflows": [{"id": 3, "name": "ci", "state": "active"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r"/dispatches$"))
            .respond_with(ResponseTemplate::new(422))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/o/r/actions/runs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "workflow_runs": [{"status": "completed", "conclusion": "failure"}]
            })))
            .mount(&server)
            .await;

        let verdict = monitor(&server, Duration::from_secs(2))
            .observe("o", "r", "B")
            .await;
        assert!(!verdict.triggered);
        assert!(!verdict.passed);
        assert_eq!(verdict.conclusion, "failure");
    }

    #[tokio::test]
    async fn window_close_without_runs_is_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/o/r/actions/workflows"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "workflows": [{"id": 3, "name": "ci", "state": "active"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r"/dispatches$"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/o/r/actions/runs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "workflow_runs": [{"status": "in_progress", "conclusion": null}]
            })))
            .mount(&server)
            .await;

        let verdict = monitor(&server, Duration::from_millis(30))
            .observe("o", "r", "B")
            .await;
        assert!(!verdict.passed);
        assert_eq!(verdict.conclusion, "timeout");
    }
}
