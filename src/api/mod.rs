//! HTTP surface.
//!
//! Thin glue over the core: handlers validate input, delegate to the
//! orchestrator and registry, and shape responses. The submit endpoint
//! always responds immediately; pipelines run on their own tasks.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /api/run-agent` | Submit a run |
//! | `GET /api/results/{run_id}` | Poll a run's progress or final report |
//! | `GET /api/runs` | List all known runs |
//! | `GET /api/health` | Liveness and uptime |
//! | `GET /api/docker-status` | Container daemon probe |
//! | `GET /ws` | Live event stream (WebSocket) |

pub mod ws;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::events::EventBus;
use crate::orchestrator::{Orchestrator, RunRequest};
use crate::registry::RunRegistry;
use crate::sandbox;

/// Shared state for all HTTP/WS handlers.
pub struct ApiState {
    pub config: Arc<Config>,
    pub registry: Arc<RunRegistry>,
    pub bus: EventBus,
    pub orchestrator: Orchestrator,
    pub start_time: Instant,
}

/// Builds the service router with CORS applied.
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = match &state.config.frontend_url {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin.parse::<axum::http::HeaderValue>().unwrap_or_else(|_| {
                axum::http::HeaderValue::from_static("http://localhost:5173")
            }))
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::permissive(),
    };

    Router::new()
        .route("/api/run-agent", post(run_agent))
        .route("/api/results/{run_id}", get(results))
        .route("/api/runs", get(list_runs))
        .route("/api/health", get(health))
        .route("/api/docker-status", get(docker_status))
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

static REPO_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https://github\.com/([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+?)(?:\.git)?/?$")
        .expect("repo url pattern")
});

/// Parses `https://github.com/{owner}/{repo}[.git]` into its parts.
pub fn parse_repo_url(url: &str) -> Option<(String, String)> {
    let caps = REPO_URL.captures(url.trim())?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunAgentBody {
    #[serde(default)]
    repo_url: String,
    #[serde(default)]
    team_name: String,
    #[serde(default)]
    leader_name: String,
}

async fn run_agent(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<RunAgentBody>,
) -> Response {
    let mut messages = Vec::new();
    if body.repo_url.trim().is_empty() {
        messages.push("repoUrl is required");
    }
    if body.team_name.trim().is_empty() {
        messages.push("teamName is required");
    }
    if body.leader_name.trim().is_empty() {
        messages.push("leaderName is required");
    }
    if !messages.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Validation failed", "messages": messages })),
        )
            .into_response();
    }

    let Some((owner, repo)) = parse_repo_url(&body.repo_url) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Invalid repository URL",
                "messages": ["repoUrl must look like https://github.com/{owner}/{repo}"],
            })),
        )
            .into_response();
    };

    let receipt = state.orchestrator.submit(RunRequest {
        repo_url: body.repo_url.trim().to_string(),
        owner,
        repo,
        team_name: body.team_name.trim().to_string(),
        leader_name: body.leader_name.trim().to_string(),
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "running",
            "runId": receipt.run_id,
            "branch": receipt.branch,
            "message": "Run started; poll /api/results/{runId} or subscribe on /ws",
        })),
    )
        .into_response()
}

async fn results(State(state): State<Arc<ApiState>>, Path(run_id): Path<String>) -> Response {
    let Some(run) = state.registry.get(&run_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Unknown run id" })),
        )
            .into_response();
    };

    if run.status.is_terminal() {
        Json(json!({
            "status": run.status,
            "runId": run.id,
            "startedAt": run.started_at,
            "completedAt": run.completed_at,
            "result": run.report,
        }))
        .into_response()
    } else {
        let logs = state.registry.tail_events(&run_id).unwrap_or_default();
        Json(json!({
            "status": "processing",
            "runId": run.id,
            "startedAt": run.started_at,
            "logs": logs,
        }))
        .into_response()
    }
}

async fn list_runs(State(state): State<Arc<ApiState>>) -> Response {
    let runs = state.registry.summaries();
    Json(json!({ "count": runs.len(), "runs": runs })).into_response()
}

async fn health(State(state): State<Arc<ApiState>>) -> Response {
    Json(json!({
        "status": "ok",
        "uptime": state.start_time.elapsed().as_secs(),
    }))
    .into_response()
}

async fn docker_status(State(state): State<Arc<ApiState>>) -> Response {
    let status = sandbox::docker_status(&state.config).await;
    Json(status).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_url_accepts_canonical_forms() {
        for url in [
            "https://github.com/owner/repo",
            "https://github.com/owner/repo.git",
            "https://github.com/owner/repo/",
            "  https://github.com/some-org/some.repo  ",
        ] {
            assert!(parse_repo_url(url).is_some(), "url: {url}");
        }

        let (owner, repo) = parse_repo_url("https://github.com/octo/hello.git").unwrap();
        assert_eq!(owner, "octo");
        assert_eq!(repo, "hello");
    }

    #[test]
    fn repo_url_rejects_everything_else() {
        for url in [
            "http://github.com/owner/repo",
            "https://gitlab.com/owner/repo",
            "https://github.com/owner",
            "https://github.com/owner/repo/tree/main",
            "git@github.com:owner/repo.git",
            "",
        ] {
            assert!(parse_repo_url(url).is_none(), "url: {url}");
        }
    }

    #[test]
    fn dot_git_suffix_is_stripped_not_required() {
        let (_, repo) = parse_repo_url("https://github.com/o/r.git").unwrap();
        assert_eq!(repo, "r");
        let (_, repo) = parse_repo_url("https://github.com/o/r.gitx").unwrap();
        assert_eq!(repo, "r.gitx");
    }
}
