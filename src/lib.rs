//! # mender
//!
//! An autonomous DevOps repair agent: give it a public GitHub repository
//! URL and it clones the project, reproduces its test failures in an
//! isolated sandbox, asks a language model for targeted fixes, applies and
//! pushes them to a derived branch, watches the remote CI pipeline, and
//! produces a scored structured report of the whole run.
//!
//! ## Architecture
//!
//! The core is the *heal loop*: four cooperating agents driven by an
//! orchestrator through an iterative sense/repair/verify cycle bounded by a
//! retry budget.
//!
//! ```text
//!   submit ──► Orchestrator ──► Analyzer ──► Classifier ──► Fixer
//!                   ▲                                          │
//!                   │              working tree                ▼
//!               Monitor ◄── Committer ◄──────────────── Patch Applier
//! ```
//!
//! - [`sandbox`]: the execution substrate, a Docker-backed executor with
//!   resource caps and a native process fallback behind one trait.
//! - [`agents`]: the four agents: analyzer (clone/detect/test), fixer
//!   (LLM proposals), committer (branch/commit/push), monitor (CI).
//! - [`classify`]: raw test logs to structured error records.
//! - [`patch`]: safe application of fix proposals to the tree.
//! - [`orchestrator`]: the per-run state machine and report assembly.
//! - [`events`] / [`registry`]: the live event fan-out and the in-process
//!   run store backing the HTTP surface in [`api`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use mender::config::Config;
//! use mender::events::EventBus;
//! use mender::llm::FallbackClient;
//! use mender::orchestrator::{Orchestrator, RunRequest};
//! use mender::registry::RunRegistry;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Arc::new(Config::from_env());
//!     let model = Arc::new(FallbackClient::new(
//!         config.llm_base_url.clone(),
//!         config.llm_api_key.clone(),
//!         config.llm_models.clone(),
//!     ));
//!     let orchestrator = Orchestrator::new(
//!         config,
//!         Arc::new(RunRegistry::new()),
//!         EventBus::new(),
//!         model,
//!     );
//!
//!     let receipt = orchestrator.submit(RunRequest {
//!         repo_url: "https://github.com/octo/hello".into(),
//!         owner: "octo".into(),
//!         repo: "hello".into(),
//!         team_name: "Team".into(),
//!         leader_name: "Lead".into(),
//!     });
//!     println!("run {} on branch {}", receipt.run_id, receipt.branch);
//! }
//! ```

pub mod agents;
pub mod api;
pub mod classify;
pub mod config;
pub mod events;
pub mod llm;
pub mod orchestrator;
pub mod patch;
pub mod registry;
pub mod report;
pub mod sandbox;
pub mod score;

// Re-export the types most embedders need.
pub use config::Config;
pub use events::{EventBus, EventName, PipelineEvent};
pub use orchestrator::{Orchestrator, RunRequest, SubmitReceipt};
pub use registry::{RunRegistry, RunStatus};
pub use report::{FinalReport, FinalStatus};
