//! The four cooperating pipeline agents.
//!
//! - [`analyzer`]: clone the repository, detect its runtime, run its tests.
//! - [`fixer`]: turn classified failures into LLM fix proposals.
//! - [`committer`]: branch, commit, and push applied fixes.
//! - [`monitor`]: observe the remote CI pipeline for the branch.
//!
//! Each agent catches the operational errors it can recover from and
//! surfaces the rest as its own error type; only the orchestrator converts
//! an unhandled agent error into a terminal run state.

pub mod analyzer;
pub mod committer;
pub mod fixer;
pub mod monitor;
