//! Branching, committing, and pushing applied fixes.
//!
//! Git writes stay as shell-outs to the `git` binary; only reads that never
//! happen here would justify an in-process library. The committer sets a
//! fixed author identity, creates one commit per touched file, and pushes
//! the branch with the configured token injected into the origin URL.

use std::collections::BTreeMap;
use std::path::Path;

use crate::agents::analyzer::inject_token;
use crate::patch::{AppliedFix, FixStatus};

/// Result type for committer operations.
pub type CommitterResult<T> = Result<T, CommitterError>;

/// Errors from git operations.
#[derive(Debug, thiserror::Error)]
pub enum CommitterError {
    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mandatory prefix of every commit message created by the agent.
pub const COMMIT_PREFIX: &str = "[AI-AGENT]";

/// Fixed suffix of every derived branch name.
pub const BRANCH_SUFFIX: &str = "_AI_FIX";

const AUTHOR_NAME: &str = "Mender Agent";
const AUTHOR_EMAIL: &str = "agent@mender.dev";

/// Derives the work branch from team and leader names.
///
/// Each name is uppercased, non-alphanumeric characters are stripped, and
/// whitespace runs collapse to a single underscore; the two tokens are
/// joined with an underscore and terminated by [`BRANCH_SUFFIX`]. The
/// derivation is total: any input pair yields a valid git branch name.
pub fn branch_name(team: &str, leader: &str) -> String {
    format!("{}_{}{}", sanitize(team), sanitize(leader), BRANCH_SUFFIX)
}

fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_gap = false;
    for c in name.to_uppercase().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_gap && !out.is_empty() {
                out.push('_');
            }
            pending_gap = false;
            out.push(c);
        } else if c.is_whitespace() {
            pending_gap = true;
        }
        // Any other character is stripped without opening a gap.
    }
    out
}

/// The commit-and-push agent.
pub struct Committer {
    github_token: Option<String>,
}

impl Committer {
    pub fn new(github_token: Option<String>) -> Self {
        Self { github_token }
    }

    /// Configures the fixed committer identity in the tree.
    pub async fn configure_identity(&self, tree: &Path) -> CommitterResult<()> {
        git(tree, &["config", "user.name", AUTHOR_NAME]).await?;
        git(tree, &["config", "user.email", AUTHOR_EMAIL]).await?;
        Ok(())
    }

    /// Checks out `branch`, creating it when it does not exist locally.
    pub async fn prepare_branch(&self, tree: &Path, branch: &str) -> CommitterResult<()> {
        let exists = git(tree, &["rev-parse", "--verify", branch]).await.is_ok();
        if exists {
            git(tree, &["checkout", branch]).await?;
        } else {
            git(tree, &["checkout", "-b", branch]).await?;
        }
        Ok(())
    }

    /// Commits all `Fixed` fixes grouped by file; returns the commit count.
    ///
    /// Files with nothing fixed produce no commit; an iteration with zero
    /// `Fixed` fixes is silently a no-op.
    pub async fn commit_fixes(&self, tree: &Path, fixes: &[AppliedFix]) -> CommitterResult<usize> {
        let mut by_file: BTreeMap<&str, Vec<&AppliedFix>> = BTreeMap::new();
        for fix in fixes.iter().filter(|f| f.status == FixStatus::Fixed) {
            by_file.entry(&fix.proposal.file).or_default().push(fix);
        }

        let mut commits = 0;
        for (file, fixes) in by_file {
            git(tree, &["add", file]).await?;

            let details = fixes
                .iter()
                .map(|fix| {
                    format!(
                        "{} {}:{} {}",
                        fix.proposal.kind,
                        fix.proposal.file,
                        fix.proposal
                            .line
                            .map(|l| l.to_string())
                            .unwrap_or_else(|| "?".to_string()),
                        fix.proposal.description
                    )
                })
                .collect::<Vec<_>>()
                .join("; ");

            let message = format!("{COMMIT_PREFIX} {details}");
            git(tree, &["commit", "-m", &message]).await?;
            commits += 1;
        }

        Ok(commits)
    }

    /// Pushes `branch` to origin with upstream tracking, forced.
    ///
    /// When a token is configured and the origin URL carries no credentials
    /// yet, the URL is rewritten to embed it first.
    pub async fn push(&self, tree: &Path, branch: &str) -> CommitterResult<()> {
        if let Some(token) = &self.github_token {
            let origin = git(tree, &["remote", "get-url", "origin"]).await?;
            let origin = origin.trim();
            if !origin.contains('@') {
                let with_token = inject_token(origin, Some(token));
                git(tree, &["remote", "set-url", "origin", &with_token]).await?;
            }
        }

        git(tree, &["push", "-u", "origin", branch, "--force"]).await?;
        Ok(())
    }
}

/// Runs one git command in `tree` and returns its stdout.
async fn git(tree: &Path, args: &[&str]) -> CommitterResult<String> {
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(tree)
        .output()
        .await?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(CommitterError::Git {
            command: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
