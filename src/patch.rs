//! Fix application.
//!
//! Applies [`FixProposal`]s to the working tree, one at a time in input
//! order. Matching is exact-substring first, then a line-anchor fallback.
//! Every proposal ends in a terminal [`FixStatus`]; a failure to apply one
//! proposal never stops the rest. Writes are atomic at the whole-file level
//! (temp file + rename) so a crash mid-write cannot corrupt the tree.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::agents::fixer::FixProposal;

/// Terminal status of an attempted fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixStatus {
    /// The proposal was written to the tree.
    Fixed,
    /// The proposal could not be applied; see the reason.
    Failed,
    /// The proposal was not applicable (missing file or code snippets).
    Skipped,
}

impl std::fmt::Display for FixStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed => f.write_str("Fixed"),
            Self::Failed => f.write_str("Failed"),
            Self::Skipped => f.write_str("Skipped"),
        }
    }
}

/// A fix proposal with the outcome of applying it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedFix {
    pub proposal: FixProposal,
    pub status: FixStatus,
    /// Failure reason when `status` is [`FixStatus::Failed`].
    pub reason: Option<String>,
}

impl AppliedFix {
    pub fn fixed(proposal: FixProposal) -> Self {
        Self {
            proposal,
            status: FixStatus::Fixed,
            reason: None,
        }
    }

    pub fn failed(proposal: FixProposal, reason: impl Into<String>) -> Self {
        Self {
            proposal,
            status: FixStatus::Failed,
            reason: Some(reason.into()),
        }
    }

    pub fn skipped(proposal: FixProposal) -> Self {
        Self {
            proposal,
            status: FixStatus::Skipped,
            reason: None,
        }
    }
}

/// Applies proposals to `tree` in input order and records per-fix outcomes.
///
/// No cross-proposal deduplication happens: when two proposals target the
/// same line, the last write wins.
pub fn apply_fixes(tree: &Path, proposals: Vec<FixProposal>) -> Vec<AppliedFix> {
    proposals
        .into_iter()
        .map(|proposal| apply_one(tree, proposal))
        .collect()
}

fn apply_one(tree: &Path, proposal: FixProposal) -> AppliedFix {
    if proposal.file.is_empty()
        || proposal.original_code.is_empty()
        || proposal.fixed_code.is_empty()
    {
        return AppliedFix::skipped(proposal);
    }

    let path = tree.join(&proposal.file);
    if !path.is_file() {
        return AppliedFix::failed(proposal, "File not found");
    }

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => return AppliedFix::failed(proposal, format!("Read failed: {e}")),
    };

    // Exact-match replacement of the first occurrence.
    if content.contains(&proposal.original_code) {
        let updated = content.replacen(&proposal.original_code, &proposal.fixed_code, 1);
        return match write_atomic(&path, &updated) {
            Ok(()) => AppliedFix::fixed(proposal),
            Err(e) => AppliedFix::failed(proposal, format!("Write failed: {e}")),
        };
    }

    // Line-anchor fallback: overwrite the 1-based target line.
    if let Some(line_no) = proposal.line {
        let mut lines: Vec<&str> = content.lines().collect();
        if line_no >= 1 && line_no <= lines.len() {
            lines[line_no - 1] = &proposal.fixed_code;
            let mut updated = lines.join("\n");
            if content.ends_with('\n') {
                updated.push('\n');
            }
            return match write_atomic(&path, &updated) {
                Ok(()) => AppliedFix::fixed(proposal),
                Err(e) => AppliedFix::failed(proposal, format!("Write failed: {e}")),
            };
        }
    }

    AppliedFix::failed(proposal, "Original code not found")
}

/// Writes `content` to `path` through a temp file in the same directory,
/// then renames over the target.
fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
