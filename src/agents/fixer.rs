//! Fix generation: classified failures in, LLM patch proposals out.
//!
//! For one iteration the fixer classifies the raw test log, enriches every
//! error with numbered source context read from the working tree, and asks
//! the language model for a JSON array of fix proposals in a single prompt.
//! The response is parsed tolerantly: the first JSON array found anywhere in
//! the text is used, so surrounding prose or code fences do not matter.
//!
//! When the model chain is exhausted or the response holds no parseable
//! array, the fixer degrades instead of failing: it emits one placeholder
//! proposal per classified error, which the patch applier will mark as
//! skipped. Only non-throttling model errors propagate to the caller.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::classify::{self, ErrorRecord};
use crate::llm::{ChatMessage, LanguageModel, LlmError};

/// Result type for fix generation.
pub type FixerResult<T> = Result<T, FixerError>;

/// Errors from fix generation.
#[derive(Debug, thiserror::Error)]
pub enum FixerError {
    #[error("language model error: {0}")]
    Llm(#[from] LlmError),
}

/// A patch candidate produced by the language model.
///
/// `file`, `original_code`, and `fixed_code` must all be non-empty for the
/// proposal to be applicable; the patch applier skips anything less.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FixProposal {
    pub file: String,
    pub line: Option<usize>,
    pub kind: String,
    pub description: String,
    pub original_code: String,
    pub fixed_code: String,
    pub commit_message: String,
}

/// Lines of context read around an error location.
const CONTEXT_LINES: usize = 5;

const SYSTEM_PROMPT: &str = "\
You are an automated repair agent. You receive a failing test log and a list \
of classified errors with source context. Respond with ONLY a JSON array; \
each element must be an object with the keys \"file\", \"line\", \"kind\", \
\"description\", \"originalCode\", \"fixedCode\", and \"commitMessage\". \
\"originalCode\" must be copied verbatim from the source context so it can \
be matched exactly, and \"fixedCode\" must be the corrected replacement. \
Propose exactly one fix per error and do not invent files.";

/// The fix-generation agent.
pub struct Fixer {
    model: Arc<dyn LanguageModel>,
}

impl Fixer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Produces fix proposals for a failing test log.
    ///
    /// Returns `Ok` with placeholder proposals in degraded mode; only
    /// non-throttling model errors surface as `Err`.
    pub async fn generate(&self, raw_log: &str, tree: &Path) -> FixerResult<Vec<FixProposal>> {
        let errors = classify::classify(raw_log);
        if errors.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = build_prompt(raw_log, &errors, tree);
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)];

        let response = match self.model.complete(&messages).await {
            Ok(text) => text,
            Err(e) if matches!(e, LlmError::Exhausted(_) | LlmError::Unconfigured) => {
                tracing::warn!(error = %e, "model unavailable, emitting placeholder proposals");
                return Ok(placeholder_proposals(&errors));
            }
            Err(e) => return Err(e.into()),
        };

        match extract_json_array(&response).and_then(parse_proposals) {
            // An empty array is a real answer: the model proposed nothing.
            Some(proposals) => Ok(proposals),
            None => {
                tracing::warn!("response held no proposal array, emitting placeholders");
                Ok(placeholder_proposals(&errors))
            }
        }
    }
}

/// Assembles the single user prompt: raw log plus enriched error records.
fn build_prompt(raw_log: &str, errors: &[ErrorRecord], tree: &Path) -> String {
    let mut prompt = String::new();
    prompt.push_str("Test log:\n```\n");
    prompt.push_str(raw_log);
    prompt.push_str("\n```\n\nClassified errors:\n");

    for (index, error) in errors.iter().enumerate() {
        prompt.push_str(&format!(
            "\n{}. [{}] {}\n",
            index + 1,
            error.kind,
            error.raw_message
        ));
        if let (Some(file), Some(line)) = (&error.file, error.line) {
            prompt.push_str(&format!("   location: {file}:{line}\n"));
            if let Some(snippet) = source_context(tree, file, line) {
                prompt.push_str("   context:\n");
                prompt.push_str(&snippet);
            }
        }
    }

    prompt
}

/// Reads ±[`CONTEXT_LINES`] numbered lines around `line` from the tree.
fn source_context(tree: &Path, file: &str, line: usize) -> Option<String> {
    let content = std::fs::read_to_string(tree.join(file)).ok()?;
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() || line == 0 {
        return None;
    }

    let start = line.saturating_sub(CONTEXT_LINES + 1);
    let end = (line + CONTEXT_LINES).min(lines.len());

    let mut snippet = String::new();
    for (offset, text) in lines[start..end].iter().enumerate() {
        snippet.push_str(&format!("   {:>4} | {}\n", start + offset + 1, text));
    }
    Some(snippet)
}

/// Finds the first complete JSON array in `text`, tolerant of surrounding
/// prose and code fences. Bracket depth is tracked outside of string
/// literals so embedded `]` characters cannot truncate the array.
fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'[' if !in_string => depth += 1,
            b']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_proposals(json: &str) -> Option<Vec<FixProposal>> {
    serde_json::from_str(json).ok()
}

/// Degraded-mode output: one inapplicable proposal per classified error,
/// with a synthesized commit message. The patch applier marks these skipped.
fn placeholder_proposals(errors: &[ErrorRecord]) -> Vec<FixProposal> {
    errors
        .iter()
        .map(|error| {
            let file = error.file.clone().unwrap_or_default();
            FixProposal {
                commit_message: format!(
                    "Attempted fix for {} error{}",
                    error.kind,
                    if file.is_empty() {
                        String::new()
                    } else {
                        format!(" in {file}")
                    }
                ),
                description: error.raw_message.clone(),
                kind: error.kind.to_string(),
                line: error.line,
                file,
                ..Default::default()
            }
        })
        .collect()
}
