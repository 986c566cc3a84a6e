//! Test-output classification.
//!
//! Turns a raw test log into structured [`ErrorRecord`]s. Classification is
//! a pure function: split on line breaks, drop blanks, walk the rule table
//! in declaration order (first match wins), and extract a source location
//! where the line carries one. Lines that match no rule and contain neither
//! "Error" nor "FAIL" are noise and are dropped.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Category of a classified test failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Syntax,
    Linting,
    Logic,
    TypeError,
    Import,
    Indentation,
    Runtime,
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Syntax => "SYNTAX",
            Self::Linting => "LINTING",
            Self::Logic => "LOGIC",
            Self::TypeError => "TYPE_ERROR",
            Self::Import => "IMPORT",
            Self::Indentation => "INDENTATION",
            Self::Runtime => "RUNTIME",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// One classified line of test output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub file: Option<String>,
    pub line: Option<usize>,
    pub raw_message: String,
}

/// Rule table walked in declaration order; the first matching rule wins.
static RULES: Lazy<Vec<(ErrorKind, Regex)>> = Lazy::new(|| {
    let rule = |pattern: &str| {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("classifier rule pattern")
    };
    vec![
        (
            ErrorKind::Syntax,
            rule(r"SyntaxError|unexpected token|invalid syntax|EOL while scanning"),
        ),
        (
            ErrorKind::Indentation,
            rule(r"IndentationError|unexpected indent|expected an indented block"),
        ),
        (
            ErrorKind::TypeError,
            rule(r"TypeError|type .* mismatch|cannot read propert"),
        ),
        (
            ErrorKind::Import,
            rule(r"ImportError|ModuleNotFoundError|Cannot find module|no module named"),
        ),
        (
            ErrorKind::Logic,
            rule(r"AssertionError|Expected .* to (equal|be|match)|assert"),
        ),
        (
            ErrorKind::Linting,
            rule(r"eslint|lint|prettier|warning .* rule"),
        ),
        (
            ErrorKind::Runtime,
            rule(r"ReferenceError|NameError|is not defined"),
        ),
    ]
});

/// `File "path/to/x.py", line 12`
static PY_LOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"File "([^"]+)", line (\d+)"#).expect("py location pattern"));

/// `path/to/x.js:12:5`, possibly behind a stack-frame prefix like `at fn (`.
static COL_LOCATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([\w@./\\-]+\.\w+):(\d+):(\d+)").expect("col location pattern")
});

/// `path/to/x.ext:12`
static EXT_LOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\w@./\\-]+\.\w+):(\d+)").expect("ext location pattern"));

/// Classifies a raw test log into deduplicated error records.
///
/// Records are deduplicated within the log by `(file, line, kind)`; the
/// first occurrence is kept.
pub fn classify(raw_log: &str) -> Vec<ErrorRecord> {
    let mut records = Vec::new();
    let mut seen: HashSet<(Option<String>, Option<usize>, ErrorKind)> = HashSet::new();

    for line in raw_log.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let kind = match RULES.iter().find(|(_, re)| re.is_match(trimmed)) {
            Some((kind, _)) => *kind,
            None => {
                if trimmed.contains("Error") || trimmed.contains("FAIL") {
                    ErrorKind::Unknown
                } else {
                    continue;
                }
            }
        };

        let (file, line_no) = extract_location(trimmed);
        if seen.insert((file.clone(), line_no, kind)) {
            records.push(ErrorRecord {
                kind,
                file,
                line: line_no,
                raw_message: trimmed.to_string(),
            });
        }
    }

    records
}

/// Extracts `(file, line)` from a log line, trying the Python traceback
/// form, then `path:line:col`, then `path.ext:line`.
fn extract_location(line: &str) -> (Option<String>, Option<usize>) {
    if let Some(caps) = PY_LOCATION.captures(line) {
        return (
            Some(caps[1].to_string()),
            caps[2].parse().ok(),
        );
    }
    if let Some(caps) = COL_LOCATION.captures(line) {
        return (Some(caps[1].to_string()), caps[2].parse().ok());
    }
    if let Some(caps) = EXT_LOCATION.captures(line) {
        return (Some(caps[1].to_string()), caps[2].parse().ok());
    }
    (None, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_syntax_error_with_location() {
        let log = r#"  File "src/app.py", line 3
    def f()
SyntaxError: invalid syntax"#;
        let records = classify(log);
        assert!(records.iter().any(|r| r.kind == ErrorKind::Syntax));
        let located = records
            .iter()
            .find(|r| r.file.as_deref() == Some("src/app.py"))
            .expect("location extracted");
        assert_eq!(located.line, Some(3));
    }

    #[test]
    fn node_stack_frame_location() {
        let log = "TypeError: Cannot read property 'x' of undefined at handler (src/index.js:42:13)";
        let records = classify(log);
        let record = records
            .iter()
            .find(|r| r.file.as_deref() == Some("src/index.js"))
            .expect("stack frame parsed");
        assert_eq!(record.line, Some(42));
        assert_eq!(record.kind, ErrorKind::TypeError);
    }

    #[test]
    fn bare_stack_frames_are_noise() {
        // Frame lines without an Error/FAIL marker carry no classification.
        assert!(classify("    at handler (src/index.js:42:13)").is_empty());
    }

    #[test]
    fn rule_order_is_declaration_order() {
        // "assert" also appears, but SyntaxError is declared first.
        let records = classify("SyntaxError in assert statement");
        assert_eq!(records[0].kind, ErrorKind::Syntax);
    }

    #[test]
    fn each_rule_fires() {
        let cases = [
            ("unexpected token '}'", ErrorKind::Syntax),
            ("IndentationError: unexpected indent", ErrorKind::Indentation),
            ("TypeError: type int mismatch with str", ErrorKind::TypeError),
            ("ModuleNotFoundError: no module named foo", ErrorKind::Import),
            ("Expected 2 to equal 3", ErrorKind::Logic),
            ("eslint: semi rule violated", ErrorKind::Linting),
            ("ReferenceError: x is not defined", ErrorKind::Runtime),
        ];
        for (line, expected) in cases {
            let records = classify(line);
            assert_eq!(records[0].kind, expected, "line: {line}");
        }
    }

    #[test]
    fn noise_is_discarded_and_unknown_requires_marker() {
        assert!(classify("collected 10 items").is_empty());
        assert!(classify("running build step 3 of 5").is_empty());

        let records = classify("SomeObscureError: it broke");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, ErrorKind::Unknown);

        let records = classify("FAIL tests/unit");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, ErrorKind::Unknown);
    }

    #[test]
    fn classification_is_total_on_arbitrary_input() {
        for input in ["", "\n\n\n", "🦀🦀🦀", "Error", "x\u{0000}y FAIL"] {
            let records = classify(input);
            for r in &records {
                assert!(r.kind != ErrorKind::Unknown || r.raw_message.contains("Error") || r.raw_message.contains("FAIL"));
            }
        }
    }

    #[test]
    fn duplicates_collapse_by_file_line_kind() {
        let log = "src/a.js:1:1 TypeError: boom\nsrc/a.js:1:5 TypeError: boom again";
        let records = classify(log);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn same_location_different_kind_kept() {
        let log = "src/a.js:1:1 TypeError: boom\nsrc/a.js:1:1 ReferenceError: y is not defined";
        let records = classify(log);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn kind_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::TypeError).unwrap(),
            "\"TYPE_ERROR\""
        );
        assert_eq!(serde_json::to_string(&ErrorKind::Syntax).unwrap(), "\"SYNTAX\"");
    }
}
