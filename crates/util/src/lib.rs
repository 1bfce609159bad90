//! Utility helpers shared by the Stagehand engine and CLI.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

pub mod command_line;
pub mod config;
pub mod path_processing;

pub use command_line::{CommandLineError, split_command_line};
pub use path_processing::expand_tilde;

static SENSITIVE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(authorization: )([\w\-\.=:/+]+)",
        r"(?i)([A-Z0-9_]*?(KEY|TOKEN|SECRET|PASSWORD)=)([^\s]+)",
        r"(?i)(--from-literal=[\w.-]*(password|token|secret|key)[\w.-]*=)([^\s]+)",
        r"(?i)(--(password|token|auth-token)[ =])([^\s]+)",
        r"(?i)(://[^:/\s]+:)([^@\s]+)(@)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("redaction pattern is valid"))
    .collect()
});

/// Redacts values that look like secrets in a string.
///
/// Applied to command lines and tool output before they are logged or reported.
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in SENSITIVE_PATTERNS.iter() {
        redacted = pattern
            .replace_all(&redacted, |caps: &Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                let suffix = if caps.len() > 3 && prefix.starts_with("://") {
                    caps.get(3).map(|m| m.as_str()).unwrap_or("")
                } else {
                    ""
                };
                format!("{}<redacted>{}", prefix, suffix)
            })
            .to_string();
    }
    redacted
}
