//! Diagnostic extraction from CLI output.
//!
//! The apply/destroy invocations run with `-json`, so errors arrive as
//! structured diagnostic lines on stdout. Plain invocations report on
//! stderr with an `Error:` prefix.

use serde::Deserialize;

/// A single line of the CLI's `-json` machine-readable output.
#[derive(Debug, Deserialize)]
pub struct JsonLine {
    #[serde(rename = "@level")]
    pub level: Option<String>,
    #[serde(rename = "@message")]
    pub message: Option<String>,
    pub diagnostic: Option<Diagnostic>,
}

/// A diagnostic (error/warning) attached to a `-json` line.
#[derive(Debug, Deserialize)]
pub struct Diagnostic {
    pub severity: Option<String>,
    pub summary: Option<String>,
    pub detail: Option<String>,
}

/// Extract error diagnostics from `-json` output lines.
pub fn extract_errors(lines: &[String]) -> Vec<String> {
    let mut errors = Vec::new();

    for line in lines {
        if let Ok(parsed) = serde_json::from_str::<JsonLine>(line) {
            if let Some(diag) = &parsed.diagnostic {
                if diag.severity.as_deref() == Some("error") {
                    let mut msg = diag
                        .summary
                        .as_deref()
                        .unwrap_or("Unknown error")
                        .to_string();
                    if let Some(detail) = diag.detail.as_deref() {
                        if !detail.is_empty() {
                            msg.push_str(": ");
                            msg.push_str(detail);
                        }
                    }
                    errors.push(msg);
                }
            } else if parsed.level.as_deref() == Some("error") {
                if let Some(message) = parsed.message {
                    errors.push(message);
                }
            }
        }
    }

    errors
}

/// Build a human-readable error message from a failed invocation.
pub fn error_message(exit_code: i32, stdout_lines: &[String], stderr_lines: &[String]) -> String {
    let json_errors = extract_errors(stdout_lines);
    if !json_errors.is_empty() {
        return json_errors.join("; ");
    }

    // Non-json invocations report with an `Error:` prefix on stderr.
    let prefixed: Vec<&str> = stderr_lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| l.starts_with("Error:"))
        .collect();
    if !prefixed.is_empty() {
        return prefixed.join("; ");
    }

    let stderr = stderr_lines.join("\n");
    if !stderr.trim().is_empty() {
        return stderr;
    }

    let meaningful: Vec<&str> = stdout_lines
        .iter()
        .map(|l| l.as_str())
        .filter(|l| !l.trim().is_empty())
        .collect();
    if !meaningful.is_empty() {
        let tail: Vec<&str> = meaningful.iter().rev().take(5).rev().copied().collect();
        return tail.join("\n");
    }

    format!("exit code {}", exit_code)
}
