//! Helpers for turning user-supplied values into safe file names and span
//! attributes.
//!
//! Spans and logs only ever carry file names, never full source paths.

use std::path::Path;

const MAX_NAME_LEN: usize = 64;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Reduces a job name to `[A-Za-z0-9_-]`, collapsing everything else to
/// `_`. Never empty and never a path component like `..`.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len().min(MAX_NAME_LEN));
    let mut last_was_sep = false;
    for c in name.trim().chars() {
        if out.len() >= MAX_NAME_LEN {
            break;
        }
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }

    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "job".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Directory name for a job: sanitized name plus the first 8 characters
/// of its id, so two jobs with the same name never share a directory.
pub fn job_key(name: &str, job_id: &str) -> String {
    let prefix: String = job_id
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .take(8)
        .collect();
    format!("{}_{}", sanitize_name(name), prefix)
}
