//! External process plumbing: tool discovery, detached launches and
//! liveness checks.

pub mod environment;
pub mod launcher;

use std::path::Path;

/// Quote `s` for safe inclusion in a `/bin/sh` command line.
///
/// Strings made only of characters the shell treats literally are returned
/// unchanged; everything else is wrapped in single quotes.
pub fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | ':' | ',' | '=' | '@')
        });
    if plain {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// [`shell_quote`] for a path.
pub fn quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}
