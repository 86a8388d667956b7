use std::path::Path;

/// Lexical normalization: collapses separators, resolves `.` and `..`.
///
/// Rooted paths never climb above `/`; relative paths keep leading `..`.
/// An empty result becomes `.`.
pub fn clean_path(raw: &str) -> String {
    if raw.is_empty() {
        return ".".to_string();
    }
    let rooted = raw.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().map(|p| *p != "..").unwrap_or(false) {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Expands a leading `~/` (or a bare `~`) against `home`.
pub fn expand_home(raw: &str, home: &Path) -> String {
    let home = home.to_string_lossy();
    if raw == "~" {
        home.to_string()
    } else if let Some(rest) = raw.strip_prefix("~/") {
        format!("{}/{}", home.trim_end_matches('/'), rest)
    } else {
        raw.to_string()
    }
}

pub fn has_parent_reference(raw: &str) -> bool {
    raw.split('/').any(|segment| segment == "..")
}

fn with_trailing_separator(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// `child` equals `parent` or lives beneath it, compared on cleaned paths.
pub fn is_within(child: &str, parent: &str) -> bool {
    let child = with_trailing_separator(&clean_path(child));
    let parent = with_trailing_separator(&clean_path(parent));
    child.starts_with(&parent)
}

/// Either path equals or contains the other.
pub fn paths_overlap(a: &str, b: &str) -> bool {
    is_within(a, b) || is_within(b, a)
}
