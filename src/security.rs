pub mod paths;

use std::path::{Component, Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::{SecurityConfig, HARD_MAX_PATH_LENGTH};
use crate::error::{CleanError, ErrorKind, Result};
use paths::{clean_path, has_parent_reference};

lazy_static! {
    static ref XSS_PATTERN: Regex = Regex::new(
        r"(?i)(<\s*/?\s*script\b|javascript\s*:|<\s*iframe\b|\bon[a-z]+\s*=|<\s*img\b[^>]*\bsrc\s*=)"
    )
    .unwrap();
    static ref SQL_PATTERN: Regex = Regex::new(
        r"(?i)(\bunion\s+(all\s+)?select\b|\bdrop\s+(table|database)\b|\binsert\s+into\b|\bdelete\s+from\b|;\s*--|'\s*or\s+'?\d+'?\s*=\s*'?\d+|\bxp_cmdshell\b)"
    )
    .unwrap();
}

/// Guards strings and paths that reach backends, logs or the filesystem.
#[derive(Debug, Clone)]
pub struct SecurityValidator {
    max_path_length: usize,
    strict: bool,
    blocked: Vec<Regex>,
    allowed_extensions: Vec<String>,
}

impl SecurityValidator {
    pub fn new(config: &SecurityConfig) -> Result<Self> {
        let blocked = config
            .blocked_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(SecurityValidator {
            max_path_length: config.max_path_length.clamp(1, HARD_MAX_PATH_LENGTH),
            strict: config.strict_path_checking,
            blocked,
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        })
    }

    /// Drops NUL and control characters (newline and tab survive) and
    /// collapses runs of horizontal whitespace.
    pub fn sanitize_string(&self, raw: &str) -> String {
        sanitize_string(raw)
    }

    pub fn validate_path(&self, raw: &str) -> Result<()> {
        if raw.is_empty() {
            return Err(CleanError::security("path must not be empty"));
        }
        if raw.len() > self.max_path_length {
            return Err(CleanError::security(format!(
                "path exceeds {} bytes",
                self.max_path_length
            ))
            .with_context("length", raw.len()));
        }
        if has_parent_reference(raw) {
            return Err(CleanError::security("path traversal ('..') is not allowed")
                .with_context("path", sanitize_string(raw)));
        }
        if self.strict && clean_path(raw) != raw {
            return Err(CleanError::security("path is not in canonical form")
                .with_context("path", sanitize_string(raw))
                .with_context("expected", clean_path(raw)));
        }
        if let Some(pattern) = self.blocked.iter().find(|re| re.is_match(raw)) {
            return Err(CleanError::new(ErrorKind::Block, "path matches a blocked pattern")
                .with_context("path", sanitize_string(raw))
                .with_context("pattern", pattern.as_str()));
        }
        Ok(())
    }

    /// Checks the extension allow-list; an empty list allows everything.
    pub fn validate_extension(&self, path: &str) -> Result<()> {
        if self.allowed_extensions.is_empty() {
            return Ok(());
        }
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if self.allowed_extensions.contains(&ext) {
            Ok(())
        } else {
            Err(CleanError::security(format!("extension '{}' is not allowed", ext))
                .with_context("path", sanitize_string(path)))
        }
    }

    /// Rejects strings that look like markup or SQL injection attempts.
    pub fn validate_input(&self, field: &str, value: &str) -> Result<()> {
        if XSS_PATTERN.is_match(value) {
            return Err(CleanError::new(ErrorKind::Threat, "script-like content detected")
                .with_context("field", field));
        }
        if SQL_PATTERN.is_match(value) {
            return Err(CleanError::new(ErrorKind::Threat, "SQL-like content detected")
                .with_context("field", field));
        }
        Ok(())
    }

    /// Joins `relative` under `base`; the result, with symlinks resolved as far
    /// as the path exists, must stay inside the resolved `base`.
    pub fn secure_join(&self, base: &Path, relative: &str) -> Result<PathBuf> {
        let rel = Path::new(relative);
        if rel.is_absolute() {
            return Err(CleanError::security("relative component must not be absolute")
                .with_context("relative", sanitize_string(relative)));
        }
        if rel.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(CleanError::security("relative component must not contain '..'")
                .with_context("relative", sanitize_string(relative)));
        }

        let base_resolved = base.canonicalize().map_err(|err| {
            CleanError::security(format!("cannot resolve base directory: {}", err))
                .with_context("base", base.display())
        })?;
        let joined = base_resolved.join(rel);
        let resolved = resolve_existing_prefix(&joined)?;
        if !resolved.starts_with(&base_resolved) {
            return Err(CleanError::security("joined path escapes the base directory")
                .with_context("base", base_resolved.display())
                .with_context("resolved", resolved.display()));
        }
        Ok(resolved)
    }
}

pub fn sanitize_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for ch in raw.chars() {
        match ch {
            '\0' => {}
            ' ' | '\t' => pending_space = true,
            '\n' => {
                pending_space = false;
                out.push('\n');
            }
            c if c.is_control() => {}
            c if c.is_whitespace() => pending_space = true,
            c => {
                if pending_space && !out.is_empty() && !out.ends_with('\n') {
                    out.push(' ');
                }
                pending_space = false;
                out.push(c);
            }
        }
    }
    out
}

// Canonicalizes the deepest existing ancestor and re-attaches the rest.
fn resolve_existing_prefix(path: &Path) -> Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(resolved) => {
                let mut full = resolved;
                for part in tail.iter().rev() {
                    full.push(part);
                }
                return Ok(full);
            }
            Err(_) => {
                let name = existing.file_name().map(|n| n.to_os_string());
                match (name, existing.parent()) {
                    (Some(name), Some(parent)) => {
                        tail.push(name);
                        existing = parent.to_path_buf();
                    }
                    _ => {
                        return Err(CleanError::security("path has no resolvable ancestor")
                            .with_context("path", path.display()))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn validator() -> SecurityValidator {
        SecurityValidator::new(&SecurityConfig::default()).unwrap()
    }

    #[test]
    fn sanitize_strips_controls_and_collapses_spaces() {
        assert_eq!(sanitize_string("a\0b"), "ab");
        assert_eq!(sanitize_string("  lots   of \t space  "), "lots of space");
        assert_eq!(sanitize_string("line\nnext\x07"), "line\nnext");
        assert_eq!(sanitize_string("esc\x1b[31m"), "esc[31m");
    }

    #[test]
    fn validate_path_rules() {
        let v = validator();
        assert!(v.validate_path("/tmp/cache").is_ok());
        assert!(v.validate_path("").is_err());
        assert!(v.validate_path("/tmp/../etc").is_err());
        assert!(v.validate_path("/tmp//cache").is_err());
        assert!(v.validate_path("/Users/a/.ssh/id_rsa").is_err());
        assert!(v.validate_path(&format!("/{}", "a".repeat(5000))).is_err());

        let lenient = SecurityValidator::new(&SecurityConfig {
            strict_path_checking: false,
            ..SecurityConfig::default()
        })
        .unwrap();
        assert!(lenient.validate_path("/tmp//cache").is_ok());
    }

    #[test]
    fn blocked_patterns_report_block_kind() {
        let err = validator().validate_path("/home/u/.gnupg").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Block);
    }

    #[test]
    fn detects_injection_like_input() {
        let v = validator();
        assert!(v.validate_input("description", "Remove old caches").is_ok());
        assert!(v.validate_input("description", "<script>alert(1)</script>").is_err());
        assert!(v.validate_input("name", "x'; DROP TABLE users; --").is_err());
        assert!(v.validate_input("name", "' OR 1=1").is_err());
    }

    #[test]
    fn extension_allow_list() {
        let v = SecurityValidator::new(&SecurityConfig {
            allowed_extensions: vec![".tmp".into(), "log".into()],
            ..SecurityConfig::default()
        })
        .unwrap();
        assert!(v.validate_extension("/tmp/a.TMP").is_ok());
        assert!(v.validate_extension("/tmp/a.log").is_ok());
        assert!(v.validate_extension("/tmp/a.pdf").is_err());
        assert!(validator().validate_extension("/tmp/a.pdf").is_ok());
    }

    #[test]
    fn secure_join_stays_inside_base() {
        let dir = TempDir::new().unwrap();
        let v = validator();
        fs::create_dir_all(dir.path().join("cache")).unwrap();

        let joined = v.secure_join(dir.path(), "cache/new-file").unwrap();
        assert!(joined.starts_with(dir.path().canonicalize().unwrap()));
        assert!(v.secure_join(dir.path(), "../escape").is_err());
        assert!(v.secure_join(dir.path(), "/etc/passwd").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn secure_join_rejects_symlink_escape() {
        let base = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), base.path().join("link")).unwrap();

        let err = validator().secure_join(base.path(), "link/secret").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Security);
    }
}
