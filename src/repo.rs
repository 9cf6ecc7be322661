//! Repository identifiers and recipe-id selection.

use std::fs;
use std::path::Path;

use serde::Serialize;

/// Canonical `(owner, repo)` pair. Immutable once parsed; invalid input
/// never yields a partially-filled value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Charset allowed for owner/repo segments, recipe ids, and project names.
pub fn is_safe_segment(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn split_owner_repo(s: &str) -> Option<RepoRef> {
    let (owner, repo) = s.split_once('/')?;
    if is_safe_segment(owner) && is_safe_segment(repo) {
        Some(RepoRef {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    } else {
        None
    }
}

/// Parse any of the three accepted repo input shapes: bare `owner/repo`,
/// an HTTPS GitHub URL, or an SSH GitHub URL. The URL forms strip a
/// trailing `.git`; the bare form keeps the input verbatim.
pub fn parse_repo(input: &str) -> Option<RepoRef> {
    let input = input.trim();
    if let Some(r) = split_owner_repo(input) {
        return Some(r);
    }

    for prefix in ["https://github.com/", "http://github.com/"] {
        if let Some(rest) = input.strip_prefix(prefix) {
            let rest = rest.strip_suffix('/').unwrap_or(rest);
            let rest = rest.strip_suffix(".git").unwrap_or(rest);
            return split_owner_repo(rest);
        }
    }

    if let Some(rest) = input.strip_prefix("git@github.com:") {
        let rest = rest.strip_suffix(".git").unwrap_or(rest);
        return split_owner_repo(rest);
    }

    None
}

/// Parse a bare `owner/repo` pair only (used for `--registry`).
pub fn parse_owner_repo(input: &str) -> Option<RepoRef> {
    split_owner_repo(input.trim())
}

/// List recipe ids (subdirectory names) under `recipes/<owner>/<repo>/`.
/// A missing directory is an empty list, not an error.
pub fn list_recipe_ids(repo_dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(repo_dir) else {
        return Vec::new();
    };
    let mut ids: Vec<String> = entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    ids.sort();
    ids
}

/// Deterministic recipe-id pick: the literal `default` wins, otherwise
/// the lexicographically smallest id.
pub fn pick_recipe_id(ids: &[String]) -> Option<String> {
    if ids.iter().any(|id| id == "default") {
        return Some("default".to_string());
    }
    ids.iter().min().cloned()
}

/// Sanitized, length-capped, lowercase compose project name. Runs of
/// characters outside `[a-z0-9_-]` collapse to a single underscore.
pub fn sanitize_project_name(name: &str) -> String {
    let mut out = String::new();
    let mut last_was_sep = false;
    for c in name.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
            out.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    out.truncate(50);
    out
}
