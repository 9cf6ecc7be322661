//! Centralized path utilities: cache layout and idempotent file writes.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::repo::RepoRef;

/// File name for the generated single-service port-remap override. Named
/// distinctly from user-authored compose files so it is never mistaken
/// for a manifest input.
pub const OVERRIDE_FILE_NAME: &str = ".githubui.override.yaml";

/// Recipe manifest file name inside a recipe directory.
pub const RECIPE_FILE_NAME: &str = "recipe.yaml";

/// Default compose file name when `runtime.composeFile` is absent.
pub const DEFAULT_COMPOSE_FILE: &str = "compose.yaml";

/// Default on-disk cache root for registry fetches (~/.githubui-cache).
pub fn default_cache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".githubui-cache")
}

/// Local recipes root relative to the working directory.
pub fn local_recipes_root(cwd: &Path) -> PathBuf {
    cwd.join("recipes")
}

/// `recipes/<owner>/<repo>` under the given root (local tree or cache).
pub fn repo_recipes_dir(root: &Path, repo: &RepoRef) -> PathBuf {
    root.join("recipes").join(&repo.owner).join(&repo.repo)
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .map_err(|e| AppError::io(format!("Failed to create {}: {}", path.display(), e)))
}

/// Write `content` to `path`, creating parent directories, but only if the
/// on-disk content differs. Identical rewrites leave the file untouched so
/// concurrent identical invocations converge instead of racing.
pub fn write_file_if_changed(path: &Path, content: &str) -> Result<bool> {
    if let Ok(prev) = fs::read_to_string(path) {
        if prev == content {
            return Ok(false);
        }
    }
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    fs::write(path, content)
        .map_err(|e| AppError::io(format!("Failed to write {}: {}", path.display(), e)))?;
    Ok(true)
}
