//! Remote recipe registry: a GitHub-hosted collection of recipes fetched
//! over the contents API, keyed by a pinned ref.

use std::fmt;
use std::path::{Path, PathBuf};

use reqwest::Client;
use serde::Deserialize;
use serde_yaml::Value;

use crate::error::{AppError, Result};
use crate::paths::{write_file_if_changed, DEFAULT_COMPOSE_FILE, RECIPE_FILE_NAME};
use crate::probe::USER_AGENT;
use crate::repo::RepoRef;

const README_FILE_NAME: &str = "README.md";

/// Remote collection of recipes, identified by repo coordinates and a
/// pinned git ref. Constructed once per invocation and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    pub owner: String,
    pub repo: String,
    pub reference: String,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            owner: "LeeJinMing".to_string(),
            repo: "TryStack".to_string(),
            reference: "main".to_string(),
        }
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.repo, self.reference)
    }
}

/// Per-invocation registry settings resolved from flags/environment.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub registry: Registry,
    pub cache_dir: PathBuf,
    pub prefer_registry: bool,
    /// Local recipes root override; defaults to `recipes/` under the
    /// working directory.
    pub recipes_root: Option<PathBuf>,
}

/// A recipe directory materialized from the registry into the cache.
#[derive(Debug)]
pub struct FetchedRecipe {
    pub recipe_dir: PathBuf,
    pub doc: Value,
    pub compose_file: String,
}

#[derive(Debug, Deserialize)]
struct ContentsItem {
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    download_url: Option<String>,
}

/// Percent-encode one path segment for the contents API URL.
fn encode_segment(seg: &str) -> String {
    let mut out = String::with_capacity(seg.len());
    for b in seg.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn encode_github_path(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}

/// Thin client over the GitHub-compatible contents API.
pub struct RegistryClient<'a> {
    client: &'a Client,
    registry: &'a Registry,
}

impl<'a> RegistryClient<'a> {
    pub fn new(client: &'a Client, registry: &'a Registry) -> Self {
        Self { client, registry }
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "https://api.github.com/repos/{}/{}/contents/{}?ref={}",
            self.registry.owner,
            self.registry.repo,
            encode_github_path(path),
            encode_segment(&self.registry.reference)
        )
    }

    async fn api_get_json(&self, url: &str) -> Result<serde_json::Value> {
        let resp = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| AppError::registry_with_url(url, e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AppError::registry_with_url(url, e.to_string()))?;
        if status.as_u16() != 200 {
            let snippet: String = body.chars().take(400).collect();
            return Err(AppError::registry_with_url(
                url,
                format!("GitHub API request failed ({status}): {snippet}"),
            ));
        }
        serde_json::from_str(&body).map_err(|e| AppError::registry_with_url(url, e.to_string()))
    }

    async fn download_text(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| AppError::registry_with_url(url, e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AppError::registry_with_url(url, e.to_string()))?;
        if status.as_u16() != 200 {
            let snippet: String = body.chars().take(200).collect();
            return Err(AppError::registry_with_url(
                url,
                format!("Download failed ({status}): {snippet}"),
            ));
        }
        Ok(body)
    }

    /// List recipe ids (directories) under `recipes/<owner>/<repo>` in the
    /// registry tree.
    pub async fn list_recipe_ids(&self, target: &RepoRef) -> Result<Vec<String>> {
        let url = self.contents_url(&format!("recipes/{}/{}", target.owner, target.repo));
        let items = self.api_get_json(&url).await?;
        let Some(items) = items.as_array() else {
            return Ok(Vec::new());
        };
        let mut ids: Vec<String> = items
            .iter()
            .filter_map(|it| serde_json::from_value::<ContentsItem>(it.clone()).ok())
            .filter(|it| it.kind == "dir" && !it.name.is_empty())
            .map(|it| it.name)
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Resolve a registry file's raw download URL and fetch its text.
    async fn fetch_file(&self, base_path: &str, file: &str) -> Result<String> {
        let meta_url = self.contents_url(&format!("{base_path}/{file}"));
        let meta = self.api_get_json(&meta_url).await?;
        let item: ContentsItem = serde_json::from_value(meta)
            .map_err(|e| AppError::registry_with_url(&meta_url, e.to_string()))?;
        let download_url = item
            .download_url
            .ok_or_else(|| AppError::registry_with_url(&meta_url, "missing download_url"))?;
        self.download_text(&download_url).await
    }

    /// Materialize a recipe directory (manifest, compose file, optional
    /// README) into the cache. Cache writes are content-compared, so
    /// repeated fetches of identical content leave files untouched.
    pub async fn fetch_recipe_dir(
        &self,
        target: &RepoRef,
        recipe_id: &str,
        cache_dir: &Path,
    ) -> Result<FetchedRecipe> {
        let base_path = format!("recipes/{}/{}/{}", target.owner, target.repo, recipe_id);
        let local_dir = cache_dir
            .join("recipes")
            .join(&target.owner)
            .join(&target.repo)
            .join(recipe_id);

        let recipe_yaml = self.fetch_file(&base_path, RECIPE_FILE_NAME).await?;
        write_file_if_changed(&local_dir.join(RECIPE_FILE_NAME), &recipe_yaml)?;

        let doc: Value = serde_yaml::from_str(&recipe_yaml)
            .map_err(|e| AppError::registry(format!("invalid {RECIPE_FILE_NAME}: {e}")))?;
        let compose_file = doc
            .get("runtime")
            .and_then(|r| r.get("composeFile"))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_COMPOSE_FILE)
            .to_string();

        let compose_yaml = self.fetch_file(&base_path, &compose_file).await?;
        write_file_if_changed(&local_dir.join(&compose_file), &compose_yaml)?;

        match self.fetch_file(&base_path, README_FILE_NAME).await {
            Ok(readme) => {
                write_file_if_changed(&local_dir.join(README_FILE_NAME), &readme)?;
            }
            Err(e) => log::debug!("no README for {base_path}: {e}"),
        }

        Ok(FetchedRecipe {
            recipe_dir: local_dir,
            doc,
            compose_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_coordinates() {
        let reg = Registry::default();
        assert_eq!(reg.to_string(), "LeeJinMing/TryStack@main");
    }

    #[test]
    fn encodes_path_segments() {
        assert_eq!(encode_github_path("recipes/foo/bar"), "recipes/foo/bar");
        assert_eq!(
            encode_github_path("recipes/foo/has space"),
            "recipes/foo/has%20space"
        );
        assert_eq!(encode_github_path("/leading//double/"), "leading/double");
    }
}
