//! Per-invocation resolution: turn a repo identifier into a runnable
//! recipe context, from the local tree or the remote registry.

use std::fmt;
use std::path::PathBuf;

use reqwest::Client;
use serde_yaml::Value;

use crate::error::{AppError, Result};
use crate::paths::{local_recipes_root, repo_recipes_dir};
use crate::recipe::{read_recipe_doc, Recipe};
use crate::registry::{Registry, RegistryClient, RegistryOptions};
use crate::repo::{list_recipe_ids, parse_repo, pick_recipe_id, sanitize_project_name, RepoRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Local,
    Github,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Github => write!(f, "github"),
        }
    }
}

/// The resolved working set for one invocation. Created once per command
/// and discarded at process exit; never partially constructed.
#[derive(Debug)]
pub struct Context {
    pub repo: RepoRef,
    pub repo_dir: PathBuf,
    pub recipe_ids: Vec<String>,
    pub recipe_id: String,
    pub recipe_dir: PathBuf,
    pub doc: Value,
    pub recipe: Recipe,
    pub compose_file: String,
    pub project_name: String,
    pub source: Source,
    pub registry: Registry,
    pub cache_dir: PathBuf,
}

pub async fn resolve_context(
    client: &Client,
    input: &str,
    requested_recipe_id: Option<&str>,
    project_override: Option<&str>,
    opts: &RegistryOptions,
) -> Result<Context> {
    let repo =
        parse_repo(input).ok_or_else(|| AppError::usage(format!("unsupported repo format: {input}")))?;

    let local_root = match &opts.recipes_root {
        Some(root) => root.clone(),
        None => local_recipes_root(&std::env::current_dir()?),
    };
    let local_repo_dir = local_root.join(&repo.owner).join(&repo.repo);

    let mut recipe_ids = list_recipe_ids(&local_repo_dir);
    let mut source = Source::Local;

    if recipe_ids.is_empty() || opts.prefer_registry {
        let registry_client = RegistryClient::new(client, &opts.registry);
        recipe_ids = registry_client.list_recipe_ids(&repo).await?;
        source = Source::Github;
    }

    if recipe_ids.is_empty() {
        return Err(AppError::not_found(format!(
            "no recipes found for {} (looked in {} and registry {})",
            repo.slug(),
            local_repo_dir.display(),
            opts.registry
        )));
    }

    let recipe_id = match requested_recipe_id {
        Some(requested) => {
            if !recipe_ids.iter().any(|id| id == requested) {
                return Err(AppError::not_found(format!(
                    "recipe '{requested}' not found for {} (available: {})",
                    repo.slug(),
                    recipe_ids.join(", ")
                )));
            }
            requested.to_string()
        }
        None => pick_recipe_id(&recipe_ids).ok_or_else(|| {
            AppError::not_found(format!("no recipes found for {}", repo.slug()))
        })?,
    };

    let (repo_dir, recipe_dir, doc, compose_file) = match source {
        Source::Local => {
            let recipe_dir = local_repo_dir.join(&recipe_id);
            let doc = read_recipe_doc(&recipe_dir)?;
            let compose_file = Recipe::from_value(&doc).compose_file;
            (local_repo_dir, recipe_dir, doc, compose_file)
        }
        Source::Github => {
            let registry_client = RegistryClient::new(client, &opts.registry);
            let fetched = registry_client
                .fetch_recipe_dir(&repo, &recipe_id, &opts.cache_dir)
                .await?;
            let repo_dir = repo_recipes_dir(&opts.cache_dir, &repo);
            (repo_dir, fetched.recipe_dir, fetched.doc, fetched.compose_file)
        }
    };

    let recipe = Recipe::from_value(&doc);
    let project_name = sanitize_project_name(
        project_override
            .map(String::from)
            .unwrap_or_else(|| format!("ghui_{}_{}_{}", repo.owner, repo.repo, recipe_id))
            .as_str(),
    );

    Ok(Context {
        repo,
        repo_dir,
        recipe_ids,
        recipe_id,
        recipe_dir,
        doc,
        recipe,
        compose_file,
        project_name,
        source,
        registry: opts.registry.clone(),
        cache_dir: opts.cache_dir.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_recipe(root: &std::path::Path, owner: &str, repo: &str, id: &str) {
        let dir = root.join("recipes").join(owner).join(repo).join(id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("recipe.yaml"),
            format!(
                "apiVersion: githubui.recipes/v0\nid: {id}\ntarget:\n  owner: {owner}\n  repo: {repo}\n  ref: main\nruntime:\n  type: compose\n  composeFile: compose.yaml\nui:\n  url: http://localhost:3000\n  healthcheck:\n    method: GET\n    path: /\n    expectStatus: 200\n    match: ok\n"
            ),
        )
        .unwrap();
        fs::write(
            dir.join("compose.yaml"),
            "services:\n  app:\n    image: nginx:alpine\n    ports:\n      - \"3000:80\"\n",
        )
        .unwrap();
    }

    fn options(root: &std::path::Path) -> RegistryOptions {
        RegistryOptions {
            registry: Registry::default(),
            cache_dir: root.join("cache"),
            prefer_registry: false,
            recipes_root: Some(root.join("recipes")),
        }
    }

    #[tokio::test]
    async fn resolves_local_recipe_with_deterministic_pick() {
        let tmp = tempfile::tempdir().unwrap();
        write_recipe(tmp.path(), "foo", "bar", "default");
        write_recipe(tmp.path(), "foo", "bar", "v1");

        let client = Client::new();
        let ctx = resolve_context(&client, "foo/bar", None, None, &options(tmp.path()))
            .await
            .unwrap();

        assert_eq!(ctx.recipe_id, "default");
        assert_eq!(ctx.source, Source::Local);
        assert_eq!(ctx.project_name, "ghui_foo_bar_default");
        assert_eq!(ctx.compose_file, "compose.yaml");
    }

    #[tokio::test]
    async fn requested_recipe_must_exist() {
        let tmp = tempfile::tempdir().unwrap();
        write_recipe(tmp.path(), "foo", "bar", "default");

        let client = Client::new();
        let err = resolve_context(&client, "foo/bar", Some("nope"), None, &options(tmp.path()))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn bad_repo_input_is_a_usage_error() {
        let client = Client::new();
        let tmp = tempfile::tempdir().unwrap();
        let err = resolve_context(&client, "not a repo", None, None, &options(tmp.path()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Usage);
    }
}
