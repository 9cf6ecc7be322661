//! `trystack://` one-click URI handling.
//!
//! URIs arrive from outside the trust boundary (browser, portal link),
//! so every parameter is validated against a strict shape before any
//! network or process side effect. Parsing is pure; confirmation and
//! dispatch happen separately.

use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;

use reqwest::{Client, Url};

use crate::commands::{self, ManageAction, UpOptions};
use crate::engine::ContainerEngine;
use crate::error::{AppError, Result};
use crate::policy::PolicyMode;
use crate::probe::ProbeTiming;
use crate::recipe::ConfigLookup;
use crate::registry::{Registry, RegistryOptions};
use crate::repo::{parse_owner_repo, parse_repo, RepoRef};

pub const SCHEME: &str = "trystack";

const MAX_URI_LEN: usize = 2048;
const MAX_REPO_LEN: usize = 200;
const MAX_RECIPE_LEN: usize = 80;
const MAX_PROJECT_LEN: usize = 60;
const MAX_REF_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolAction {
    Up,
    Print,
    Doctor,
    Ps,
    Logs,
    Stop,
    Down,
}

impl ProtocolAction {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Self::Up),
            "print" => Some(Self::Print),
            "doctor" => Some(Self::Doctor),
            "ps" => Some(Self::Ps),
            "logs" => Some(Self::Logs),
            "stop" => Some(Self::Stop),
            "down" => Some(Self::Down),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Print => "print",
            Self::Doctor => "doctor",
            Self::Ps => "ps",
            Self::Logs => "logs",
            Self::Stop => "stop",
            Self::Down => "down",
        }
    }
}

/// A fully validated one-click request. Construction implies every field
/// passed its shape check.
#[derive(Debug, Clone)]
pub struct ProtocolRequest {
    pub raw: String,
    pub action: ProtocolAction,
    pub repo: RepoRef,
    pub recipe_id: Option<String>,
    pub project: Option<String>,
    pub no_run: bool,
    pub no_open: bool,
    pub prefer_registry: bool,
    pub json: bool,
    pub registry: Option<Registry>,
    /// `cacheDir` was supplied but is never honored via URI.
    pub cache_dir_ignored: bool,
}

fn has_control_chars(s: &str) -> bool {
    s.chars().any(|c| c.is_control())
}

fn is_safe_segment(s: &str, max_len: usize) -> bool {
    !s.is_empty()
        && s.len() <= max_len
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn is_safe_ref(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_REF_LEN
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/'))
}

fn parse_uri(raw: &str) -> Option<Url> {
    if let Ok(url) = Url::parse(raw) {
        return Some(url);
    }
    // Some shells strip the slashes: trystack:up?repo=...
    let (scheme, rest) = raw.split_once(':')?;
    if scheme.is_empty() || !scheme.chars().next()?.is_ascii_alphabetic() {
        return None;
    }
    Url::parse(&format!("{scheme}://{rest}")).ok()
}

/// Validate a raw URI into a request. Pure: no I/O, no side effects, so
/// a rejected URI provably did nothing.
pub fn parse_request(raw: &str) -> Result<ProtocolRequest> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(AppError::usage("missing URI"));
    }
    if input.len() > MAX_URI_LEN || has_control_chars(input) {
        return Err(AppError::usage(
            "invalid URI (too long or contains control characters)",
        ));
    }

    let url = parse_uri(input).ok_or_else(|| AppError::usage(format!("invalid URI: {input}")))?;
    if url.scheme() != SCHEME {
        return Err(AppError::usage(format!(
            "unsupported scheme: {} (expected {SCHEME}://)",
            url.scheme()
        )));
    }

    let mut repo_raw = String::new();
    let mut recipe_id = None;
    let mut project = None;
    let mut registry_repo = None;
    let mut registry_ref = None;
    let mut no_run = false;
    let mut no_open = false;
    let mut prefer_registry = false;
    let mut json = false;
    let mut cache_dir_ignored = false;

    for (key, value) in url.query_pairs() {
        let value = value.into_owned();
        match key.as_ref() {
            "repo" => repo_raw = value,
            "recipe" if !value.is_empty() => recipe_id = Some(value),
            "project" if !value.is_empty() => project = Some(value),
            "registry" if !value.is_empty() => registry_repo = Some(value),
            "registryRef" if !value.is_empty() => registry_ref = Some(value),
            "cacheDir" if !value.is_empty() => cache_dir_ignored = true,
            "noRun" => no_run = no_run || value == "1",
            "run" => no_run = no_run || value == "0",
            "noOpen" => no_open = no_open || value == "1",
            "open" => no_open = no_open || value == "0",
            "preferRegistry" => prefer_registry = value == "1",
            "json" => json = value == "1",
            _ => {}
        }
    }

    if repo_raw.len() > MAX_REPO_LEN || has_control_chars(&repo_raw) {
        return Err(AppError::usage("invalid repo parameter"));
    }
    let repo = parse_repo(&repo_raw)
        .ok_or_else(|| AppError::usage(format!("invalid repo: {repo_raw}")))?;

    if let Some(id) = &recipe_id {
        if !is_safe_segment(id, MAX_RECIPE_LEN) {
            return Err(AppError::usage(format!("invalid recipe parameter: {id}")));
        }
    }
    if let Some(name) = &project {
        if !is_safe_segment(name, MAX_PROJECT_LEN) || name.to_lowercase().starts_with("docker") {
            return Err(AppError::usage(format!("invalid project parameter: {name}")));
        }
    }

    let registry = match &registry_repo {
        Some(spec) => {
            let coords = parse_owner_repo(spec)
                .ok_or_else(|| AppError::usage(format!("invalid registry parameter: {spec}")))?;
            Some(Registry {
                owner: coords.owner,
                repo: coords.repo,
                reference: match &registry_ref {
                    Some(r) => {
                        if !is_safe_ref(r) {
                            return Err(AppError::usage(format!(
                                "invalid registryRef parameter: {r}"
                            )));
                        }
                        r.clone()
                    }
                    None => "main".to_string(),
                },
            })
        }
        None => {
            if let Some(r) = &registry_ref {
                if !is_safe_ref(r) {
                    return Err(AppError::usage(format!("invalid registryRef parameter: {r}")));
                }
            }
            None
        }
    };

    // Action sits in the host position, or the first path segment when
    // the shell stripped the slashes.
    let action_raw = url
        .host_str()
        .map(str::to_string)
        .filter(|h| !h.is_empty())
        .or_else(|| {
            url.path()
                .trim_start_matches('/')
                .split('/')
                .next()
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "up".to_string())
        .to_lowercase();
    let action = ProtocolAction::parse(&action_raw).ok_or_else(|| {
        AppError::usage(format!(
            "unsupported action: {action_raw} (supported: up, print, doctor, ps, logs, stop, down)"
        ))
    })?;

    Ok(ProtocolRequest {
        raw: input.to_string(),
        action,
        repo,
        recipe_id,
        project,
        no_run,
        no_open,
        prefer_registry,
        json,
        registry,
        cache_dir_ignored,
    })
}

#[derive(Debug, Clone)]
pub struct ProtocolOptions {
    pub yes: bool,
    pub policy: PolicyMode,
    pub timing: ProbeTiming,
    pub cache_dir: PathBuf,
    pub recipes_root: Option<PathBuf>,
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    let answer = answer.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

/// Execute a validated request: resolve, confirm, dispatch to the same
/// command handlers the CLI uses.
pub async fn dispatch<E: ContainerEngine>(
    api: &Client,
    probe: &Client,
    engine: &E,
    env: &dyn ConfigLookup,
    request: &ProtocolRequest,
    opts: &ProtocolOptions,
) -> Result<i32> {
    if request.cache_dir_ignored {
        log::warn!("cacheDir is ignored when provided via {SCHEME}:// URI");
    }

    let registry_opts = RegistryOptions {
        registry: request.registry.clone().unwrap_or_default(),
        cache_dir: opts.cache_dir.clone(),
        prefer_registry: request.prefer_registry,
        recipes_root: opts.recipes_root.clone(),
    };

    let ctx = commands::resolve(
        api,
        &request.repo.slug(),
        request.recipe_id.as_deref(),
        request.project.as_deref(),
        &registry_opts,
    )
    .await?;

    let run = !request.no_run;
    let open = !request.no_open;
    println!("One-click request:");
    println!("- uri: {}", request.raw);
    println!("- action: {}", request.action.name());
    println!("- repo: {}", request.repo.slug());
    println!("- recipe: {}", ctx.recipe_id);
    println!("- run: {}", if run { "yes" } else { "no" });
    println!("- open: {}", if open { "yes" } else { "no" });
    if request.action == ProtocolAction::Doctor {
        println!("- json: {}", if request.json { "yes" } else { "no" });
    }
    println!();

    if !opts.yes {
        if !std::io::stdin().is_terminal() {
            return Err(AppError::usage("no TTY available; refusing to run without --yes"));
        }
        if !confirm("Proceed? (y/N) ")? {
            println!("Cancelled.");
            return Ok(0);
        }
    }

    match request.action {
        ProtocolAction::Doctor => {
            commands::doctor(probe, engine, &ctx, env, request.prefer_registry, request.json).await
        }
        ProtocolAction::Ps => commands::manage(engine, &ctx, &ManageAction::Ps).await,
        ProtocolAction::Stop => commands::manage(engine, &ctx, &ManageAction::Stop).await,
        ProtocolAction::Down => {
            commands::manage(engine, &ctx, &ManageAction::Down { volumes: false }).await
        }
        ProtocolAction::Logs => {
            commands::manage(
                engine,
                &ctx,
                &ManageAction::Logs {
                    tail: 200,
                    follow: false,
                },
            )
            .await
        }
        ProtocolAction::Up | ProtocolAction::Print => {
            let up_opts = UpOptions {
                run: run && request.action == ProtocolAction::Up,
                open: open && request.action == ProtocolAction::Up,
                policy: opts.policy,
                timing: opts.timing,
            };
            commands::up(probe, engine, &ctx, env, &up_opts).await
        }
    }
}
