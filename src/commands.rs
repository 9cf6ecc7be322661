//! Command handlers. Each returns the process exit code on the happy
//! path; fatal conditions surface as `AppError` and are mapped to exit
//! codes at the top level.

use std::path::Path;
use std::process::Stdio;

use reqwest::Client;
use serde::Serialize;
use serde_json::json;

use crate::context::{resolve_context, Context, Source};
use crate::engine::{
    ensure_available, has_running, has_running_text, manage_compose_files, parse_ps_json,
    ContainerEngine,
};
use crate::error::{AppError, ErrorKind, Result};
use crate::paths::{local_recipes_root, OVERRIDE_FILE_NAME, RECIPE_FILE_NAME};
use crate::policy::{classify_tier, detect_local_deps, verify_recipe_dir, PolicyMode, Tier};
use crate::ports::{ensure_ui_port_available, LaunchPlan};
use crate::probe::{build_check_url, http_get, wait_for_ui, ProbeTiming};
use crate::recipe::{
    missing_env, read_compose_doc, read_recipe_doc, validate_recipe_v0, ConfigLookup, Expectations,
    Recipe,
};
use crate::registry::{RegistryClient, RegistryOptions};
use crate::repo::{list_recipe_ids, parse_repo};

#[derive(Debug, Clone)]
pub struct UpOptions {
    pub run: bool,
    pub open: bool,
    pub policy: PolicyMode,
    pub timing: ProbeTiming,
}

impl Default for UpOptions {
    fn default() -> Self {
        Self {
            run: true,
            open: true,
            policy: PolicyMode::Community,
            timing: ProbeTiming::default(),
        }
    }
}

fn files_for_print(files: &[String]) -> String {
    files
        .iter()
        .map(|f| format!("-f \"{f}\""))
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_run_info(ctx: &Context, compose_files: &[String], ui_url: Option<&str>) -> String {
    println!("Repo: {}", ctx.repo.slug());
    println!("Recipe: {}", ctx.recipe_id);
    println!("Recipe dir: {}", ctx.recipe_dir.display());
    println!();
    println!("Run locally:");
    println!("  cd \"{}\"", ctx.recipe_dir.display());
    let files = files_for_print(compose_files);
    println!("  docker compose -p \"{}\" {files} up -d", ctx.project_name);
    println!();
    if let Some(url) = ui_url {
        println!("UI: {url}");
    }
    println!();
    files
}

fn print_troubleshoot(ctx: &Context, files: &str, tail_cmd: &str) {
    eprintln!("Troubleshoot:");
    eprintln!("  cd \"{}\"", ctx.recipe_dir.display());
    eprintln!("  docker compose -p \"{}\" {files} ps", ctx.project_name);
    if !tail_cmd.is_empty() {
        eprintln!("  docker compose -p \"{}\" {files} {tail_cmd}", ctx.project_name);
    }
}

fn open_url(url: &str) {
    let mut cmd = if cfg!(target_os = "windows") {
        let mut c = std::process::Command::new("cmd");
        c.args(["/c", "start", "", url]);
        c
    } else if cfg!(target_os = "macos") {
        let mut c = std::process::Command::new("open");
        c.arg(url);
        c
    } else {
        let mut c = std::process::Command::new("xdg-open");
        c.arg(url);
        c
    };
    let _ = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
}

/// Gate a resolved recipe on the security policy before anything runs.
/// Errors abort; warnings are surfaced and execution continues.
fn policy_gate(ctx: &Context, mode: PolicyMode) -> Result<()> {
    let result = verify_recipe_dir(
        &ctx.recipe_dir,
        &ctx.repo.owner,
        &ctx.repo.repo,
        &ctx.recipe_id,
        mode,
    );
    for warning in &result.warnings {
        log::warn!("policy: {warning}");
    }
    if !result.ok {
        for error in &result.errors {
            eprintln!("policy error: {error}");
        }
        return Err(AppError::recipe_invalid(format!(
            "recipe failed {mode} policy checks ({} error(s))",
            result.errors.len()
        )));
    }
    Ok(())
}

/// `up` and `print`: resolve, gate, adjust ports, launch, wait for the
/// UI, open it. With `run == false` only the plan is printed.
pub async fn up<E: ContainerEngine>(
    probe: &Client,
    engine: &E,
    ctx: &Context,
    env: &dyn ConfigLookup,
    opts: &UpOptions,
) -> Result<i32> {
    policy_gate(ctx, opts.policy)?;

    let missing = missing_env(&ctx.recipe.env_required, env);
    if !missing.is_empty() {
        log::warn!("required environment not set: {}", missing.join(", "));
    }

    let plan = if opts.run {
        ensure_ui_port_available(&ctx.recipe_dir, &ctx.recipe, &ctx.compose_file)?
    } else {
        LaunchPlan {
            compose_files: vec![ctx.compose_file.clone()],
            ui_url: ctx.recipe.ui.as_ref().map(|ui| ui.url.clone()),
        }
    };
    let ui_url = plan.ui_url.as_deref();

    let files = print_run_info(ctx, &plan.compose_files, ui_url);
    if !opts.run {
        return Ok(0);
    }

    ensure_available(engine).await?;
    let up_args: Vec<String> = ["up", "-d", "--remove-orphans"]
        .iter()
        .map(ToString::to_string)
        .collect();
    let code = engine
        .compose_streamed(&ctx.project_name, &ctx.recipe_dir, &plan.compose_files, &up_args)
        .await?;
    if code != 0 {
        return Ok(code);
    }

    if ui_url.is_some() {
        println!();
        println!("Waiting for UI to become ready (up to 5 minutes)...");
    }
    let healthcheck = ctx.recipe.ui.as_ref().map(|ui| &ui.healthcheck);
    match wait_for_ui(probe, ui_url, healthcheck, opts.timing).await {
        Ok(ready_url) => {
            if let Some(url) = ready_url {
                println!("UI is ready.");
                if opts.open {
                    println!("Opening: {url}");
                    open_url(&url);
                }
            }
            Ok(0)
        }
        Err(err) if err.kind() == ErrorKind::ReadinessTimeout => {
            eprintln!();
            eprintln!("UI did not become ready in time.");
            eprintln!("{err}");
            eprintln!();
            print_troubleshoot(ctx, &files, "logs --tail 200");
            Err(err)
        }
        Err(err) => Err(err),
    }
}

/// Lifecycle subcommands that map straight onto one compose invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManageAction {
    Ps,
    Stop,
    Down { volumes: bool },
    Logs { tail: u32, follow: bool },
}

impl ManageAction {
    fn compose_args(&self) -> Vec<String> {
        match self {
            Self::Ps => vec!["ps".to_string()],
            Self::Stop => vec!["stop".to_string()],
            Self::Down { volumes: false } => vec!["down".to_string()],
            Self::Down { volumes: true } => vec!["down".to_string(), "-v".to_string()],
            Self::Logs { tail, follow } => {
                let mut args = vec!["logs".to_string(), "--tail".to_string(), tail.to_string()];
                if *follow {
                    args.push("--follow".to_string());
                }
                args
            }
        }
    }
}

pub async fn manage<E: ContainerEngine>(
    engine: &E,
    ctx: &Context,
    action: &ManageAction,
) -> Result<i32> {
    println!("Repo: {}", ctx.repo.slug());
    println!("Recipe: {}", ctx.recipe_id);
    println!("Recipe dir: {}", ctx.recipe_dir.display());
    println!("Project: {}", ctx.project_name);
    println!();

    ensure_available(engine).await?;
    let files = manage_compose_files(&ctx.recipe_dir, &ctx.compose_file);
    engine
        .compose_streamed(&ctx.project_name, &ctx.recipe_dir, &files, &action.compose_args())
        .await
}

/// `list`: available recipe ids for a repo, local first with registry
/// fallback. Resolves no recipe content.
pub async fn list(
    client: &Client,
    input: &str,
    opts: &RegistryOptions,
    json: bool,
) -> Result<i32> {
    let repo = parse_repo(input)
        .ok_or_else(|| AppError::usage(format!("unsupported repo format: {input}")))?;

    let local_root = match &opts.recipes_root {
        Some(root) => root.clone(),
        None => local_recipes_root(&std::env::current_dir()?),
    };
    let local_dir = local_root.join(&repo.owner).join(&repo.repo);

    let mut ids = list_recipe_ids(&local_dir);
    let mut source = Source::Local;
    if ids.is_empty() || opts.prefer_registry {
        ids = RegistryClient::new(client, &opts.registry)
            .list_recipe_ids(&repo)
            .await?;
        source = Source::Github;
    }

    if ids.is_empty() {
        return Err(AppError::not_found(format!(
            "no recipes for {} (looked under {} and in registry {})",
            repo.slug(),
            local_dir.display(),
            opts.registry
        )));
    }

    ids.sort();
    if json {
        let payload = json!({
            "repo": repo.slug(),
            "source": source.to_string(),
            "localPath": local_dir.display().to_string(),
            "registry": opts.registry.to_string(),
            "recipeIds": ids,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Repo: {}", repo.slug());
        println!("Source: {source}");
        println!("Local path: {}", local_dir.display());
        println!("Registry: {}", opts.registry);
        println!("Available recipes:");
        for id in &ids {
            println!("- {id}");
        }
        println!();
    }
    Ok(0)
}

/// `doctor`: environment and stack diagnosis. Never mutates the stack;
/// every check is reported even when an earlier one failed.
pub async fn doctor<E: ContainerEngine>(
    probe: &Client,
    engine: &E,
    ctx: &Context,
    env: &dyn ConfigLookup,
    prefer_registry: bool,
    json: bool,
) -> Result<i32> {
    let compose_files = manage_compose_files(&ctx.recipe_dir, &ctx.compose_file);
    let ui_url = ctx.recipe.ui.as_ref().map(|ui| ui.url.clone());
    let healthcheck = ctx.recipe.ui.as_ref().map(|ui| ui.healthcheck.clone());

    let expect = Expectations {
        id: Some(ctx.recipe_id.clone()),
        owner: Some(ctx.repo.owner.clone()),
        repo: Some(ctx.repo.repo.clone()),
    };
    let recipe_errors = validate_recipe_v0(&ctx.doc, &expect);
    let engine_status = engine.status().await;
    let missing = missing_env(&ctx.recipe.env_required, env);

    let recipe_yaml_ok = ctx.recipe_dir.join(RECIPE_FILE_NAME).exists();
    let compose_ok = ctx.recipe_dir.join(&ctx.compose_file).exists();
    let override_present = ctx.recipe_dir.join(OVERRIDE_FILE_NAME).exists();

    let mut exit_code = 0;

    if !json {
        println!("Repo: {}", ctx.repo.slug());
        println!("Recipe: {}", ctx.recipe_id);
        println!("Recipe dir: {}", ctx.recipe_dir.display());
        println!("Project: {}", ctx.project_name);
        println!("Source: {}", ctx.source);
        println!("Cache dir: {}", ctx.cache_dir.display());
        println!("Registry: {}", ctx.registry);
        println!("Prefer registry: {}", if prefer_registry { "yes" } else { "no" });
        if let Some(url) = &ui_url {
            println!("UI: {url}");
        }
        println!();

        println!("Environment:");
        println!(
            "- docker: {}",
            engine_status.docker_version.as_deref().unwrap_or("missing")
        );
        println!(
            "- docker compose: {}",
            engine_status.compose_version.as_deref().unwrap_or("missing")
        );
        println!();

        println!("Recipe:");
        println!("- {RECIPE_FILE_NAME}: {}", if recipe_yaml_ok { "ok" } else { "missing" });
        println!(
            "- compose file ({}): {}",
            ctx.compose_file,
            if compose_ok { "ok" } else { "missing" }
        );
        println!(
            "- override ({OVERRIDE_FILE_NAME}): {}",
            if override_present { "present" } else { "absent" }
        );
        if recipe_errors.is_empty() {
            println!("- recipe validation: ok");
        } else {
            println!("- recipe validation: failed");
            for err in &recipe_errors {
                println!("  - {err}");
            }
        }
        if let Some(hc) = &healthcheck {
            let match_part = hc
                .match_text
                .as_deref()
                .map(|m| format!(" match \"{m}\""))
                .unwrap_or_default();
            println!("- ui.healthcheck: GET {} expect {}{match_part}", hc.path, hc.expect_status);
        }
        println!("- ports: {}", ctx.recipe.ports.len());
        if !ctx.recipe.env_required.is_empty() {
            println!("- env.required: {}", ctx.recipe.env_required.join(", "));
        }
        if !ctx.recipe.env_optional.is_empty() {
            println!("- env.optional: {}", ctx.recipe.env_optional.join(", "));
        }
        if !missing.is_empty() {
            println!("- env.missing: {}", missing.join(", "));
        }
        println!();
    }

    if !recipe_errors.is_empty() {
        exit_code = ErrorKind::RecipeInvalid.exit_code();
    }
    if !engine_status.is_ok() {
        exit_code = ErrorKind::EngineMissing.exit_code();
    }

    let mut config_report = json!(null);
    if exit_code == 0 {
        let cfg = engine
            .compose_capture(&ctx.project_name, &ctx.recipe_dir, &compose_files, &["config".to_string()])
            .await?;
        config_report = json!({ "ok": cfg.success(), "exitCode": cfg.exit_code });
        if !json {
            if cfg.success() {
                println!("compose config: ok");
            } else {
                if !cfg.stderr.trim().is_empty() {
                    eprint!("{}", cfg.stderr);
                }
                println!("Compose config validation failed.");
                print_troubleshoot(ctx, &files_for_print(&compose_files), "config");
            }
            println!();
        }
        if !cfg.success() {
            exit_code = cfg.exit_code;
        }
    }

    let mut ps_report = json!(null);
    let mut running = false;
    if engine_status.is_ok() {
        let ps = engine
            .compose_capture(&ctx.project_name, &ctx.recipe_dir, &compose_files, &["ps".to_string()])
            .await?;
        if !json && !ps.stdout.trim().is_empty() {
            print!("{}", ps.stdout);
        }
        let ps_json = engine
            .compose_capture(
                &ctx.project_name,
                &ctx.recipe_dir,
                &compose_files,
                &["ps".to_string(), "--format".to_string(), "json".to_string()],
            )
            .await?;
        let rows = if ps_json.success() { parse_ps_json(&ps_json.stdout) } else { None };
        running = match &rows {
            Some(rows) => has_running(rows),
            None => has_running_text(&ps.stdout),
        };
        ps_report = json!({ "ok": ps.success(), "running": running, "services": rows });
        if !ps.success() {
            exit_code = ps.exit_code;
        }
    }

    let mut precheck = json!({ "skipped": true });
    if running {
        if let (Some(url), Some(hc)) = (&ui_url, &healthcheck) {
            let check_url = build_check_url(url, hc)?;
            let resp = http_get(probe, check_url.as_str()).await;
            let status_ok = resp.status == hc.expect_status;
            let match_ok = hc
                .match_text
                .as_deref()
                .map_or(true, |m| resp.body.to_lowercase().contains(&m.to_lowercase()));
            let ok = status_ok && match_ok;
            precheck = json!({
                "ok": ok,
                "status": resp.status,
                "matchOk": match_ok,
                "url": check_url.as_str(),
            });
            if !json {
                println!("Precheck: {} (status={})", if ok { "ok" } else { "fail" }, resp.status);
                if !ok {
                    println!("- check: {check_url}");
                }
                println!();
            }
        }
    } else if !json && ui_url.is_some() {
        println!("Precheck: skipped (no running services)");
        println!();
    }

    if !missing.is_empty() && exit_code == 0 {
        exit_code = ErrorKind::EnvMissing.exit_code();
    }

    if json {
        let payload = json!({
            "repo": ctx.repo.slug(),
            "recipeId": ctx.recipe_id,
            "recipeDir": ctx.recipe_dir.display().to_string(),
            "projectName": ctx.project_name,
            "source": ctx.source.to_string(),
            "cacheDir": ctx.cache_dir.display().to_string(),
            "registry": ctx.registry.to_string(),
            "preferRegistry": prefer_registry,
            "uiUrl": ui_url,
            "environment": {
                "docker": engine_status.docker_version,
                "compose": engine_status.compose_version,
            },
            "recipe": {
                "recipeYaml": recipe_yaml_ok,
                "composeFile": compose_ok,
                "override": override_present,
                "validationErrors": recipe_errors,
            },
            "checks": {
                "portsCount": ctx.recipe.ports.len(),
                "envRequired": &ctx.recipe.env_required,
                "envOptional": &ctx.recipe.env_optional,
                "envMissing": missing,
            },
            "composeConfig": config_report,
            "ps": ps_report,
            "precheck": precheck,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    }

    Ok(exit_code)
}

#[derive(Debug, Serialize)]
struct VerifyEntry {
    owner: String,
    repo: String,
    #[serde(rename = "recipeId")]
    recipe_id: String,
    ok: bool,
    tier: Option<String>,
    #[serde(rename = "localDeps")]
    local_deps: Vec<String>,
    errors: Vec<String>,
    warnings: Vec<String>,
}

/// Advisory tier label for a recipe directory, best effort. Returns
/// `None` when the recipe itself cannot be read.
fn recipe_tier(recipe_dir: &Path) -> (Option<Tier>, Vec<String>) {
    let Ok(doc) = read_recipe_doc(recipe_dir) else {
        return (None, Vec::new());
    };
    let recipe = Recipe::from_value(&doc);
    let local_deps = read_compose_doc(recipe_dir, &recipe.compose_file)
        .map(|compose| detect_local_deps(&compose))
        .unwrap_or_default();
    let tier = classify_tier(&recipe, &local_deps);
    (Some(tier), local_deps)
}

/// `verify`: run the policy validator over every recipe under a local
/// recipes tree.
pub fn verify(recipes_root: &Path, mode: PolicyMode, json: bool) -> Result<i32> {
    if !recipes_root.exists() {
        return Err(AppError::not_found(format!(
            "recipes dir not found: {}",
            recipes_root.display()
        )));
    }

    let mut results = Vec::new();
    for owner in list_recipe_ids(recipes_root) {
        let owner_dir = recipes_root.join(&owner);
        for repo in list_recipe_ids(&owner_dir) {
            let repo_dir = owner_dir.join(&repo);
            for recipe_id in list_recipe_ids(&repo_dir) {
                let recipe_dir = repo_dir.join(&recipe_id);
                let res = verify_recipe_dir(&recipe_dir, &owner, &repo, &recipe_id, mode);
                let (tier, local_deps) = recipe_tier(&recipe_dir);
                results.push(VerifyEntry {
                    owner: owner.clone(),
                    repo: repo.clone(),
                    recipe_id,
                    ok: res.ok,
                    tier: tier.map(|t| t.to_string()),
                    local_deps,
                    errors: res.errors,
                    warnings: res.warnings,
                });
            }
        }
    }

    if results.is_empty() {
        return Err(AppError::not_found(format!(
            "no recipes found under: {} (expected recipes/<owner>/<repo>/<recipeId>/{RECIPE_FILE_NAME})",
            recipes_root.display()
        )));
    }

    let failed = results.iter().filter(|r| !r.ok).count();
    let mut tiers: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();
    for r in &results {
        if let Some(t) = &r.tier {
            *tiers.entry(t.clone()).or_default() += 1;
        }
    }
    if json {
        let payload = json!({
            "ok": failed == 0,
            "mode": mode.to_string(),
            "total": results.len(),
            "failed": failed,
            "recipesRoot": recipes_root.display().to_string(),
            "tiers": tiers,
            "results": results,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("mode: {mode}");
        println!("recipesRoot: {}", recipes_root.display());
        println!("total: {}", results.len());
        println!("failed: {failed}");
        let tier_line = tiers
            .iter()
            .map(|(t, n)| format!("{t}={n}"))
            .collect::<Vec<_>>()
            .join(" ");
        if !tier_line.is_empty() {
            println!("tiers: {tier_line}");
        }
        println!();
        for r in &results {
            if r.ok && r.warnings.is_empty() {
                continue;
            }
            println!("- {}/{}/{}", r.owner, r.repo, r.recipe_id);
            for e in &r.errors {
                println!("  - ERROR: {e}");
            }
            for w in &r.warnings {
                println!("  - WARN:  {w}");
            }
        }
        println!();
    }

    Ok(if failed == 0 { 0 } else { ErrorKind::RecipeInvalid.exit_code() })
}

/// Convenience used by both the CLI and the protocol dispatcher.
pub async fn resolve(
    client: &Client,
    input: &str,
    recipe_id: Option<&str>,
    project: Option<&str>,
    opts: &RegistryOptions,
) -> Result<Context> {
    resolve_context(client, input, recipe_id, project, opts).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;
    use crate::engine::EngineOutput;
    use crate::paths::default_cache_dir;
    use crate::probe::probe_client;
    use crate::registry::Registry;
    use std::collections::HashMap;
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const COMPOSE_YAML: &str = "\
services:
  app:
    image: nginx@sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa
";

    fn recipe_yaml(ui_url: &str, extra: &str) -> String {
        format!(
            "\
apiVersion: githubui.recipes/v0
id: default
target:
  owner: acme
  repo: app
  ref: main
runtime:
  type: compose
  composeFile: compose.yaml
ui:
  url: {ui_url}
  healthcheck:
    method: GET
    path: /
    expectStatus: 200
    match: ok
{extra}"
        )
    }

    fn seed_recipes(root: &Path, ui_url: &str, extra: &str) -> PathBuf {
        let dir = root.join("recipes/acme/app/default");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("recipe.yaml"), recipe_yaml(ui_url, extra)).unwrap();
        fs::write(dir.join("compose.yaml"), COMPOSE_YAML).unwrap();
        root.join("recipes")
    }

    /// Always answers 200 with a body containing "ok".
    async fn ready_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let body = "service ok";
                let reply = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(reply.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        format!("http://127.0.0.1:{}", addr.port())
    }

    fn test_up_opts() -> UpOptions {
        UpOptions {
            open: false,
            timing: ProbeTiming {
                interval: Duration::from_millis(10),
                deadline: Duration::from_millis(2_000),
            },
            ..UpOptions::default()
        }
    }

    fn opts(recipes_root: PathBuf) -> RegistryOptions {
        RegistryOptions {
            registry: Registry::default(),
            cache_dir: default_cache_dir(),
            prefer_registry: false,
            recipes_root: Some(recipes_root),
        }
    }

    async fn ctx_for(recipes_root: PathBuf) -> Context {
        let client = Client::new();
        resolve_context(&client, "acme/app", None, None, &opts(recipes_root))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn up_runs_compose_then_waits_for_readiness() {
        let tmp = tempfile::tempdir().unwrap();
        let url = ready_server().await;
        let root = seed_recipes(tmp.path(), &url, "");
        let ctx = ctx_for(root).await;
        let engine = FakeEngine::installed();
        let env: HashMap<String, String> = HashMap::new();

        let code = up(&probe_client().unwrap(), &engine, &ctx, &env, &test_up_opts())
            .await
            .unwrap();
        assert_eq!(code, 0);

        let calls = engine.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].project, "ghui_acme_app_default");
        assert_eq!(calls[0].files, vec!["compose.yaml".to_string()]);
        assert_eq!(calls[0].args, vec!["up", "-d", "--remove-orphans"]);
    }

    #[tokio::test]
    async fn print_mode_never_touches_engine() {
        let tmp = tempfile::tempdir().unwrap();
        let root = seed_recipes(tmp.path(), "http://localhost:3000", "");
        let ctx = ctx_for(root).await;
        let engine = FakeEngine::default();
        let env: HashMap<String, String> = HashMap::new();

        let print_opts = UpOptions {
            run: false,
            ..test_up_opts()
        };
        let code = up(&probe_client().unwrap(), &engine, &ctx, &env, &print_opts)
            .await
            .unwrap();
        assert_eq!(code, 0);
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_compose_exit_code_is_propagated() {
        let tmp = tempfile::tempdir().unwrap();
        let root = seed_recipes(tmp.path(), "http://localhost:3000", "");
        let ctx = ctx_for(root).await;
        let engine = FakeEngine::installed().with_output(EngineOutput {
            exit_code: 17,
            ..EngineOutput::default()
        });
        let env: HashMap<String, String> = HashMap::new();

        let code = up(&probe_client().unwrap(), &engine, &ctx, &env, &test_up_opts())
            .await
            .unwrap();
        assert_eq!(code, 17);
    }

    #[tokio::test]
    async fn up_refuses_policy_violations() {
        let tmp = tempfile::tempdir().unwrap();
        let root = seed_recipes(tmp.path(), "http://localhost:3000", "");
        // Rewrite the compose file with a sensitive mount.
        fs::write(
            root.join("acme/app/default/compose.yaml"),
            "services:\n  app:\n    image: nginx@sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n    volumes:\n      - /var/run/docker.sock:/var/run/docker.sock\n",
        )
        .unwrap();
        let ctx = ctx_for(root).await;
        let engine = FakeEngine::installed();
        let env: HashMap<String, String> = HashMap::new();

        let err = up(&probe_client().unwrap(), &engine, &ctx, &env, &test_up_opts())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecipeInvalid);
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn up_times_out_when_ui_never_answers() {
        let tmp = tempfile::tempdir().unwrap();
        // Nothing listens on this port.
        let port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        let root = seed_recipes(tmp.path(), &format!("http://127.0.0.1:{port}"), "");
        let ctx = ctx_for(root).await;
        let engine = FakeEngine::installed();
        let env: HashMap<String, String> = HashMap::new();

        let short = UpOptions {
            timing: ProbeTiming {
                interval: Duration::from_millis(10),
                deadline: Duration::from_millis(100),
            },
            ..test_up_opts()
        };
        let err = up(&probe_client().unwrap(), &engine, &ctx, &env, &short)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadinessTimeout);
    }

    #[tokio::test]
    async fn manage_down_with_volumes() {
        let tmp = tempfile::tempdir().unwrap();
        let root = seed_recipes(tmp.path(), "http://localhost:3000", "");
        let ctx = ctx_for(root).await;
        let engine = FakeEngine::installed();

        let code = manage(&engine, &ctx, &ManageAction::Down { volumes: true })
            .await
            .unwrap();
        assert_eq!(code, 0);
        assert_eq!(engine.calls()[0].args, vec!["down", "-v"]);
    }

    #[tokio::test]
    async fn manage_logs_tail_and_follow() {
        let tmp = tempfile::tempdir().unwrap();
        let root = seed_recipes(tmp.path(), "http://localhost:3000", "");
        let ctx = ctx_for(root).await;
        let engine = FakeEngine::installed();

        let code = manage(
            &engine,
            &ctx,
            &ManageAction::Logs {
                tail: 50,
                follow: true,
            },
        )
        .await
        .unwrap();
        assert_eq!(code, 0);
        assert_eq!(engine.calls()[0].args, vec!["logs", "--tail", "50", "--follow"]);
    }

    #[tokio::test]
    async fn manage_requires_engine() {
        let tmp = tempfile::tempdir().unwrap();
        let root = seed_recipes(tmp.path(), "http://localhost:3000", "");
        let ctx = ctx_for(root).await;
        let engine = FakeEngine::default();

        let err = manage(&engine, &ctx, &ManageAction::Ps).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EngineMissing);
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn doctor_reports_missing_env() {
        let tmp = tempfile::tempdir().unwrap();
        let root = seed_recipes(
            tmp.path(),
            "http://localhost:3000",
            "env:\n  required: [API_KEY]\n",
        );
        let ctx = ctx_for(root).await;
        let engine = FakeEngine::installed();
        let env: HashMap<String, String> = HashMap::new();

        let code = doctor(&probe_client().unwrap(), &engine, &ctx, &env, false, false)
            .await
            .unwrap();
        assert_eq!(code, ErrorKind::EnvMissing.exit_code());
    }

    #[tokio::test]
    async fn doctor_env_present_is_healthy() {
        let tmp = tempfile::tempdir().unwrap();
        let root = seed_recipes(
            tmp.path(),
            "http://localhost:3000",
            "env:\n  required: [API_KEY]\n",
        );
        let ctx = ctx_for(root).await;
        let engine = FakeEngine::installed();
        let env = HashMap::from([("API_KEY".to_string(), "secret".to_string())]);

        let code = doctor(&probe_client().unwrap(), &engine, &ctx, &env, false, true)
            .await
            .unwrap();
        assert_eq!(code, 0);
    }

    #[test]
    fn verify_walks_recipes_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let root = seed_recipes(tmp.path(), "http://localhost:3000", "");
        let code = verify(&root, PolicyMode::Verified, false).unwrap();
        assert_eq!(code, 0);

        // Break one recipe and expect a failing exit.
        fs::write(
            root.join("acme/app/default/compose.yaml"),
            "services:\n  app:\n    image: nginx:latest\n",
        )
        .unwrap();
        let code = verify(&root, PolicyMode::Verified, false).unwrap();
        assert_eq!(code, ErrorKind::RecipeInvalid.exit_code());
    }

    #[tokio::test]
    async fn list_prefers_local_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let root = seed_recipes(tmp.path(), "http://localhost:3000", "");
        let code = list(&Client::new(), "acme/app", &opts(root), false)
            .await
            .unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn list_rejects_malformed_input() {
        let tmp = tempfile::tempdir().unwrap();
        let root = seed_recipes(tmp.path(), "http://localhost:3000", "");
        let err = list(&Client::new(), "not a repo", &opts(root), false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn tier_labels_follow_configuration_burden() {
        let tmp = tempfile::tempdir().unwrap();
        let root = seed_recipes(tmp.path(), "http://localhost:3000", "");
        let dir = root.join("acme/app/default");
        let (tier, deps) = recipe_tier(&dir);
        assert_eq!(tier, Some(Tier::A0));
        assert!(deps.is_empty());

        fs::write(
            dir.join("compose.yaml"),
            format!(
                "services:\n  app:\n    image: nginx@sha256:{d}\n  db:\n    image: postgres@sha256:{d}\n",
                d = "a".repeat(64)
            ),
        )
        .unwrap();
        let (tier, deps) = recipe_tier(&dir);
        assert_eq!(tier, Some(Tier::A1));
        assert_eq!(deps, vec!["postgres".to_string()]);
    }

    #[test]
    fn verify_missing_root_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = verify(&tmp.path().join("nope"), PolicyMode::Community, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
