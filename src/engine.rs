//! Container engine abstraction.
//!
//! Everything that shells out to `docker compose` goes through the
//! [`ContainerEngine`] trait so command handlers can be exercised against an
//! in-memory fake. The real engine runs commands with the recipe directory
//! as working directory, which keeps compose file arguments relative.

use std::future::Future;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{AppError, Result};
use crate::paths::OVERRIDE_FILE_NAME;

/// Captured result of one engine invocation.
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl EngineOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Presence and version of the docker CLI and its compose plugin.
#[derive(Debug, Clone, Default)]
pub struct EngineStatus {
    pub docker_version: Option<String>,
    pub compose_version: Option<String>,
}

impl EngineStatus {
    pub fn is_ok(&self) -> bool {
        self.docker_version.is_some() && self.compose_version.is_some()
    }
}

pub trait ContainerEngine {
    fn status(&self) -> impl Future<Output = EngineStatus> + Send;

    /// Run `docker compose -p <project> -f <file>... <args>` inside
    /// `workdir` with inherited stdio, returning the exit code.
    fn compose_streamed(
        &self,
        project: &str,
        workdir: &Path,
        files: &[String],
        args: &[String],
    ) -> impl Future<Output = Result<i32>> + Send;

    /// Same invocation with stdout and stderr captured.
    fn compose_capture(
        &self,
        project: &str,
        workdir: &Path,
        files: &[String],
        args: &[String],
    ) -> impl Future<Output = Result<EngineOutput>> + Send;
}

/// Fails with an engine-missing error when docker or the compose plugin is
/// not installed. Checked before any stack mutation.
pub async fn ensure_available<E: ContainerEngine>(engine: &E) -> Result<EngineStatus> {
    let status = engine.status().await;
    if status.docker_version.is_none() {
        return Err(AppError::engine_missing(
            "docker not found. Please install Docker Desktop first.",
        ));
    }
    if status.compose_version.is_none() {
        return Err(AppError::engine_missing(
            "docker compose not available. Please update Docker.",
        ));
    }
    Ok(status)
}

/// Compose files to pass when managing an already-launched stack: the
/// recipe's compose file plus the port override if one was generated.
pub fn manage_compose_files(recipe_dir: &Path, compose_file: &str) -> Vec<String> {
    let mut files = vec![compose_file.to_string()];
    if recipe_dir.join(OVERRIDE_FILE_NAME).exists() {
        files.push(OVERRIDE_FILE_NAME.to_string());
    }
    files
}

fn to_args(files: &[String], project: &str, tail: &[String]) -> Vec<String> {
    let mut args = vec![
        "compose".to_string(),
        "-p".to_string(),
        project.to_string(),
    ];
    for file in files {
        args.push("-f".to_string());
        args.push(file.clone());
    }
    args.extend(tail.iter().cloned());
    args
}

/// Shells out to the docker CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerEngine;

impl DockerEngine {
    async fn probe_version(args: &[&str]) -> Option<String> {
        let output = Command::new("docker")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let line = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        Some(line)
    }
}

impl ContainerEngine for DockerEngine {
    async fn status(&self) -> EngineStatus {
        EngineStatus {
            docker_version: Self::probe_version(&["--version"]).await,
            compose_version: Self::probe_version(&["compose", "version"]).await,
        }
    }

    async fn compose_streamed(
        &self,
        project: &str,
        workdir: &Path,
        files: &[String],
        args: &[String],
    ) -> Result<i32> {
        let full = to_args(files, project, args);
        log::debug!("running docker {}", full.join(" "));
        let status = Command::new("docker")
            .args(&full)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .status()
            .await?;
        Ok(status.code().unwrap_or(1))
    }

    async fn compose_capture(
        &self,
        project: &str,
        workdir: &Path,
        files: &[String],
        args: &[String],
    ) -> Result<EngineOutput> {
        let full = to_args(files, project, args);
        log::debug!("running docker {}", full.join(" "));
        let output = Command::new("docker")
            .args(&full)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(EngineOutput {
            exit_code: output.status.code().unwrap_or(1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Row in `docker compose ps --format json` output.
#[derive(Debug, Clone, Default, serde::Deserialize, serde::Serialize)]
pub struct PsRow {
    #[serde(alias = "Name", default)]
    pub name: String,
    #[serde(alias = "State", default)]
    pub state: String,
    #[serde(alias = "Status", default)]
    pub status: String,
    #[serde(alias = "Health", default)]
    pub health: String,
}

/// `docker compose ps --format json` emits either a JSON array or one JSON
/// object per line depending on the compose version.
pub fn parse_ps_json(stdout: &str) -> Option<Vec<PsRow>> {
    if let Ok(rows) = serde_json::from_str::<Vec<PsRow>>(stdout) {
        return Some(rows);
    }
    let rows: Vec<PsRow> = stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    if rows.is_empty() {
        None
    } else {
        Some(rows)
    }
}

pub fn has_running(rows: &[PsRow]) -> bool {
    rows.iter().any(|row| {
        row.state.to_lowercase().contains("running")
            || row.status.to_lowercase().contains("running")
    })
}

pub fn has_running_text(stdout: &str) -> bool {
    stdout
        .to_lowercase()
        .lines()
        .any(|line| line.contains("running"))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn compose_args_interleave_files() {
        let args = to_args(
            &["compose.yaml".to_string(), ".githubui.override.yaml".to_string()],
            "ghui_acme_app_default",
            &["up".to_string(), "-d".to_string()],
        );
        assert_eq!(
            args,
            vec![
                "compose",
                "-p",
                "ghui_acme_app_default",
                "-f",
                "compose.yaml",
                "-f",
                ".githubui.override.yaml",
                "up",
                "-d",
            ]
        );
    }

    #[test]
    fn ps_json_array_and_lines() {
        let array = r#"[{"Name":"app","State":"running","Status":"Up 5 seconds"}]"#;
        let rows = parse_ps_json(array).unwrap();
        assert_eq!(rows[0].name, "app");
        assert!(has_running(&rows));

        let lines = "{\"Name\":\"db\",\"State\":\"exited\"}\n{\"Name\":\"app\",\"State\":\"running\"}\n";
        let rows = parse_ps_json(lines).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(has_running(&rows));

        assert!(parse_ps_json("not json").is_none());
    }

    #[test]
    fn running_detection_from_plain_text() {
        assert!(has_running_text("NAME  STATE\napp  Running\n"));
        assert!(!has_running_text("NAME  STATE\napp  Exited\n"));
    }

    #[test]
    fn manage_files_include_override_when_present() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(
            manage_compose_files(tmp.path(), "compose.yaml"),
            vec!["compose.yaml".to_string()]
        );
        std::fs::write(tmp.path().join(OVERRIDE_FILE_NAME), "services: {}\n").unwrap();
        assert_eq!(
            manage_compose_files(tmp.path(), "compose.yaml"),
            vec!["compose.yaml".to_string(), OVERRIDE_FILE_NAME.to_string()]
        );
    }

    #[tokio::test]
    async fn missing_engine_is_fatal() {
        let engine = fake::FakeEngine::default();
        let err = ensure_available(&engine).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EngineMissing);
    }
}
