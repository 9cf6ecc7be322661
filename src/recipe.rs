//! Recipe manifests: untyped YAML documents, structural validation, and
//! the typed view used by the launch pipeline.
//!
//! Remote recipes are untrusted until the policy validator has run, so
//! manifests are parsed into `serde_yaml::Value` first and every field is
//! checked defensively before anything relies on its shape.

use std::fs;
use std::path::Path;

use serde_yaml::Value;

use crate::error::{AppError, Result};
use crate::paths::{DEFAULT_COMPOSE_FILE, RECIPE_FILE_NAME};

/// Schema version string every recipe must declare verbatim.
pub const API_VERSION_V0: &str = "githubui.recipes/v0";

pub fn read_yaml_file(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path)
        .map_err(|_| AppError::not_found(format!("missing file at {}", path.display())))?;
    serde_yaml::from_str(&raw)
        .map_err(|e| AppError::recipe_invalid(format!("{}: {}", path.display(), e)))
}

pub fn read_recipe_doc(recipe_dir: &Path) -> Result<Value> {
    read_yaml_file(&recipe_dir.join(RECIPE_FILE_NAME))
}

pub fn read_compose_doc(recipe_dir: &Path, compose_file: &str) -> Result<Value> {
    read_yaml_file(&recipe_dir.join(compose_file))
}

fn str_field(v: &Value) -> Option<&str> {
    v.as_str().filter(|s| !s.trim().is_empty())
}

/// Numeric in the loose sense the manifest allows: a YAML number, or a
/// string that parses as one.
pub fn as_number(v: &Value) -> Option<f64> {
    if let Some(n) = v.as_f64() {
        return Some(n);
    }
    v.as_str().and_then(|s| s.trim().parse::<f64>().ok())
}

/// Directory-derived identity a fetched recipe must match.
#[derive(Debug, Clone, Default)]
pub struct Expectations {
    pub id: Option<String>,
    pub owner: Option<String>,
    pub repo: Option<String>,
}

/// Structural validation of a v0 recipe document. Collects every
/// violation instead of failing fast.
pub fn validate_recipe_v0(recipe: &Value, expect: &Expectations) -> Vec<String> {
    let mut errors = Vec::new();

    if recipe.as_mapping().is_none() {
        errors.push("recipe.yaml is empty or invalid".to_string());
        return errors;
    }

    if recipe.get("apiVersion").and_then(Value::as_str) != Some(API_VERSION_V0) {
        errors.push(format!("apiVersion must be '{API_VERSION_V0}'"));
    }

    match recipe.get("id").and_then(str_field) {
        None => errors.push("id is required".to_string()),
        Some(id) => {
            if let Some(expected) = expect.id.as_deref() {
                if id != expected {
                    errors.push(format!("id mismatch (expected '{expected}', got '{id}')"));
                }
            }
        }
    }

    validate_target(recipe.get("target"), expect, &mut errors);
    validate_runtime(recipe.get("runtime"), &mut errors);
    validate_ui(recipe.get("ui"), &mut errors);
    validate_ports(recipe.get("ports"), &mut errors);
    validate_env(recipe.get("env"), &mut errors);

    errors
}

fn validate_target(target: Option<&Value>, expect: &Expectations, errors: &mut Vec<String>) {
    let Some(target) = target.filter(|t| t.as_mapping().is_some()) else {
        errors.push("target is required".to_string());
        return;
    };

    let owner = target.get("owner").and_then(str_field);
    let repo = target.get("repo").and_then(str_field);
    if owner.is_none() {
        errors.push("target.owner is required".to_string());
    }
    if repo.is_none() {
        errors.push("target.repo is required".to_string());
    }
    if target.get("ref").and_then(str_field).is_none() {
        errors.push("target.ref is required".to_string());
    }

    if let (Some(expected), Some(owner)) = (expect.owner.as_deref(), owner) {
        if owner != expected {
            errors.push(format!(
                "target.owner mismatch (expected '{expected}', got '{owner}')"
            ));
        }
    }
    if let (Some(expected), Some(repo)) = (expect.repo.as_deref(), repo) {
        if repo != expected {
            errors.push(format!(
                "target.repo mismatch (expected '{expected}', got '{repo}')"
            ));
        }
    }
}

fn validate_runtime(runtime: Option<&Value>, errors: &mut Vec<String>) {
    let Some(runtime) = runtime.filter(|r| r.as_mapping().is_some()) else {
        errors.push("runtime is required".to_string());
        return;
    };
    if runtime.get("type").and_then(Value::as_str) != Some("compose") {
        errors.push("runtime.type must be 'compose'".to_string());
    }
    if runtime.get("composeFile").and_then(str_field).is_none() {
        errors.push("runtime.composeFile is required".to_string());
    }
}

fn validate_ui(ui: Option<&Value>, errors: &mut Vec<String>) {
    let Some(ui) = ui.filter(|u| u.as_mapping().is_some()) else {
        errors.push("ui is required".to_string());
        return;
    };
    if ui.get("url").and_then(str_field).is_none() {
        errors.push("ui.url is required".to_string());
    }

    let Some(hc) = ui.get("healthcheck").filter(|h| h.as_mapping().is_some()) else {
        errors.push("ui.healthcheck is required".to_string());
        return;
    };
    if hc.get("method").and_then(Value::as_str) != Some("GET") {
        errors.push("ui.healthcheck.method must be 'GET'".to_string());
    }
    match hc.get("path").and_then(Value::as_str) {
        Some(p) if p.starts_with('/') => {}
        _ => errors.push("ui.healthcheck.path must start with '/'".to_string()),
    }
    if hc.get("expectStatus").and_then(as_number).is_none() {
        errors.push("ui.healthcheck.expectStatus must be a number".to_string());
    }
    if let Some(m) = hc.get("match") {
        if !m.is_null() && m.as_str().is_none() {
            errors.push("ui.healthcheck.match must be a string".to_string());
        }
    }
}

fn validate_ports(ports: Option<&Value>, errors: &mut Vec<String>) {
    let Some(ports) = ports.filter(|p| !p.is_null()) else {
        return;
    };
    let Some(seq) = ports.as_sequence() else {
        errors.push("ports must be an array".to_string());
        return;
    };
    for p in seq {
        if p.as_mapping().is_none() {
            errors.push("ports[] must be an object".to_string());
            continue;
        }
        if p.get("name").and_then(str_field).is_none() {
            errors.push("ports[].name is required".to_string());
        }
        for key in ["service", "protocol"] {
            if let Some(v) = p.get(key) {
                if !v.is_null() && v.as_str().is_none() {
                    errors.push(format!("ports[].{key} must be a string"));
                }
            }
        }
        for key in ["containerPort", "hostPort"] {
            if p.get(key).and_then(as_number).is_none() {
                errors.push(format!("ports[].{key} must be a number"));
            }
        }
    }
}

fn validate_env(env: Option<&Value>, errors: &mut Vec<String>) {
    let Some(env) = env.filter(|e| !e.is_null()) else {
        return;
    };
    if env.as_mapping().is_none() {
        errors.push("env must be an object".to_string());
        return;
    }
    for key in ["required", "optional"] {
        let Some(list) = env.get(key).filter(|l| !l.is_null()) else {
            continue;
        };
        let Some(seq) = list.as_sequence() else {
            errors.push(format!("env.{key} must be an array"));
            continue;
        };
        for item in seq {
            if item.as_str().map(str::trim).filter(|s| !s.is_empty()).is_none() {
                errors.push(format!("env.{key}[] must be non-empty strings"));
            }
        }
    }
}

/// Typed, read-only view of a validated recipe document. Extraction is
/// defensive: junk fields degrade to defaults rather than panicking, since
/// the validator has already decided whether the document is acceptable.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub id: String,
    pub compose_file: String,
    pub ports: Vec<PortSpec>,
    pub ui: Option<Ui>,
    pub env_required: Vec<String>,
    pub env_optional: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PortSpec {
    pub name: String,
    pub service: Option<String>,
    pub protocol: Option<String>,
    pub host_port: Option<u16>,
    pub container_port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct Ui {
    pub url: String,
    pub healthcheck: Healthcheck,
}

#[derive(Debug, Clone)]
pub struct Healthcheck {
    pub path: String,
    pub expect_status: u16,
    pub match_text: Option<String>,
}

fn port_number(v: Option<&Value>) -> Option<u16> {
    let n = v.and_then(as_number)?;
    if n.is_finite() && n >= 0.0 && n <= f64::from(u16::MAX) {
        Some(n as u16)
    } else {
        None
    }
}

impl Recipe {
    pub fn from_value(doc: &Value) -> Self {
        let compose_file = doc
            .get("runtime")
            .and_then(|r| r.get("composeFile"))
            .and_then(str_field)
            .unwrap_or(DEFAULT_COMPOSE_FILE)
            .to_string();

        let ports = doc
            .get("ports")
            .and_then(Value::as_sequence)
            .map(|seq| {
                seq.iter()
                    .map(|p| PortSpec {
                        name: p
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        service: p.get("service").and_then(str_field).map(String::from),
                        protocol: p.get("protocol").and_then(str_field).map(String::from),
                        host_port: port_number(p.get("hostPort")),
                        container_port: port_number(p.get("containerPort")),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let ui = doc
            .get("ui")
            .and_then(|ui| ui.get("url").and_then(str_field).map(|url| (ui, url)))
            .map(|(ui, url)| {
                let hc = ui.get("healthcheck");
                Ui {
                    url: url.to_string(),
                    healthcheck: Healthcheck {
                        path: hc
                            .and_then(|h| h.get("path"))
                            .and_then(Value::as_str)
                            .unwrap_or("/")
                            .to_string(),
                        expect_status: hc
                            .and_then(|h| h.get("expectStatus"))
                            .and_then(as_number)
                            .filter(|n| n.is_finite() && *n >= 0.0 && *n <= f64::from(u16::MAX))
                            .map(|n| n as u16)
                            .unwrap_or(200),
                        match_text: hc
                            .and_then(|h| h.get("match"))
                            .and_then(str_field)
                            .map(String::from),
                    },
                }
            });

        Self {
            id: doc
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            compose_file,
            ports,
            ui,
            env_required: string_list(doc.get("env").and_then(|e| e.get("required"))),
            env_optional: string_list(doc.get("env").and_then(|e| e.get("optional"))),
        }
    }

    /// The port the conflict resolver cares about: tagged `ui` by name or
    /// `http` by protocol.
    pub fn ui_port(&self) -> Option<&PortSpec> {
        self.ports
            .iter()
            .find(|p| p.name == "ui" || p.protocol.as_deref() == Some("http"))
    }
}

fn string_list(v: Option<&Value>) -> Vec<String> {
    v.and_then(Value::as_sequence)
        .map(|seq| {
            seq.iter()
                .filter_map(|s| s.as_str())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Environment access abstracted so validation can run against a fake
/// environment in tests.
pub trait ConfigLookup {
    fn get(&self, key: &str) -> Option<String>;
}

/// Process-wide environment, with empty values treated as absent.
pub struct ProcessEnv;

impl ConfigLookup for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

impl ConfigLookup for std::collections::HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        Self::get(self, key).filter(|v| !v.is_empty()).cloned()
    }
}

/// Required keys with no (non-empty) value in the given environment.
pub fn missing_env(required: &[String], lookup: &dyn ConfigLookup) -> Vec<String> {
    required
        .iter()
        .filter(|key| !key.is_empty() && lookup.get(key).is_none())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid_doc() -> Value {
        serde_yaml::from_str(
            r#"
apiVersion: githubui.recipes/v0
id: default
target:
  owner: foo
  repo: bar
  ref: main
runtime:
  type: compose
  composeFile: compose.yaml
ports:
  - name: ui
    service: app
    protocol: http
    hostPort: 3000
    containerPort: 3000
ui:
  url: http://localhost:3000
  healthcheck:
    method: GET
    path: /health
    expectStatus: 200
    match: ok
env:
  required: [API_KEY]
  optional: [DEBUG]
"#,
        )
        .unwrap()
    }

    fn expectations() -> Expectations {
        Expectations {
            id: Some("default".to_string()),
            owner: Some("foo".to_string()),
            repo: Some("bar".to_string()),
        }
    }

    #[test]
    fn valid_recipe_passes() {
        assert!(validate_recipe_v0(&valid_doc(), &expectations()).is_empty());
    }

    #[test]
    fn collects_all_violations() {
        let doc: Value = serde_yaml::from_str(
            r#"
apiVersion: wrong/v9
id: ""
runtime:
  type: docker
ui:
  url: http://localhost:3000
  healthcheck:
    method: POST
    path: health
    expectStatus: abc
"#,
        )
        .unwrap();
        let errors = validate_recipe_v0(&doc, &Expectations::default());
        assert!(errors.iter().any(|e| e.contains("apiVersion")));
        assert!(errors.iter().any(|e| e == "id is required"));
        assert!(errors.iter().any(|e| e == "target is required"));
        assert!(errors.iter().any(|e| e.contains("runtime.type")));
        assert!(errors.iter().any(|e| e.contains("method must be 'GET'")));
        assert!(errors.iter().any(|e| e.contains("path must start with '/'")));
        assert!(errors.iter().any(|e| e.contains("expectStatus")));
    }

    #[test]
    fn identity_mismatch_is_an_error() {
        let mut expect = expectations();
        expect.owner = Some("other".to_string());
        let errors = validate_recipe_v0(&valid_doc(), &expect);
        assert!(errors.iter().any(|e| e.contains("target.owner mismatch")));
    }

    #[test]
    fn typed_view_extracts_ui_port() {
        let recipe = Recipe::from_value(&valid_doc());
        let port = recipe.ui_port().unwrap();
        assert_eq!(port.host_port, Some(3000));
        assert_eq!(port.container_port, Some(3000));
        assert_eq!(recipe.ui.as_ref().unwrap().healthcheck.expect_status, 200);
        assert_eq!(recipe.env_required, vec!["API_KEY".to_string()]);
    }

    #[test]
    fn missing_env_reports_absent_keys() {
        let mut env = HashMap::new();
        env.insert("PRESENT".to_string(), "1".to_string());
        env.insert("EMPTY".to_string(), String::new());
        let required = vec![
            "PRESENT".to_string(),
            "EMPTY".to_string(),
            "ABSENT".to_string(),
        ];
        assert_eq!(
            missing_env(&required, &env),
            vec!["EMPTY".to_string(), "ABSENT".to_string()]
        );
    }
}
