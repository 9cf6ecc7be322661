//! Host-port conflict resolution for the recipe's UI port.
//!
//! If the declared host port is taken, a nearby free port is chosen and a
//! single-service compose override is generated next to the recipe. The
//! override is derived state: regenerated on every conflicting invocation
//! and safe to overwrite.

use std::collections::BTreeMap;
use std::net::TcpListener;
use std::path::Path;

use serde::Serialize;

use crate::error::{AppError, Result};
use crate::paths::{write_file_if_changed, OVERRIDE_FILE_NAME};
use crate::recipe::{read_compose_doc, Recipe};

/// How far past the declared host port the scan is willing to look.
const PORT_SCAN_WINDOW: u16 = 50;

/// Compose files (relative to the recipe directory) and UI URL to use for
/// this invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub compose_files: Vec<String>,
    pub ui_url: Option<String>,
}

impl LaunchPlan {
    fn unchanged(compose_file: &str, recipe: &Recipe) -> Self {
        Self {
            compose_files: vec![compose_file.to_string()],
            ui_url: recipe.ui.as_ref().map(|ui| ui.url.clone()),
        }
    }
}

/// A port is free when a TCP listener can bind it on all interfaces.
pub fn is_port_free(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

fn find_nearby_free_port(from: u16) -> Option<u16> {
    (1..=PORT_SCAN_WINDOW)
        .filter_map(|offset| from.checked_add(offset))
        .find(|p| is_port_free(*p))
}

#[derive(Serialize)]
struct OverrideDoc {
    services: BTreeMap<String, OverrideService>,
}

#[derive(Serialize)]
struct OverrideService {
    ports: Vec<String>,
}

fn substitute_port(base_url: &str, fallback_port: u16, chosen: u16) -> String {
    let base = if base_url.is_empty() {
        format!("http://localhost:{fallback_port}")
    } else {
        base_url.to_string()
    };
    match reqwest::Url::parse(&base) {
        Ok(mut url) => {
            if url.set_port(Some(chosen)).is_err() {
                return base;
            }
            url.to_string().trim_end_matches('/').to_string()
        }
        Err(_) => base,
    }
}

/// Ensure the recipe's UI host port is usable, remapping to a nearby free
/// port via a generated override when it is not. Only the port tagged
/// `name == "ui"` or `protocol == "http"` is considered.
pub fn ensure_ui_port_available(
    recipe_dir: &Path,
    recipe: &Recipe,
    compose_file: &str,
) -> Result<LaunchPlan> {
    let unchanged = LaunchPlan::unchanged(compose_file, recipe);

    let Some(ui_port) = recipe.ui_port() else {
        return Ok(unchanged);
    };
    let (Some(host_port), Some(container_port)) = (ui_port.host_port, ui_port.container_port)
    else {
        return Ok(unchanged);
    };

    if is_port_free(host_port) {
        return Ok(unchanged);
    }

    let chosen =
        find_nearby_free_port(host_port).ok_or_else(|| AppError::port_in_use(host_port))?;

    let compose = read_compose_doc(recipe_dir, compose_file)?;
    let service_names: Vec<String> = compose
        .get("services")
        .and_then(serde_yaml::Value::as_mapping)
        .map(|m| {
            m.keys()
                .filter_map(|k| k.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    let Some(first_service) = service_names.first().cloned() else {
        return Ok(unchanged);
    };

    let service = match ui_port.service.as_deref() {
        Some(named) if service_names.iter().any(|s| s == named) => named.to_string(),
        Some(named) => {
            log::warn!(
                "ports[].service '{named}' not found in compose services; falling back to '{first_service}'"
            );
            first_service
        }
        None => first_service,
    };

    let override_doc = OverrideDoc {
        services: BTreeMap::from([(
            service,
            OverrideService {
                ports: vec![format!("{chosen}:{container_port}")],
            },
        )]),
    };
    let override_yaml = serde_yaml::to_string(&override_doc)?;
    write_file_if_changed(&recipe_dir.join(OVERRIDE_FILE_NAME), &override_yaml)?;

    log::warn!("Port {host_port} is in use; using {chosen} instead.");

    let base_url = recipe
        .ui
        .as_ref()
        .map(|ui| ui.url.as_str())
        .unwrap_or_default();
    Ok(LaunchPlan {
        compose_files: vec![compose_file.to_string(), OVERRIDE_FILE_NAME.to_string()],
        ui_url: Some(substitute_port(base_url, host_port, chosen)),
    })
}
