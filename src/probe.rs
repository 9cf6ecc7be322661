//! HTTP readiness probing for a launched stack's UI.
//!
//! Probes are best-effort: any transport failure is reported as status 0
//! and treated as "not yet ready" by the wait loop, never as a fatal
//! error. Redirects are walked manually so each hop gets the localhost
//! IPv4 fallback.

use std::time::Duration;

use reqwest::redirect::Policy;
use reqwest::{Client, Url};
use tokio::time::{sleep, Instant};

use crate::error::{AppError, Result};
use crate::recipe::Healthcheck;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REDIRECTS: usize = 5;
const MAX_BODY_BYTES: usize = 1024 * 1024;
pub const USER_AGENT: &str = "trystack";

/// Outcome of a single GET. `status == 0` means the request never
/// completed (refused connection, timeout, protocol error).
#[derive(Debug, Clone, Default)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
    pub location: String,
}

pub fn is_redirect_status(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// Client for readiness probes: short per-request timeout, redirects
/// handled by the caller.
pub fn probe_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(PROBE_TIMEOUT)
        .redirect(Policy::none())
        .build()
        .map_err(AppError::from)
}

fn with_ipv4_loopback(url: &Url) -> Option<Url> {
    if url.host_str() != Some("localhost") {
        return None;
    }
    let mut swapped = url.clone();
    swapped.set_host(Some("127.0.0.1")).ok()?;
    Some(swapped)
}

async fn request_once(client: &Client, url: &Url) -> ProbeResponse {
    let Ok(mut resp) = client.get(url.clone()).send().await else {
        return ProbeResponse::default();
    };
    let status = resp.status().as_u16();
    let location = resp
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let mut body = Vec::new();
    while let Ok(Some(chunk)) = resp.chunk().await {
        body.extend_from_slice(&chunk);
        if body.len() > MAX_BODY_BYTES {
            break;
        }
    }
    ProbeResponse {
        status,
        body: String::from_utf8_lossy(&body).into_owned(),
        location,
    }
}

/// GET with a `localhost` -> `127.0.0.1` retry when the first attempt
/// fails outright. Some hosts resolve `localhost` to `::1` only while the
/// container publishes on IPv4.
async fn request_with_fallback(client: &Client, url: &Url) -> ProbeResponse {
    let resp = request_once(client, url).await;
    if resp.status != 0 {
        return resp;
    }
    match with_ipv4_loopback(url) {
        Some(swapped) => request_once(client, &swapped).await,
        None => resp,
    }
}

/// GET following up to five redirect hops. `Location` is resolved
/// relative to the current hop's URL.
pub async fn http_get(client: &Client, url: &str) -> ProbeResponse {
    let Ok(start) = Url::parse(url) else {
        return ProbeResponse::default();
    };

    let mut current = start;
    for _ in 0..=MAX_REDIRECTS {
        let resp = request_with_fallback(client, &current).await;
        if !is_redirect_status(resp.status) || resp.location.is_empty() {
            return resp;
        }
        match current.join(&resp.location) {
            Ok(next) => current = next,
            Err(_) => return resp,
        }
    }
    request_with_fallback(client, &current).await
}

/// Probe cadence. Parameterized so tests can run on millisecond scales.
#[derive(Debug, Clone, Copy)]
pub struct ProbeTiming {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for ProbeTiming {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            deadline: Duration::from_secs(5 * 60),
        }
    }
}

/// The URL actually probed: the UI URL's path with the healthcheck path
/// appended, trailing slash collapsed.
pub fn build_check_url(ui_url: &str, healthcheck: &Healthcheck) -> Result<Url> {
    let mut url = Url::parse(ui_url)
        .map_err(|err| AppError::usage(format!("invalid ui.url '{ui_url}': {err}")))?;
    let base = url.path().trim_end_matches('/').to_string();
    let hc_path = if healthcheck.path.starts_with('/') {
        healthcheck.path.clone()
    } else {
        format!("/{}", healthcheck.path)
    };
    let joined = format!("{base}{hc_path}");
    url.set_path(if joined.is_empty() { "/" } else { &joined });
    Ok(url)
}

fn is_ready(resp: &ProbeResponse, healthcheck: &Healthcheck) -> bool {
    if resp.status != healthcheck.expect_status {
        return false;
    }
    match &healthcheck.match_text {
        Some(needle) if !needle.is_empty() => {
            resp.body.to_lowercase().contains(&needle.to_lowercase())
        }
        _ => true,
    }
}

/// Poll the healthcheck endpoint until it reports ready or the deadline
/// passes. Returns the UI URL to open on success.
pub async fn wait_for_ui(
    client: &Client,
    ui_url: Option<&str>,
    healthcheck: Option<&Healthcheck>,
    timing: ProbeTiming,
) -> Result<Option<String>> {
    let Some(ui_url) = ui_url else {
        return Ok(None);
    };
    let Some(healthcheck) = healthcheck else {
        return Ok(Some(ui_url.to_string()));
    };

    let check_url = build_check_url(ui_url, healthcheck)?;
    let deadline = Instant::now() + timing.deadline;

    while Instant::now() < deadline {
        let resp = http_get(client, check_url.as_str()).await;
        if is_ready(&resp, healthcheck) {
            return Ok(Some(ui_url.to_string()));
        }
        log::debug!(
            "ui not ready yet ({} returned {})",
            check_url,
            resp.status
        );
        sleep(timing.interval).await;
    }

    Err(AppError::readiness_timeout(
        check_url.as_str(),
        healthcheck.expect_status,
        healthcheck.match_text.as_deref(),
    ))
}
