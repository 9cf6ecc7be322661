//! Security-policy validation of recipes and their compose documents.
//!
//! Pure inspection: no network, no subprocess. All violations are
//! collected so a user sees the full remediation list in one pass. The
//! tier classifier at the bottom is advisory UX labeling and never
//! affects pass/fail.

use std::fmt;
use std::path::Path;

use serde_yaml::Value;

use crate::recipe::{read_compose_doc, read_recipe_doc, validate_recipe_v0, Expectations, Recipe};

/// Validation strictness: `community` warns on risk, `verified` rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyMode {
    #[default]
    Community,
    Verified,
}

impl PolicyMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "community" => Some(Self::Community),
            "verified" => Some(Self::Verified),
            _ => None,
        }
    }
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Community => write!(f, "community"),
            Self::Verified => write!(f, "verified"),
        }
    }
}

/// Outcome of a policy run; a pure function of `(recipe, compose, mode)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyResult {
    pub ok: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Host paths that must never be bind-mounted, plus the engine control
/// sockets. A mount equal to or nested under any of these is an error in
/// both modes.
const SENSITIVE_MOUNTS: [&str; 7] = [
    "/var/run/docker.sock",
    "/run/docker.sock",
    "/etc",
    "/proc",
    "/sys",
    "/root",
    "/",
];

/// True when the image reference is pinned by content digest
/// (`@sha256:` followed by exactly 64 hex characters).
pub fn has_image_digest(image: &str) -> bool {
    let image = image.trim();
    let mut rest = image;
    while let Some(idx) = rest.find("@sha256:") {
        let after = &rest[idx + "@sha256:".len()..];
        let hex_len = after.chars().take_while(|c| c.is_ascii_hexdigit()).count();
        if hex_len == 64 {
            let boundary_ok = after
                .chars()
                .nth(64)
                .map(|c| !c.is_ascii_alphanumeric() && c != '_')
                .unwrap_or(true);
            if boundary_ok {
                return true;
            }
        }
        rest = &rest[idx + 1..];
    }
    false
}

fn normalize_host_source(s: &str) -> String {
    s.trim().replace('\\', "/").to_lowercase()
}

fn is_absolute_path_like(src: &str) -> bool {
    let s = normalize_host_source(src);
    if s.is_empty() {
        return false;
    }
    if s.starts_with('/') {
        return true;
    }
    // windows drive path: c:/...
    let mut chars = s.chars();
    matches!(
        (chars.next(), chars.next(), chars.next()),
        (Some(d), Some(':'), Some('/')) if d.is_ascii_lowercase()
    )
}

/// The host side of a compose volume spec: `"source:target[:mode]"` or a
/// long-form mapping with `source`.
fn volume_source(vol: &Value) -> String {
    if let Some(s) = vol.as_str() {
        return s.split(':').next().unwrap_or("").to_string();
    }
    if vol.as_mapping().is_some() {
        for key in ["source", "src"] {
            if let Some(src) = vol.get(key).and_then(Value::as_str) {
                return src.to_string();
            }
        }
    }
    String::new()
}

fn services(compose: &Value) -> Vec<(String, &Value)> {
    compose
        .get("services")
        .and_then(Value::as_mapping)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| k.as_str().map(|name| (name.to_string(), v)))
                .collect()
        })
        .unwrap_or_default()
}

fn push_risky(
    mode: PolicyMode,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
    message: String,
) {
    match mode {
        PolicyMode::Verified => errors.push(message),
        PolicyMode::Community => warnings.push(message),
    }
}

/// Security checks over the compose document. Risky settings are errors
/// in `verified` mode and warnings in `community` mode; a missing image
/// and sensitive bind mounts are errors in both.
pub fn check_compose_security(compose: &Value, mode: PolicyMode) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let services = services(compose);
    if services.is_empty() {
        errors.push("compose has no services".to_string());
        return (errors, warnings);
    }

    for (name, svc) in services {
        let prefix = format!("service '{name}': ");

        let image = svc.get("image").and_then(Value::as_str).unwrap_or("");
        if image.is_empty() {
            errors.push(format!("{prefix}missing image"));
        } else if mode == PolicyMode::Verified && !has_image_digest(image) {
            errors.push(format!(
                "{prefix}image must be pinned by digest (@sha256:...)"
            ));
        }

        if svc.get("privileged").and_then(Value::as_bool) == Some(true) {
            push_risky(
                mode,
                &mut errors,
                &mut warnings,
                format!("{prefix}privileged=true is not allowed"),
            );
        }

        let network_mode = svc
            .get("network_mode")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_default();
        if network_mode == "host" {
            push_risky(
                mode,
                &mut errors,
                &mut warnings,
                format!("{prefix}network_mode=host is not allowed"),
            );
        }

        let pid = svc
            .get("pid")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_default();
        if pid == "host" {
            push_risky(
                mode,
                &mut errors,
                &mut warnings,
                format!("{prefix}pid=host is not allowed"),
            );
        }

        if let Some(cap_add) = svc.get("cap_add").and_then(Value::as_sequence) {
            if !cap_add.is_empty() {
                push_risky(
                    mode,
                    &mut errors,
                    &mut warnings,
                    format!("{prefix}cap_add is not allowed (manual review required)"),
                );
            }
        }

        if let Some(security_opt) = svc.get("security_opt").and_then(Value::as_sequence) {
            let unconfined = security_opt.iter().any(|opt| {
                opt.as_str()
                    .map(|s| s.to_lowercase().contains("unconfined"))
                    .unwrap_or(false)
            });
            if unconfined {
                push_risky(
                    mode,
                    &mut errors,
                    &mut warnings,
                    format!("{prefix}security_opt contains 'unconfined' (not allowed)"),
                );
            }
        }

        let volumes = svc
            .get("volumes")
            .and_then(Value::as_sequence)
            .cloned()
            .unwrap_or_default();
        for vol in &volumes {
            let src_raw = volume_source(vol);
            let src = normalize_host_source(&src_raw);
            if src.is_empty() {
                continue;
            }

            let sensitive = SENSITIVE_MOUNTS
                .iter()
                .any(|p| src == *p || src.starts_with(&format!("{p}/")));
            if sensitive {
                errors.push(format!(
                    "{prefix}host bind mount '{src_raw}' is not allowed"
                ));
                continue;
            }

            if mode == PolicyMode::Verified && is_absolute_path_like(&src_raw) {
                errors.push(format!(
                    "{prefix}host absolute bind mount '{src_raw}' is not allowed in verified"
                ));
            }
        }
    }

    (errors, warnings)
}

/// A health path of exactly `/` with no match string produces false
/// positives on login and redirect pages.
pub fn check_healthcheck_stability(recipe: &Value, mode: PolicyMode) -> (Vec<String>, Vec<String>) {
    let hc = recipe.get("ui").and_then(|u| u.get("healthcheck"));
    let path = hc
        .and_then(|h| h.get("path"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("");
    let has_match = hc
        .and_then(|h| h.get("match"))
        .and_then(Value::as_str)
        .map(str::trim)
        .is_some_and(|m| !m.is_empty());

    if path != "/" || has_match {
        return (Vec::new(), Vec::new());
    }
    match mode {
        PolicyMode::Verified => (
            vec![
                "ui.healthcheck.path is '/' but ui.healthcheck.match is missing (verified requires match for '/')"
                    .to_string(),
            ],
            Vec::new(),
        ),
        PolicyMode::Community => (
            Vec::new(),
            vec!["ui.healthcheck.path is '/' with no match (may be flaky)".to_string()],
        ),
    }
}

/// Verify a recipe directory against the named policy tier. Collects
/// structural, healthcheck, and compose-security findings into one
/// `PolicyResult`.
pub fn verify_recipe_dir(
    recipe_dir: &Path,
    owner: &str,
    repo: &str,
    recipe_id: &str,
    mode: PolicyMode,
) -> PolicyResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let recipe = match read_recipe_doc(recipe_dir) {
        Ok(doc) => doc,
        Err(e) => {
            return PolicyResult {
                ok: false,
                errors: vec![e.to_string()],
                warnings,
            };
        }
    };

    let expect = Expectations {
        id: Some(recipe_id.to_string()),
        owner: Some(owner.to_string()),
        repo: Some(repo.to_string()),
    };
    errors.extend(validate_recipe_v0(&recipe, &expect));

    let (hc_errors, hc_warnings) = check_healthcheck_stability(&recipe, mode);
    errors.extend(hc_errors);
    warnings.extend(hc_warnings);

    let compose_file = recipe
        .get("runtime")
        .and_then(|r| r.get("composeFile"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let Some(compose_file) = compose_file else {
        // Already reported by the structural pass; nothing left to check.
        return PolicyResult {
            ok: errors.is_empty(),
            errors,
            warnings,
        };
    };

    match read_compose_doc(recipe_dir, compose_file) {
        Ok(compose) => {
            let (sec_errors, sec_warnings) = check_compose_security(&compose, mode);
            errors.extend(sec_errors);
            warnings.extend(sec_warnings);
        }
        Err(e) => errors.push(e.to_string()),
    }

    PolicyResult {
        ok: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Advisory difficulty label based on required configuration and local
/// service dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    A0,
    A1,
    A2,
    A3,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A0 => write!(f, "A0"),
            Self::A1 => write!(f, "A1"),
            Self::A2 => write!(f, "A2"),
            Self::A3 => write!(f, "A3"),
        }
    }
}

const PRODUCTION_ENV_KEYS: [&str; 7] = [
    "DOMAIN",
    "SMTP",
    "S3",
    "OAUTH",
    "CLIENT_ID",
    "CLIENT_SECRET",
    "WEBHOOK",
];

const LOCAL_DEP_NEEDLES: [&str; 10] = [
    "postgres",
    "postgis",
    "redis",
    "mysql",
    "mariadb",
    "mongo",
    "mssql",
    "elasticsearch",
    "minio",
    "rabbitmq",
];

/// Recognized database/cache/broker dependencies in the compose document,
/// by image or service-name keyword. Best effort, deduplicated, sorted.
pub fn detect_local_deps(compose: &Value) -> Vec<String> {
    let mut hits: Vec<String> = Vec::new();
    for (name, svc) in services(compose) {
        let image = svc
            .get("image")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_lowercase();
        let name = name.to_lowercase();
        if let Some(hit) = LOCAL_DEP_NEEDLES
            .iter()
            .find(|n| image.contains(*n) || name.contains(*n))
        {
            if !hits.iter().any(|h| h == hit) {
                hits.push((*hit).to_string());
            }
        }
    }
    hits.sort();
    hits
}

/// Heuristic UX label: production-shaped required env keys are A3, any
/// required env is A2, recognized local dependencies are A1, else A0.
pub fn classify_tier(recipe: &Recipe, local_deps: &[String]) -> Tier {
    let required_upper: Vec<String> = recipe
        .env_required
        .iter()
        .map(|k| k.to_uppercase())
        .collect();

    if required_upper
        .iter()
        .any(|k| PRODUCTION_ENV_KEYS.iter().any(|p| k.contains(p)))
    {
        return Tier::A3;
    }
    if !recipe.env_required.is_empty() {
        return Tier::A2;
    }
    if !local_deps.is_empty() {
        return Tier::A1;
    }
    Tier::A0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compose_doc(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn digest_pins() {
        let digest = "a".repeat(64);
        assert!(has_image_digest(&format!("app@sha256:{digest}")));
        assert!(has_image_digest(&format!("app:1.2.3@sha256:{digest}")));
        assert!(!has_image_digest("app:latest"));
        assert!(!has_image_digest(&format!("app@sha256:{}", "a".repeat(63))));
        assert!(!has_image_digest(&format!("app@sha256:{}", "a".repeat(65))));
    }

    #[test]
    fn tag_only_image_fails_verified_only() {
        let compose = compose_doc("services:\n  app:\n    image: app:latest\n");
        let (errors, _) = check_compose_security(&compose, PolicyMode::Verified);
        assert!(errors.iter().any(|e| e.contains("pinned by digest")));

        let (errors, warnings) = check_compose_security(&compose, PolicyMode::Community);
        assert!(errors.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn risky_settings_warn_in_community_error_in_verified() {
        let compose = compose_doc(
            "services:\n  app:\n    image: app:latest\n    privileged: true\n    network_mode: host\n    pid: host\n    cap_add: [SYS_ADMIN]\n    security_opt: [\"seccomp:unconfined\"]\n",
        );

        let (errors, warnings) = check_compose_security(&compose, PolicyMode::Community);
        assert!(errors.is_empty());
        assert_eq!(warnings.len(), 5);

        let (errors, warnings) = check_compose_security(&compose, PolicyMode::Verified);
        assert!(warnings.is_empty());
        // previous five plus the missing digest pin
        assert_eq!(errors.len(), 6);
    }

    #[test]
    fn missing_image_errors_in_both_modes() {
        let compose = compose_doc("services:\n  app:\n    build: .\n");
        for mode in [PolicyMode::Community, PolicyMode::Verified] {
            let (errors, warnings) = check_compose_security(&compose, mode);
            assert!(errors.iter().any(|e| e.contains("missing image")), "{mode}");
            assert!(warnings.is_empty(), "{mode}");
        }
    }

    #[test]
    fn sensitive_mounts_error_in_both_modes() {
        let compose = compose_doc(
            "services:\n  app:\n    image: app:latest\n    volumes:\n      - /var/run/docker.sock:/var/run/docker.sock\n      - /etc/passwd:/x\n",
        );
        for mode in [PolicyMode::Community, PolicyMode::Verified] {
            let (errors, _) = check_compose_security(&compose, mode);
            assert!(
                errors
                    .iter()
                    .filter(|e| e.contains("host bind mount"))
                    .count()
                    >= 2,
                "{mode}"
            );
        }
    }

    #[test]
    fn absolute_binds_error_only_in_verified() {
        let compose = compose_doc(
            "services:\n  app:\n    image: app:latest\n    volumes:\n      - /home/me/data:/data\n      - named_volume:/var/lib/data\n",
        );
        let (errors, _) = check_compose_security(&compose, PolicyMode::Verified);
        assert!(errors.iter().any(|e| e.contains("absolute bind mount")));
        assert!(!errors.iter().any(|e| e.contains("named_volume")));

        let (errors, _) = check_compose_security(&compose, PolicyMode::Community);
        assert!(!errors.iter().any(|e| e.contains("absolute bind mount")));
    }

    #[test]
    fn verified_is_strictly_stricter() {
        let compose = compose_doc(
            "services:\n  app:\n    image: app:latest\n    privileged: true\n    volumes:\n      - /etc:/etc\n",
        );
        let (community_errors, _) = check_compose_security(&compose, PolicyMode::Community);
        let (verified_errors, _) = check_compose_security(&compose, PolicyMode::Verified);
        for err in &community_errors {
            assert!(verified_errors.contains(err), "downgraded in verified: {err}");
        }
    }

    #[test]
    fn root_health_path_without_match() {
        let recipe: Value = serde_yaml::from_str(
            "ui:\n  url: http://localhost:3000\n  healthcheck:\n    path: /\n",
        )
        .unwrap();
        let (errors, warnings) = check_healthcheck_stability(&recipe, PolicyMode::Verified);
        assert_eq!(errors.len(), 1);
        assert!(warnings.is_empty());

        let (errors, warnings) = check_healthcheck_stability(&recipe, PolicyMode::Community);
        assert!(errors.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn validator_is_idempotent() {
        let compose = compose_doc("services:\n  app:\n    image: app:latest\n    privileged: true\n");
        let first = check_compose_security(&compose, PolicyMode::Verified);
        let second = check_compose_security(&compose, PolicyMode::Verified);
        assert_eq!(first, second);
    }

    #[test]
    fn tier_classification() {
        let deps = detect_local_deps(&compose_doc(
            "services:\n  app:\n    image: app:latest\n  db:\n    image: postgres:16\n  cache:\n    image: redis:7\n",
        ));
        assert_eq!(deps, vec!["postgres".to_string(), "redis".to_string()]);

        let recipe = |required: &str| {
            Recipe::from_value(
                &serde_yaml::from_str::<Value>(&format!("id: x\nenv:\n  required: {required}\n"))
                    .unwrap(),
            )
        };

        assert_eq!(classify_tier(&recipe("[MY_SMTP_HOST]"), &[]), Tier::A3);
        assert_eq!(classify_tier(&recipe("[API_KEY]"), &[]), Tier::A2);
        assert_eq!(classify_tier(&recipe("[]"), &deps), Tier::A1);
        assert_eq!(classify_tier(&recipe("[]"), &[]), Tier::A0);
    }
}
