//! Application error types.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Application error carrying a kind plus structured context for display
/// and JSON output.
#[derive(Debug)]
pub struct AppError {
    payload: HashMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input shape (CLI args, protocol URI, repo identifier)
    Usage,
    /// No recipe at the resolved source
    NotFound,
    /// Network or API failure while talking to the recipe registry
    Registry,
    /// Recipe failed structural or security-policy validation
    RecipeInvalid,
    /// Host port occupied and the scan window is exhausted
    PortInUse,
    /// UI never satisfied its health contract before the deadline
    ReadinessTimeout,
    /// Required environment variables are absent
    EnvMissing,
    /// Container engine CLI is absent or unusable
    EngineMissing,
    /// File system error
    Io,
}

impl ErrorKind {
    /// Stable, scriptable process exit code for this kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage => 1,
            Self::NotFound => 2,
            Self::ReadinessTimeout => 3,
            Self::PortInUse => 4,
            Self::Registry => 5,
            Self::RecipeInvalid => 6,
            Self::EnvMissing => 7,
            Self::EngineMissing => 127,
            Self::Io => 1,
        }
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, payload: HashMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Usage, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::NotFound, message)
    }

    pub fn registry(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Registry, message)
    }

    pub fn registry_with_url(url: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Registry,
            HashMap::from([
                ("url".to_string(), url.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn recipe_invalid(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::RecipeInvalid, message)
    }

    pub fn port_in_use(port: u16) -> Self {
        Self::new(
            ErrorKind::PortInUse,
            HashMap::from([("port".to_string(), port.to_string())]),
        )
    }

    pub fn readiness_timeout(check_url: &str, expect_status: u16, expect_match: Option<&str>) -> Self {
        let mut payload = HashMap::from([
            ("check_url".to_string(), check_url.to_string()),
            ("expect_status".to_string(), expect_status.to_string()),
        ]);
        if let Some(needle) = expect_match {
            payload.insert("expect_match".to_string(), needle.to_string());
        }
        Self::new(ErrorKind::ReadinessTimeout, payload)
    }

    pub fn env_missing(keys: &[String]) -> Self {
        Self::new(
            ErrorKind::EnvMissing,
            HashMap::from([("missing".to_string(), keys.join(", "))]),
        )
    }

    pub fn engine_missing(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::EngineMissing, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            let mut pairs: Vec<String> = self
                .payload
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            pairs.sort();
            write!(f, "{:?}: {}", self.kind, pairs.join(", "))
        }
    }
}

impl std::error::Error for AppError {}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("AppError", 3)?;
        s.serialize_field("kind", &self.kind)?;
        s.serialize_field("exit_code", &self.kind.exit_code())?;
        s.serialize_field("payload", &self.payload)?;
        s.end()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::registry(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::recipe_invalid(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::registry(err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;
