//! Configuration data structures for the TI engine.
//!
//! Two documents live here: the service-level YAML config
//! ([`TiServiceConfig`]) and the per-request ignore config ([`TiConfig`])
//! that CI sends alongside the changed-file list.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TiError};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the TI service.
///
/// Loaded from a YAML file; environment variables override file values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TiServiceConfig {
    /// Config format version (currently "1.0").
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub requests: RequestsConfig,

    #[serde(default)]
    pub selection: SelectionConfig,

    #[serde(default)]
    pub visualization: VisualizationConfig,
}

impl Default for TiServiceConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
            requests: RequestsConfig::default(),
            selection: SelectionConfig::default(),
            visualization: VisualizationConfig::default(),
        }
    }
}

/// Environment variable overriding [`StoreConfig::path`].
pub const ENV_DB_PATH: &str = "TI_DB_PATH";
/// Environment variable overriding [`RequestsConfig::timeout_ms`].
pub const ENV_REQUEST_TIMEOUT_MS: &str = "TI_REQUEST_TIMEOUT_MS";
/// Environment variable overriding [`SelectionConfig::enable_reflection`].
pub const ENV_ENABLE_REFLECTION: &str = "TI_ENABLE_REFLECTION";

impl TiServiceConfig {
    /// Load the config at `path`, falling back to defaults when the file
    /// does not exist, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let contents = std::fs::read_to_string(p)?;
                Self::from_yaml(&contents)?
            }
            Some(p) => {
                tracing::info!(path = %p.display(), "config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| TiError::Config(format!("failed to parse config: {e}")))
    }

    /// Apply overrides from a variable lookup. Taking the lookup as a
    /// parameter keeps tests independent of the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.store.path = path;
        }
        if let Some(raw) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            self.requests.timeout_ms = raw.trim().parse().map_err(|_| {
                TiError::Config(format!("{ENV_REQUEST_TIMEOUT_MS} must be an integer, got '{raw}'"))
            })?;
        }
        if let Some(raw) = lookup(ENV_ENABLE_REFLECTION) {
            self.selection.enable_reflection = matches!(
                raw.trim().to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.requests.timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path (`:memory:` for an ephemeral store).
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestsConfig {
    /// Deadline applied to every upload/merge/select/visualize call.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RequestsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Also run every test that calls reflection.
    #[serde(default)]
    pub enable_reflection: bool,

    /// Ignore globs applied to every request in addition to its own.
    #[serde(default)]
    pub ignore: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualizationConfig {
    /// Limit used when a request does not set one.
    #[serde(default = "default_vis_limit")]
    pub default_limit: i64,

    /// Upper bound on any requested limit.
    #[serde(default = "default_vis_max_limit")]
    pub max_limit: i64,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            default_limit: default_vis_limit(),
            max_limit: default_vis_max_limit(),
        }
    }
}

impl VisualizationConfig {
    /// Resolve a requested limit: non-positive means default, and the
    /// result never exceeds `max_limit`.
    pub fn effective_limit(&self, requested: i64) -> usize {
        let limit = if requested <= 0 {
            self.default_limit
        } else {
            requested
        };
        limit.clamp(1, self.max_limit.max(1)) as usize
    }
}

// ---------------------------------------------------------------------------
// Per-request ignore config
// ---------------------------------------------------------------------------

/// The `.ticonfig` payload sent with a selection request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TiConfig {
    #[serde(default)]
    pub config: TiConfigBody,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TiConfigBody {
    /// Globs of files that never influence selection.
    #[serde(default)]
    pub ignore: Vec<String>,
}

impl TiConfig {
    pub fn with_ignore<I, S>(globs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            config: TiConfigBody {
                ignore: globs.into_iter().map(Into::into).collect(),
            },
        }
    }

    /// Parse a `.ticonfig` document. YAML is a superset of JSON, so both
    /// encodings are accepted.
    pub fn parse(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| TiError::InvalidInput(format!("invalid ti config: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_version() -> String {
    "1.0".to_string()
}

fn default_db_path() -> String {
    "ti.db".to_string()
}

fn default_log_filter() -> String {
    "ti_engine=info".to_string()
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_vis_limit() -> i64 {
    50
}

fn default_vis_max_limit() -> i64 {
    1_000
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use test_case::test_case;

    #[test]
    fn test_defaults() {
        let config = TiServiceConfig::default();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.store.path, "ti.db");
        assert_eq!(config.requests.timeout_ms, 15_000);
        assert!(!config.selection.enable_reflection);
        assert_eq!(config.visualization.default_limit, 50);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
store:
  path: /var/lib/ti/ti.db
selection:
  ignore: ["**/*.md"]
"#;
        let config = TiServiceConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.store.path, "/var/lib/ti/ti.db");
        assert_eq!(config.selection.ignore, vec!["**/*.md".to_string()]);
        assert_eq!(config.requests.timeout_ms, 15_000);
        assert_eq!(config.logging.filter, "ti_engine=info");
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = TiServiceConfig::from_yaml("requests: [not, a, map]").unwrap_err();
        assert!(matches!(err, TiError::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_DB_PATH, ":memory:"),
            (ENV_REQUEST_TIMEOUT_MS, "250"),
            (ENV_ENABLE_REFLECTION, "true"),
        ]
        .into_iter()
        .collect();
        let mut config = TiServiceConfig::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.store.path, ":memory:");
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
        assert!(config.selection.enable_reflection);
    }

    #[test]
    fn test_bad_timeout_override_fails() {
        let mut config = TiServiceConfig::default();
        let err = config
            .apply_env_overrides(|k| (k == ENV_REQUEST_TIMEOUT_MS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_REQUEST_TIMEOUT_MS));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = TiServiceConfig::load(Some(&dir.path().join("absent.yaml"))).unwrap();
        assert_eq!(config.visualization.max_limit, 1_000);
    }

    #[test_case(0, 50 ; "zero falls back to default")]
    #[test_case(-3, 50 ; "negative falls back to default")]
    #[test_case(7, 7 ; "explicit limit is kept")]
    #[test_case(5_000, 1_000 ; "limit is capped")]
    fn test_effective_limit(requested: i64, expected: usize) {
        assert_eq!(VisualizationConfig::default().effective_limit(requested), expected);
    }

    #[test]
    fn test_ticonfig_accepts_json_and_yaml() {
        let json = TiConfig::parse(r#"{"config": {"ignore": ["**/*.txt"]}}"#).unwrap();
        let yaml = TiConfig::parse("config:\n  ignore:\n    - \"**/*.txt\"\n").unwrap();
        assert_eq!(json, yaml);
        assert_eq!(json, TiConfig::with_ignore(["**/*.txt"]));
    }
}
