//! Configuration for lagwatch.
//!
//! A resolved [`Config`] is produced by merging four layers in one
//! place, with precedence CLI > environment > config file > built-in
//! defaults.

use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable carrying the webhook URL. Setting it also
/// forces notifications on.
pub const ENV_WEBHOOK: &str = "LAGWATCH_WEBHOOK";
/// Environment variable overriding the client label.
pub const ENV_CLIENT_LABEL: &str = "LAGWATCH_CLIENT_LABEL";

/// Configuration error types. All of these are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("config file {path} is not valid JSON: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid config: {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Endpoints to probe, in order. Duplicates are probed independently.
    pub targets: Vec<String>,
    /// Latency at or below this value is healthy (milliseconds).
    pub latency_threshold_ms: f64,
    /// Seconds between probe cycles.
    pub poll_interval_s: u64,
    /// Per-probe timeout in seconds.
    pub probe_timeout_s: u64,
    /// Minimum seconds between two notifications for the same target.
    pub notification_interval_s: u64,
    /// Webhook URL for alerts. `None` disables delivery.
    pub webhook_endpoint: Option<String>,
    /// Master switch for outbound notifications.
    pub notifications_enabled: bool,
    /// Free-text label identifying this monitor instance in alerts.
    pub client_label: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            targets: vec![
                "8.8.8.8".to_string(),
                "1.1.1.1".to_string(),
                "114.114.114.114".to_string(),
            ],
            latency_threshold_ms: 100.0,
            poll_interval_s: 10,
            probe_timeout_s: 5,
            notification_interval_s: 300,
            webhook_endpoint: None,
            notifications_enabled: false,
            client_label: "Network Monitor Client".to_string(),
        }
    }
}

/// Partial configuration as stored in the JSON config file. Every field
/// is optional so a sparse file only overrides what it names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_threshold_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_timeout_s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_interval_s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notifications_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_label: Option<String>,
}

/// Overrides taken from the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub webhook_endpoint: Option<String>,
    pub client_label: Option<String>,
}

impl EnvOverrides {
    /// Capture overrides from the process environment.
    pub fn capture() -> Self {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Build overrides from an arbitrary variable lookup. Lets tests
    /// avoid mutating the real process environment.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            webhook_endpoint: lookup(ENV_WEBHOOK).filter(|v| !v.is_empty()),
            client_label: lookup(ENV_CLIENT_LABEL).filter(|v| !v.is_empty()),
        }
    }
}

/// Overrides taken from command-line flags.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub latency_threshold_ms: Option<f64>,
    pub poll_interval_s: Option<u64>,
    pub targets: Option<Vec<String>>,
}

/// Load the config file layer.
///
/// A missing file is not an error: a starter config is written in its
/// place (webhook placeholder, notifications off) and `None` is
/// returned so the defaults apply. A file that exists but cannot be
/// read or parsed is fatal.
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Option<FileConfig>, ConfigError> {
    let path = path.as_ref();

    if !path.exists() {
        write_starter_config(path)?;
        tracing::info!(path = %path.display(), "wrote starter config file, edit it to set a webhook URL");
        return Ok(None);
    }

    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let file: FileConfig = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    Ok(Some(file))
}

fn write_starter_config(path: &Path) -> Result<(), ConfigError> {
    let defaults = Config::default();
    let starter = FileConfig {
        targets: Some(defaults.targets),
        latency_threshold_ms: Some(defaults.latency_threshold_ms),
        poll_interval_s: Some(defaults.poll_interval_s),
        probe_timeout_s: Some(defaults.probe_timeout_s),
        notification_interval_s: Some(defaults.notification_interval_s),
        webhook_endpoint: Some("YOUR_WEBHOOK_URL_HERE".to_string()),
        notifications_enabled: Some(false),
        client_label: Some(defaults.client_label),
    };

    let body = serde_json::to_string_pretty(&starter).expect("starter config serializes");
    fs::write(path, body).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Merge the layers into one resolved config and validate it.
///
/// Precedence, lowest to highest: built-in defaults, config file,
/// environment, CLI. A webhook supplied via the environment also forces
/// notifications on.
pub fn resolve(
    file: Option<FileConfig>,
    env: EnvOverrides,
    cli: CliOverrides,
) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();

    if let Some(file) = file {
        if let Some(targets) = file.targets {
            cfg.targets = targets;
        }
        if let Some(v) = file.latency_threshold_ms {
            cfg.latency_threshold_ms = v;
        }
        if let Some(v) = file.poll_interval_s {
            cfg.poll_interval_s = v;
        }
        if let Some(v) = file.probe_timeout_s {
            cfg.probe_timeout_s = v;
        }
        if let Some(v) = file.notification_interval_s {
            cfg.notification_interval_s = v;
        }
        if let Some(v) = file.webhook_endpoint {
            cfg.webhook_endpoint = Some(v);
        }
        if let Some(v) = file.notifications_enabled {
            cfg.notifications_enabled = v;
        }
        if let Some(v) = file.client_label {
            cfg.client_label = v;
        }
    }

    if let Some(webhook) = env.webhook_endpoint {
        cfg.webhook_endpoint = Some(webhook);
        cfg.notifications_enabled = true;
    }
    if let Some(label) = env.client_label {
        cfg.client_label = label;
    }

    if let Some(v) = cli.latency_threshold_ms {
        cfg.latency_threshold_ms = v;
    }
    if let Some(v) = cli.poll_interval_s {
        cfg.poll_interval_s = v;
    }
    if let Some(targets) = cli.targets {
        cfg.targets = targets;
    }

    // An empty webhook string means "not configured".
    if cfg
        .webhook_endpoint
        .as_deref()
        .is_some_and(|url| url.trim().is_empty())
    {
        cfg.webhook_endpoint = None;
    }

    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.targets.is_empty() {
        return Err(ConfigError::Invalid {
            field: "targets",
            reason: "at least one target is required".to_string(),
        });
    }
    if !(cfg.latency_threshold_ms > 0.0) || !cfg.latency_threshold_ms.is_finite() {
        return Err(ConfigError::Invalid {
            field: "latency_threshold_ms",
            reason: format!("must be a positive number, got {}", cfg.latency_threshold_ms),
        });
    }
    if cfg.poll_interval_s == 0 {
        return Err(ConfigError::Invalid {
            field: "poll_interval_s",
            reason: "must be greater than zero".to_string(),
        });
    }
    if cfg.probe_timeout_s == 0 {
        return Err(ConfigError::Invalid {
            field: "probe_timeout_s",
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_resolve_clean() {
        let cfg = resolve(None, EnvOverrides::default(), CliOverrides::default()).unwrap();
        assert_eq!(cfg, Config::default());
        assert!(!cfg.notifications_enabled);
        assert_eq!(cfg.targets.len(), 3);
    }

    #[test]
    fn test_file_layer_overrides_defaults() {
        let file = FileConfig {
            latency_threshold_ms: Some(250.0),
            targets: Some(vec!["example.com".to_string()]),
            ..Default::default()
        };
        let cfg = resolve(Some(file), EnvOverrides::default(), CliOverrides::default()).unwrap();
        assert_eq!(cfg.latency_threshold_ms, 250.0);
        assert_eq!(cfg.targets, vec!["example.com"]);
        // Untouched fields keep their defaults.
        assert_eq!(cfg.poll_interval_s, 10);
    }

    #[test]
    fn test_env_webhook_forces_notifications_on() {
        let env = EnvOverrides::from_vars(|name| match name {
            ENV_WEBHOOK => Some("https://hooks.example.com/send?token=abc".to_string()),
            _ => None,
        });
        let cfg = resolve(None, env, CliOverrides::default()).unwrap();
        assert!(cfg.notifications_enabled);
        assert_eq!(
            cfg.webhook_endpoint.as_deref(),
            Some("https://hooks.example.com/send?token=abc")
        );
    }

    #[test]
    fn test_env_overrides_file() {
        let file = FileConfig {
            webhook_endpoint: Some("https://file.example.com/hook".to_string()),
            client_label: Some("from-file".to_string()),
            ..Default::default()
        };
        let env = EnvOverrides::from_vars(|name| match name {
            ENV_WEBHOOK => Some("https://env.example.com/hook".to_string()),
            ENV_CLIENT_LABEL => Some("from-env".to_string()),
            _ => None,
        });
        let cfg = resolve(Some(file), env, CliOverrides::default()).unwrap();
        assert_eq!(
            cfg.webhook_endpoint.as_deref(),
            Some("https://env.example.com/hook")
        );
        assert_eq!(cfg.client_label, "from-env");
    }

    #[test]
    fn test_cli_beats_env_and_file() {
        let file = FileConfig {
            latency_threshold_ms: Some(50.0),
            targets: Some(vec!["file.example.com".to_string()]),
            ..Default::default()
        };
        let cli = CliOverrides {
            latency_threshold_ms: Some(75.0),
            poll_interval_s: Some(30),
            targets: Some(vec!["cli.example.com".to_string()]),
        };
        let cfg = resolve(Some(file), EnvOverrides::default(), cli).unwrap();
        assert_eq!(cfg.latency_threshold_ms, 75.0);
        assert_eq!(cfg.poll_interval_s, 30);
        assert_eq!(cfg.targets, vec!["cli.example.com"]);
    }

    #[test]
    fn test_empty_webhook_disables_delivery() {
        let file = FileConfig {
            webhook_endpoint: Some("".to_string()),
            notifications_enabled: Some(true),
            ..Default::default()
        };
        let cfg = resolve(Some(file), EnvOverrides::default(), CliOverrides::default()).unwrap();
        assert_eq!(cfg.webhook_endpoint, None);
    }

    #[test]
    fn test_rejects_nonpositive_values() {
        let file = FileConfig {
            latency_threshold_ms: Some(0.0),
            ..Default::default()
        };
        let err = resolve(Some(file), EnvOverrides::default(), CliOverrides::default());
        assert!(matches!(
            err,
            Err(ConfigError::Invalid {
                field: "latency_threshold_ms",
                ..
            })
        ));

        let file = FileConfig {
            poll_interval_s: Some(0),
            ..Default::default()
        };
        let err = resolve(Some(file), EnvOverrides::default(), CliOverrides::default());
        assert!(matches!(
            err,
            Err(ConfigError::Invalid {
                field: "poll_interval_s",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_empty_target_list() {
        let file = FileConfig {
            targets: Some(vec![]),
            ..Default::default()
        };
        let err = resolve(Some(file), EnvOverrides::default(), CliOverrides::default());
        assert!(matches!(err, Err(ConfigError::Invalid { field: "targets", .. })));
    }

    #[test]
    fn test_missing_file_writes_starter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let loaded = load_file(&path).unwrap();
        assert!(loaded.is_none());
        assert!(path.exists());

        // The starter file must itself parse, with notifications off.
        let reloaded = load_file(&path).unwrap().unwrap();
        assert_eq!(reloaded.notifications_enabled, Some(false));
        assert_eq!(
            reloaded.webhook_endpoint.as_deref(),
            Some("YOUR_WEBHOOK_URL_HERE")
        );
    }

    #[test]
    fn test_malformed_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = load_file(&path);
        assert!(matches!(err, Err(ConfigError::Parse { .. })));
    }
}
