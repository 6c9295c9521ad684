//! Orchestrator configuration
//!
//! Loaded from TOML (`ORCHESTRATOR_CONFIG_PATH`, then
//! `orchestrator/config/orchestrator.toml` searched upward from the working
//! directory, then the built-in example) and finally patched with a handful
//! of `ORCHESTRATOR_*` environment overrides.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::BackoffPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "orchestrator/config/orchestrator.toml";
const BUILTIN_CONFIG_TOML: &str = include_str!("../config/orchestrator.example.toml");

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// What happens to the rest of a task when one subtask exhausts its attempts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskFailurePolicy {
    /// The whole task fails; completed subtasks stay settled.
    #[default]
    FailTask,
    /// The subtask is marked skipped and the task continues.
    Skip,
}

impl std::str::FromStr for SubtaskFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "fail_task" => Ok(Self::FailTask),
            "skip" => Ok(Self::Skip),
            other => Err(format!("unknown subtask failure policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub server: ServerConfig,
    pub orchestrator: TaskConfig,
    pub directory: DirectoryConfig,
    pub payments: PaymentsConfig,
    pub invoker: InvokerConfig,
    pub verification: VerificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub allowed_origins: Vec<String>,
    /// Live events buffered per websocket before it lags and refills from the log.
    pub event_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            event_buffer: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TaskConfig {
    pub payer_id: String,
    pub max_subtask_attempts: u32,
    pub subtask_failure_policy: SubtaskFailurePolicy,
    pub planning_timeout_ms: u64,
    /// How often refunds that failed against the ledger are retried.
    pub refund_sweep_interval_secs: u64,
    /// How long a finished task stays queryable before it is evicted. 0 keeps it forever.
    pub task_retention_secs: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            payer_id: "orchestrator".to_string(),
            max_subtask_attempts: 3,
            subtask_failure_policy: SubtaskFailurePolicy::FailTask,
            planning_timeout_ms: 60_000,
            refund_sweep_interval_secs: 30,
            task_retention_secs: 3600,
        }
    }
}

impl TaskConfig {
    pub fn planning_timeout(&self) -> Duration {
        Duration::from_millis(self.planning_timeout_ms)
    }

    pub fn refund_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.refund_sweep_interval_secs)
    }

    pub fn task_retention(&self) -> Duration {
        Duration::from_secs(self.task_retention_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DirectoryConfig {
    pub registry_url: Option<String>,
    pub seed_path: Option<String>,
    pub cache_ttl_secs: u64,
    pub lookup_timeout_ms: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            registry_url: None,
            seed_path: None,
            cache_ttl_secs: 60,
            lookup_timeout_ms: 5_000,
        }
    }
}

impl DirectoryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

/// Ledger endpoint and retry settings. Without `ledger_url` escrows settle
/// against the in-process ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PaymentsConfig {
    pub ledger_url: Option<String>,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub call_timeout_ms: u64,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            ledger_url: None,
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            call_timeout_ms: 10_000,
        }
    }
}

impl PaymentsConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.max_attempts, self.base_delay_ms, self.max_delay_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Capability call settings; `protocols` selects which built-in adapters are registered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InvokerConfig {
    pub protocols: Vec<String>,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub call_timeout_ms: u64,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            protocols: vec!["http".to_string()],
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            call_timeout_ms: 30_000,
        }
    }
}

impl InvokerConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.max_attempts, self.base_delay_ms, self.max_delay_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerificationConfig {
    pub scorer_url: Option<String>,
    pub auto_approve_threshold: f64,
    pub enhanced_auto_approve_threshold: f64,
    pub reject_floor: f64,
    pub hard_constraint: String,
    pub hard_constraint_floor: f64,
    pub review_timeout_secs: u64,
    pub scorer_max_attempts: u32,
    pub scorer_base_delay_ms: u64,
    pub scorer_timeout_ms: u64,
    pub weights: BTreeMap<String, f64>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            scorer_url: None,
            auto_approve_threshold: 75.0,
            enhanced_auto_approve_threshold: 90.0,
            reject_floor: 50.0,
            hard_constraint: "ethics".to_string(),
            hard_constraint_floor: 90.0,
            review_timeout_secs: 30 * 60,
            scorer_max_attempts: 3,
            scorer_base_delay_ms: 200,
            scorer_timeout_ms: 10_000,
            weights: default_weights(),
        }
    }
}

impl VerificationConfig {
    pub fn review_timeout(&self) -> Duration {
        Duration::from_secs(self.review_timeout_secs)
    }

    pub fn scorer_timeout(&self) -> Duration {
        Duration::from_millis(self.scorer_timeout_ms)
    }

    pub fn scorer_backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.scorer_max_attempts,
            self.scorer_base_delay_ms,
            self.scorer_base_delay_ms.saturating_mul(16),
        )
    }
}

pub fn default_weights() -> BTreeMap<String, f64> {
    [
        ("completeness", 0.20),
        ("correctness", 0.25),
        ("academic_rigor", 0.20),
        ("clarity", 0.15),
        ("innovation", 0.10),
        ("ethics", 0.10),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

impl OrchestratorConfig {
    /// Load from disk, falling back to the built-in defaults, then apply env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("ORCHESTRATOR_CONFIG_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| find_default_config_path(DEFAULT_CONFIG_PATH));

        let mut config = match path {
            Some(path) => match std::fs::read_to_string(&path) {
                Ok(content) => {
                    tracing::info!(path = %path.display(), "Loaded orchestrator config");
                    Self::from_toml_str(&content)?
                }
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "Failed to read config file; using built-in defaults"
                    );
                    Self::builtin()?
                }
            },
            None => Self::builtin()?,
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_toml_str(BUILTIN_CONFIG_TOML)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.server.bind_addr = env_str("ORCHESTRATOR_BIND_ADDR", &self.server.bind_addr);
        self.orchestrator.max_subtask_attempts = env_parse(
            "ORCHESTRATOR_MAX_SUBTASK_ATTEMPTS",
            self.orchestrator.max_subtask_attempts,
        )?;
        self.orchestrator.subtask_failure_policy = env_parse(
            "ORCHESTRATOR_SUBTASK_FAILURE_POLICY",
            self.orchestrator.subtask_failure_policy,
        )?;
        self.orchestrator.task_retention_secs = env_parse(
            "ORCHESTRATOR_TASK_RETENTION_SECS",
            self.orchestrator.task_retention_secs,
        )?;
        self.verification.review_timeout_secs = env_parse(
            "ORCHESTRATOR_REVIEW_TIMEOUT_SECS",
            self.verification.review_timeout_secs,
        )?;
        if let Ok(url) = std::env::var("ORCHESTRATOR_SCORER_URL") {
            self.verification.scorer_url = Some(url);
        }
        if let Ok(url) = std::env::var("ORCHESTRATOR_REGISTRY_URL") {
            self.directory.registry_url = Some(url);
        }
        if let Ok(url) = std::env::var("ORCHESTRATOR_LEDGER_URL") {
            self.payments.ledger_url = Some(url);
        }
        if let Ok(path) = std::env::var("ORCHESTRATOR_AGENTS_PATH") {
            self.directory.seed_path = Some(path);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let v = &self.verification;
        if self.orchestrator.max_subtask_attempts == 0 {
            return Err(invalid("orchestrator.max_subtask_attempts", "must be >= 1"));
        }
        if v.reject_floor > v.auto_approve_threshold {
            return Err(invalid(
                "verification.reject_floor",
                "must not exceed auto_approve_threshold",
            ));
        }
        if v.enhanced_auto_approve_threshold < v.auto_approve_threshold {
            return Err(invalid(
                "verification.enhanced_auto_approve_threshold",
                "must be >= auto_approve_threshold",
            ));
        }
        if let Some((key, _)) = v.weights.iter().find(|(_, w)| **w < 0.0 || !w.is_finite()) {
            return Err(invalid(
                &format!("verification.weights.{key}"),
                "must be a finite non-negative number",
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key: key.to_string(),
            message: format!("{val}: {e}"),
        }),
        Err(_) => Ok(default),
    }
}

fn find_default_config_path(relative_path: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;
    loop {
        let candidate = current.join(relative_path);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_config_matches_defaults() {
        let config = OrchestratorConfig::builtin().unwrap();
        assert_eq!(config.orchestrator.max_subtask_attempts, 3);
        assert_eq!(
            config.orchestrator.subtask_failure_policy,
            SubtaskFailurePolicy::FailTask
        );
        assert_eq!(config.verification.auto_approve_threshold, 75.0);
        assert_eq!(config.verification.hard_constraint_floor, 90.0);
        assert_eq!(config.verification.review_timeout(), Duration::from_secs(1800));
        assert_eq!(config.verification.weights, default_weights());
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
            [orchestrator]
            subtask_failure_policy = "skip"

            [invoker]
            max_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(
            config.orchestrator.subtask_failure_policy,
            SubtaskFailurePolicy::Skip
        );
        assert_eq!(config.orchestrator.max_subtask_attempts, 3);
        assert_eq!(config.orchestrator.task_retention(), Duration::from_secs(3600));
        assert_eq!(config.invoker.backoff().max_attempts, 5);
        assert_eq!(config.payments, PaymentsConfig::default());
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let mut config = OrchestratorConfig::default();
        config.verification.reject_floor = 80.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_malformed_toml_is_reported() {
        assert!(matches!(
            OrchestratorConfig::from_toml_str("[orchestrator"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_failure_policy_from_str() {
        assert_eq!(
            "skip".parse::<SubtaskFailurePolicy>().unwrap(),
            SubtaskFailurePolicy::Skip
        );
        assert!("retry".parse::<SubtaskFailurePolicy>().is_err());
    }
}
