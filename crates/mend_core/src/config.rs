//! Layered configuration: defaults, then an optional TOML file, then
//! environment variables.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Self-healing limits and switches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealConfig {
    /// Whether failed runs are healed at all
    pub enabled: bool,
    /// Maximum attempts per failed test result
    pub max_attempts_per_spec: u32,
    /// Maximum attempts scheduled for a single run
    pub max_attempts_per_run: u32,
    /// Wall-clock bound on the AI repair call
    pub repair_timeout_ms: u64,
    /// Number of concurrent healing tasks
    pub worker_concurrency: usize,
    /// Record reruns without enqueueing them
    pub heal_only: bool,
    /// Characters of stdout/stderr sent to the repair model
    pub log_tail_bytes: usize,
}

impl Default for HealConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts_per_spec: 3,
            max_attempts_per_run: 10,
            repair_timeout_ms: 120_000,
            worker_concurrency: 1,
            heal_only: false,
            log_tail_bytes: 4000,
        }
    }
}

impl HealConfig {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn max_per_spec(mut self, cap: u32) -> Self {
        self.max_attempts_per_spec = cap;
        self
    }

    pub fn max_per_run(mut self, cap: u32) -> Self {
        self.max_attempts_per_run = cap;
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.repair_timeout_ms = ms;
        self
    }

    pub fn concurrency(mut self, workers: usize) -> Self {
        self.worker_concurrency = workers;
        self
    }

    pub fn heal_only(mut self, enabled: bool) -> Self {
        self.heal_only = enabled;
        self
    }
}

/// Filesystem roots used to find spec files and run logs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    /// Repository root that relative spec keys are resolved against
    pub repo_root: PathBuf,
    /// Trees holding machine-generated specs, relative to `repo_root` unless absolute
    pub generated_roots: Vec<PathBuf>,
    /// Root of curated (human-managed) suites
    pub curated_root: Option<PathBuf>,
    /// Caller-supplied root tried before everything else
    pub override_root: Option<PathBuf>,
    /// Where the execution worker stores captured stdout/stderr per run
    pub run_logs_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            generated_roots: vec![PathBuf::from("testmend-generated")],
            curated_root: None,
            override_root: None,
            run_logs_dir: PathBuf::from("runner-logs"),
        }
    }
}

impl PathsConfig {
    /// Create a configuration rooted at the given repository.
    pub fn rooted(repo_root: impl Into<PathBuf>) -> Self {
        let repo_root = repo_root.into();
        Self {
            run_logs_dir: repo_root.join("runner-logs"),
            repo_root,
            ..Default::default()
        }
    }

    /// Generated roots as absolute paths.
    pub fn generated_dirs(&self) -> Vec<PathBuf> {
        self.generated_roots
            .iter()
            .map(|root| {
                if root.is_absolute() {
                    root.clone()
                } else {
                    self.repo_root.join(root)
                }
            })
            .collect()
    }

    /// Log directory for a run.
    pub fn run_log_dir(&self, run_id: &str) -> PathBuf {
        self.run_logs_dir.join(run_id)
    }
}

/// Complete process configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MendConfig {
    pub heal: HealConfig,
    pub paths: PathsConfig,
}

impl MendConfig {
    /// Parse a TOML document with optional `[heal]` and `[paths]` tables.
    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load defaults, the optional file, then the process environment.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut config = match path {
            Some(path) => {
                debug!("Loading configuration from {:?}", path);
                Self::from_toml_str(&std::fs::read_to_string(path)?)?
            }
            None => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from environment variables only.
    pub fn from_env() -> CoreResult<Self> {
        Self::load(None)
    }

    /// Apply `MEND_*` overrides from an arbitrary variable source.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("MEND_SELF_HEAL_ENABLED") {
            self.heal.enabled = parse_bool("MEND_SELF_HEAL_ENABLED", &value)?;
        }
        if let Some(value) = lookup("MEND_SELF_HEAL_MAX_PER_SPEC") {
            self.heal.max_attempts_per_spec = parse_number("MEND_SELF_HEAL_MAX_PER_SPEC", &value)?;
        }
        if let Some(value) = lookup("MEND_SELF_HEAL_MAX_PER_RUN") {
            self.heal.max_attempts_per_run = parse_number("MEND_SELF_HEAL_MAX_PER_RUN", &value)?;
        }
        if let Some(value) = lookup("MEND_SELF_HEAL_TIMEOUT_MS") {
            self.heal.repair_timeout_ms = parse_number("MEND_SELF_HEAL_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("MEND_SELF_HEAL_CONCURRENCY") {
            let workers: usize = parse_number("MEND_SELF_HEAL_CONCURRENCY", &value)?;
            if workers == 0 {
                return Err(CoreError::InvalidConfig(
                    "MEND_SELF_HEAL_CONCURRENCY must be at least 1".to_string(),
                ));
            }
            self.heal.worker_concurrency = workers;
        }
        if let Some(value) = lookup("MEND_SELF_HEAL_HEAL_ONLY") {
            self.heal.heal_only = parse_bool("MEND_SELF_HEAL_HEAL_ONLY", &value)?;
        }
        if let Some(value) = lookup("MEND_LOCAL_REPO_ROOT").filter(|v| !v.trim().is_empty()) {
            self.paths.override_root = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("MEND_CURATED_ROOT").filter(|v| !v.trim().is_empty()) {
            self.paths.curated_root = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("MEND_RUN_LOGS_DIR").filter(|v| !v.trim().is_empty()) {
            self.paths.run_logs_dir = PathBuf::from(value);
        }
        Ok(())
    }
}

/// Parse a boolean flag, accepting the usual spellings.
pub fn parse_bool(name: &str, value: &str) -> CoreResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "no" | "n" | "off" => Ok(false),
        _ => Err(CoreError::InvalidConfig(format!(
            "Invalid boolean for {}: use true/false/1/0/yes/no",
            name
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> CoreResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CoreError::InvalidConfig(format!("Invalid number for {}: {}", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = MendConfig::default();
        assert!(config.heal.enabled);
        assert_eq!(config.heal.max_attempts_per_spec, 3);
        assert_eq!(config.heal.max_attempts_per_run, 10);
        assert_eq!(config.heal.repair_timeout_ms, 120_000);
        assert_eq!(config.heal.worker_concurrency, 1);
        assert!(!config.heal.heal_only);
    }

    #[test]
    fn test_toml_partial_tables() {
        let config = MendConfig::from_toml_str(
            r#"
            [heal]
            max_attempts_per_run = 4
            heal_only = true

            [paths]
            repo_root = "/srv/app"
            curated_root = "/srv/curated"
            "#,
        )
        .unwrap();

        assert_eq!(config.heal.max_attempts_per_run, 4);
        assert_eq!(config.heal.max_attempts_per_spec, 3);
        assert!(config.heal.heal_only);
        assert_eq!(config.paths.repo_root, PathBuf::from("/srv/app"));
        assert_eq!(config.paths.curated_root, Some(PathBuf::from("/srv/curated")));
    }

    #[test]
    fn test_env_overrides() {
        let vars = env(&[
            ("MEND_SELF_HEAL_ENABLED", "off"),
            ("MEND_SELF_HEAL_MAX_PER_SPEC", "5"),
            ("MEND_SELF_HEAL_TIMEOUT_MS", "1500"),
            ("MEND_LOCAL_REPO_ROOT", "/tmp/checkout"),
        ]);
        let mut config = MendConfig::default();
        config.apply_env_from(|k| vars.get(k).cloned()).unwrap();

        assert!(!config.heal.enabled);
        assert_eq!(config.heal.max_attempts_per_spec, 5);
        assert_eq!(config.heal.repair_timeout_ms, 1500);
        assert_eq!(config.paths.override_root, Some(PathBuf::from("/tmp/checkout")));
    }

    #[test]
    fn test_env_rejects_garbage() {
        let vars = env(&[("MEND_SELF_HEAL_HEAL_ONLY", "maybe")]);
        let mut config = MendConfig::default();
        assert!(config.apply_env_from(|k| vars.get(k).cloned()).is_err());

        let vars = env(&[("MEND_SELF_HEAL_CONCURRENCY", "0")]);
        assert!(config.apply_env_from(|k| vars.get(k).cloned()).is_err());
    }

    #[test]
    fn test_generated_dirs_resolve_against_repo() {
        let mut paths = PathsConfig::rooted("/repo");
        paths.generated_roots = vec![PathBuf::from("gen"), PathBuf::from("/abs/gen")];
        assert_eq!(
            paths.generated_dirs(),
            vec![PathBuf::from("/repo/gen"), PathBuf::from("/abs/gen")]
        );
        assert_eq!(paths.run_log_dir("r1"), PathBuf::from("/repo/runner-logs/r1"));
    }
}
