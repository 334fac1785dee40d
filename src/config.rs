//! Configuration management for medic
//!
//! Looks for `--config <path>`, then `./medic.json`, then
//! `~/.config/medic/config.json`, and finally falls back to defaults.
//! Environment variables override whatever the file says.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default OpenAI-compatible chat completions endpoint
pub const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker command line (program followed by its arguments)
    pub worker: Vec<String>,
    /// Append-only log the worker writes stack traces to
    pub log_file: PathBuf,
    /// Where the consumed byte offset is persisted (defaults to `<log_file>.pointer`)
    pub pointer_file: Option<PathBuf>,
    pub poll_interval_ms: u64,
    /// Delay between SIGTERM and spawning the replacement worker
    pub restart_grace_ms: u64,
    /// Wait (bounded by the grace delay) for the old worker to exit before respawning
    pub wait_for_exit: bool,
    /// Error kinds that start a patch attempt when they show up in new log text
    pub trigger_kinds: Vec<String>,
    pub service: ServiceConfig,
    /// Substrings rejected in addition to the built-in deny list
    pub extra_deny: Vec<String>,
    pub show_preview: bool,
    pub preview_max_lines: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub api_url: String,
    /// Never written back to disk
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    /// Unset means the request may wait indefinitely
    pub request_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker: vec!["node".to_string(), "server.js".to_string()],
            log_file: PathBuf::from("app.log"),
            pointer_file: None,
            poll_interval_ms: 200,
            restart_grace_ms: 300,
            wait_for_exit: false,
            trigger_kinds: vec!["TypeError".to_string()],
            service: ServiceConfig::default(),
            extra_deny: Vec::new(),
            show_preview: true,
            preview_max_lines: 40,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            request_timeout_secs: None,
        }
    }
}

impl Config {
    /// Get the user-level config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("medic"))
    }

    /// Candidate config files, most specific first
    fn candidate_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(path) = explicit {
            paths.push(path.to_path_buf());
        }
        paths.push(PathBuf::from("medic.json"));
        if let Some(dir) = Self::config_dir() {
            paths.push(dir.join("config.json"));
        }
        paths
    }

    /// Load config from disk (or defaults), then apply environment overrides.
    ///
    /// An explicit path that does not exist is an error; the implicit
    /// locations are optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
        }

        let mut config = Self::default();
        for path in Self::candidate_paths(explicit) {
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            match serde_json::from_str::<Config>(&content) {
                Ok(parsed) => {
                    tracing::debug!(path = %path.display(), "loaded config");
                    config = parsed;
                }
                Err(err) => {
                    preserve_corrupt_config(&path, &content);
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "config file was corrupted; a backup was saved and defaults were loaded"
                    );
                }
            }
            break;
        }

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides. Takes a lookup so tests don't touch the process env.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("OPENROUTER_API_URL").filter(|v| !v.trim().is_empty()) {
            self.service.api_url = url;
        }
        if let Some(key) = lookup("OPENROUTER_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.service.api_key = Some(key);
        }
        if let Some(model) = lookup("MODEL").filter(|v| !v.trim().is_empty()) {
            self.service.model = model;
        }
        if let Some(log) = lookup("MEDIC_LOG_FILE").filter(|v| !v.trim().is_empty()) {
            self.log_file = PathBuf::from(log);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker.is_empty() || self.worker[0].trim().is_empty() {
            bail!("`worker` must name a program to run");
        }
        if self.poll_interval_ms == 0 {
            bail!("`poll_interval_ms` must be greater than zero");
        }
        if self.trigger_kinds.iter().all(|k| k.trim().is_empty()) {
            bail!("`trigger_kinds` must contain at least one error kind");
        }
        Ok(())
    }

    pub fn pointer_path(&self) -> PathBuf {
        self.pointer_file.clone().unwrap_or_else(|| {
            let mut name = self.log_file.clone().into_os_string();
            name.push(".pointer");
            PathBuf::from(name)
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn restart_grace(&self) -> Duration {
        Duration::from_millis(self.restart_grace_ms)
    }

    /// True when the chunk mentions one of the configured trigger kinds
    pub fn is_trigger(&self, chunk: &str) -> bool {
        self.trigger_kinds
            .iter()
            .filter(|k| !k.is_empty())
            .any(|kind| chunk.contains(kind.as_str()))
    }
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn read_config_file(path: &Path) -> Config {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.poll_interval_ms, 200);
        assert_eq!(config.restart_grace_ms, 300);
        assert!(config.service.api_key.is_none());
        assert!(config.service.request_timeout().is_none());
        assert_eq!(config.pointer_path(), PathBuf::from("app.log.pointer"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medic.json");
        fs::write(&path, r#"{"log_file": "logs/worker.log", "poll_interval_ms": 50}"#).unwrap();

        let config = read_config_file(&path);
        assert_eq!(config.log_file, PathBuf::from("logs/worker.log"));
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.restart_grace_ms, 300);
        assert_eq!(config.pointer_path(), PathBuf::from("logs/worker.log.pointer"));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::default();
        let env: HashMap<&str, &str> = [
            ("OPENROUTER_API_URL", "http://localhost:9000/v1/chat"),
            ("OPENROUTER_API_KEY", "sk-test"),
            ("MODEL", ""),
        ]
        .into_iter()
        .collect();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.service.api_url, "http://localhost:9000/v1/chat");
        assert_eq!(config.service.api_key.as_deref(), Some("sk-test"));
        // blank values are ignored
        assert_eq!(config.service.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_api_key_is_not_serialized() {
        let mut config = Config::default();
        config.service.api_key = Some("sk-secret".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-secret"));
    }

    #[test]
    fn test_validate_rejects_empty_worker() {
        let config = Config {
            worker: Vec::new(),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            poll_interval_ms: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(Config::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_is_trigger() {
        let config = Config::default();
        assert!(config.is_trigger("TypeError: x is undefined\n    at f (/a.js:1:1)"));
        assert!(!config.is_trigger("RangeError: too deep"));
    }
}
