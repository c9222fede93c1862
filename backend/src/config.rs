//! Runtime configuration.
//!
//! Defaults live here as constants; [`AppConfig::from_env`] overlays the
//! environment (after loading `.env`), and CLI flags overlay that.

use std::env;
use std::path::PathBuf;

/// HTTP port when neither `--port` nor `SHEETMAP_PORT` is given.
pub const DEFAULT_PORT: u16 = 3000;

/// Root of everything persisted (templates, projects, session, jobs).
pub const DEFAULT_DATA_DIR: &str = ".sheetmap";

/// Upload body limit (50 MB).
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Data rows returned by the upload preview.
pub const PREVIEW_ROWS: usize = 20;

pub const DEFAULT_AI_MODEL: &str = "claude-sonnet-4-20250514";

pub const ENV_DATA_DIR: &str = "SHEETMAP_DATA_DIR";
pub const ENV_PORT: &str = "SHEETMAP_PORT";
pub const ENV_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const ENV_AI_MODEL: &str = "SHEETMAP_AI_MODEL";

pub use crate::transform::headers::DEFAULT_MAX_HEADER_ROWS;

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub port: u16,
    pub api_key: Option<String>,
    pub ai_model: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            port: DEFAULT_PORT,
            api_key: None,
            ai_model: DEFAULT_AI_MODEL.to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults overlaid with `.env` and the process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            data_dir: non_empty(ENV_DATA_DIR).map(PathBuf::from).unwrap_or(defaults.data_dir),
            port: non_empty(ENV_PORT)
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(defaults.port),
            api_key: non_empty(ENV_API_KEY),
            ai_model: non_empty(ENV_AI_MODEL).unwrap_or(defaults.ai_model),
        }
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        if let Some(p) = port {
            self.port = p;
        }
        self
    }

    pub fn with_data_dir(mut self, dir: Option<PathBuf>) -> Self {
        if let Some(d) = dir {
            self.data_dir = d;
        }
        self
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.data_dir.join("templates")
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.data_dir.join("projects")
    }

    pub fn session_dir(&self) -> PathBuf {
        self.data_dir.join("session")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_DATA_DIR, "/tmp/sm"),
            (ENV_PORT, "8080"),
            (ENV_API_KEY, "key"),
            (ENV_AI_MODEL, " "),
        ]
        .into_iter()
        .collect();
        let config = AppConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.data_dir, PathBuf::from("/tmp/sm"));
        assert_eq!(config.port, 8080);
        assert_eq!(config.api_key.as_deref(), Some("key"));
        assert_eq!(config.ai_model, DEFAULT_AI_MODEL);
        assert_eq!(config.templates_dir(), PathBuf::from("/tmp/sm/templates"));
    }

    #[test]
    fn test_bad_port_falls_back() {
        let config = AppConfig::from_lookup(|k| (k == ENV_PORT).then(|| "abc".to_string()));
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.with_port(Some(9000)).port, 9000);
    }
}
