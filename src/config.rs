//! Runtime configuration.
//!
//! Values come from, in increasing priority: built-in defaults, the TOML
//! file at `<config dir>/solverhub/config.toml`, and `SOLVERHUB_*`
//! environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

const APP_NAME: &str = "solverhub";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    pub url: Option<String>,
    /// Public anon key sent as `apikey` on every request.
    pub anon_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendKind,
    /// SQLite file for the local backend.
    pub database_path: Option<PathBuf>,
    /// Where the signed-in session is kept between invocations.
    pub session_path: Option<PathBuf>,
    #[serde(default)]
    pub remote: RemoteSettings,
    /// Enables the demo accounts and demo seeding. Never switched on implicitly.
    #[serde(default)]
    pub demo_mode: bool,
}

impl Config {
    pub fn load() -> AppResult<Self> {
        let mut config = match Self::default_file() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> AppResult<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))
    }

    fn default_file() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Overlays `SOLVERHUB_*` variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(kind) = lookup("SOLVERHUB_BACKEND") {
            match kind.trim().to_lowercase().as_str() {
                "local" => self.backend = BackendKind::Local,
                "remote" => self.backend = BackendKind::Remote,
                other => warn!("Ignoring unknown SOLVERHUB_BACKEND value: {other}"),
            }
        }
        if let Some(path) = lookup("SOLVERHUB_DB") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("SOLVERHUB_SESSION") {
            self.session_path = Some(PathBuf::from(path));
        }
        if let Some(url) = lookup("SOLVERHUB_URL") {
            self.remote.url = Some(url);
        }
        if let Some(key) = lookup("SOLVERHUB_ANON_KEY") {
            self.remote.anon_key = Some(key);
        }
        if let Some(flag) = lookup("SOLVERHUB_DEMO") {
            self.demo_mode = matches!(flag.trim(), "1" | "true" | "yes" | "on");
        }
    }

    /// A remote backend without endpoint or key cannot start.
    pub fn validate(&self) -> AppResult<()> {
        if self.backend == BackendKind::Remote {
            let missing_url = self.remote.url.as_deref().is_none_or(|u| u.trim().is_empty());
            let missing_key = self
                .remote
                .anon_key
                .as_deref()
                .is_none_or(|k| k.trim().is_empty());
            if missing_url || missing_key {
                return Err(AppError::Config(
                    "remote backend requires SOLVERHUB_URL and SOLVERHUB_ANON_KEY".into(),
                ));
            }
        }
        Ok(())
    }

    fn data_dir() -> PathBuf {
        directories::ProjectDirs::from("", "", APP_NAME)
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("solverhub.db"))
    }

    pub fn session_path(&self) -> PathBuf {
        self.session_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("session.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_to_local_backend() {
        let config = Config::default();
        assert_eq!(config.backend, BackendKind::Local);
        assert!(!config.demo_mode);
        assert!(config.validate().is_ok());
        assert!(config.database_path().ends_with("solverhub.db"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("SOLVERHUB_BACKEND", "Remote"),
            ("SOLVERHUB_URL", "https://example.supabase.co"),
            ("SOLVERHUB_ANON_KEY", "anon"),
            ("SOLVERHUB_DEMO", "true"),
            ("SOLVERHUB_DB", "/tmp/x.db"),
        ]));
        assert_eq!(config.backend, BackendKind::Remote);
        assert!(config.demo_mode);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/x.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_remote_without_key_is_fatal() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("SOLVERHUB_BACKEND", "remote"),
            ("SOLVERHUB_URL", "https://example.supabase.co"),
        ]));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_unknown_backend_is_ignored() {
        let mut config = Config::default();
        config.apply_env(env(&[("SOLVERHUB_BACKEND", "firebase")]));
        assert_eq!(config.backend, BackendKind::Local);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
backend = "remote"
demo_mode = true

[remote]
url = "https://abc.supabase.co"
anon_key = "key"
"#
        )
        .unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.backend, BackendKind::Remote);
        assert_eq!(config.remote.timeout_secs, 30);
        assert!(config.demo_mode);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backend = 42").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(AppError::Config(_))
        ));
    }
}
