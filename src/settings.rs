//! Process settings.
//!
//! Settings load from YAML and can be overridden from the environment:
//!
//! ```yaml
//! base_url: "http://fruitstand.local:5000"
//! enable_display_auth: true
//! enable_display_approval: true
//! cache:
//!   driver: filesystem
//!   dir: /var/cache/fruitstand
//! renderer:
//!   command: node
//!   args: ["render.js"]
//!   browser: chrome
//!   timeout_secs: 30
//! ```
//!
//! Environment overrides (all optional):
//! `FRUITSTAND_BASE_URL`, `FRUITSTAND_ENABLE_DISPLAY_AUTH`,
//! `FRUITSTAND_ENABLE_DISPLAY_APPROVAL`, `FRUITSTAND_DEBUG`,
//! `FRUITSTAND_CACHE_DRIVER`, `FRUITSTAND_CACHE_DIR`,
//! `FRUITSTAND_RENDER_COMMAND`, `FRUITSTAND_RENDER_BROWSER`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::Error;

/// Top-level settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Externally reachable base URL of this server, used to build the URL
    /// the renderer loads (e.g. "http://127.0.0.1:5000")
    pub base_url: String,
    /// Require devices to be associated with an active access secret
    pub enable_display_auth: bool,
    /// New devices start `pending` until an operator approves them
    pub enable_display_approval: bool,
    /// Honor explicit playlist/entry overrides on device requests
    pub debug: bool,
    pub cache: CacheSettings,
    pub renderer: RendererSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            enable_display_auth: false,
            enable_display_approval: false,
            debug: false,
            cache: CacheSettings::default(),
            renderer: RendererSettings::default(),
        }
    }
}

/// Which cache driver backs [`Cache`](crate::cache::Cache).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheDriverKind {
    /// No cache: every lookup misses
    #[default]
    None,
    Memory,
    Filesystem,
    /// Rows in the persistent store
    Database,
}

impl CacheDriverKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "" | "none" => Some(CacheDriverKind::None),
            "memory" => Some(CacheDriverKind::Memory),
            "filesystem" => Some(CacheDriverKind::Filesystem),
            "database" => Some(CacheDriverKind::Database),
            _ => None,
        }
    }
}

/// Cache settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub driver: CacheDriverKind,
    /// Directory for the filesystem driver (default: `<tmp>/fruitstand`)
    pub dir: Option<PathBuf>,
}

impl CacheSettings {
    /// Directory the filesystem driver writes to.
    pub fn dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("fruitstand"))
    }
}

/// External renderer settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    /// Executable to run (default: "node")
    pub command: String,
    /// Arguments placed before the render options (default: ["render.js"])
    pub args: Vec<String>,
    /// Browser the renderer should use ("chrome" or "firefox")
    pub browser: Option<String>,
    /// Directory for rendered files (default: `<tmp>/fruitstand-render`)
    pub temp_dir: PathBuf,
    /// Time budget for one render, after which the process is killed
    pub timeout_secs: u64,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            command: "node".to_string(),
            args: vec!["render.js".to_string()],
            browser: Some("chrome".to_string()),
            temp_dir: std::env::temp_dir().join("fruitstand-render"),
            timeout_secs: 30,
        }
    }
}

impl RendererSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Settings {
    /// Load settings from a YAML file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read settings file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let mut settings = Self::from_yaml(&content)?;
        settings.apply_env(|name| std::env::var(name).ok())?;
        Ok(settings)
    }

    /// Parse settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        serde_yaml::from_str(yaml).map_err(|e| Error::Config(format!("Invalid settings YAML: {}", e)))
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, Error> {
        let mut settings = Self::default();
        settings.apply_env(|name| std::env::var(name).ok())?;
        Ok(settings)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production, a map in tests).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FRUITSTAND_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = lookup("FRUITSTAND_ENABLE_DISPLAY_AUTH") {
            self.enable_display_auth = parse_flag("FRUITSTAND_ENABLE_DISPLAY_AUTH", &v)?;
        }
        if let Some(v) = lookup("FRUITSTAND_ENABLE_DISPLAY_APPROVAL") {
            self.enable_display_approval = parse_flag("FRUITSTAND_ENABLE_DISPLAY_APPROVAL", &v)?;
        }
        if let Some(v) = lookup("FRUITSTAND_DEBUG") {
            self.debug = parse_flag("FRUITSTAND_DEBUG", &v)?;
        }
        if let Some(v) = lookup("FRUITSTAND_CACHE_DRIVER") {
            self.cache.driver = CacheDriverKind::parse(&v)
                .ok_or_else(|| Error::Config(format!("Unknown cache driver '{}'", v)))?;
        }
        if let Some(v) = lookup("FRUITSTAND_CACHE_DIR") {
            self.cache.dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FRUITSTAND_RENDER_COMMAND") {
            self.renderer.command = v;
        }
        if let Some(v) = lookup("FRUITSTAND_RENDER_BROWSER") {
            self.renderer.browser = Some(v);
        }
        Ok(())
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool, Error> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::Config(format!("{} must be a boolean, got '{}'", name, value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(!settings.enable_display_auth);
        assert!(!settings.enable_display_approval);
        assert_eq!(settings.cache.driver, CacheDriverKind::None);
        assert_eq!(settings.renderer.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
base_url: "http://signage:8080"
enable_display_approval: true
cache:
  driver: filesystem
  dir: /var/cache/fs
renderer:
  timeout_secs: 5
"#;
        let settings = Settings::from_yaml(yaml).unwrap();
        assert_eq!(settings.base_url, "http://signage:8080");
        assert!(settings.enable_display_approval);
        assert!(!settings.enable_display_auth);
        assert_eq!(settings.cache.driver, CacheDriverKind::Filesystem);
        assert_eq!(settings.cache.dir(), PathBuf::from("/var/cache/fs"));
        assert_eq!(settings.renderer.timeout_secs, 5);
        assert_eq!(settings.renderer.command, "node");
    }

    #[test]
    fn test_invalid_yaml() {
        let err = Settings::from_yaml("cache: [").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FRUITSTAND_ENABLE_DISPLAY_AUTH", "true"),
            ("FRUITSTAND_CACHE_DRIVER", "database"),
            ("FRUITSTAND_RENDER_BROWSER", "firefox"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings
            .apply_env(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert!(settings.enable_display_auth);
        assert_eq!(settings.cache.driver, CacheDriverKind::Database);
        assert_eq!(settings.renderer.browser.as_deref(), Some("firefox"));
    }

    #[test]
    fn test_env_rejects_bad_flag() {
        let mut settings = Settings::default();
        let result = settings.apply_env(|name| {
            (name == "FRUITSTAND_DEBUG").then(|| "maybe".to_string())
        });
        assert!(result.is_err());
    }
}
