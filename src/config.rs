//! Configuration loading and defaults for quiet-window.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

use crate::interaction::InteractionKind;
use crate::interaction::InteractionSet;

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Quiet window before idle is confirmed, in milliseconds (default: 100).
    pub quiet_period_ms: u64,

    /// Fallback delay applied to callbacks registered without one.
    /// Unset means callbacks wait for idle indefinitely.
    pub default_fallback_ms: Option<u64>,

    /// Interaction tags that count as activity (default: all known tags).
    pub tracked_interactions: Vec<InteractionKind>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            quiet_period_ms: 100,
            default_fallback_ms: None,
            tracked_interactions: InteractionKind::ALL.to_vec(),
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from the given path, the default path, or defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load(p);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let default_path = config_dir.join("quiet-window").join("config.toml");
            if default_path.exists() {
                return Self::load(&default_path);
            }
        }

        Ok(Self::default())
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    pub fn default_fallback(&self) -> Option<Duration> {
        self.default_fallback_ms.map(Duration::from_millis)
    }

    pub fn tracked(&self) -> InteractionSet {
        self.tracked_interactions.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.quiet_period(), Duration::from_millis(100));
        assert_eq!(config.default_fallback(), None);
        assert_eq!(config.tracked(), InteractionSet::all());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            quiet_period_ms = 300
            default_fallback_ms = 2000
            tracked_interactions = ["scroll", "touchmove", "mousemove"]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.quiet_period(), Duration::from_millis(300));
        assert_eq!(config.default_fallback(), Some(Duration::from_secs(2)));

        let tracked = config.tracked();
        assert!(tracked.contains(InteractionKind::Scroll));
        assert!(tracked.contains(InteractionKind::MouseMove));
        assert!(!tracked.contains(InteractionKind::KeyDown));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str("quiet_period_ms = 250").unwrap();
        assert_eq!(config.quiet_period_ms, 250);
        assert_eq!(config.tracked_interactions, InteractionKind::ALL.to_vec());
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let result: Result<Config, _> = toml::from_str(r#"tracked_interactions = ["click"]"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "quiet_period_ms = 50").unwrap();

        let config = Config::load_or_default(Some(file.path())).unwrap();
        assert_eq!(config.quiet_period_ms, 50);
    }

    #[test]
    fn test_load_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    #[serial]
    fn test_load_default_path_from_xdg_config_home() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("quiet-window");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), "quiet_period_ms = 300\n").unwrap();

        let previous = std::env::var_os("XDG_CONFIG_HOME");
        // SAFETY: serialized with other env-mutating tests.
        unsafe { std::env::set_var("XDG_CONFIG_HOME", dir.path()) };
        let config = Config::load_or_default(None);
        match previous {
            // SAFETY: as above.
            Some(v) => unsafe { std::env::set_var("XDG_CONFIG_HOME", v) },
            None => unsafe { std::env::remove_var("XDG_CONFIG_HOME") },
        }

        assert_eq!(config.unwrap().quiet_period_ms, 300);
    }
}
