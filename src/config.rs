use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to encode config: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// User preferences for the reporting views.
///
/// The store keeps and forwards this value; it never interprets it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub sleep_activities: Vec<String>,
    pub activity_groups: BTreeMap<String, Vec<String>>,
}

impl Config {
    pub fn from_text(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads the config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::from_text(&text),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    pub fn to_text(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Metric {
    #[default]
    Average,
    Total,
}

/// Display settings for the charts. Start and end bound the reported range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    pub grouped: bool,
    pub include_sleep: bool,
    pub metric: Metric,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            grouped: true,
            include_sleep: false,
            metric: Metric::Average,
            start_time: None,
            end_time: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::{Config, ConfigError};

    #[test]
    fn parses_groups_and_sleep_activities() {
        let config = Config::from_text(
            r#"
sleep_activities = ["Sleep", "Nap"]

[activity_groups]
Leisure = ["Reading", "Games"]
"#,
        )
        .expect("config should parse");

        assert_eq!(config.sleep_activities, vec!["Sleep", "Nap"]);
        assert_eq!(
            config.activity_groups.get("Leisure"),
            Some(&vec!["Reading".to_string(), "Games".to_string()])
        );
    }

    #[test]
    fn rejects_unknown_keys_and_bad_syntax() {
        assert!(matches!(
            Config::from_text("colour = \"blue\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            Config::from_text("[activity_groups"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn text_form_parses_back() {
        let mut config = Config::default();
        config.sleep_activities.push("Sleep".to_string());
        config
            .activity_groups
            .insert("Work".to_string(), vec!["Email".to_string()]);

        let text = config.to_text().unwrap();
        assert_eq!(Config::from_text(&text).unwrap(), config);
    }
}
