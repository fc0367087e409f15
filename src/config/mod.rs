use crate::error::{BeanstalkError, Result};
use serde::{Deserialize, Serialize};
use std::env;

const ENV_PREFIX: &str = "BEANSTALK_";

/// Container configuration
///
/// Every field has a default, so a partial JSON document or a subset of
/// `BEANSTALK_*` variables is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Name carried by `Start`/`Stop` events and log lines.
    pub name: String,
    /// Build every lazy singleton during boot, not only those flagged eager.
    pub eager_singletons: bool,
    /// Catch panicking event listeners instead of unwinding into `publish`.
    pub isolate_listener_panics: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            name: "beanstalk".to_string(),
            eager_singletons: false,
            isolate_listener_panics: true,
        }
    }
}

impl ContainerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BeanstalkError::config(format!("malformed container config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `BEANSTALK_NAME`, `BEANSTALK_EAGER_SINGLETONS` and
    /// `BEANSTALK_ISOLATE_LISTENER_PANICS`.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(env::vars())
    }

    pub(crate) fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in vars {
            let Some(field) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            match field {
                "NAME" => config.name = value.to_string(),
                "EAGER_SINGLETONS" => config.eager_singletons = parse_flag(field, value)?,
                "ISOLATE_LISTENER_PANICS" => config.isolate_listener_panics = parse_flag(field, value)?,
                _ => tracing::debug!("Ignoring unknown setting {}{}", ENV_PREFIX, field),
            }
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BeanstalkError::config("container name must not be empty"));
        }
        Ok(())
    }
}

fn parse_flag(field: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(BeanstalkError::config(format!(
            "{}{} expects a boolean, got '{}'",
            ENV_PREFIX, field, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ContainerConfig::default();
        assert_eq!(config.name, "beanstalk");
        assert!(!config.eager_singletons);
        assert!(config.isolate_listener_panics);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ContainerConfig::from_json(r#"{"eager_singletons": true}"#).unwrap();
        assert!(config.eager_singletons);
        assert_eq!(config.name, "beanstalk");
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = ContainerConfig::from_json("{ nope").unwrap_err();
        assert!(matches!(err, BeanstalkError::Config { .. }));
    }

    #[test]
    fn test_vars_are_read_with_prefix() {
        let config = ContainerConfig::from_vars([
            ("BEANSTALK_NAME", "orders"),
            ("BEANSTALK_EAGER_SINGLETONS", "Yes"),
            ("BEANSTALK_ISOLATE_LISTENER_PANICS", "0"),
            ("PATH", "/usr/bin"),
        ])
        .unwrap();

        assert_eq!(config.name, "orders");
        assert!(config.eager_singletons);
        assert!(!config.isolate_listener_panics);
    }

    #[test]
    fn test_bad_flag_is_rejected() {
        let err = ContainerConfig::from_vars([("BEANSTALK_EAGER_SINGLETONS", "sometimes")]).unwrap_err();
        assert!(err.to_string().contains("BEANSTALK_EAGER_SINGLETONS"));
    }

    #[test]
    fn test_empty_name_is_rejected() {
        assert!(ContainerConfig::from_vars([("BEANSTALK_NAME", "  ")]).is_err());
    }
}
