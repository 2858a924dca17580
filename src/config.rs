//! Configuration and environment selection.
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// SRI environment selection.
///
/// Determines which web-service hosts the submission client talks to and the
/// environment code stamped into the access key.
/// - Test: the SRI certification environment ("pruebas", code 1).
/// - Production: the live environment (code 2).
///
/// # Examples
/// ```rust
/// use std::str::FromStr;
/// use factura_core::config::EnvironmentType;
///
/// let env = EnvironmentType::from_str("production")?;
/// assert_eq!(env.code(), "2");
/// # Ok::<(), factura_core::config::EnvironmentParseError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvironmentType {
    Test,
    Production,
}

/// Error returned when parsing an [`EnvironmentType`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvironmentParseError {
    #[error("invalid environment type: {input}")]
    Invalid { input: String },
}

impl FromStr for EnvironmentType {
    type Err = EnvironmentParseError;
    fn from_str(env: &str) -> Result<EnvironmentType, EnvironmentParseError> {
        match env.to_ascii_lowercase().as_str() {
            "test" | "development" => Ok(EnvironmentType::Test),
            "production" => Ok(EnvironmentType::Production),
            _ => Err(EnvironmentParseError::Invalid {
                input: env.to_string(),
            }),
        }
    }
}

impl EnvironmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::Test => "test",
            EnvironmentType::Production => "production",
        }
    }

    /// The single-digit code used in the access key and the `ambiente` element.
    pub fn code(&self) -> &'static str {
        match self {
            EnvironmentType::Test => "1",
            EnvironmentType::Production => "2",
        }
    }

    pub fn reception_url(&self) -> &'static str {
        match self {
            EnvironmentType::Test => {
                "https://celcer.sri.gob.ec/comprobantes-electronicos-ws/RecepcionComprobantesOffline"
            }
            EnvironmentType::Production => {
                "https://cel.sri.gob.ec/comprobantes-electronicos-ws/RecepcionComprobantesOffline"
            }
        }
    }

    pub fn authorization_url(&self) -> &'static str {
        match self {
            EnvironmentType::Test => {
                "https://celcer.sri.gob.ec/comprobantes-electronicos-ws/AutorizacionComprobantesOffline"
            }
            EnvironmentType::Production => {
                "https://cel.sri.gob.ec/comprobantes-electronicos-ws/AutorizacionComprobantesOffline"
            }
        }
    }
}

/// Configuration for the submission client.
///
/// Endpoint URLs default to the SRI hosts for the selected environment and can
/// be overridden per deployment (and pointed at a stub server in tests).
///
/// # Examples
/// ```rust
/// use factura_core::config::{Config, EnvironmentType};
///
/// let config = Config::new(EnvironmentType::Test)
///     .with_reception_url("http://localhost:9090/reception");
/// # let _ = config;
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    env: EnvironmentType,
    reception_url: Option<String>,
    authorization_url: Option<String>,
    timeout: Duration,
}

impl Config {
    pub fn new(env: EnvironmentType) -> Self {
        Self {
            env,
            reception_url: None,
            authorization_url: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_reception_url(mut self, url: impl Into<String>) -> Self {
        self.reception_url = Some(url.into());
        self
    }

    pub fn with_authorization_url(mut self, url: impl Into<String>) -> Self {
        self.authorization_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn env(&self) -> EnvironmentType {
        self.env
    }

    pub fn reception_url(&self) -> &str {
        self.reception_url
            .as_deref()
            .unwrap_or_else(|| self.env.reception_url())
    }

    pub fn authorization_url(&self) -> &str {
        self.authorization_url
            .as_deref()
            .unwrap_or_else(|| self.env.authorization_url())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(EnvironmentType::Test)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_environment_aliases() {
        assert_eq!(
            EnvironmentType::from_str("development").unwrap(),
            EnvironmentType::Test
        );
        assert_eq!(
            EnvironmentType::from_str("Production").unwrap(),
            EnvironmentType::Production
        );
        assert!(EnvironmentType::from_str("simulation").is_err());
    }

    #[test]
    fn environment_codes_match_sri_values() {
        assert_eq!(EnvironmentType::Test.code(), "1");
        assert_eq!(EnvironmentType::Production.code(), "2");
    }

    #[test]
    fn config_overrides_take_precedence() {
        let config = Config::new(EnvironmentType::Test)
            .with_reception_url("http://localhost:1/r")
            .with_authorization_url("http://localhost:1/a");
        assert_eq!(config.reception_url(), "http://localhost:1/r");
        assert_eq!(config.authorization_url(), "http://localhost:1/a");
    }

    #[test]
    fn config_defaults_to_environment_hosts() {
        let config = Config::new(EnvironmentType::Production);
        assert!(config.reception_url().starts_with("https://cel.sri.gob.ec/"));
        assert!(config
            .authorization_url()
            .contains("AutorizacionComprobantesOffline"));
        assert_eq!(config.timeout(), std::time::Duration::from_secs(30));
    }
}
