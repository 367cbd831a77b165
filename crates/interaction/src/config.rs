//! Engine configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Environment variable read by [`Config::from_env`].
pub const INTERACTION_TIMEOUT_ENV: &str = "MAL_INTERACTION_TIMEOUT_MS";

/// Configuration of an [`InteractionContext`](crate::InteractionContext).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Deadline for the terminal stage of consumer interactions, in
    /// milliseconds. Zero disables timeout supervision entirely.
    pub interaction_timeout_ms: u64,
}

impl Config {
    /// Sets the interaction timeout.
    #[must_use]
    pub fn with_interaction_timeout(mut self, timeout: Duration) -> Self {
        self.interaction_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// The interaction timeout, `None` when supervision is disabled.
    pub const fn interaction_timeout(&self) -> Option<Duration> {
        if self.interaction_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.interaction_timeout_ms))
        }
    }

    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the variable is set but not a number.
    pub fn from_env() -> Result<Self> {
        match std::env::var(INTERACTION_TIMEOUT_ENV) {
            Ok(value) => value
                .trim()
                .parse()
                .map(|interaction_timeout_ms| Self {
                    interaction_timeout_ms,
                })
                .map_err(|e| Error::Config(format!("{INTERACTION_TIMEOUT_ENV}={value}: {e}"))),
            Err(_) => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_disables_supervision() {
        assert_eq!(Config::default().interaction_timeout(), None);

        let config = Config::default().with_interaction_timeout(Duration::from_millis(250));
        assert_eq!(config.interaction_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());

        let config: Config = serde_json::from_str(r#"{"interaction_timeout_ms": 100}"#).unwrap();
        assert_eq!(config.interaction_timeout(), Some(Duration::from_millis(100)));
    }
}
