//! Loop and shutdown tuning

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on closing all channels before they are force-closed
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_close_timeout")]
    pub close_timeout: Duration,

    /// Pause after binding the publish socket so early subscribers are not missed
    #[serde(
        with = "crate::domains::utils::serde_duration_millis",
        default = "default_publish_warmup"
    )]
    pub publish_warmup: Duration,

    /// Bounded queue depth between a socket driver and its users
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_close_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_publish_warmup() -> Duration {
    Duration::from_millis(500)
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            close_timeout: default_close_timeout(),
            publish_warmup: default_publish_warmup(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Validatable for RuntimeConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.close_timeout.as_secs(), "close_timeout", self.domain_name())?;
        validate_positive(self.channel_capacity, "channel_capacity", self.domain_name())?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "runtime"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.close_timeout, Duration::from_secs(15));
        assert_eq!(config.publish_warmup, Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml() {
        let config: RuntimeConfig = serde_yaml::from_str("publish_warmup: 50\n").unwrap();
        assert_eq!(config.publish_warmup, Duration::from_millis(50));
        assert_eq!(config.close_timeout, Duration::from_secs(15));

        let config: RuntimeConfig = serde_yaml::from_str("close_timeout: 0\n").unwrap();
        assert!(config.validate().is_err());
    }
}
