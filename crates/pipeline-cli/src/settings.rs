//! Conversion from file settings to runtime channel configuration.

use event_channel::{BackoffConfig, ChannelConfig};
use pipeline_config_and_utils::{ChannelSettings, Config};
use std::time::Duration;

pub fn channel_config(settings: &ChannelSettings) -> ChannelConfig {
    ChannelConfig {
        max_batch_size: settings.max_batch_size,
        batch_interval: Duration::from_millis(settings.batch_interval_ms),
        max_in_flight: settings.max_in_flight,
        capacity: settings.capacity,
        backoff: BackoffConfig {
            base: Duration::from_millis(settings.backoff_base_ms),
            max: Duration::from_millis(settings.backoff_max_ms),
            jitter_ratio: settings.backoff_jitter,
        },
    }
}

/// Runtime config for `channel`, or defaults when the file does not list it.
pub fn config_for(config: &Config, channel: &str) -> ChannelConfig {
    config
        .channels
        .get(channel)
        .map(channel_config)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_default_config() {
        assert_eq!(
            channel_config(&ChannelSettings::default()),
            ChannelConfig::default()
        );
    }

    #[test]
    fn millisecond_fields_convert() {
        let settings = ChannelSettings {
            batch_interval_ms: 250,
            backoff_base_ms: 100,
            backoff_max_ms: 5_000,
            backoff_jitter: 0.0,
            ..Default::default()
        };
        let config = channel_config(&settings);
        assert_eq!(config.batch_interval, Duration::from_millis(250));
        assert_eq!(
            config.backoff,
            BackoffConfig::fixed(Duration::from_millis(100), Duration::from_secs(5))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unlisted_channel_uses_defaults() {
        let mut config = Config::default();
        config.channels.insert(
            "crashes".to_string(),
            ChannelSettings {
                max_batch_size: 1,
                ..Default::default()
            },
        );
        assert_eq!(config_for(&config, "crashes").max_batch_size, 1);
        assert_eq!(config_for(&config, "other"), ChannelConfig::default());
    }
}
