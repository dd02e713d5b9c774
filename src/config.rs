use std::time::Duration;

use crate::fusion::{CalibrateTrigger, FusionSettings, WorldMapping};
use crate::protocol::ButtonLayout;
use crate::types::{ChannelConfig, ChannelKind, ChannelSet};
use crate::{Result, TrackerError};

/// Everything needed to activate a [`Tracker`](crate::Tracker).
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub channels: ChannelSet<ChannelConfig>,
    pub fusion: FusionSettings,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            channels: ChannelSet::from_fn(|_| ChannelConfig::default()),
            fusion: FusionSettings::default(),
        }
    }
}

impl TrackerConfig {
    /// Defaults overridden by `PENTRACK_*` environment variables.
    ///
    /// - `PENTRACK_XY_PORT`, `PENTRACK_Z_PORT`, `PENTRACK_ORIENTATION_PORT`
    /// - `PENTRACK_BAUD`, `PENTRACK_RECONNECT_MS`, `PENTRACK_QUEUE_DEPTH`,
    ///   `PENTRACK_READ_TIMEOUT_MS` (applied to all channels)
    /// - `PENTRACK_CALIBRATE_TRIGGER`: `level` | `edge`
    /// - `PENTRACK_BUTTON_LAYOUT`: `calibrate-first` | `draw-first`
    /// - `PENTRACK_WORLD_MAPPING`: `pen` | `bench`
    ///
    /// Unparsable values fall back to the default with a warning.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = EnvSource { lookup };
        let mut config = TrackerConfig::default();

        let baud = env.parse("PENTRACK_BAUD", ChannelConfig::DEFAULT_BAUD_RATE);
        let reconnect_ms = env.parse(
            "PENTRACK_RECONNECT_MS",
            ChannelConfig::DEFAULT_RECONNECT_DELAY.as_millis() as u64,
        );
        let depth = env.parse("PENTRACK_QUEUE_DEPTH", ChannelConfig::DEFAULT_QUEUE_DEPTH);
        let timeout_ms = env.parse(
            "PENTRACK_READ_TIMEOUT_MS",
            ChannelConfig::DEFAULT_READ_TIMEOUT.as_millis() as u64,
        );

        for (kind, channel) in config.channels.iter_mut() {
            if let Some(port) = env.string(port_var(kind)) {
                channel.port = port;
            }
            channel.baud_rate = baud;
            channel.reconnect_delay = Duration::from_millis(reconnect_ms);
            channel.max_queue_depth = depth;
            channel.read_timeout = Duration::from_millis(timeout_ms);
        }

        config.fusion.calibrate_trigger = match env.keyword("PENTRACK_CALIBRATE_TRIGGER").as_deref() {
            None => CalibrateTrigger::default(),
            Some("level") => CalibrateTrigger::Level,
            Some("edge") => CalibrateTrigger::Edge,
            Some(other) => {
                log::warn!("Unknown PENTRACK_CALIBRATE_TRIGGER='{}', using level (supported: level|edge)", other);
                CalibrateTrigger::Level
            }
        };

        config.fusion.layout = match env.keyword("PENTRACK_BUTTON_LAYOUT").as_deref() {
            None => ButtonLayout::default(),
            Some("calibrate-first") => ButtonLayout::CALIBRATE_FIRST,
            Some("draw-first") => ButtonLayout::DRAW_FIRST,
            Some(other) => {
                log::warn!(
                    "Unknown PENTRACK_BUTTON_LAYOUT='{}', using calibrate-first (supported: calibrate-first|draw-first)",
                    other
                );
                ButtonLayout::CALIBRATE_FIRST
            }
        };

        config.fusion.mapping = match env.keyword("PENTRACK_WORLD_MAPPING").as_deref() {
            None => WorldMapping::default(),
            Some("pen") => WorldMapping::PEN,
            Some("bench") => WorldMapping::BENCH,
            Some(other) => {
                log::warn!("Unknown PENTRACK_WORLD_MAPPING='{}', using pen (supported: pen|bench)", other);
                WorldMapping::PEN
            }
        };

        config.validate()?;
        log::info!(
            "Config: xy={} z={} orientation={} baud={} reconnect={}ms depth={} timeout={}ms trigger={:?}",
            config.channels.xy.port,
            config.channels.z.port,
            config.channels.orientation.port,
            baud,
            reconnect_ms,
            depth,
            timeout_ms,
            config.fusion.calibrate_trigger,
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_channels(&self.channels)?;
        self.fusion.layout.validate()
    }
}

/// Reject channel settings a reader cannot work with.
pub fn validate_channels(channels: &ChannelSet<ChannelConfig>) -> Result<()> {
    for (kind, channel) in channels.iter() {
        if channel.port.trim().is_empty() {
            return Err(TrackerError::InvalidConfig(format!("{} port is empty", kind)));
        }
        if channel.baud_rate == 0 {
            return Err(TrackerError::InvalidConfig(format!("{} baud rate is zero", kind)));
        }
        if channel.max_queue_depth == 0 {
            return Err(TrackerError::InvalidConfig(format!("{} queue depth is zero", kind)));
        }
        if channel.read_timeout.is_zero() {
            return Err(TrackerError::InvalidConfig(format!("{} read timeout is zero", kind)));
        }
    }
    Ok(())
}

fn port_var(kind: ChannelKind) -> &'static str {
    match kind {
        ChannelKind::Xy => "PENTRACK_XY_PORT",
        ChannelKind::Z => "PENTRACK_Z_PORT",
        ChannelKind::Orientation => "PENTRACK_ORIENTATION_PORT",
    }
}

struct EnvSource<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvSource<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn keyword(&self, name: &str) -> Option<String> {
        self.string(name).map(|v| v.to_ascii_lowercase())
    }

    fn parse<T: std::str::FromStr + Copy + std::fmt::Display>(&self, name: &str, default: T) -> T {
        match self.string(name) {
            None => default,
            Some(v) => v.parse().unwrap_or_else(|_| {
                log::warn!("Invalid {}='{}', using {}", name, v, default);
                default
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, TrackerConfig::default());
        assert_eq!(config.channels.xy.port, "COM3");
        assert_eq!(config.channels.z.baud_rate, 9600);
        assert_eq!(config.channels.orientation.max_queue_depth, 1);
        assert_eq!(config.channels.xy.read_timeout, Duration::from_millis(50));
        assert_eq!(config.channels.xy.reconnect_delay, Duration::from_millis(1000));
    }

    #[test]
    fn test_overrides() {
        let config = TrackerConfig::from_lookup(lookup(&[
            ("PENTRACK_XY_PORT", "/dev/rfcomm0"),
            ("PENTRACK_Z_PORT", " /dev/rfcomm1 "),
            ("PENTRACK_ORIENTATION_PORT", "/dev/rfcomm2"),
            ("PENTRACK_BAUD", "19200"),
            ("PENTRACK_RECONNECT_MS", "250"),
            ("PENTRACK_CALIBRATE_TRIGGER", "EDGE"),
            ("PENTRACK_BUTTON_LAYOUT", "draw-first"),
            ("PENTRACK_WORLD_MAPPING", "bench"),
        ]))
        .unwrap();
        assert_eq!(config.channels.xy.port, "/dev/rfcomm0");
        assert_eq!(config.channels.z.port, "/dev/rfcomm1");
        assert_eq!(config.channels.orientation.baud_rate, 19200);
        assert_eq!(config.channels.z.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.fusion.calibrate_trigger, CalibrateTrigger::Edge);
        assert_eq!(config.fusion.layout, ButtonLayout::DRAW_FIRST);
        assert_eq!(config.fusion.mapping, WorldMapping::BENCH);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = TrackerConfig::from_lookup(lookup(&[
            ("PENTRACK_BAUD", "fast"),
            ("PENTRACK_CALIBRATE_TRIGGER", "sometimes"),
        ]))
        .unwrap();
        assert_eq!(config.channels.xy.baud_rate, 9600);
        assert_eq!(config.fusion.calibrate_trigger, CalibrateTrigger::Level);
    }

    #[test]
    fn test_zero_depth_rejected() {
        let err = TrackerConfig::from_lookup(lookup(&[("PENTRACK_QUEUE_DEPTH", "0")])).unwrap_err();
        assert!(matches!(err, TrackerError::InvalidConfig(_)));
    }
}
