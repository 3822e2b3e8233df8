use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RelayError, Result};
use crate::hub::{HubConfig, PayloadMode, SenderPolicy, DEFAULT_SEND_BUFFER};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Relay instances to run, one listening port each
    pub relays: Vec<RelayConfig>,
    /// Liveness policy shared by every connection
    pub connection: ConnectionPolicy,
    /// Logging configuration
    pub log: LogConfig,
}

/// Named relay instance defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayPreset {
    /// Sensor readings forwarded byte-for-byte (default port 8080)
    HeartRate,
    /// Mode selections forwarded as re-serialized JSON (default port 3000)
    ModeSelector,
}

impl RelayPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HeartRate => "heart_rate",
            Self::ModeSelector => "mode_selector",
        }
    }

    /// Prefix for the per-instance environment variables
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Self::HeartRate => "HEART_RATE",
            Self::ModeSelector => "MODE_SELECTOR",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::HeartRate => 8080,
            Self::ModeSelector => 3000,
        }
    }

    pub fn default_payload_mode(&self) -> PayloadMode {
        match self {
            Self::HeartRate => PayloadMode::Verbatim,
            Self::ModeSelector => PayloadMode::Canonical,
        }
    }
}

impl FromStr for RelayPreset {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "heart_rate" | "heartrate" | "heart-rate" => Ok(Self::HeartRate),
            "mode_selector" | "modeselector" | "mode-selector" | "viz_modes" => {
                Ok(Self::ModeSelector)
            }
            other => Err(RelayError::InvalidConfig(format!(
                "unknown relay instance: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for RelayPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub preset: RelayPreset,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Port to bind to (default: per preset)
    pub port: u16,
    /// How validated payloads are forwarded
    pub payload_mode: PayloadMode,
    /// Whether the sender gets its own payload back
    pub sender_policy: SenderPolicy,
    /// Outbound queue capacity per connection
    pub send_buffer: usize,
}

impl RelayConfig {
    /// Preset defaults bound to `host`
    pub fn from_preset(preset: RelayPreset, host: &str) -> Self {
        Self {
            preset,
            host: host.to_string(),
            port: preset.default_port(),
            payload_mode: preset.default_payload_mode(),
            sender_policy: SenderPolicy::Include,
            send_buffer: DEFAULT_SEND_BUFFER,
        }
    }

    pub fn name(&self) -> &'static str {
        self.preset.as_str()
    }

    /// Get the listen address
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            name: self.name().to_string(),
            payload_mode: self.payload_mode,
            sender_policy: self.sender_policy,
            send_buffer: self.send_buffer,
        }
    }
}

/// Liveness policy for open connections.
///
/// Both knobs default to off, which leaves a connection open until the
/// transport reports a close or an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionPolicy {
    /// Close a connection that sends nothing (not even a pong) for this long
    pub idle_timeout: Option<Duration>,
    /// Send a ping this often so live peers answer with a pong
    pub ping_interval: Option<Duration>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(RelayError::InvalidConfig(format!(
                "LOG_FORMAT must be json or pretty, got {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: LogFormat,
}

impl LogConfig {
    /// Filter used when RUST_LOG is not set
    pub fn default_filter(&self) -> String {
        format!("fanout={},tower_http=info", self.level)
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let host = get_env_or("RELAY_HOST", "0.0.0.0");
        if host.trim().is_empty() {
            return Err(RelayError::InvalidConfig("RELAY_HOST must not be empty".into()));
        }

        let send_buffer: usize = parse_env("RELAY_SEND_BUFFER", DEFAULT_SEND_BUFFER)?;
        if send_buffer == 0 {
            return Err(RelayError::InvalidConfig(
                "RELAY_SEND_BUFFER must be at least 1".into(),
            ));
        }

        let mut relays: Vec<RelayConfig> = Vec::new();
        for name in get_env_or("RELAY_INSTANCES", "heart_rate,mode_selector")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            let preset: RelayPreset = name.parse()?;
            if relays.iter().any(|r| r.preset == preset) {
                return Err(RelayError::InvalidConfig(format!(
                    "relay instance {} listed more than once",
                    preset
                )));
            }
            relays.push(relay_from_env(preset, &host, send_buffer)?);
        }

        if relays.is_empty() {
            return Err(RelayError::InvalidConfig(
                "RELAY_INSTANCES must name at least one relay".into(),
            ));
        }
        for (i, relay) in relays.iter().enumerate() {
            if relays[..i].iter().any(|other| other.port == relay.port) {
                return Err(RelayError::InvalidConfig(format!(
                    "relay {} reuses port {}",
                    relay.name(),
                    relay.port
                )));
            }
        }

        Ok(Config {
            relays,
            connection: ConnectionPolicy {
                idle_timeout: parse_secs("RELAY_IDLE_TIMEOUT_SECS")?,
                ping_interval: parse_secs("RELAY_PING_INTERVAL_SECS")?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty").parse()?,
            },
        })
    }
}

fn relay_from_env(preset: RelayPreset, host: &str, send_buffer: usize) -> Result<RelayConfig> {
    let prefix = preset.env_prefix();
    let mut relay = RelayConfig::from_preset(preset, host);

    relay.port = parse_env(&format!("{}_PORT", prefix), relay.port)?;
    relay.payload_mode = parse_env(&format!("{}_PAYLOAD_MODE", prefix), relay.payload_mode)?;
    relay.sender_policy =
        SenderPolicy::from_include(parse_env(&format!("{}_INCLUDE_SENDER", prefix), true)?);
    relay.send_buffer = send_buffer;

    Ok(relay)
}

/// Seconds from the environment; 0 or unset disables the setting
fn parse_secs(key: &str) -> Result<Option<Duration>> {
    let secs: u64 = parse_env(key, 0)?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

/// Parse an environment variable, falling back to `default` when unset
fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e| {
            RelayError::InvalidConfig(format!("{} has an invalid value {:?}: {}", key, raw, e))
        }),
        _ => Ok(default),
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
