use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

use crate::logger::LogLevel;

/// What dispatch does when a descriptor of the current batch was removed by
/// an earlier callback of the same batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BatchPolicy {
    /// Drop every remaining pair of the batch.
    #[default]
    AbortBatch,
    /// Drop only the vanished descriptor and continue with the next pair.
    SkipDescriptor,
}

impl FromStr for BatchPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "abort" => Ok(BatchPolicy::AbortBatch),
            "skip" => Ok(BatchPolicy::SkipDescriptor),
            _ => Err(()),
        }
    }
}

/// Construction parameters of a [`crate::os::Multiplexer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MuxConfig {
    pub edge_triggered: bool,
    /// Upper bound on ready pairs fetched per wait call.
    pub max_events: usize,
    pub batch_policy: BatchPolicy,
}

impl Default for MuxConfig {
    fn default() -> Self {
        MuxConfig { edge_triggered: false, max_events: 10, batch_policy: BatchPolicy::AbortBatch }
    }
}

/// Demo server runtime configuration (simple key=value format).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub backlog: u32,
    pub edge_triggered: bool,
    pub max_events: usize,
    /// Negative blocks until an event arrives.
    pub wait_timeout_ms: i64,
    pub batch_policy: BatchPolicy,
    pub log_level: LogLevel,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file")]
    Io(#[from] io::Error),
    #[error("malformed config line: {0:?}")]
    InvalidFormat(String),
    #[error("invalid value {value:?} for key {key:?}")]
    InvalidValue { key: String, value: String },
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 3000,
            backlog: 5,
            edge_triggered: true,
            max_events: 10,
            wait_timeout_ms: -1,
            batch_policy: BatchPolicy::AbortBatch,
            log_level: LogLevel::Info,
        }
    }
}

fn parse_value<T: FromStr>(key: &str, val: &str) -> Result<T, ConfigError> {
    val.parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: val.to_string(),
    })
}

impl ServerConfig {
    /// Load configuration from a key=value file. Keys that are absent keep
    /// their default.
    ///
    /// ```text
    /// host=127.0.0.1
    /// port=3000
    /// edge_triggered=true
    /// max_events=10
    /// batch_policy=abort
    /// ```
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::parse(&fs::read_to_string(path)?)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut cfg = ServerConfig::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else {
                return Err(ConfigError::InvalidFormat(line.to_string()));
            };
            let (key, val) = (key.trim(), val.trim());

            match key {
                "host" => cfg.host = val.to_string(),
                "port" => cfg.port = parse_value(key, val)?,
                "backlog" => cfg.backlog = parse_value(key, val)?,
                "edge_triggered" => cfg.edge_triggered = parse_value(key, val)?,
                "max_events" => cfg.max_events = parse_value(key, val)?,
                "wait_timeout_ms" => cfg.wait_timeout_ms = parse_value(key, val)?,
                "batch_policy" => cfg.batch_policy = parse_value(key, val)?,
                "log_level" => cfg.log_level = parse_value(key, val)?,
                _ => return Err(ConfigError::InvalidFormat(line.to_string())),
            }
        }

        if cfg.max_events == 0 {
            return Err(ConfigError::InvalidValue { key: "max_events".into(), value: "0".into() });
        }
        Ok(cfg)
    }

    pub fn mux_config(&self) -> MuxConfig {
        MuxConfig {
            edge_triggered: self.edge_triggered,
            max_events: self.max_events,
            batch_policy: self.batch_policy,
        }
    }

    /// `None` means block indefinitely.
    pub fn wait_timeout(&self) -> Option<std::time::Duration> {
        u64::try_from(self.wait_timeout_ms).ok().map(std::time::Duration::from_millis)
    }
}
