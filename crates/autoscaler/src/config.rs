//! Runtime configuration from flags and environment variables.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::error::{Error, Result};
use crate::resources::parse_memory;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Node pool autoscaler for ACK clusters.
#[derive(Clone, Parser)]
#[command(name = "node-autoscaler", version, about)]
pub struct Config {
    /// Log level used when `RUST_LOG` is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "debug")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Path to a kubeconfig file; in-cluster config is used when unset
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Interval at which cached pods are re-evaluated
    #[arg(long = "resync", env = "RE_SYNC", default_value = "30s", value_parser = parse_duration)]
    pub resync: Duration,

    /// Maximum time between batch dispatches
    #[arg(long, env = "TRIGGER_TIME", default_value = "1m", value_parser = parse_duration)]
    pub trigger_interval: Duration,

    /// Idle pod count that dispatches a batch immediately
    #[arg(long, env = "TRIGGER_NO", default_value_t = 10)]
    pub trigger_threshold: usize,

    /// Alibaba Cloud AccessKey ID
    #[arg(long, env = "ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key_id: String,

    /// Alibaba Cloud AccessKey secret
    #[arg(long, env = "ACCESS_KEY_SECRET", hide_env_values = true)]
    pub access_key_secret: String,

    /// Memory of one node in the target pool (e.g. 28Gi)
    #[arg(long, env = "MEMORY_STANDARD", default_value = "28Gi", value_parser = parse_memory_arg)]
    pub memory_standard: u64,

    /// Delay between cluster and node pool readiness polls
    #[arg(long, env = "POLL_INTERVAL", default_value = "10s", value_parser = parse_duration)]
    pub poll_interval: Duration,

    /// Delay before a dispatched pod is eligible for another batch
    #[arg(long, env = "COOLDOWN", default_value = "10m", value_parser = parse_duration)]
    pub cooldown: Duration,

    /// Batches buffered between the trigger and the coordinator
    #[arg(long, env = "BATCH_QUEUE_CAPACITY", default_value_t = 100)]
    pub batch_queue_capacity: usize,
}

impl Config {
    /// Reject values the components cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.access_key_id.trim().is_empty() || self.access_key_secret.trim().is_empty() {
            return Err(Error::Config(
                "ACCESS_KEY_ID and ACCESS_KEY_SECRET must be set".to_string(),
            ));
        }
        if self.trigger_threshold == 0 {
            return Err(Error::Config("TRIGGER_NO must be at least 1".to_string()));
        }
        if self.batch_queue_capacity == 0 {
            return Err(Error::Config(
                "BATCH_QUEUE_CAPACITY must be at least 1".to_string(),
            ));
        }
        if self.memory_standard == 0 {
            return Err(Error::Config("MEMORY_STANDARD must be non-zero".to_string()));
        }
        for (name, value) in [
            ("RE_SYNC", self.resync),
            ("TRIGGER_TIME", self.trigger_interval),
            ("POLL_INTERVAL", self.poll_interval),
            ("COOLDOWN", self.cooldown),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }

    /// Default tracing filter directive derived from `LOG_LEVEL`.
    #[must_use]
    pub fn log_directive(&self) -> String {
        self.log_level.trim().to_lowercase()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("kubeconfig", &self.kubeconfig)
            .field("resync", &self.resync)
            .field("trigger_interval", &self.trigger_interval)
            .field("trigger_threshold", &self.trigger_threshold)
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<redacted>")
            .field("memory_standard", &self.memory_standard)
            .field("poll_interval", &self.poll_interval)
            .field("cooldown", &self.cooldown)
            .field("batch_queue_capacity", &self.batch_queue_capacity)
            .finish()
    }
}

/// Parse a duration such as `500ms`, `30s`, `10m` or `1h30m`.
///
/// A bare number is taken as seconds.
pub fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    let s = raw.trim().to_lowercase();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s.as_str();
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in '{raw}'"))?;
        if digits == 0 {
            return Err(format!("invalid duration '{raw}'"));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid number in '{raw}'"))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.saturating_mul(60)),
            "h" => Duration::from_secs(value.saturating_mul(3600)),
            unit => return Err(format!("unknown unit '{unit}' in '{raw}'")),
        };
        total = total.saturating_add(part);
        rest = &rest[unit_len..];
    }
    Ok(total)
}

fn parse_memory_arg(raw: &str) -> std::result::Result<u64, String> {
    parse_memory(raw.trim()).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const GI: u64 = 1 << 30;

    fn parse(extra: &[&str]) -> Config {
        let mut args = vec![
            "node-autoscaler",
            "--access-key-id",
            "id",
            "--access-key-secret",
            "secret",
        ];
        args.extend_from_slice(extra);
        Config::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration(" 45 ").unwrap(), Duration::from_secs(45));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_ok());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("m").is_err());
        assert!(parse_duration("5m3").is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = parse(&[
            "--trigger-threshold",
            "3",
            "--trigger-interval",
            "2m",
            "--memory-standard",
            "60Gi",
            "--cooldown",
            "90s",
            "--log-format",
            "json",
        ]);
        assert_eq!(config.trigger_threshold, 3);
        assert_eq!(config.trigger_interval, Duration::from_secs(120));
        assert_eq!(config.memory_standard, 60 * GI);
        assert_eq!(config.cooldown, Duration::from_secs(90));
        assert_eq!(config.log_format, LogFormat::Json);
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_memory_standard_is_rejected() {
        let result = Config::try_parse_from([
            "node-autoscaler",
            "--access-key-id",
            "id",
            "--access-key-secret",
            "secret",
            "--memory-standard",
            "plenty",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = parse(&[]);
        config.trigger_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = parse(&[]);
        config.poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = parse(&[]);
        config.access_key_secret = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = parse(&[]);
        let rendered = format!("{config:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("\"secret\""));
    }

    #[test]
    fn test_log_directive_is_lowercased() {
        let mut config = parse(&[]);
        config.log_level = "DEBUG".to_string();
        assert_eq!(config.log_directive(), "debug");
    }
}
