use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use workerctl_frame::{FrameConfig, DEFAULT_MAX_PAYLOAD};

use crate::error::{Result, SupervisorError};

/// Default wait for the error stream to end before a worker is presumed alive.
pub const DEFAULT_LIVENESS_GRACE: Duration = Duration::from_millis(45);

/// How `start()` decides that the worker accepts records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReadinessPolicy {
    /// Ready as soon as the streams are wired.
    #[default]
    Assume,
    /// Wait for the worker's `ready` directive.
    Handshake {
        #[serde(deserialize_with = "deserialize_duration")]
        timeout: Duration,
    },
}

/// Controller behavior knobs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// Bounded wait for error-stream EOF in `is_process_alive_after_waiting`.
    /// Tuned for scheduling jitter, not a protocol constant.
    #[serde(deserialize_with = "deserialize_duration")]
    pub liveness_grace: Duration,
    /// Time a worker gets to exit after `end_of_input` before it is killed.
    #[serde(deserialize_with = "deserialize_duration")]
    pub shutdown_timeout: Duration,
    /// Slice length used by `wait_for_flush` between liveness checks.
    #[serde(deserialize_with = "deserialize_duration")]
    pub flush_poll_interval: Duration,
    /// Maximum bytes retained by the error buffer.
    pub error_buffer_capacity: usize,
    /// Capacity of the result/state event channel.
    pub event_buffer: usize,
    /// Resolved flush tokens remembered for `flush_state`.
    pub flush_history: usize,
    /// Prefix for generated flush tokens.
    pub token_prefix: String,
    /// Bytes per `STATE` frame during restore.
    pub state_chunk_size: usize,
    /// Frame payload limit for both stream directions.
    pub max_payload_size: usize,
    pub readiness: ReadinessPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            liveness_grace: DEFAULT_LIVENESS_GRACE,
            shutdown_timeout: Duration::from_secs(5),
            flush_poll_interval: Duration::from_secs(1),
            error_buffer_capacity: 64 * 1024,
            event_buffer: 1024,
            flush_history: 256,
            token_prefix: String::new(),
            state_chunk_size: 64 * 1024,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            readiness: ReadinessPolicy::Assume,
        }
    }
}

impl ControllerConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            SupervisorError::Config(format!("failed reading {}: {err}", path.display()))
        })?;
        Self::from_json_str(&raw)
            .map_err(|err| SupervisorError::Config(format!("{}: {err}", path.display())))
    }

    /// Parse and validate a JSON config document.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|err| SupervisorError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall or disable a component.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.error_buffer_capacity == 0, "error_buffer_capacity"),
            (self.event_buffer == 0, "event_buffer"),
            (self.state_chunk_size == 0, "state_chunk_size"),
            (self.max_payload_size == 0, "max_payload_size"),
            (self.flush_poll_interval.is_zero(), "flush_poll_interval"),
        ];
        if let Some((_, field)) = checks.iter().find(|(bad, _)| *bad) {
            return Err(SupervisorError::Config(format!(
                "{field} must be greater than zero"
            )));
        }
        if self.state_chunk_size > self.max_payload_size {
            return Err(SupervisorError::Config(
                "state_chunk_size must not exceed max_payload_size".to_string(),
            ));
        }
        Ok(())
    }

    /// Frame settings for the input stream. Flushing is left to the caller.
    pub(crate) fn input_frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_payload_size,
            flush_each_frame: false,
        }
    }

    pub(crate) fn output_frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_payload_size,
            ..FrameConfig::default()
        }
    }
}

/// Parse a duration such as `45ms`, `5s` or `3` (seconds).
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(SupervisorError::Config(
            "duration must not be empty".to_string(),
        ));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| SupervisorError::Config(format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(SupervisorError::Config(
            "duration must be greater than zero".to_string(),
        ));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ControllerConfig::default();
        assert_eq!(config.liveness_grace, Duration::from_millis(45));
        assert_eq!(config.readiness, ReadinessPolicy::Assume);
        assert!(config.token_prefix.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("45ms").unwrap(), Duration::from_millis(45));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ControllerConfig::from_json_str(
            r#"{
                "liveness_grace": "120ms",
                "token_prefix": "job-7-",
                "readiness": { "mode": "handshake", "timeout": "2s" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.liveness_grace, Duration::from_millis(120));
        assert_eq!(config.token_prefix, "job-7-");
        assert_eq!(
            config.readiness,
            ReadinessPolicy::Handshake {
                timeout: Duration::from_secs(2)
            }
        );
        assert_eq!(config.event_buffer, ControllerConfig::default().event_buffer);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = ControllerConfig::from_json_str(r#"{ "grace": "45ms" }"#).unwrap_err();
        assert!(matches!(err, SupervisorError::Config(_)));
    }

    #[test]
    fn zero_sized_buffers_are_rejected() {
        let err = ControllerConfig::from_json_str(r#"{ "event_buffer": 0 }"#).unwrap_err();
        assert!(err.to_string().contains("event_buffer"));
    }

    #[test]
    fn bad_duration_string_is_reported() {
        let err =
            ControllerConfig::from_json_str(r#"{ "shutdown_timeout": "soon" }"#).unwrap_err();
        assert!(err.to_string().contains("invalid duration"));
    }

    #[test]
    fn loads_from_file() {
        let dir = std::env::temp_dir().join(format!(
            "workerctl-config-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("controller.json");
        std::fs::write(&path, r#"{ "flush_history": 8 }"#).unwrap();

        let config = ControllerConfig::from_json_file(&path).unwrap();
        assert_eq!(config.flush_history, 8);

        let missing = ControllerConfig::from_json_file(dir.join("missing.json")).unwrap_err();
        assert!(matches!(missing, SupervisorError::Config(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
