use serde::{Deserialize, Serialize};

use crate::error::{Result, SupervisorError};

/// CONTROL directive: flush buffered worker state up to the current input position.
pub const CONTROL_FLUSH: &str = "flush";
/// CONTROL directive: stream worker state out on the STATE channel.
pub const CONTROL_PERSIST: &str = "persist";
/// CONTROL directive: no more input will follow.
pub const CONTROL_END_OF_INPUT: &str = "end_of_input";
/// CONTROL reply: the worker accepts records.
pub const CONTROL_READY: &str = "ready";
/// CONTROL reply: a flush directive has been processed.
pub const CONTROL_FLUSH_ACK: &str = "flush_ack";

/// CONTROL channel message payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ControlMessage {
    /// Create a flush directive carrying its token and parameters.
    pub fn flush(token: &str, params: &FlushParams) -> Result<Self> {
        let directive = FlushDirective {
            id: token.to_string(),
            params: params.clone(),
        };
        Ok(Self {
            msg_type: CONTROL_FLUSH.to_string(),
            payload: Some(serde_json::to_value(directive)?),
        })
    }

    /// Create a persist directive.
    pub fn persist() -> Self {
        Self {
            msg_type: CONTROL_PERSIST.to_string(),
            payload: None,
        }
    }

    /// Create an end-of-input directive.
    pub fn end_of_input() -> Self {
        Self {
            msg_type: CONTROL_END_OF_INPUT.to_string(),
            payload: None,
        }
    }

    /// Create a ready announcement.
    pub fn ready(announcement: &ReadyAnnouncement) -> Result<Self> {
        Ok(Self {
            msg_type: CONTROL_READY.to_string(),
            payload: Some(serde_json::to_value(announcement)?),
        })
    }

    /// Create a flush acknowledgment.
    pub fn flush_ack(ack: &FlushAck) -> Result<Self> {
        Ok(Self {
            msg_type: CONTROL_FLUSH_ACK.to_string(),
            payload: Some(serde_json::to_value(ack)?),
        })
    }

    /// Serialize for a CONTROL frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a CONTROL frame payload.
    pub fn from_bytes(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Decode the payload into a typed body.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let value = self.payload.clone().ok_or_else(|| {
            SupervisorError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("'{}' directive has no payload", self.msg_type),
            ))
        })?;
        Ok(serde_json::from_value(value)?)
    }
}

/// What kind of flush is requested.
///
/// Time values are opaque epoch-based integers owned by the worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlushParams {
    /// Ask the worker to calculate interim results.
    #[serde(default)]
    pub calc_interim: bool,
    /// Start of the interim result range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    /// End of the interim result range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
    /// Advance the worker's clock to this time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advance_time: Option<i64>,
    /// Skip the worker's clock to this time without producing results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_time: Option<i64>,
}

impl FlushParams {
    /// A flush that also calculates interim results.
    pub fn interim() -> Self {
        Self {
            calc_interim: true,
            ..Self::default()
        }
    }

    pub fn with_range(mut self, start: i64, end: i64) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn with_advance_time(mut self, time: i64) -> Self {
        self.advance_time = Some(time);
        self
    }

    pub fn with_skip_time(mut self, time: i64) -> Self {
        self.skip_time = Some(time);
        self
    }

    /// Check parameter consistency before anything is written.
    pub fn validate(&self) -> Result<()> {
        if !self.calc_interim && (self.start.is_some() || self.end.is_some()) {
            return Err(SupervisorError::InvalidFlushParams(
                "start/end require calc_interim".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if end <= start {
                return Err(SupervisorError::InvalidFlushParams(format!(
                    "end ({end}) must be after start ({start})"
                )));
            }
        }
        if self.advance_time.is_some() && self.skip_time.is_some() {
            return Err(SupervisorError::InvalidFlushParams(
                "advance_time and skip_time are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct FlushDirective {
    id: String,
    #[serde(flatten)]
    params: FlushParams,
}

/// Body of a `flush` directive as the worker sees it.
pub fn parse_flush_directive(message: &ControlMessage) -> Result<(String, FlushParams)> {
    let directive: FlushDirective = message.payload_as()?;
    Ok((directive.id, directive.params))
}

/// Body of a `flush_ack` reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlushAck {
    /// Token of the flush directive being acknowledged.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_finalized_bucket_end: Option<i64>,
    #[serde(default)]
    pub refresh_required: bool,
}

impl FlushAck {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            last_finalized_bucket_end: None,
            refresh_required: false,
        }
    }
}

/// Body of a `ready` reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadyAnnouncement {
    pub protocol: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}
