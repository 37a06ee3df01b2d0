//! Built-in channel IDs.
//!
//! Channels 0-255 are reserved for built-in use; this protocol only
//! defines the first four.

/// Control directives (flush, persist, end of input) and their replies
/// (ready, flush acknowledgment).
pub const CONTROL: u16 = 0;

/// Input records, supervisor to worker.
pub const RECORD: u16 = 1;

/// Result records, worker to supervisor.
pub const RESULT: u16 = 2;

/// State bytes for restore (input) and persist (output).
/// A zero-length frame closes the state stream.
pub const STATE: u16 = 3;

/// Returns a human-readable name for a channel ID, for diagnostics.
pub fn channel_name(id: u16) -> &'static str {
    match id {
        CONTROL => "CONTROL",
        RECORD => "RECORD",
        RESULT => "RESULT",
        STATE => "STATE",
        4..=255 => "RESERVED",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_cover_ranges() {
        assert_eq!(channel_name(CONTROL), "CONTROL");
        assert_eq!(channel_name(STATE), "STATE");
        assert_eq!(channel_name(9), "RESERVED");
        assert_eq!(channel_name(256), "UNKNOWN");
    }
}
