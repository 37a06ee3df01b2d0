use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters updated by the stream readers.
#[derive(Debug, Default)]
pub struct ReaderStats {
    results: AtomicU64,
    acks_matched: AtomicU64,
    acks_unknown: AtomicU64,
    state_blobs: AtomicU64,
    events_dropped: AtomicU64,
    malformed_output: AtomicU64,
    malformed_error_lines: AtomicU64,
}

/// Point-in-time copy of [`ReaderStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub results: u64,
    pub acks_matched: u64,
    pub acks_unknown: u64,
    pub state_blobs: u64,
    pub events_dropped: u64,
    pub malformed_output: u64,
    pub malformed_error_lines: u64,
}

impl ReaderStats {
    pub fn record_result(&self) {
        self.results.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack(&self, matched: bool) {
        let counter = if matched {
            &self.acks_matched
        } else {
            &self.acks_unknown
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_state_blob(&self) {
        self.state_blobs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_event(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_output(&self) {
        self.malformed_output.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_error_line(&self) {
        self.malformed_error_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            results: self.results.load(Ordering::Relaxed),
            acks_matched: self.acks_matched.load(Ordering::Relaxed),
            acks_unknown: self.acks_unknown.load(Ordering::Relaxed),
            state_blobs: self.state_blobs.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            malformed_output: self.malformed_output.load(Ordering::Relaxed),
            malformed_error_lines: self.malformed_error_lines.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = ReaderStats::default();
        stats.record_result();
        stats.record_result();
        stats.record_ack(true);
        stats.record_ack(false);
        stats.record_malformed_output();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.results, 2);
        assert_eq!(snapshot.acks_matched, 1);
        assert_eq!(snapshot.acks_unknown, 1);
        assert_eq!(snapshot.malformed_output, 1);
        assert_eq!(snapshot.events_dropped, 0);

        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(json["results"], 2);
    }
}
