use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Bounded buffer of worker diagnostic lines.
///
/// Appends evict the oldest lines once `capacity` bytes are exceeded.
/// Reads return an owned snapshot, so eviction never touches text a caller
/// already holds.
#[derive(Debug)]
pub struct ErrorBuffer {
    capacity: usize,
    inner: Mutex<Lines>,
}

#[derive(Debug, Default)]
struct Lines {
    lines: VecDeque<String>,
    bytes: usize,
}

impl ErrorBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Lines::default()),
        }
    }

    /// Append one line. A line larger than the whole buffer keeps only its tail.
    pub fn push(&self, line: &str) {
        let line = tail(line, self.capacity);
        if line.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        while inner.bytes + line.len() > self.capacity {
            match inner.lines.pop_front() {
                Some(evicted) => inner.bytes -= evicted.len(),
                None => break,
            }
        }
        inner.bytes += line.len();
        inner.lines.push_back(line.to_string());
    }

    /// Current contents, one line per `\n`. Empty when nothing was reported.
    pub fn contents(&self) -> String {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = String::with_capacity(inner.bytes + inner.lines.len());
        for line in &inner.lines {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(line);
        }
        out
    }

    /// Largest number of bytes held; also the longest line the error reader keeps.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn tail(line: &str, max: usize) -> &str {
    if line.len() <= max {
        return line;
    }
    let mut start = line.len() - max;
    while !line.is_char_boundary(start) {
        start += 1;
    }
    &line[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_reads_empty_string() {
        let buffer = ErrorBuffer::new(64);
        assert_eq!(buffer.contents(), "");
    }

    #[test]
    fn reads_are_idempotent() {
        let buffer = ErrorBuffer::new(64);
        buffer.push("first");
        buffer.push("second");
        assert_eq!(buffer.contents(), "first\nsecond");
        assert_eq!(buffer.contents(), buffer.contents());

        buffer.push("third");
        assert_eq!(buffer.contents(), "first\nsecond\nthird");
    }

    #[test]
    fn oldest_lines_are_evicted() {
        let buffer = ErrorBuffer::new(10);
        buffer.push("aaaa");
        buffer.push("bbbb");
        let snapshot = buffer.contents();
        buffer.push("cccc");

        assert_eq!(buffer.contents(), "bbbb\ncccc");
        assert_eq!(snapshot, "aaaa\nbbbb");
    }

    #[test]
    fn oversized_line_keeps_tail_on_char_boundary() {
        let buffer = ErrorBuffer::new(3);
        buffer.push("old");
        buffer.push("aébc");
        assert_eq!(buffer.contents(), "bc");
    }
}
