use std::io::{self, Write};

use bytes::Bytes;
use workerctl_frame::{FrameError, FrameWriter, STATE};

/// Data handed off by the output stream reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Payload of one `RESULT` frame. Its encoding belongs to the worker.
    Result(Bytes),
    /// A complete persisted state blob, assembled from `STATE` frames.
    State(Bytes),
}

/// Restore-side state stream.
///
/// Bytes written here become `STATE` frames of at most `chunk_size` bytes on
/// the worker's input stream. The stream is terminated by a zero-length
/// `STATE` frame, written by [`StateSink::finish`] or, failing that, on drop.
pub struct StateSink<'a, W: Write> {
    writer: &'a mut FrameWriter<W>,
    pending: Vec<u8>,
    chunk_size: usize,
    written: u64,
    finished: bool,
}

impl<'a, W: Write> StateSink<'a, W> {
    pub(crate) fn new(writer: &'a mut FrameWriter<W>, chunk_size: usize) -> Self {
        Self {
            writer,
            pending: Vec::with_capacity(chunk_size.min(64 * 1024)),
            chunk_size: chunk_size.max(1),
            written: 0,
            finished: false,
        }
    }

    fn send_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.writer
            .send(STATE, &self.pending)
            .map_err(frame_to_io)?;
        self.pending.clear();
        Ok(())
    }

    /// Send buffered bytes and the terminator, then flush the input stream.
    pub(crate) fn finish(mut self) -> io::Result<u64> {
        self.finished = true;
        self.send_pending()?;
        self.writer.send(STATE, &[]).map_err(frame_to_io)?;
        self.writer.flush().map_err(frame_to_io)?;
        Ok(self.written)
    }
}

impl<W: Write> Write for StateSink<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.chunk_size - self.pending.len();
        let take = room.min(buf.len());
        self.pending.extend_from_slice(&buf[..take]);
        self.written += take as u64;
        if self.pending.len() == self.chunk_size {
            self.send_pending()?;
        }
        Ok(take)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_pending()?;
        self.writer.flush().map_err(frame_to_io)
    }
}

impl<W: Write> Drop for StateSink<'_, W> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // The restorer unwound before `finish`; close the stream anyway.
        let _ = self.writer.send(STATE, &[]);
        let _ = self.writer.flush();
    }
}

pub(crate) fn frame_to_io(err: FrameError) -> io::Error {
    match err {
        FrameError::Io(err) => err,
        FrameError::ConnectionClosed => io::Error::new(io::ErrorKind::BrokenPipe, err),
        other => io::Error::other(other),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use workerctl_frame::{FrameConfig, FrameReader};

    use super::*;

    fn writer() -> FrameWriter<Vec<u8>> {
        FrameWriter::with_config(
            Vec::new(),
            FrameConfig {
                flush_each_frame: false,
                ..FrameConfig::default()
            },
        )
    }

    fn state_frames(wire: Vec<u8>) -> Vec<Vec<u8>> {
        let mut reader = FrameReader::new(Cursor::new(wire));
        let mut frames = Vec::new();
        while let Ok(frame) = reader.read_frame() {
            assert_eq!(frame.channel, STATE);
            frames.push(frame.payload.to_vec());
        }
        frames
    }

    #[test]
    fn chunks_and_terminates() {
        let mut writer = writer();
        let mut sink = StateSink::new(&mut writer, 4);
        sink.write_all(b"0123456789").unwrap();
        assert_eq!(sink.finish().unwrap(), 10);

        let frames = state_frames(writer.into_inner());
        assert_eq!(
            frames,
            vec![
                b"0123".to_vec(),
                b"4567".to_vec(),
                b"89".to_vec(),
                Vec::new()
            ]
        );
    }

    #[test]
    fn empty_restore_sends_only_terminator() {
        let mut writer = writer();
        let sink = StateSink::new(&mut writer, 4);
        assert_eq!(sink.finish().unwrap(), 0);
        assert_eq!(state_frames(writer.into_inner()), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn drop_without_finish_still_terminates() {
        let mut writer = writer();
        {
            let mut sink = StateSink::new(&mut writer, 16);
            sink.write_all(b"partial").unwrap();
        }
        assert_eq!(state_frames(writer.into_inner()), vec![Vec::<u8>::new()]);
    }
}
