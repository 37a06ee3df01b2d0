use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.channel, frame.payload.as_ref())
    }

    /// Encode and send a payload on a channel.
    ///
    /// The stream is flushed afterwards only when
    /// [`FrameConfig::flush_each_frame`] is set.
    pub fn send(&mut self, channel: u16, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_frame(channel, payload, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        if self.config.flush_each_frame {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BytesMut;

    use super::*;
    use crate::channel::{CONTROL, RECORD, STATE};
    use crate::codec::decode_frame;

    fn frames_in(bytes: &[u8]) -> Vec<Frame> {
        let mut wire = BytesMut::from(bytes);
        std::iter::from_fn(|| decode_frame(&mut wire, usize::MAX).unwrap()).collect()
    }

    /// Sink that records writes and flushes, optionally failing the first
    /// call of each with `first_error`.
    #[derive(Default)]
    struct Pipe {
        data: Vec<u8>,
        flushes: usize,
        first_error: Option<ErrorKind>,
        write_failed: bool,
        flush_failed: bool,
    }

    impl Write for Pipe {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let (Some(kind), false) = (self.first_error, self.write_failed) {
                self.write_failed = true;
                return Err(kind.into());
            }
            // Short writes exercise the send loop.
            let n = buf.len().min(5);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if let (Some(kind), false) = (self.first_error, self.flush_failed) {
                self.flush_failed = true;
                return Err(kind.into());
            }
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn records_then_directive_keep_order() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));
        writer.send(RECORD, b"a").unwrap();
        writer.send(RECORD, b"b").unwrap();
        writer
            .write_frame(&Frame::new(CONTROL, r#"{"type":"flush"}"#))
            .unwrap();

        let frames = frames_in(writer.get_ref().get_ref());
        let channels: Vec<u16> = frames.iter().map(|f| f.channel).collect();
        assert_eq!(channels, [RECORD, RECORD, CONTROL]);
        assert_eq!(frames[1].payload.as_ref(), b"b");
    }

    #[test]
    fn oversized_payload_writes_nothing() {
        let config = FrameConfig {
            max_payload_size: 8,
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(Cursor::new(Vec::new()), config);

        let err = writer.send(STATE, b"nine bytes").unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 10, max: 8 }));
        assert!(writer.into_inner().into_inner().is_empty());
    }

    #[test]
    fn short_writes_are_completed() {
        let mut writer = FrameWriter::new(Pipe::default());
        writer.send(RECORD, b"a longer record payload").unwrap();

        let frames = frames_in(&writer.get_ref().data);
        assert_eq!(frames, [Frame::new(RECORD, "a longer record payload")]);
    }

    #[test]
    fn flush_per_frame_follows_config() {
        let mut eager = FrameWriter::new(Pipe::default());
        eager.send(RECORD, b"x").unwrap();
        eager.send(RECORD, b"y").unwrap();
        assert_eq!(eager.get_ref().flushes, 2);

        let config = FrameConfig {
            flush_each_frame: false,
            ..FrameConfig::default()
        };
        let mut batched = FrameWriter::with_config(Pipe::default(), config);
        batched.send(RECORD, b"x").unwrap();
        batched.send(RECORD, b"y").unwrap();
        assert_eq!(batched.get_ref().flushes, 0);
        assert_eq!(frames_in(&batched.get_ref().data).len(), 2);

        batched.flush().unwrap();
        assert_eq!(batched.get_ref().flushes, 1);
    }

    #[test]
    fn interrupted_calls_are_retried() {
        let pipe = Pipe {
            first_error: Some(ErrorKind::Interrupted),
            ..Pipe::default()
        };
        let mut writer = FrameWriter::new(pipe);
        writer.send(CONTROL, b"persist").unwrap();

        let pipe = writer.into_inner();
        assert_eq!(pipe.flushes, 1);
        assert_eq!(frames_in(&pipe.data), [Frame::new(CONTROL, "persist")]);
    }

    #[test]
    fn zero_length_write_means_closed() {
        struct Closed;
        impl Write for Closed {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Ok(0)
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut writer = FrameWriter::new(Closed);
        assert!(matches!(
            writer.send(RECORD, b"x").unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[cfg(unix)]
    #[test]
    fn exited_worker_gives_io_error() {
        let (input, worker_side) = std::os::unix::net::UnixStream::pair().unwrap();
        drop(worker_side);

        let mut writer = FrameWriter::new(input);
        assert!(matches!(
            writer.send(RECORD, b"late").unwrap_err(),
            FrameError::Io(_)
        ));
    }
}
