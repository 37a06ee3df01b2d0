//! Consumer of the worker's output stream.
//!
//! Runs until end-of-stream. `CONTROL` frames carry readiness and flush
//! acknowledgments, `RESULT` frames are forwarded as events and `STATE`
//! frames are assembled into persisted state blobs. Anything else is a
//! malformed frame: counted, logged and skipped.

use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};
use workerctl_frame::{channel_name, Frame, FrameError, FrameReader, CONTROL, RESULT, STATE};
use workerctl_transport::OutputStream;

use crate::control::{ControlMessage, FlushAck, ReadyAnnouncement, CONTROL_FLUSH_ACK, CONTROL_READY};
use crate::error::{Result, SupervisorError};
use crate::shared::Shared;
use crate::state::WorkerEvent;

pub(crate) struct OutputReader<R = OutputStream> {
    frames: FrameReader<R>,
    shared: Arc<Shared>,
    events: SyncSender<WorkerEvent>,
    state: Option<BytesMut>,
}

impl<R: std::io::Read> OutputReader<R> {
    pub(crate) fn new(
        frames: FrameReader<R>,
        shared: Arc<Shared>,
        events: SyncSender<WorkerEvent>,
    ) -> Self {
        Self {
            frames,
            shared,
            events,
            state: None,
        }
    }

    /// Read until end-of-stream, then report the closure.
    pub(crate) fn run(mut self) {
        loop {
            match self.frames.read_frame() {
                Ok(frame) => {
                    let channel = frame.channel;
                    if let Err(err) = self.route(frame) {
                        self.malformed(channel, &err);
                    }
                }
                Err(err) if err.is_recoverable() => {
                    let skipped = self.frames.recover();
                    self.shared.stats.record_malformed_output();
                    warn!(pid = self.shared.pid, %err, skipped, "skipping malformed output frame");
                }
                Err(FrameError::ConnectionClosed) => break,
                Err(err) => {
                    warn!(pid = self.shared.pid, %err, "worker output stream failed");
                    break;
                }
            }
        }
        if self.state.is_some() {
            warn!(pid = self.shared.pid, "output stream ended inside a state blob");
        }
        self.shared.output_closed();
    }

    fn route(&mut self, frame: Frame) -> Result<()> {
        match frame.channel {
            CONTROL => self.control(&frame.payload),
            RESULT => {
                self.shared.stats.record_result();
                self.emit(WorkerEvent::Result(frame.payload));
                Ok(())
            }
            STATE => {
                self.state_chunk(frame.payload);
                Ok(())
            }
            other => Err(FrameError::UnexpectedChannel(other).into()),
        }
    }

    fn control(&mut self, payload: &[u8]) -> Result<()> {
        let message = ControlMessage::from_bytes(payload)?;
        match message.msg_type.as_str() {
            CONTROL_FLUSH_ACK => {
                let ack: FlushAck = message.payload_as()?;
                let token = ack.id.clone();
                let matched = self.shared.flushes.complete(ack);
                self.shared.stats.record_ack(matched);
                if !matched {
                    debug!(pid = self.shared.pid, %token, "ignoring unmatched flush acknowledgment");
                }
                Ok(())
            }
            CONTROL_READY => {
                let announcement: ReadyAnnouncement = message.payload_as()?;
                debug!(
                    pid = self.shared.pid,
                    version = %announcement.version,
                    "worker announced readiness"
                );
                self.shared.ready.announce(announcement);
                Ok(())
            }
            other => Err(SupervisorError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown control directive '{other}'"),
            ))),
        }
    }

    fn state_chunk(&mut self, payload: Bytes) {
        if !payload.is_empty() {
            self.state
                .get_or_insert_with(BytesMut::new)
                .extend_from_slice(&payload);
            return;
        }
        let blob = self.state.take().unwrap_or_default().freeze();
        debug!(pid = self.shared.pid, bytes = blob.len(), "received persisted state");
        self.shared.stats.record_state_blob();
        self.emit(WorkerEvent::State(blob));
    }

    fn emit(&self, event: WorkerEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.shared.stats.record_dropped_event();
                warn!(pid = self.shared.pid, "event buffer full; dropping worker event");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.shared.stats.record_dropped_event();
                debug!(pid = self.shared.pid, "no event receiver; dropping worker event");
            }
        }
    }

    fn malformed(&self, channel: u16, err: &SupervisorError) {
        self.shared.stats.record_malformed_output();
        warn!(
            pid = self.shared.pid,
            channel = channel_name(channel),
            %err,
            "skipping malformed output frame"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::mpsc::{self, Receiver};

    use bytes::BufMut;
    use workerctl_frame::encode_frame;

    use super::*;
    use crate::config::ControllerConfig;
    use crate::flush::FlushState;
    use crate::handshake::ReadyOutcome;
    use crate::lifecycle::WorkerState;

    fn control(wire: &mut BytesMut, message: &ControlMessage) {
        encode_frame(CONTROL, &message.to_bytes().unwrap(), wire).unwrap();
    }

    fn run(wire: BytesMut, shared: &Arc<Shared>, capacity: usize) -> Receiver<WorkerEvent> {
        let (tx, rx) = mpsc::sync_channel(capacity);
        OutputReader::new(
            FrameReader::new(Cursor::new(wire.to_vec())),
            Arc::clone(shared),
            tx,
        )
        .run();
        rx
    }

    fn shared() -> Arc<Shared> {
        Arc::new(Shared::new(7, &ControllerConfig::default(), None))
    }

    #[test]
    fn routes_acks_results_and_ready() {
        let shared = shared();
        let first = shared.flushes.allocate();
        let second = shared.flushes.allocate();

        let mut wire = BytesMut::new();
        control(
            &mut wire,
            &ControlMessage::ready(&ReadyAnnouncement {
                protocol: "workerctl".into(),
                version: "1.0".into(),
                pid: Some(7),
            })
            .unwrap(),
        );
        encode_frame(RESULT, b"r1", &mut wire).unwrap();
        // Acknowledged out of issuance order.
        control(&mut wire, &ControlMessage::flush_ack(&FlushAck::new(second.token())).unwrap());
        control(&mut wire, &ControlMessage::flush_ack(&FlushAck::new("unknown")).unwrap());
        control(&mut wire, &ControlMessage::flush_ack(&FlushAck::new(first.token())).unwrap());

        let events = run(wire, &shared, 8);

        assert_eq!(first.state(), FlushState::Completed);
        assert_eq!(second.state(), FlushState::Completed);
        assert_eq!(
            events.try_iter().collect::<Vec<_>>(),
            vec![WorkerEvent::Result(Bytes::from_static(b"r1"))]
        );
        assert!(matches!(
            shared.ready.wait(std::time::Duration::ZERO),
            ReadyOutcome::Announced(_)
        ));

        let stats = shared.stats.snapshot();
        assert_eq!(stats.acks_matched, 2);
        assert_eq!(stats.acks_unknown, 1);
        assert_eq!(stats.results, 1);
    }

    #[test]
    fn malformed_frames_do_not_stop_the_loop() {
        let shared = shared();
        let handle = shared.flushes.allocate();

        let mut wire = BytesMut::new();
        wire.put_slice(b"garbage!");
        encode_frame(CONTROL, b"{not json", &mut wire).unwrap();
        control(
            &mut wire,
            &ControlMessage {
                msg_type: "mystery".into(),
                payload: None,
            },
        );
        encode_frame(42, b"reserved", &mut wire).unwrap();
        control(&mut wire, &ControlMessage::flush_ack(&FlushAck::new(handle.token())).unwrap());

        run(wire, &shared, 8);

        assert_eq!(handle.state(), FlushState::Completed);
        assert_eq!(shared.stats.snapshot().malformed_output, 4);
    }

    #[test]
    fn state_frames_assemble_into_one_blob() {
        let shared = shared();
        let mut wire = BytesMut::new();
        encode_frame(STATE, b"{\"seq\":", &mut wire).unwrap();
        encode_frame(STATE, b"3}", &mut wire).unwrap();
        encode_frame(STATE, b"", &mut wire).unwrap();

        let events = run(wire, &shared, 8);
        assert_eq!(
            events.try_iter().collect::<Vec<_>>(),
            vec![WorkerEvent::State(Bytes::from_static(b"{\"seq\":3}"))]
        );
        assert_eq!(shared.stats.snapshot().state_blobs, 1);
    }

    #[test]
    fn full_event_buffer_drops_instead_of_blocking() {
        let shared = shared();
        let handle = shared.flushes.allocate();

        let mut wire = BytesMut::new();
        for _ in 0..3 {
            encode_frame(RESULT, b"r", &mut wire).unwrap();
        }
        control(&mut wire, &ControlMessage::flush_ack(&FlushAck::new(handle.token())).unwrap());

        let events = run(wire, &shared, 1);
        assert_eq!(events.try_iter().count(), 1);
        assert_eq!(shared.stats.snapshot().events_dropped, 2);
        assert_eq!(handle.state(), FlushState::Completed);
    }

    #[test]
    fn end_of_stream_abandons_pending_flushes() {
        let shared = shared();
        shared.lifecycle.advance(WorkerState::Running);
        let handle = shared.flushes.allocate();

        run(BytesMut::new(), &shared, 1);

        assert_eq!(handle.state(), FlushState::Abandoned);
        assert_eq!(shared.lifecycle.get(), WorkerState::Dead);
    }
}
