//! Reference worker: the worker side of the protocol over stdio.
//!
//! Echoes each record as a JSON result, acknowledges flushes, restores and
//! persists a small JSON state and exits on `end_of_input` or input EOF.
//! Logs go to stderr only; stdout carries frames.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use workerctl_frame::{
    channel_name, decode_record, Frame, FrameError, FrameReader, FrameWriter, CONTROL, RECORD,
    RESULT, STATE,
};
use workerctl_supervisor::{
    parse_flush_directive, ControlMessage, FlushAck, ReadyAnnouncement, CONTROL_END_OF_INPUT,
    CONTROL_FLUSH, CONTROL_PERSIST, PROTOCOL_NAME, PROTOCOL_VERSION,
};

use crate::cmd::WorkerArgs;
use crate::exit::{
    frame_error, supervisor_error, CliError, CliResult, INTERNAL, INTERRUPTED, SUCCESS,
};

#[derive(Serialize)]
struct EchoResult<'a> {
    seq: u64,
    fields: &'a [String],
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct EchoState {
    records: u64,
}

enum Step {
    Continue,
    Exit(i32),
}

pub fn run(args: WorkerArgs) -> CliResult<i32> {
    install_termination_handler()?;
    for line in &args.stderr_line {
        eprintln!("{line}");
    }
    serve(args, io::stdin().lock(), io::stdout().lock())
}

fn serve<R: Read, W: Write>(args: WorkerArgs, input: R, output: W) -> CliResult<i32> {
    let mut reader = FrameReader::new(input);
    let mut worker = EchoWorker::new(args, FrameWriter::new(output));

    if !worker.args.no_ready {
        worker.announce()?;
    }

    loop {
        let frame = match reader.read_frame() {
            Ok(frame) => frame,
            Err(FrameError::ConnectionClosed) => {
                info!(records = worker.state.records, "input closed; exiting");
                return Ok(SUCCESS);
            }
            Err(err) if err.is_recoverable() => {
                let skipped = reader.recover();
                warn!(%err, skipped, "skipping malformed input frame");
                continue;
            }
            Err(err) => return Err(frame_error("input read failed", err)),
        };

        if let Step::Exit(code) = worker.handle(frame)? {
            return Ok(code);
        }
    }
}

struct EchoWorker<W: Write> {
    args: WorkerArgs,
    output: FrameWriter<W>,
    state: EchoState,
    restoring: Vec<u8>,
}

impl<W: Write> EchoWorker<W> {
    fn new(args: WorkerArgs, output: FrameWriter<W>) -> Self {
        Self {
            args,
            output,
            state: EchoState::default(),
            restoring: Vec::new(),
        }
    }

    fn announce(&mut self) -> CliResult<()> {
        let message = ControlMessage::ready(&ReadyAnnouncement {
            protocol: PROTOCOL_NAME.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            pid: Some(std::process::id()),
        })
        .map_err(|err| supervisor_error("ready encode failed", err))?;
        self.send_control(&message)
    }

    fn handle(&mut self, frame: Frame) -> CliResult<Step> {
        match frame.channel {
            RECORD => {
                self.record(&frame.payload)?;
                Ok(Step::Continue)
            }
            STATE => {
                self.restore_chunk(&frame.payload);
                Ok(Step::Continue)
            }
            CONTROL => self.control(&frame.payload),
            other => {
                warn!(
                    channel = other,
                    name = channel_name(other),
                    "ignoring frame on unexpected channel"
                );
                Ok(Step::Continue)
            }
        }
    }

    fn record(&mut self, payload: &[u8]) -> CliResult<()> {
        let fields = match decode_record(payload) {
            Ok(fields) => fields,
            Err(err) => {
                warn!(%err, "skipping malformed record");
                return Ok(());
            }
        };
        self.state.records += 1;
        let result = serde_json::to_vec(&EchoResult {
            seq: self.state.records,
            fields: &fields,
        })
        .map_err(|err| CliError::new(INTERNAL, format!("result encode failed: {err}")))?;
        self.output
            .send(RESULT, &result)
            .map_err(|err| frame_error("result write failed", err))
    }

    fn control(&mut self, payload: &[u8]) -> CliResult<Step> {
        let message = match ControlMessage::from_bytes(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "skipping malformed control directive");
                return Ok(Step::Continue);
            }
        };

        match message.msg_type.as_str() {
            CONTROL_FLUSH => self.flush(&message),
            CONTROL_PERSIST => {
                self.persist()?;
                Ok(Step::Continue)
            }
            CONTROL_END_OF_INPUT => {
                info!(records = self.state.records, "end of input; exiting");
                Ok(Step::Exit(SUCCESS))
            }
            other => {
                warn!(directive = other, "ignoring unknown control directive");
                Ok(Step::Continue)
            }
        }
    }

    fn flush(&mut self, message: &ControlMessage) -> CliResult<Step> {
        let (token, params) = match parse_flush_directive(message) {
            Ok(directive) => directive,
            Err(err) => {
                warn!(%err, "skipping malformed flush directive");
                return Ok(Step::Continue);
            }
        };

        if let Some(code) = self.args.exit_on_flush {
            warn!(%token, code, "exiting on flush as instructed");
            return Ok(Step::Exit(code));
        }
        if self.args.ignore_flush {
            debug!(%token, "not acknowledging flush");
            return Ok(Step::Continue);
        }

        let ack = FlushAck {
            id: token,
            last_finalized_bucket_end: params.advance_time.or(params.end),
            refresh_required: params.calc_interim,
        };
        let message = ControlMessage::flush_ack(&ack)
            .map_err(|err| supervisor_error("flush ack encode failed", err))?;
        self.send_control(&message)?;
        debug!(token = %ack.id, "flush acknowledged");
        Ok(Step::Continue)
    }

    fn restore_chunk(&mut self, payload: &[u8]) {
        if !payload.is_empty() {
            self.restoring.extend_from_slice(payload);
            return;
        }
        let raw = std::mem::take(&mut self.restoring);
        if raw.is_empty() {
            info!("empty state restored");
            return;
        }
        match serde_json::from_slice::<EchoState>(&raw) {
            Ok(state) => {
                info!(records = state.records, "state restored");
                self.state = state;
            }
            Err(err) => warn!(%err, bytes = raw.len(), "ignoring unreadable state"),
        }
    }

    fn persist(&mut self) -> CliResult<()> {
        let blob = serde_json::to_vec(&self.state)
            .map_err(|err| CliError::new(INTERNAL, format!("state encode failed: {err}")))?;
        self.output
            .send(STATE, &blob)
            .and_then(|()| self.output.send(STATE, &[]))
            .map_err(|err| frame_error("state write failed", err))?;
        info!(bytes = blob.len(), "state persisted");
        Ok(())
    }

    fn send_control(&mut self, message: &ControlMessage) -> CliResult<()> {
        let bytes = message
            .to_bytes()
            .map_err(|err| supervisor_error("control encode failed", err))?;
        self.output
            .send(CONTROL, &bytes)
            .map_err(|err| frame_error("control write failed", err))
    }
}

fn install_termination_handler() -> CliResult<()> {
    ctrlc::set_handler(|| {
        info!("termination signal received; exiting");
        std::process::exit(INTERRUPTED);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BytesMut;
    use workerctl_frame::{encode_frame, encode_record};
    use workerctl_supervisor::{FlushParams, CONTROL_FLUSH_ACK, CONTROL_READY};

    use super::*;

    fn input(frames: &[(u16, Vec<u8>)]) -> Cursor<Vec<u8>> {
        let mut wire = BytesMut::new();
        for (channel, payload) in frames {
            encode_frame(*channel, payload, &mut wire).unwrap();
        }
        Cursor::new(wire.to_vec())
    }

    fn record(fields: &[&str]) -> (u16, Vec<u8>) {
        let mut payload = BytesMut::new();
        encode_record(fields, &mut payload).unwrap();
        (RECORD, payload.to_vec())
    }

    fn control(message: ControlMessage) -> (u16, Vec<u8>) {
        (CONTROL, message.to_bytes().unwrap())
    }

    fn output_frames(wire: Vec<u8>) -> Vec<Frame> {
        let mut reader = FrameReader::new(Cursor::new(wire));
        let mut frames = Vec::new();
        while let Ok(frame) = reader.read_frame() {
            frames.push(frame);
        }
        frames
    }

    fn serve_to_vec(args: WorkerArgs, frames: &[(u16, Vec<u8>)]) -> (i32, Vec<Frame>) {
        let mut out = Vec::new();
        let code = serve(args, input(frames), &mut out).unwrap();
        (code, output_frames(out))
    }

    fn control_of(frame: &Frame) -> ControlMessage {
        assert_eq!(frame.channel, CONTROL);
        ControlMessage::from_bytes(&frame.payload).unwrap()
    }

    #[test]
    fn echoes_records_and_acknowledges_flush() {
        let (code, frames) = serve_to_vec(
            WorkerArgs::default(),
            &[
                record(&["a", "1"]),
                record(&["b", "2"]),
                control(
                    ControlMessage::flush("T1", &FlushParams::interim().with_range(10, 20))
                        .unwrap(),
                ),
                control(ControlMessage::end_of_input()),
            ],
        );

        assert_eq!(code, SUCCESS);
        assert_eq!(frames.len(), 4);
        assert_eq!(control_of(&frames[0]).msg_type, CONTROL_READY);

        let first: serde_json::Value = serde_json::from_slice(&frames[1].payload).unwrap();
        assert_eq!(first, serde_json::json!({ "seq": 1, "fields": ["a", "1"] }));
        assert_eq!(frames[2].channel, RESULT);

        let ack = control_of(&frames[3]);
        assert_eq!(ack.msg_type, CONTROL_FLUSH_ACK);
        let ack: FlushAck = ack.payload_as().unwrap();
        assert_eq!(ack.id, "T1");
        assert_eq!(ack.last_finalized_bucket_end, Some(20));
        assert!(ack.refresh_required);
    }

    #[test]
    fn restore_then_persist_round_trips_state() {
        let (_, frames) = serve_to_vec(
            WorkerArgs {
                no_ready: true,
                ..WorkerArgs::default()
            },
            &[
                (STATE, br#"{"records":"#.to_vec()),
                (STATE, b"41}".to_vec()),
                (STATE, Vec::new()),
                record(&["x"]),
                control(ControlMessage::persist()),
            ],
        );

        assert_eq!(frames.len(), 3);
        let result: serde_json::Value = serde_json::from_slice(&frames[0].payload).unwrap();
        assert_eq!(result["seq"], 42);
        assert_eq!(frames[1].channel, STATE);
        assert_eq!(frames[1].payload.as_ref(), br#"{"records":42}"#);
        assert_eq!(frames[2].channel, STATE);
        assert!(frames[2].payload.is_empty());
    }

    #[test]
    fn fault_flags_change_flush_handling() {
        let flush = control(ControlMessage::flush("T1", &FlushParams::default()).unwrap());

        let (code, frames) = serve_to_vec(
            WorkerArgs {
                no_ready: true,
                ignore_flush: true,
                ..WorkerArgs::default()
            },
            &[flush.clone()],
        );
        assert_eq!(code, SUCCESS);
        assert!(frames.is_empty());

        let (code, frames) = serve_to_vec(
            WorkerArgs {
                no_ready: true,
                exit_on_flush: Some(7),
                ..WorkerArgs::default()
            },
            &[flush],
        );
        assert_eq!(code, 7);
        assert!(frames.is_empty());
    }

    #[test]
    fn malformed_input_is_skipped() {
        let mut wire = b"noise".to_vec();
        wire.extend_from_slice(input(&[(RECORD, b"\x01".to_vec()), record(&["ok"])]).get_ref());

        let mut out = Vec::new();
        let code = serve(
            WorkerArgs {
                no_ready: true,
                ..WorkerArgs::default()
            },
            Cursor::new(wire),
            &mut out,
        )
        .unwrap();

        assert_eq!(code, SUCCESS);
        let frames = output_frames(out);
        assert_eq!(frames.len(), 1);
        let result: serde_json::Value = serde_json::from_slice(&frames[0].payload).unwrap();
        assert_eq!(result["seq"], 1);
    }
}
