use std::time::Duration;

use serde::Serialize;
use workerctl_supervisor::{
    parse_duration, ControllerConfig, FlushOutcome, FlushParams, ReadinessPolicy, StatsSnapshot,
    WorkerController, WorkerEvent,
};
use workerctl_transport::CommandLauncher;

use crate::cmd::ProbeArgs;
use crate::exit::{supervisor_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_json, print_pretty, print_table, OutputFormat};

#[derive(Debug, Serialize)]
struct ProbeReport {
    pid: u32,
    ready: bool,
    flush_token: String,
    flush_outcome: &'static str,
    last_finalized_bucket_end: Option<i64>,
    results_received: usize,
    alive_after_waiting: bool,
    stats: StatsSnapshot,
    errors: String,
}

pub fn run(args: ProbeArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_arg_duration("timeout", &args.timeout)?;
    let config = build_config(&args, timeout)?;

    let (program, program_args) = args
        .command
        .split_first()
        .ok_or_else(|| CliError::new(USAGE, "missing worker command"))?;
    let launcher = CommandLauncher::new(program).args(program_args);

    let controller = WorkerController::start(&launcher, config)
        .map_err(|err| supervisor_error("worker start failed", err))?;
    let events = controller.take_events();

    controller
        .write_record(&["probe", "1"])
        .map_err(|err| supervisor_error("record write failed", err))?;
    let handle = controller
        .flush_job(&FlushParams::interim())
        .map_err(|err| supervisor_error("flush request failed", err))?;
    let outcome = controller.wait_for_flush(&handle, timeout);

    let results_received = events
        .map(|rx| {
            rx.try_iter()
                .filter(|event| matches!(event, WorkerEvent::Result(_)))
                .count()
        })
        .unwrap_or(0);

    let (flush_outcome, last_finalized_bucket_end, code) = match &outcome {
        FlushOutcome::Completed(ack) => ("completed", ack.last_finalized_bucket_end, SUCCESS),
        FlushOutcome::Abandoned => ("abandoned", None, FAILURE),
        FlushOutcome::TimedOut => ("timed_out", None, TIMEOUT),
    };

    let report = ProbeReport {
        pid: controller.pid(),
        ready: controller.is_ready(),
        flush_token: handle.token().to_string(),
        flush_outcome,
        last_finalized_bucket_end,
        results_received,
        alive_after_waiting: controller.is_process_alive_after_waiting(),
        stats: controller.stats(),
        errors: controller.read_error(),
    };
    controller.close();

    print_report(&report, format);
    Ok(code)
}

fn build_config(args: &ProbeArgs, timeout: Duration) -> CliResult<ControllerConfig> {
    let mut config = match &args.config {
        Some(path) => ControllerConfig::from_json_file(path)
            .map_err(|err| supervisor_error("config load failed", err))?,
        None => ControllerConfig::default(),
    };
    if let Some(grace) = &args.grace {
        config.liveness_grace = parse_arg_duration("grace", grace)?;
    }
    if args.handshake {
        config.readiness = ReadinessPolicy::Handshake { timeout };
    }
    Ok(config)
}

fn parse_arg_duration(name: &str, input: &str) -> CliResult<Duration> {
    parse_duration(input).map_err(|err| CliError::new(USAGE, format!("--{name}: {err}")))
}

fn print_report(report: &ProbeReport, format: OutputFormat) {
    if let OutputFormat::Json = format {
        print_json(report);
        return;
    }

    let rows = [
        ("pid", report.pid.to_string()),
        ("ready", report.ready.to_string()),
        ("flush token", report.flush_token.clone()),
        ("flush outcome", report.flush_outcome.to_string()),
        (
            "last finalized bucket end",
            report
                .last_finalized_bucket_end
                .map(|end| end.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
        ("results received", report.results_received.to_string()),
        ("alive after waiting", report.alive_after_waiting.to_string()),
        ("acks matched", report.stats.acks_matched.to_string()),
        ("malformed output", report.stats.malformed_output.to_string()),
        ("events dropped", report.stats.events_dropped.to_string()),
        (
            "errors",
            if report.errors.is_empty() {
                "-".to_string()
            } else {
                report.errors.clone()
            },
        ),
    ];

    match format {
        OutputFormat::Table => print_table(&rows),
        _ => print_pretty("Probe Report", &rows),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(grace: Option<&str>, handshake: bool) -> ProbeArgs {
        ProbeArgs {
            config: None,
            grace: grace.map(str::to_string),
            handshake,
            timeout: "5s".to_string(),
            command: vec!["worker".to_string()],
        }
    }

    #[test]
    fn grace_and_handshake_override_defaults() {
        let config = build_config(&args(Some("80ms"), true), Duration::from_secs(2)).unwrap();
        assert_eq!(config.liveness_grace, Duration::from_millis(80));
        assert_eq!(
            config.readiness,
            ReadinessPolicy::Handshake {
                timeout: Duration::from_secs(2)
            }
        );
    }

    #[test]
    fn defaults_without_overrides() {
        let config = build_config(&args(None, false), Duration::from_secs(2)).unwrap();
        assert_eq!(config, ControllerConfig::default());
    }

    #[test]
    fn bad_grace_is_usage_error() {
        let err = build_config(&args(Some("soon"), false), Duration::from_secs(2)).unwrap_err();
        assert_eq!(err.code, USAGE);
        assert!(err.message.starts_with("--grace"));
    }
}
