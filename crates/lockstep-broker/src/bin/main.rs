//! Lockstep broker CLI.
//!
//! ```bash
//! # coordinate three simulators
//! lockstep-broker 3
//!
//! # throttle simulated time to wall clock, clock updated every 100ms
//! lockstep-broker 3 100ms
//! ```
//!
//! The bind endpoint comes from `FNCS_BROKER` (default `tcp://*:5570`);
//! setting `FNCS_TRACE` to anything starting with `Y`/`y`/`T`/`t` dumps
//! every forwarded publish to `broker_trace.txt`.

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use lockstep_broker::event_loop::{Broker, BrokerConfig};
use lockstep_broker::trace::{env_requests_trace, TraceSink, TRACE_FILE};
use lockstep_types::parse_duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Lockstep co-simulation broker
///
/// Synchronizes a fixed set of simulator processes advancing simulated
/// time in lockstep and routes published values between them.
#[derive(Parser, Debug)]
#[command(name = "lockstep-broker")]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of simulators that will connect
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    n_sims: u64,

    /// Throttle simulated time to wall clock, e.g. "100ms" (omit for
    /// unthrottled)
    realtime_interval: Option<String>,

    /// Router bind endpoint
    #[arg(long, env = "FNCS_BROKER", default_value = "tcp://*:5570")]
    endpoint: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let realtime_interval = match args.realtime_interval.as_deref() {
        Some(raw) => match parse_duration(raw) {
            Ok(interval) if !interval.is_zero() => {
                Some(Duration::from_nanos(interval.as_nanos()))
            }
            Ok(_) => None,
            Err(e) => {
                error!(error = %e, "invalid realtime interval");
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let trace = if std::env::var("FNCS_TRACE")
        .map(|v| env_requests_trace(&v))
        .unwrap_or(false)
    {
        info!(file = TRACE_FILE, "tracing of all published messages enabled");
        match TraceSink::create(Path::new(TRACE_FILE)) {
            Ok(sink) => sink,
            Err(e) => {
                error!(error = %e, file = TRACE_FILE, "could not open trace file");
                return ExitCode::FAILURE;
            }
        }
    } else {
        TraceSink::disabled()
    };

    let config = BrokerConfig {
        expected_sims: args.n_sims as usize,
        endpoint: args.endpoint,
        realtime_interval,
    };

    let broker = match Broker::bind(&config, trace) {
        Ok(broker) => broker,
        Err(e) => {
            error!(error = %e, "failed to start broker");
            return ExitCode::FAILURE;
        }
    };

    match broker.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
