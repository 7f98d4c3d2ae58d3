//! The publish trace sink.
//!
//! An append-only tab-separated file of every publish that passed through
//! the broker, written before fan-out. One header line, then
//! `<nanoseconds>\t<topic>\t<value>` per record.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use lockstep_types::SimTime;
use tracing::warn;

/// Trace file name, created in the working directory.
pub const TRACE_FILE: &str = "broker_trace.txt";

/// Whether an environment value asks for tracing: first character one of
/// `Y y T t`.
pub fn env_requests_trace(value: &str) -> bool {
    matches!(value.chars().next(), Some('Y' | 'y' | 'T' | 't'))
}

/// Append-only sink for forwarded publishes. Disabled by default; when
/// disabled every record is a no-op.
pub struct TraceSink {
    writer: Option<BufWriter<File>>,
}

impl TraceSink {
    pub fn disabled() -> TraceSink {
        TraceSink { writer: None }
    }

    /// Create the trace file and write the header.
    pub fn create(path: &Path) -> io::Result<TraceSink> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "#nanoseconds\ttopic\tvalue")?;
        writer.flush()?;
        Ok(TraceSink {
            writer: Some(writer),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    /// Append one record. Values are opaque bytes and are written lossily
    /// as UTF-8 to keep the file line-oriented. Write failures are logged
    /// and otherwise ignored; tracing never stops the session.
    pub fn record(&mut self, time: SimTime, topic: &str, value: &[u8]) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let value = String::from_utf8_lossy(value);
        if let Err(e) = writeln!(writer, "{time}\t{topic}\t{value}").and_then(|_| writer.flush()) {
            warn!(error = %e, "failed to write trace record");
        }
    }
}
