//! Newline-delimited JSON sink.

use std::io::{self, Write};

use tracing::warn;

use crate::core::{Sample, TelemetrySink};

/// Writes one JSON object per sample to `W`.
///
/// Write errors are logged once and then counted; they never reach the
/// operation that produced the sample.
#[derive(Debug)]
pub struct JsonLinesTelemetrySink<W: Write + Send> {
    out: W,
    failures: u64,
}

impl<W: Write + Send> JsonLinesTelemetrySink<W> {
    /// Wrap a writer.
    pub const fn new(out: W) -> Self {
        Self { out, failures: 0 }
    }

    /// Samples that could not be written.
    #[must_use]
    pub const fn failures(&self) -> u64 {
        self.failures
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, sample: &Sample) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, sample)?;
        self.out.write_all(b"\n")
    }
}

impl JsonLinesTelemetrySink<io::Stdout> {
    /// Sink writing to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> TelemetrySink for JsonLinesTelemetrySink<W> {
    fn record(&mut self, sample: Sample) {
        if let Err(err) = self.write_line(&sample) {
            if self.failures == 0 {
                warn!(error = %err, "telemetry sample write failed");
            }
            self.failures += 1;
        }
    }

    fn flush(&mut self) {
        if let Err(err) = self.out.flush() {
            warn!(error = %err, "telemetry flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_line_per_sample() {
        let mut sink = JsonLinesTelemetrySink::new(Vec::new());
        sink.record(Sample::new("websocket").tag("addr", "a").int_field("read", 3));
        sink.record(Sample::new("websocket").int_field("write", 1));
        sink.flush();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            r#"{"name":"websocket","tags":{"addr":"a"},"fields":{"read":3}}"#
        );
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk gone"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failures_are_counted() {
        let mut sink = JsonLinesTelemetrySink::new(Broken);
        sink.record(Sample::new("x"));
        sink.record(Sample::new("y"));
        assert_eq!(sink.failures(), 2);
    }
}
