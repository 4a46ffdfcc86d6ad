//! Per-request result stream, one JSON object per line, for offline analysis.

use std::fs::File;
use std::io::{ self, BufWriter, Write };
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::Serialize;

use crate::tracker::{ AnnotatedResult, Resolution };

#[derive(Debug, Serialize)]
struct ResultRecord<'a> {
    seq: u64,
    from: &'a str,
    code: u16,
    timestamp_ms: u64,
    round_trip_us: u64,
    latency_us: u64,
    bytes_in: u64,
    bytes_out: u64,
    tx_hash: Option<&'a str>,
    resolution: Resolution,
    success: bool,
    error: Option<&'a str>,
}

impl<'a> From<&'a AnnotatedResult> for ResultRecord<'a> {
    fn from(result: &'a AnnotatedResult) -> Self {
        let raw = &result.raw;
        Self {
            seq: raw.seq,
            from: &raw.from,
            code: raw.code,
            timestamp_ms: raw.timestamp
                .duration_since(UNIX_EPOCH)
                .map(|since| since.as_millis() as u64)
                .unwrap_or_default(),
            round_trip_us: raw.latency.as_micros() as u64,
            latency_us: result.latency.as_micros() as u64,
            bytes_in: raw.bytes_in,
            bytes_out: raw.bytes_out,
            tx_hash: result.tx_hash.as_deref(),
            resolution: result.resolution,
            success: result.is_success(),
            error: raw.error.as_deref(),
        }
    }
}

/// Appends results to a JSON lines sink.
pub struct ResultWriter<W: Write> {
    out: W,
    written: u64,
}

impl ResultWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> ResultWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    pub fn write(&mut self, result: &AnnotatedResult) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, &ResultRecord::from(result))?;
        self.out.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flushes and hands back the sink.
    pub fn finish(mut self) -> io::Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ annotated, mined };
    use serde_json::Value;
    use std::time::Duration;

    #[test]
    fn one_line_per_result() {
        let mut writer = ResultWriter::new(Vec::new());
        writer.write(&mined(0, 1, Duration::from_secs(4))).unwrap();
        writer.write(&annotated(1, 503, Resolution::Rejected)).unwrap();
        assert_eq!(writer.written(), 2);

        let out = String::from_utf8(writer.finish().unwrap()).unwrap();
        let lines: Vec<Value> = out.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
        assert_eq!(lines.len(), 2);

        assert_eq!(lines[0]["seq"], 0);
        assert_eq!(lines[0]["latency_us"], 4_000_000);
        assert_eq!(lines[0]["resolution"]["kind"], "mined");
        assert_eq!(lines[0]["resolution"]["status"], 1);
        assert_eq!(lines[0]["success"], true);

        assert_eq!(lines[1]["code"], 503);
        assert_eq!(lines[1]["resolution"]["kind"], "rejected");
        assert_eq!(lines[1]["tx_hash"], Value::Null);
        assert_eq!(lines[1]["error"], "unexpected status 503");
    }

    #[test]
    fn file_sink_is_flushed_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.jsonl");

        let mut writer = ResultWriter::create(&path).unwrap();
        for seq in 0..3 {
            writer.write(&mined(seq, 1, Duration::from_secs(1))).unwrap();
        }
        writer.finish().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);
    }
}
