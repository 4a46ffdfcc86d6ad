use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;

use crate::metrics::Metrics;

const FIELD_WIDTH: usize = 24; // width of each field for formatting print

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    #[default]
    Text,
    Json,
}

/// Renders the frozen aggregate in the requested format.
pub fn render(metrics: &Metrics, format: Format) -> io::Result<String> {
    match format {
        Format::Text => Ok(TextReport(metrics).to_string()),
        Format::Json => serde_json::to_string_pretty(metrics).map_err(io::Error::other),
    }
}

/// Renders and writes the report to `path`.
pub fn write_report(path: &Path, metrics: &Metrics, format: Format) -> io::Result<()> {
    let rendered = render(metrics, format)?;
    fs::write(path, rendered)
}

/// Human readable summary of a campaign.
pub struct TextReport<'a>(pub &'a Metrics);

impl fmt::Display for TextReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metrics = self.0;

        write_details(f, metrics)?;
        writeln!(f)?;
        write_timings(f, metrics)?;
        writeln!(f)?;
        write_distribution(f, metrics)?;
        if !metrics.histogram.is_empty() {
            writeln!(f)?;
            write_histogram(f, metrics)?;
        }
        if !metrics.errors.is_empty() {
            writeln!(f)?;
            writeln!(f, "Errors:")?;
            for error in &metrics.errors {
                writeln!(f, " {}", error)?;
            }
        }
        Ok(())
    }
}

fn write_details(f: &mut fmt::Formatter<'_>, metrics: &Metrics) -> fmt::Result {
    let w = FIELD_WIDTH;
    writeln!(f, "{:<w$}{}", "Requests:", metrics.requests)?;
    writeln!(f, "{:<w$}{}", "Successes:", metrics.successes)?;
    writeln!(f, "{:<w$}{:.2}%", "Success Ratio:", metrics.success * 100.0)?;
    writeln!(f, "{:<w$}{:.2}", "Requests/sec:", metrics.rate)?;
    writeln!(f, "{:<w$}{:.2}", "Throughput/sec:", metrics.throughput)?;
    writeln!(f, "{:<w$}{:.2}s", "Attack Duration:", metrics.duration.as_secs_f64())?;
    writeln!(f, "{:<w$}{:.2}s", "Wait:", metrics.wait.as_secs_f64())?;
    writeln!(f, "{:<w$}{} B (mean {:.2})", "Bytes In:", metrics.bytes_in.total, metrics.bytes_in.mean)?;
    writeln!(f, "{:<w$}{} B (mean {:.2})", "Bytes Out:", metrics.bytes_out.total, metrics.bytes_out.mean)?;

    let codes = metrics.status_codes
        .iter()
        .map(|(code, count)| format!("{}:{}", code, count))
        .collect::<Vec<_>>()
        .join("  ");
    writeln!(f, "{:<w$}{}", "Status Codes:", codes)?;

    let resolutions = &metrics.resolutions;
    writeln!(
        f,
        "{:<w$}mined:{}  reverted:{}  unconfirmed:{}  rejected:{}  read:{}",
        "Resolutions:",
        resolutions.mined,
        resolutions.reverted,
        resolutions.unconfirmed,
        resolutions.rejected,
        resolutions.read
    )
}

fn write_timings(f: &mut fmt::Formatter<'_>, metrics: &Metrics) -> fmt::Result {
    let latencies = &metrics.latencies;
    writeln!(f, "Latency Stats:")?;
    writeln!(f, " {:<10} {:<10} {:<10} {:<10}", "Min", "Mean", "Max", "Total")?;
    writeln!(
        f,
        " {:<10} {:<10} {:<10} {:<10}",
        format_latency(latencies.min),
        format_latency(latencies.mean),
        format_latency(latencies.max),
        format_latency(latencies.total)
    )
}

fn write_distribution(f: &mut fmt::Formatter<'_>, metrics: &Metrics) -> fmt::Result {
    if metrics.requests == 0 {
        return writeln!(f, "Latency Distribution: no requests were sent");
    }
    let latencies = &metrics.latencies;
    writeln!(f, "Latency Distribution:")?;
    writeln!(f, " 50%    {}", format_latency(latencies.p50))?;
    writeln!(f, " 90%    {}", format_latency(latencies.p90))?;
    writeln!(f, " 95%    {}", format_latency(latencies.p95))?;
    writeln!(f, " 99%    {}", format_latency(latencies.p99))
}

fn write_histogram(f: &mut fmt::Formatter<'_>, metrics: &Metrics) -> fmt::Result {
    writeln!(f, "{:<15} {:<15} {:>10}", "Range (ms)", "Upper Bound", "Requests")?;
    for bucket in &metrics.histogram {
        writeln!(
            f,
            "{:<15.2} {:<15.2} {:>10}",
            millis(bucket.lower),
            millis(bucket.upper),
            bucket.count
        )?;
    }
    Ok(())
}

fn millis(value: Duration) -> f64 {
    value.as_secs_f64() * 1000.0
}

// convert into seconds if the value is greater than 1000ms
fn format_latency(value: Duration) -> String {
    let ms = millis(value);
    if ms > 1000.0 {
        format!("{:.2}s", ms / 1000.0)
    } else {
        format!("{:.2}ms", ms)
    }
}
