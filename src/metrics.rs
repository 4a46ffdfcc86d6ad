use std::collections::{ BTreeMap, BTreeSet };
use std::sync::atomic::{ AtomicU64, Ordering };
use std::sync::{ Mutex, PoisonError };
use std::time::{ Duration, SystemTime };

use hdrhistogram::Histogram;
use serde::Serialize;

use crate::error::CampaignError;
use crate::tracker::{ AnnotatedResult, Resolution };

const SIGNIFICANT_FIGURES: u8 = 3;
const BUCKET_COUNT: usize = 10; // rows of the latency histogram

/// Count of successful results. Read once, when the aggregate is frozen.
#[derive(Debug, Default)]
pub struct SuccessTally(AtomicU64);

impl SuccessTally {
    pub fn record(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionCounts {
    pub read: u64,
    pub rejected: u64,
    pub mined: u64,
    pub reverted: u64,
    pub unconfirmed: u64,
}

impl ResolutionCounts {
    fn add(&mut self, resolution: Resolution) {
        match resolution {
            Resolution::Read => self.read += 1,
            Resolution::Rejected => self.rejected += 1,
            Resolution::Mined { status: 1, .. } => self.mined += 1,
            Resolution::Mined { .. } => self.reverted += 1,
            Resolution::Unconfirmed => self.unconfirmed += 1,
        }
    }
}

// Everything that changes while the campaign runs.
#[derive(Debug)]
struct RunningMetrics {
    requests: u64,
    status_codes: BTreeMap<String, u64>,
    resolutions: ResolutionCounts,
    latencies: Histogram<u64>, // microseconds
    latency_total: Duration,
    bytes_in: u64,
    bytes_out: u64,
    earliest: Option<SystemTime>, // first send
    latest: Option<SystemTime>, // last send
    end: Option<SystemTime>, // last send plus its latency
    errors: BTreeSet<String>,
}

impl RunningMetrics {
    fn add(&mut self, result: &AnnotatedResult) {
        let raw = &result.raw;

        self.requests += 1;
        *self.status_codes.entry(raw.code.to_string()).or_default() += 1;
        self.resolutions.add(result.resolution);

        self.latencies.saturating_record(result.latency.as_micros() as u64);
        self.latency_total += result.latency;

        self.bytes_in += raw.bytes_in;
        self.bytes_out += raw.bytes_out;

        if self.earliest.map_or(true, |earliest| raw.timestamp < earliest) {
            self.earliest = Some(raw.timestamp);
        }
        if self.latest.map_or(true, |latest| raw.timestamp > latest) {
            self.latest = Some(raw.timestamp);
        }
        let end = raw.timestamp + result.latency;
        if self.end.map_or(true, |current| end > current) {
            self.end = Some(end);
        }

        if let Some(error) = &raw.error {
            self.errors.insert(error.clone());
        }
    }
}

/// Shared accumulator every worker appends its resolved result to.
#[derive(Debug)]
pub struct Aggregator {
    running: Mutex<RunningMetrics>,
    successes: SuccessTally,
}

impl Aggregator {
    pub fn new() -> Result<Self, CampaignError> {
        Ok(Self {
            running: Mutex::new(RunningMetrics {
                requests: 0,
                status_codes: BTreeMap::new(),
                resolutions: ResolutionCounts::default(),
                latencies: Histogram::new(SIGNIFICANT_FIGURES)?,
                latency_total: Duration::ZERO,
                bytes_in: 0,
                bytes_out: 0,
                earliest: None,
                latest: None,
                end: None,
                errors: BTreeSet::new(),
            }),
            successes: SuccessTally::default(),
        })
    }

    /// Folds one result in. Safe to call from any number of workers at once.
    pub fn append(&self, result: &AnnotatedResult) {
        if result.is_success() {
            self.successes.record();
        }
        self.running.lock().unwrap_or_else(PoisonError::into_inner).add(result);
    }

    /// Number of results appended so far.
    pub fn requests(&self) -> u64 {
        self.running.lock().unwrap_or_else(PoisonError::into_inner).requests
    }

    /// Freezes the aggregate. Taking `self` by value makes this a one-shot.
    pub fn finalize(self) -> Metrics {
        let successes = self.successes.get();
        let running = self.running.into_inner().unwrap_or_else(PoisonError::into_inner);
        Metrics::from_running(running, successes)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencyMetrics {
    #[serde(with = "micros")]
    pub total: Duration,
    #[serde(with = "micros")]
    pub mean: Duration,
    #[serde(with = "micros")]
    pub min: Duration,
    #[serde(with = "micros")]
    pub p50: Duration,
    #[serde(with = "micros")]
    pub p90: Duration,
    #[serde(with = "micros")]
    pub p95: Duration,
    #[serde(with = "micros")]
    pub p99: Duration,
    #[serde(with = "micros")]
    pub max: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencyBucket {
    #[serde(with = "micros")]
    pub lower: Duration,
    #[serde(with = "micros")]
    pub upper: Duration,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ByteMetrics {
    pub total: u64,
    pub mean: f64,
}

/// Frozen campaign aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub requests: u64,
    pub successes: u64,
    pub success: f64, // successes / requests
    pub rate: f64, // requests per second over the attack window
    pub throughput: f64, // successes per second over attack window plus wait
    #[serde(with = "micros")]
    pub duration: Duration, // first send to last send
    #[serde(with = "micros")]
    pub wait: Duration, // last send to last resolution
    pub latencies: LatencyMetrics,
    pub histogram: Vec<LatencyBucket>,
    pub bytes_in: ByteMetrics,
    pub bytes_out: ByteMetrics,
    pub status_codes: BTreeMap<String, u64>,
    pub resolutions: ResolutionCounts,
    pub errors: Vec<String>,
}

impl Metrics {
    fn from_running(running: RunningMetrics, successes: u64) -> Self {
        let requests = running.requests;
        let per_request = |total: u64| if requests == 0 { 0.0 } else { (total as f64) / (requests as f64) };

        let duration = match (running.earliest, running.latest) {
            (Some(earliest), Some(latest)) => latest.duration_since(earliest).unwrap_or_default(),
            _ => Duration::ZERO,
        };
        let wait = match (running.latest, running.end) {
            (Some(latest), Some(end)) => end.duration_since(latest).unwrap_or_default(),
            _ => Duration::ZERO,
        };

        let rate = if duration.is_zero() { 0.0 } else { (requests as f64) / duration.as_secs_f64() };
        let window = duration + wait;
        let throughput = if window.is_zero() { 0.0 } else { (successes as f64) / window.as_secs_f64() };

        Metrics {
            requests,
            successes,
            success: per_request(successes),
            rate,
            throughput,
            duration,
            wait,
            latencies: latency_metrics(&running.latencies, running.latency_total),
            histogram: latency_buckets(&running.latencies),
            bytes_in: ByteMetrics { total: running.bytes_in, mean: per_request(running.bytes_in) },
            bytes_out: ByteMetrics { total: running.bytes_out, mean: per_request(running.bytes_out) },
            status_codes: running.status_codes,
            resolutions: running.resolutions,
            errors: running.errors.into_iter().collect(),
        }
    }
}

fn latency_metrics(histogram: &Histogram<u64>, total: Duration) -> LatencyMetrics {
    if histogram.is_empty() {
        return LatencyMetrics::default();
    }
    let at = |quantile: f64| Duration::from_micros(histogram.value_at_quantile(quantile));
    LatencyMetrics {
        total,
        mean: total / (histogram.len() as u32).max(1),
        min: Duration::from_micros(histogram.min()),
        p50: at(0.5),
        p90: at(0.9),
        p95: at(0.95),
        p99: at(0.99),
        max: Duration::from_micros(histogram.max()),
    }
}

// Equal-width buckets from zero up to the slowest result.
fn latency_buckets(histogram: &Histogram<u64>) -> Vec<LatencyBucket> {
    if histogram.is_empty() {
        return Vec::new();
    }
    let max = histogram.max();
    let width = (max / (BUCKET_COUNT as u64)).max(1);

    let mut counts = [0u64; BUCKET_COUNT];
    for value in histogram.iter_recorded() {
        let bucket = ((value.value_iterated_to() / width) as usize).min(BUCKET_COUNT - 1);
        counts[bucket] += value.count_at_value();
    }

    counts
        .iter()
        .enumerate()
        .map(|(i, &count)| LatencyBucket {
            lower: Duration::from_micros((i as u64) * width),
            upper: Duration::from_micros(((i as u64) + 1) * width),
            count,
        })
        .collect()
}

mod micros {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_micros() as u64)
    }
}
