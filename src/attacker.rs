use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{ Duration, SystemTime };

use isahc::{ AsyncReadResponseExt, HttpClient, Request };
use tokio::sync::mpsc;
use tokio::time::{ interval, Instant, MissedTickBehavior };
use tokio_util::sync::CancellationToken;
use tracing::{ debug, info };

use crate::config::parse_duration;
use crate::error::{ ConfigError, TransportError };
use crate::target::{ AttackTarget, Targeter };

const RESULT_BUFFER: usize = 1024; // raw results waiting for the runner

/// Constant pacing: `freq` hits every `per`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    pub freq: u64,
    pub per: Duration,
}

impl Rate {
    /// Gap between two consecutive hits.
    pub fn interval(&self) -> Duration {
        let nanos = self.per.as_nanos() / (self.freq.max(1) as u128);
        Duration::from_nanos(nanos.max(1) as u64)
    }

    /// Number of hits that fit in `duration`.
    pub fn hits(&self, duration: Duration) -> u64 {
        (duration.as_nanos() * (self.freq as u128) / self.per.as_nanos().max(1)) as u64
    }
}

impl FromStr for Rate {
    type Err = ConfigError;

    // "100", "100/s", "100/1s", "5/1m"
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidRate(raw.to_string());
        let (freq, per) = match raw.split_once('/') {
            Some((freq, per)) => {
                let per = if per.starts_with(|c: char| c.is_ascii_digit()) {
                    per.to_string()
                } else {
                    format!("1{}", per)
                };
                (freq, parse_duration(&per).map_err(|_| invalid())?)
            }
            None => (raw, Duration::from_secs(1)),
        };
        let freq: u64 = freq.trim().parse().map_err(|_| invalid())?;
        if freq == 0 {
            return Err(ConfigError::ZeroRate);
        }
        Ok(Rate { freq, per })
    }
}

/// Response as seen by the attacker: status line and full body.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Outcome of issuing one target. Produced for every hit, including failed sends.
#[derive(Debug, Clone)]
pub struct RawResult {
    pub seq: u64,
    pub from: String,
    pub confirmable: bool,
    pub code: u16, // http status, 0 when nothing came back
    pub timestamp: SystemTime, // wall clock at send
    pub latency: Duration, // round trip
    pub bytes_out: u64,
    pub bytes_in: u64,
    pub body: Vec<u8>,
    pub error: Option<String>,
}

impl RawResult {
    pub fn is_2xx(&self) -> bool {
        self.code / 100 == 2
    }
}

/// Sends one target and returns whatever came back.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        target: &AttackTarget
    ) -> impl Future<Output = Result<Response, TransportError>> + Send;
}

impl Transport for HttpClient {
    async fn send(&self, target: &AttackTarget) -> Result<Response, TransportError> {
        let request = Request::post(target.url.as_str())
            .header("content-type", "application/json")
            .body(target.body.clone())
            .map_err(|err| TransportError::Http(err.to_string()))?;

        let mut response = self.send_async(request).await?;
        let body = response.bytes().await.map_err(|err| TransportError::Http(err.to_string()))?;

        Ok(Response { status: response.status().as_u16(), body })
    }
}

/// Paces targets out to the endpoint.
#[derive(Debug)]
pub struct Attacker<T> {
    transport: Arc<T>,
}

impl<T: Transport> Attacker<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Starts the attack and hands back its results as they arrive.
    ///
    /// One target is taken from `targeter` per tick until `rate.hits(duration)` targets
    /// have been issued or `shutdown` fires. Every send runs on its own task so a slow
    /// response never delays the next tick. The receiver yields `None` once the last
    /// in-flight send has reported.
    pub fn attack(
        &self,
        targeter: Arc<Targeter>,
        rate: Rate,
        duration: Duration,
        shutdown: CancellationToken
    ) -> mpsc::Receiver<RawResult> {
        let (tx, rx) = mpsc::channel(RESULT_BUFFER);
        let transport = Arc::clone(&self.transport);

        tokio::spawn(async move {
            let hits = rate.hits(duration);
            let mut ticker = interval(rate.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

            info!(hits, freq = rate.freq, per = ?rate.per, ?duration, "attack started");

            for seq in 0..hits {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        info!(issued = seq, "attack interrupted");
                        break;
                    }
                    _ = ticker.tick() => {}
                }

                let target = targeter.next();
                let transport = Arc::clone(&transport);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let result = hit(transport.as_ref(), seq, target).await;
                    // the runner only hangs up when it is aborting
                    let _ = tx.send(result).await;
                });
            }

            debug!("attack pacing finished");
        });

        rx
    }
}

async fn hit<T: Transport>(transport: &T, seq: u64, target: AttackTarget) -> RawResult {
    let timestamp = SystemTime::now();
    let start = Instant::now();

    let response = transport.send(&target).await;

    let latency = start.elapsed();
    let mut result = RawResult {
        seq,
        from: target.from,
        confirmable: target.confirmable,
        code: 0,
        timestamp,
        latency,
        bytes_out: target.body.len() as u64,
        bytes_in: 0,
        body: Vec::new(),
        error: None,
    };

    match response {
        Ok(response) => {
            result.code = response.status;
            result.bytes_in = response.body.len() as u64;
            result.body = response.body;
            if !result.is_2xx() {
                result.error = Some(format!("unexpected status {}", response.status));
            }
        }
        Err(err) => {
            debug!(seq, error = %err, "send failed");
            result.error = Some(err.to_string());
        }
    }

    result
}
