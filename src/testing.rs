//! Stub endpoint, stub chain and fixtures shared by the unit tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{ AtomicBool, AtomicUsize, Ordering };
use std::sync::{ Mutex, Once };
use std::time::{ Duration, SystemTime, UNIX_EPOCH };

use tokio::time::{ sleep, Instant };
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::attacker::{ Rate, RawResult, Response, Transport };
use crate::chain::{ Block, ChainQuery, Receipt };
use crate::config::CampaignConfig;
use crate::error::{ ChainError, TransportError };
use crate::report::Format;
use crate::target::{ AttackTarget, Mode };
use crate::tracker::{ AnnotatedResult, Resolution };

pub const ACCOUNTS: [&str; 3] = [
    "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266",
    "0x70997970C51812dc3A010C7d01b50e0d17dc79C8",
    "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC",
];

pub const BLOCK_NUMBER: u64 = 7;

/// Routes `tracing` output through the test harness. Safe to call from every test.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

pub fn campaign(mode: Mode) -> CampaignConfig {
    CampaignConfig {
        name: "test".to_string(),
        rpc: Url::parse("http://127.0.0.1:9545").unwrap(),
        chain_id: 901,
        mode,
        rate: Rate { freq: 1, per: Duration::from_secs(1) },
        duration: Duration::from_secs(5),
        accounts: ACCOUNTS.iter().map(|account| account.to_string()).collect(),
        recipient: None,
        value: 1,
        gate: 3,
        poll_interval: Duration::from_secs(2),
        confirm_timeout: Some(Duration::from_secs(60)),
        threads: 1,
        timeout: Duration::from_secs(25),
        connection_timeout: Duration::from_secs(20),
        ready_timeout: Duration::from_secs(10),
        skip_ready: true,
        output: PathBuf::from("test.txt"),
        format: Format::Text,
        results: None,
    }
}

pub fn raw_result(seq: u64, code: u16, body: &str) -> RawResult {
    RawResult {
        seq,
        from: ACCOUNTS[(seq as usize) % ACCOUNTS.len()].to_string(),
        confirmable: true,
        code,
        timestamp: UNIX_EPOCH + Duration::from_secs(1_700_000_000 + seq),
        latency: Duration::from_millis(5),
        bytes_out: 120,
        bytes_in: body.len() as u64,
        body: body.as_bytes().to_vec(),
        error: (code / 100 != 2).then(|| format!("unexpected status {}", code)),
    }
}

pub fn annotated(seq: u64, code: u16, resolution: Resolution) -> AnnotatedResult {
    let raw = raw_result(seq, code, r#"{"jsonrpc":"2.0","id":0,"result":"0xabc"}"#);
    AnnotatedResult { latency: raw.latency, raw, tx_hash: None, resolution }
}

pub fn mined(seq: u64, status: u64, latency: Duration) -> AnnotatedResult {
    let raw = raw_result(seq, 200, r#"{"jsonrpc":"2.0","id":0,"result":"0xabc"}"#);
    AnnotatedResult {
        raw,
        tx_hash: Some("0xabc".to_string()),
        resolution: Resolution::Mined { status, block_number: BLOCK_NUMBER },
        latency,
    }
}

#[derive(Debug, Clone, Copy)]
enum Reply {
    Accept,
    Reject(u16),
    Unreachable,
}

/// Endpoint stand-in. Accepted submissions get a unique transaction hash.
#[derive(Debug)]
pub struct StubTransport {
    reply: Reply,
    sent: AtomicUsize,
}

impl StubTransport {
    pub fn accepting() -> Self {
        Self { reply: Reply::Accept, sent: AtomicUsize::new(0) }
    }

    pub fn rejecting(status: u16) -> Self {
        Self { reply: Reply::Reject(status), sent: AtomicUsize::new(0) }
    }

    pub fn unreachable() -> Self {
        Self { reply: Reply::Unreachable, sent: AtomicUsize::new(0) }
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

impl Transport for StubTransport {
    async fn send(&self, _target: &AttackTarget) -> Result<Response, TransportError> {
        let n = self.sent.fetch_add(1, Ordering::SeqCst);
        match self.reply {
            Reply::Accept => Ok(Response {
                status: 200,
                body: format!(r#"{{"jsonrpc":"2.0","id":{n},"result":"0x{n:064x}"}}"#).into_bytes(),
            }),
            Reply::Reject(status) => Ok(Response {
                status,
                body: format!(r#"{{"jsonrpc":"2.0","id":{n},"error":{{"code":-32000,"message":"rejected"}}}}"#).into_bytes(),
            }),
            Reply::Unreachable => Err(TransportError::Connect("connection refused".to_string())),
        }
    }
}

/// Lifetime of one transaction as seen by the stub chain.
#[derive(Debug, Clone, Copy)]
pub struct Track {
    pub misses: u64,
    pub lookups: u64,
    pub first_lookup: Instant,
    pub found: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
enum Mining {
    After(u64),
    Staggered,
    FailingThen(u64),
    Never,
    PanicOnce,
}

/// Chain stand-in that mines each transaction after a set number of lookups.
#[derive(Debug)]
pub struct StubChain {
    mining: Mining,
    status: u64,
    block_time: Option<u64>,
    lookup_delay: Option<Duration>,
    panicked: AtomicBool,
    tracks: Mutex<HashMap<String, Track>>,
    lookups: AtomicUsize,
    peak_pending: AtomicUsize,
}

impl StubChain {
    fn with_mining(mining: Mining) -> Self {
        Self {
            mining,
            status: 1,
            block_time: None,
            lookup_delay: None,
            panicked: AtomicBool::new(false),
            tracks: Mutex::new(HashMap::new()),
            lookups: AtomicUsize::new(0),
            peak_pending: AtomicUsize::new(0),
        }
    }

    /// Misses `polls` lookups, then returns the receipt.
    pub fn mined_after(polls: u64) -> Self {
        Self::with_mining(Mining::After(polls))
    }

    /// The k-th transaction seen misses `k % 4` lookups.
    pub fn staggered() -> Self {
        Self::with_mining(Mining::Staggered)
    }

    /// Fails `errors` lookups, then returns the receipt.
    pub fn failing_then_mined(errors: u64) -> Self {
        Self::with_mining(Mining::FailingThen(errors))
    }

    pub fn never_mined() -> Self {
        Self::with_mining(Mining::Never)
    }

    /// Panics on the very first lookup, mines everything else right away.
    pub fn panicking_once() -> Self {
        Self::with_mining(Mining::PanicOnce)
    }

    /// Every receipt lookup hangs for `delay` before answering.
    pub fn with_lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = Some(delay);
        self
    }

    pub fn with_status(mut self, status: u64) -> Self {
        self.status = status;
        self
    }

    pub fn with_block_time(mut self, timestamp: u64) -> Self {
        self.block_time = Some(timestamp);
        self
    }

    pub fn receipt_lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Most transactions ever polled at once.
    pub fn peak_pending(&self) -> usize {
        self.peak_pending.load(Ordering::SeqCst)
    }

    pub fn tracks(&self) -> Vec<Track> {
        let mut tracks: Vec<_> = self.tracks.lock().unwrap().values().copied().collect();
        tracks.sort_by_key(|track| track.first_lookup);
        tracks
    }
}

impl ChainQuery for StubChain {
    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, ChainError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.lookup_delay {
            sleep(delay).await;
        }
        if matches!(self.mining, Mining::PanicOnce) && !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("receipt lookup for {tx_hash} blew up");
        }
        let now = Instant::now();

        let mut tracks = self.tracks.lock().unwrap();
        let seen = tracks.len() as u64;
        let misses = match self.mining {
            Mining::After(polls) | Mining::FailingThen(polls) => polls,
            Mining::PanicOnce => 0,
            Mining::Staggered => seen % 4,
            Mining::Never => u64::MAX,
        };
        let track = tracks.entry(tx_hash.to_string()).or_insert(Track {
            misses,
            lookups: 0,
            first_lookup: now,
            found: None,
        });
        track.lookups += 1;
        let mined = track.lookups > track.misses;
        let failing = matches!(self.mining, Mining::FailingThen(_));
        if mined {
            track.found = Some(now);
        }

        let pending = tracks.values().filter(|track| track.found.is_none()).count();
        self.peak_pending.fetch_max(pending, Ordering::SeqCst);

        if mined {
            Ok(Some(Receipt { status: self.status, block_number: BLOCK_NUMBER }))
        } else if failing {
            Err(ChainError::Status(502))
        } else {
            Ok(None)
        }
    }

    async fn get_block(&self, number: u64) -> Result<Block, ChainError> {
        let timestamp = self.block_time.unwrap_or_else(|| {
            SystemTime::now().duration_since(UNIX_EPOCH).map(|now| now.as_secs()).unwrap_or_default() + 2
        });
        Ok(Block { number, timestamp })
    }
}
