use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Rejected campaign configuration. Raised before any load is issued.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid rate {0:?}, expected FREQ or FREQ/PER (e.g. 100/1s)")]
    InvalidRate(String),
    #[error("invalid duration {0:?}, expected a value like 10s, 1m, 1h")]
    InvalidDuration(String),
    #[error("invalid quantity {0:?}, expected a decimal or 0x-prefixed hex number")]
    InvalidQuantity(String),
    #[error("invalid account address {0:?}")]
    InvalidAddress(String),
    #[error("invalid url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("rate must be greater than zero")]
    ZeroRate,
    #[error("duration must be greater than zero")]
    ZeroDuration,
    #[error("admission gate capacity must be greater than zero")]
    ZeroGate,
    #[error("admission gate capacity {gate} exceeds the maximum of {max}")]
    GateTooLarge { gate: usize, max: usize },
    #[error("no sender accounts configured, use --accounts or the scenario file")]
    NoAccounts,
    #[error("failed to read scenario {path}: {source}")]
    ScenarioRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse scenario {path}: {source}")]
    ScenarioParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Failure to get any response out of the target endpoint.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("http error: {0}")]
    Http(String),
}

impl From<isahc::Error> for TransportError {
    fn from(err: isahc::Error) -> Self {
        match err.kind() {
            isahc::error::ErrorKind::Timeout => TransportError::Timeout,
            isahc::error::ErrorKind::ConnectionFailed
            | isahc::error::ErrorKind::NameResolution => TransportError::Connect(err.to_string()),
            _ => TransportError::Http(err.to_string()),
        }
    }
}

/// Chain query failures. A receipt that is not found yet is not an error.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed rpc response: {0}")]
    Decode(String),
    #[error("block {0} not found")]
    MissingBlock(u64),
}

#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("server at {url} did not reply after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("failed to build probe request: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("admission gate is closed")]
    Closed,
}

/// Setup or orchestration failure that aborts the whole run.
#[derive(Debug, Error)]
pub enum CampaignError {
    #[error(transparent)]
    Readiness(#[from] ReadinessError),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error("failed to build http client: {0}")]
    Client(#[from] isahc::Error),
    #[error("failed to create latency histogram: {0}")]
    Histogram(#[from] hdrhistogram::CreationError),
    #[error("metrics still shared by {0} outstanding worker(s)")]
    Outstanding(usize),
    #[error("failed to write results to {path}: {source}")]
    Results {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
