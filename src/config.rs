use std::fs;
use std::path::{ Path, PathBuf };
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use tokio::sync::Semaphore;
use url::Url;

use crate::attacker::Rate;
use crate::error::ConfigError;
use crate::report::Format;
use crate::target::Mode;

const DEFAULT_RPC: &str = "http://localhost:9545";
const DEFAULT_RATE: &str = "100/1s";
const DEFAULT_DURATION: &str = "2s";
const DEFAULT_NAME: &str = "trunks";

// Command line arguments. Values left unset fall back to the scenario file, then to defaults.
#[derive(Debug, Parser)]
#[command(name = "trunks", version)]
#[command(about = "Paced transaction load against a chain RPC endpoint, reported as time-to-inclusion")]
#[command(after_help = "Durations can be specified like: 10s, 1m, 1h (bare numbers are seconds)")]
pub struct Args {
    /// Target JSON-RPC endpoint
    #[arg(long)]
    pub rpc: Option<String>,

    /// Chain id stamped into every submitted transaction
    #[arg(long, default_value_t = 901)]
    pub chain_id: u64,

    /// Requests per period, e.g. 100, 100/1s, 5/1m
    #[arg(short, long)]
    pub rate: Option<String>,

    /// Attack duration
    #[arg(short, long)]
    pub duration: Option<String>,

    /// Kind of request to issue
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Sender identities, used round-robin
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub accounts: Vec<String>,

    /// Transfer recipient (defaults to the next account in the pool)
    #[arg(long)]
    pub recipient: Option<String>,

    /// Transfer value in wei, decimal or 0x-prefixed hex
    #[arg(long)]
    pub value: Option<String>,

    /// Maximum number of confirmation trackers polling at once
    #[arg(short, long, default_value_t = 3)]
    pub gate: usize,

    /// Interval between receipt lookups
    #[arg(long, default_value = "2s", value_parser = parse_duration)]
    pub poll_interval: Duration,

    /// Give up on a transaction after this long (0 waits forever)
    #[arg(long, default_value = "60s", value_parser = parse_duration_or_zero)]
    pub confirm_timeout: Duration,

    /// Number of runtime worker threads
    #[arg(short, long, default_value_t = 4)]
    pub threads: usize,

    /// Request timeout (whole request/response cycle)
    #[arg(short = 'T', long, default_value = "25s", value_parser = parse_duration)]
    pub timeout: Duration,

    /// Connection timeout
    #[arg(short = 'C', long, default_value = "20s", value_parser = parse_duration)]
    pub connection_timeout: Duration,

    /// How long to wait for the endpoint to come up before attacking
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub ready_timeout: Duration,

    /// Do not probe the endpoint before attacking
    #[arg(long)]
    pub skip_ready: bool,

    /// Report file (defaults to <scenario name>.txt)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Report format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    pub format: Format,

    /// Write every resolved request as a JSON line to this file
    #[arg(long)]
    pub results: Option<PathBuf>,

    /// YAML scenario file
    #[arg(short, long)]
    pub scenario: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Campaign description loaded from a YAML file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Scenario {
    pub name: Option<String>,
    pub rpc: Option<String>,
    pub rate: Option<String>,
    pub duration: Option<String>,
    pub mode: Option<Mode>,
    pub accounts: Vec<String>,
    pub recipient: Option<String>,
    pub value: Option<String>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::ScenarioRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::ScenarioParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Validated, immutable description of one campaign.
#[derive(Debug, Clone)]
pub struct CampaignConfig {
    pub name: String,
    pub rpc: Url,
    pub chain_id: u64,
    pub mode: Mode,
    pub rate: Rate,
    pub duration: Duration,
    pub accounts: Vec<String>,
    pub recipient: Option<String>,
    pub value: u128,

    pub gate: usize, // admission gate capacity
    pub poll_interval: Duration,
    pub confirm_timeout: Option<Duration>, // None polls until resolved or interrupted

    pub threads: usize,
    pub timeout: Duration,
    pub connection_timeout: Duration,
    pub ready_timeout: Duration,
    pub skip_ready: bool,

    pub output: PathBuf,
    pub format: Format,
    pub results: Option<PathBuf>,
}

impl CampaignConfig {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let scenario = match &args.scenario {
            Some(path) => Scenario::load(path)?,
            None => Scenario::default(),
        };
        Self::resolve(args, scenario)
    }

    /// Merges flags over the scenario and validates the result.
    pub fn resolve(args: Args, scenario: Scenario) -> Result<Self, ConfigError> {
        let name = scenario.name.unwrap_or_else(|| DEFAULT_NAME.to_string());

        let rpc = args.rpc.or(scenario.rpc).unwrap_or_else(|| DEFAULT_RPC.to_string());
        let rpc = Url::parse(&rpc).map_err(|source| ConfigError::InvalidUrl { url: rpc.clone(), source })?;

        let rate: Rate = args.rate
            .or(scenario.rate)
            .as_deref()
            .unwrap_or(DEFAULT_RATE)
            .parse()?;

        let duration = parse_duration(
            args.duration.or(scenario.duration).as_deref().unwrap_or(DEFAULT_DURATION)
        )?;

        let accounts = if args.accounts.is_empty() { scenario.accounts } else { args.accounts };
        if accounts.is_empty() {
            return Err(ConfigError::NoAccounts);
        }
        for account in &accounts {
            validate_address(account)?;
        }

        let recipient = args.recipient.or(scenario.recipient);
        if let Some(recipient) = &recipient {
            validate_address(recipient)?;
        }

        let value = match args.value.or(scenario.value) {
            Some(value) => parse_quantity(&value)?,
            None => 1,
        };

        if args.gate == 0 {
            return Err(ConfigError::ZeroGate);
        }
        if args.gate > Semaphore::MAX_PERMITS {
            return Err(ConfigError::GateTooLarge { gate: args.gate, max: Semaphore::MAX_PERMITS });
        }

        let output = args.output.unwrap_or_else(|| PathBuf::from(format!("{}.txt", name)));

        Ok(Self {
            name,
            rpc,
            chain_id: args.chain_id,
            mode: args.mode.or(scenario.mode).unwrap_or_default(),
            rate,
            duration,
            accounts,
            recipient,
            value,
            gate: args.gate,
            poll_interval: args.poll_interval,
            confirm_timeout: (!args.confirm_timeout.is_zero()).then_some(args.confirm_timeout),
            threads: args.threads.max(1),
            timeout: args.timeout,
            connection_timeout: args.connection_timeout,
            ready_timeout: args.ready_timeout,
            skip_ready: args.skip_ready,
            output,
            format: args.format,
            results: args.results,
        })
    }
}

/// Parses `10s`, `1m`, `1h` or a bare number of seconds. Zero is rejected.
pub fn parse_duration(duration_str: &str) -> Result<Duration, ConfigError> {
    let duration = parse_duration_or_zero(duration_str)?;
    if duration.is_zero() {
        return Err(ConfigError::ZeroDuration);
    }
    Ok(duration)
}

pub fn parse_duration_or_zero(duration_str: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(duration_str.to_string());
    let duration_str = duration_str.trim();
    if duration_str.is_empty() {
        return Err(invalid());
    }

    // milliseconds first so the trailing "s" is not taken for seconds
    if let Some(value) = duration_str.strip_suffix("ms") {
        return value.parse().map(Duration::from_millis).map_err(|_| invalid());
    }

    // if no unit is provided use seconds "s"
    let (value_str, unit) = match duration_str.char_indices().last() {
        Some((idx, 's' | 'm' | 'h')) => duration_str.split_at(idx),
        _ => (duration_str, "s"),
    };
    let value: u64 = value_str.parse().map_err(|_| invalid())?;

    let multiplier = match unit {
        "m" => 60,
        "h" => 60 * 60,
        _ => 1,
    };
    value.checked_mul(multiplier).map(Duration::from_secs).ok_or_else(invalid)
}

/// Parses a decimal or `0x`-prefixed hex quantity.
pub fn parse_quantity(raw: &str) -> Result<u128, ConfigError> {
    let parsed = match raw.strip_prefix("0x") {
        Some(hex) => u128::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|_| ConfigError::InvalidQuantity(raw.to_string()))
}

fn validate_address(address: &str) -> Result<(), ConfigError> {
    let valid = address
        .strip_prefix("0x")
        .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()));
    if valid { Ok(()) } else { Err(ConfigError::InvalidAddress(address.to_string())) }
}
