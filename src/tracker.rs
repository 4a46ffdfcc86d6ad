use std::sync::Arc;
use std::time::{ Duration, SystemTime, UNIX_EPOCH };

use serde::Serialize;
use serde_json::Value;
use tokio::time::{ sleep, timeout_at, Instant };
use tokio_util::sync::CancellationToken;
use tracing::{ debug, info, warn };

use crate::attacker::RawResult;
use crate::chain::{ ChainQuery, JsonRpcResponse, Receipt };

/// Final status of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    /// Read-only call, nothing to confirm.
    Read,
    /// Submission returned no transaction hash.
    Rejected,
    /// Included on chain with the receipt status.
    Mined { status: u64, block_number: u64 },
    /// Abandoned before a receipt showed up.
    Unconfirmed,
}

/// A raw result plus its resolved outcome.
#[derive(Debug, Clone)]
pub struct AnnotatedResult {
    pub raw: RawResult,
    pub tx_hash: Option<String>,
    pub resolution: Resolution,
    pub latency: Duration, // time to inclusion once mined, round trip otherwise
}

impl AnnotatedResult {
    /// Result that needs no confirmation.
    pub fn pass_through(raw: RawResult) -> Self {
        let resolution = if raw.confirmable { Resolution::Rejected } else { Resolution::Read };
        Self { latency: raw.latency, raw, tx_hash: None, resolution }
    }

    /// Result given up on before a receipt showed up.
    pub fn abandoned(raw: RawResult) -> Self {
        let Some(tx_hash) = tx_ref(&raw) else {
            return Self::pass_through(raw);
        };
        Self {
            latency: raw.latency,
            raw,
            tx_hash: Some(tx_hash),
            resolution: Resolution::Unconfirmed,
        }
    }

    pub fn is_success(&self) -> bool {
        match self.resolution {
            Resolution::Mined { status, .. } => status == 1,
            Resolution::Read => self.raw.is_2xx() && self.raw.error.is_none() && rpc_succeeded(&self.raw.body),
            Resolution::Rejected | Resolution::Unconfirmed => false,
        }
    }
}

fn rpc_succeeded(body: &[u8]) -> bool {
    serde_json
        ::from_slice::<JsonRpcResponse<Value>>(body)
        .is_ok_and(|response| response.error.is_none() && response.result.is_some())
}

/// Transaction hash the endpoint handed back for a submission, if any.
pub fn tx_ref(raw: &RawResult) -> Option<String> {
    if !raw.confirmable || !raw.is_2xx() {
        return None;
    }
    let response: JsonRpcResponse<Value> = serde_json::from_slice(&raw.body).ok()?;
    match response.result? {
        Value::String(hash) if hash.starts_with("0x") => Some(hash),
        _ => None,
    }
}

/// Follows submitted transactions until they are mined.
#[derive(Debug)]
pub struct Tracker<C> {
    chain: Arc<C>,
    poll_interval: Duration,
}

impl<C: ChainQuery> Tracker<C> {
    pub fn new(chain: Arc<C>, poll_interval: Duration) -> Self {
        Self { chain, poll_interval }
    }

    /// Resolves `raw`. Results without a transaction hash pass straight through.
    ///
    /// Polls the receipt every `poll_interval` until it shows up, `deadline` passes or
    /// `shutdown` fires; the latter two resolve as [`Resolution::Unconfirmed`]. Once
    /// mined, latency becomes the containing block's timestamp minus the send time.
    pub async fn confirm(
        &self,
        raw: RawResult,
        deadline: Option<Instant>,
        shutdown: &CancellationToken
    ) -> AnnotatedResult {
        let Some(tx_hash) = tx_ref(&raw) else {
            return AnnotatedResult::pass_through(raw);
        };

        let polled = match deadline {
            Some(deadline) =>
                timeout_at(deadline, self.poll_receipt(&tx_hash, shutdown)).await.ok().flatten(),
            None => self.poll_receipt(&tx_hash, shutdown).await,
        };

        let Some(receipt) = polled else {
            info!(seq = raw.seq, %tx_hash, "gave up waiting for receipt");
            return AnnotatedResult::abandoned(raw);
        };

        let resolution = Resolution::Mined {
            status: receipt.status,
            block_number: receipt.block_number,
        };
        let block = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            block = self.chain.get_block(receipt.block_number) => Some(block),
        };
        let latency = match block {
            Some(Ok(block)) => time_to_inclusion(raw.timestamp, block.timestamp),
            None => raw.latency,
            Some(Err(err)) => {
                warn!(%tx_hash, block = receipt.block_number, error = %err, "block lookup failed, keeping round trip latency");
                raw.latency
            }
        };

        AnnotatedResult { raw, tx_hash: Some(tx_hash), resolution, latency }
    }

    // None only on shutdown
    async fn poll_receipt(&self, tx_hash: &str, shutdown: &CancellationToken) -> Option<Receipt> {
        loop {
            let looked_up = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                looked_up = self.chain.get_receipt(tx_hash) => looked_up,
            };
            match looked_up {
                Ok(Some(receipt)) => {
                    debug!(%tx_hash, status = receipt.status, block = receipt.block_number, "receipt found");
                    return Some(receipt);
                }
                Ok(None) => debug!(%tx_hash, "transaction is not yet mined"),
                Err(err) => warn!(%tx_hash, error = %err, "receipt lookup failed"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = sleep(self.poll_interval) => {}
            }
        }
    }
}

/// Block time minus submission time, zero when the block is stamped earlier.
pub fn time_to_inclusion(submitted: SystemTime, block_timestamp: u64) -> Duration {
    let mined = UNIX_EPOCH + Duration::from_secs(block_timestamp);
    mined.duration_since(submitted).unwrap_or(Duration::ZERO)
}
