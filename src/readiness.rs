//! Pre-flight probes run once before the first target goes out.

use std::future::Future;
use std::time::Duration;

use isahc::{ AsyncReadResponseExt, HttpClient, Request };
use serde_json::Value;
use tokio::time::{ sleep, timeout };
use tracing::{ debug, info };
use url::Url;

use crate::chain::{ from_quantity, JsonRpcRequest, JsonRpcResponse };
use crate::error::ReadinessError;

pub const PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Waits until the endpoint answers any HTTP request at all.
pub async fn await_liveness(client: &HttpClient, url: &Url, limit: Duration) -> Result<(), ReadinessError> {
    poll_until(url, limit, PROBE_INTERVAL, move || async move {
        client.get_async(url.as_str()).await.ok().map(|_| ())
    }).await?;
    info!(%url, "endpoint is live");
    Ok(())
}

/// Waits until the endpoint completes an `eth_chainId` round trip, returning the chain id.
pub async fn await_rpc_ready(client: &HttpClient, url: &Url, limit: Duration) -> Result<u64, ReadinessError> {
    let body = JsonRpcRequest::new(1, "eth_chainId", [(); 0]).to_vec();
    // a request that cannot be built would otherwise look like a slow node
    chain_id_request(url, body.clone())?;

    let chain_id = poll_until(url, limit, PROBE_INTERVAL, move || {
        let request = chain_id_request(url, body.clone());
        async move {
            let mut response = client.send_async(request.ok()?).await.ok()?;
            if !response.status().is_success() {
                return None;
            }
            chain_id_of(&response.bytes().await.ok()?)
        }
    }).await?;

    info!(%url, chain_id, "endpoint answers json-rpc");
    Ok(chain_id)
}

fn chain_id_request(url: &Url, body: Vec<u8>) -> Result<Request<Vec<u8>>, ReadinessError> {
    Request::post(url.as_str())
        .header("content-type", "application/json")
        .body(body)
        .map_err(|err| ReadinessError::Request(err.to_string()))
}

fn chain_id_of(body: &[u8]) -> Option<u64> {
    let response: JsonRpcResponse<Value> = serde_json::from_slice(body).ok()?;
    match response.result? {
        Value::String(raw) => from_quantity(&raw),
        _ => None,
    }
}

/// Runs `probe` every `interval` until it yields a value or `limit` elapses.
pub async fn poll_until<T, F, Fut>(
    url: &Url,
    limit: Duration,
    interval: Duration,
    mut probe: F
) -> Result<T, ReadinessError>
    where F: FnMut() -> Fut, Fut: Future<Output = Option<T>>
{
    let polled = timeout(limit, async {
        loop {
            if let Some(ready) = probe().await {
                return ready;
            }
            debug!(%url, "endpoint not ready yet");
            sleep(interval).await;
        }
    }).await;

    polled.map_err(|_| ReadinessError::Timeout { url: url.to_string(), timeout: limit })
}
