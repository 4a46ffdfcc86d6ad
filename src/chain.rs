//! JSON-RPC plumbing and the receipt/block lookups confirmation relies on.

use std::future::Future;
use std::sync::atomic::{ AtomicU64, Ordering };

use isahc::{ AsyncReadResponseExt, HttpClient, Request };
use serde::de::DeserializeOwned;
use serde::{ Deserialize, Serialize };
use url::Url;

use crate::error::{ ChainError, TransportError };

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

impl<'a, P: Serialize> JsonRpcRequest<'a, P> {
    pub fn new(id: u64, method: &'a str, params: P) -> Self {
        Self { jsonrpc: "2.0", id, method, params }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        // params are plain json values, serialization cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse<R> {
    pub result: Option<R>,
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// Formats a value as a `0x`-prefixed hex quantity.
pub fn to_quantity(value: impl Into<u128>) -> String {
    format!("{:#x}", value.into())
}

/// Decodes a `0x`-prefixed hex quantity.
pub fn from_quantity(raw: &str) -> Option<u64> {
    u64::from_str_radix(raw.strip_prefix("0x")?, 16).ok()
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub status: u64,
    pub block_number: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub timestamp: u64, // unix seconds
}

/// Read access to the chain a campaign is loading.
pub trait ChainQuery: Send + Sync + 'static {
    /// `Ok(None)` while the transaction is not mined yet.
    fn get_receipt(
        &self,
        tx_hash: &str
    ) -> impl Future<Output = Result<Option<Receipt>, ChainError>> + Send;

    fn get_block(&self, number: u64) -> impl Future<Output = Result<Block, ChainError>> + Send;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptWire {
    status: Option<String>,
    block_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlockWire {
    number: String,
    timestamp: String,
}

/// [`ChainQuery`] over HTTP JSON-RPC.
#[derive(Debug)]
pub struct HttpChain {
    client: HttpClient,
    url: Url,
    ids: AtomicU64,
}

impl HttpChain {
    pub fn new(client: HttpClient, url: Url) -> Self {
        Self { client, url, ids: AtomicU64::new(1) }
    }

    async fn call<P, R>(&self, method: &str, params: P) -> Result<Option<R>, ChainError>
        where P: Serialize + Send, R: DeserializeOwned + Send
    {
        let id = self.ids.fetch_add(1, Ordering::Relaxed);
        let request = Request::post(self.url.as_str())
            .header("content-type", "application/json")
            .body(JsonRpcRequest::new(id, method, params).to_vec())
            .map_err(|err| TransportError::Http(err.to_string()))?;

        let mut response = self.client.send_async(request).await.map_err(TransportError::from)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|err| TransportError::Http(err.to_string()))?;
        if status / 100 != 2 {
            return Err(ChainError::Status(status));
        }

        let decoded: JsonRpcResponse<R> = serde_json
            ::from_slice(&body)
            .map_err(|err| ChainError::Decode(err.to_string()))?;
        match decoded.error {
            Some(JsonRpcError { code, message }) => Err(ChainError::Rpc { code, message }),
            None => Ok(decoded.result),
        }
    }
}

impl ChainQuery for HttpChain {
    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, ChainError> {
        let wire: Option<ReceiptWire> = self.call("eth_getTransactionReceipt", [tx_hash]).await?;
        let Some(wire) = wire else {
            return Ok(None);
        };
        // a receipt without a block number is still pending
        let Some(block_number) = wire.block_number.as_deref().and_then(from_quantity) else {
            return Ok(None);
        };
        let status = match wire.status.as_deref() {
            Some(raw) => from_quantity(raw).ok_or_else(|| ChainError::Decode(format!("receipt status {raw:?}")))?,
            None => return Err(ChainError::Decode("receipt without status".to_string())),
        };
        Ok(Some(Receipt { status, block_number }))
    }

    async fn get_block(&self, number: u64) -> Result<Block, ChainError> {
        let wire: Option<BlockWire> = self
            .call("eth_getBlockByNumber", (to_quantity(number), false)).await?;
        let wire = wire.ok_or(ChainError::MissingBlock(number))?;
        let decode = |raw: &str| from_quantity(raw).ok_or_else(|| ChainError::Decode(format!("block field {raw:?}")));
        Ok(Block { number: decode(&wire.number)?, timestamp: decode(&wire.timestamp)? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{ json, Value };

    #[test]
    fn requests_carry_the_envelope() {
        let encoded = JsonRpcRequest::new(7, "eth_chainId", ()).to_vec();
        let value: Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(value, json!({ "jsonrpc": "2.0", "id": 7, "method": "eth_chainId", "params": null }));

        let encoded = JsonRpcRequest::new(8, "eth_getBlockByNumber", ("0x10", false)).to_vec();
        let value: Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(value["params"], json!(["0x10", false]));
    }

    #[test]
    fn quantities_are_hex() {
        assert_eq!(to_quantity(0u64), "0x0");
        assert_eq!(to_quantity(255u64), "0xff");
        assert_eq!(from_quantity("0x1f"), Some(31));
        assert_eq!(from_quantity("1f"), None);
        assert_eq!(from_quantity("0xnope"), None);
    }

    #[test]
    fn responses_decode_result_or_error() {
        let ok: JsonRpcResponse<String> = serde_json
            ::from_str(r#"{"jsonrpc":"2.0","id":1,"result":"0xabc"}"#)
            .unwrap();
        assert_eq!(ok.result.as_deref(), Some("0xabc"));
        assert!(ok.error.is_none());

        let pending: JsonRpcResponse<Value> = serde_json
            ::from_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#)
            .unwrap();
        assert!(pending.result.is_none());

        let failed: JsonRpcResponse<String> = serde_json
            ::from_str(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"nonce too low"}}"#)
            .unwrap();
        assert!(failed.result.is_none());
        assert_eq!(failed.error.unwrap().message, "nonce too low");
    }

    #[test]
    fn receipts_and_blocks_decode_from_wire_shape() {
        let receipt: ReceiptWire = serde_json
            ::from_value(json!({ "status": "0x1", "blockNumber": "0x2a", "transactionHash": "0xaa" }))
            .unwrap();
        assert_eq!(receipt.status.as_deref(), Some("0x1"));
        assert_eq!(receipt.block_number.as_deref().and_then(from_quantity), Some(42));

        let block: BlockWire = serde_json
            ::from_value(json!({ "number": "0x2a", "timestamp": "0x65000000", "hash": "0xbb" }))
            .unwrap();
        assert_eq!(from_quantity(&block.timestamp), Some(0x6500_0000));
    }
}
