use std::sync::atomic::{ AtomicU64, Ordering };

use clap::ValueEnum;
use serde::{ Deserialize, Serialize };
use serde_json::json;

use crate::chain::{ to_quantity, JsonRpcRequest };
use crate::config::CampaignConfig;

/// What every target of a campaign asks the endpoint to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Submit a value transfer and follow it until it is mined.
    #[default]
    Transfer,
    /// Read-only balance lookup, nothing to confirm.
    Call,
}

/// One fully built outbound request.
#[derive(Debug, Clone)]
pub struct AttackTarget {
    pub url: String,
    pub body: Vec<u8>,
    pub from: String,
    pub confirmable: bool,
}

/// Builds one target per tick, cycling over the sender pool in order.
#[derive(Debug)]
pub struct Targeter {
    url: String,
    mode: Mode,
    chain_id: u64,
    accounts: Vec<String>,
    recipient: Option<String>,
    value: u128,
    issued: AtomicU64,
}

impl Targeter {
    pub fn new(config: &CampaignConfig) -> Self {
        Self {
            url: config.rpc.to_string(),
            mode: config.mode,
            chain_id: config.chain_id,
            accounts: config.accounts.clone(),
            recipient: config.recipient.clone(),
            value: config.value,
            issued: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> AttackTarget {
        let seq = self.issued.fetch_add(1, Ordering::Relaxed);
        let slot = (seq % (self.accounts.len() as u64)) as usize;
        let from = &self.accounts[slot];

        let body = match self.mode {
            Mode::Transfer => {
                let to = self.recipient
                    .as_deref()
                    .unwrap_or(&self.accounts[(slot + 1) % self.accounts.len()]);
                let tx = json!({
                    "from": from,
                    "to": to,
                    "value": to_quantity(self.value),
                    "chainId": to_quantity(self.chain_id),
                });
                JsonRpcRequest::new(seq, "eth_sendTransaction", [tx]).to_vec()
            }
            Mode::Call => JsonRpcRequest::new(seq, "eth_getBalance", (from, "latest")).to_vec(),
        };

        AttackTarget {
            url: self.url.clone(),
            body,
            from: from.clone(),
            confirmable: self.mode == Mode::Transfer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ campaign, ACCOUNTS };
    use serde_json::Value;

    fn body(target: &AttackTarget) -> Value {
        serde_json::from_slice(&target.body).unwrap()
    }

    #[test]
    fn senders_cycle_deterministically() {
        let targeter = Targeter::new(&campaign(Mode::Transfer));
        let senders: Vec<_> = (0..7).map(|_| targeter.next().from).collect();

        let expected: Vec<_> = (0..7).map(|i| ACCOUNTS[i % ACCOUNTS.len()].to_string()).collect();
        assert_eq!(senders, expected);
    }

    #[test]
    fn transfers_go_to_the_next_account_by_default() {
        let targeter = Targeter::new(&campaign(Mode::Transfer));
        let target = targeter.next();
        let payload = body(&target);

        assert!(target.confirmable);
        assert_eq!(payload["jsonrpc"], "2.0");
        assert_eq!(payload["id"], 0);
        assert_eq!(payload["method"], "eth_sendTransaction");
        assert_eq!(payload["params"][0]["from"], ACCOUNTS[0]);
        assert_eq!(payload["params"][0]["to"], ACCOUNTS[1]);
        assert_eq!(payload["params"][0]["value"], "0x1");
        assert_eq!(payload["params"][0]["chainId"], "0x385");
    }

    #[test]
    fn configured_recipient_wins() {
        let mut config = campaign(Mode::Transfer);
        config.recipient = Some("0x000000000000000000000000000000000000dEaD".to_string());
        let targeter = Targeter::new(&config);

        for _ in 0..3 {
            let payload = body(&targeter.next());
            assert_eq!(payload["params"][0]["to"], "0x000000000000000000000000000000000000dEaD");
        }
    }

    #[test]
    fn calls_are_not_confirmable() {
        let targeter = Targeter::new(&campaign(Mode::Call));
        targeter.next();
        let target = targeter.next();
        let payload = body(&target);

        assert!(!target.confirmable);
        assert_eq!(payload["id"], 1);
        assert_eq!(payload["method"], "eth_getBalance");
        assert_eq!(payload["params"], json!([ACCOUNTS[1], "latest"]));
    }
}
