//! Minimal Aptos fullnode REST client for the settlement pipeline.
//!
//! Four operations only: a balance view call, a BCS simulation, a BCS
//! submission, and a by-hash confirmation poll. The client is constructed
//! once per configured chain and shared by concurrent requests.

use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::codec::AccountAddress;
use crate::types::SettleError;

const BCS_SIGNED_TRANSACTION: &str = "application/x.aptos.signed_transaction+bcs";
const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_millis(1_000);

#[derive(Debug, Clone)]
pub struct AptosRpc {
    http: reqwest::Client,
    base: String,
}

#[derive(Debug, Deserialize)]
struct SimulationOutcome {
    success: bool,
    vm_status: String,
}

#[derive(Debug, Deserialize)]
struct PendingTransaction {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct CommittedTransaction {
    #[serde(rename = "type")]
    transaction_type: String,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    vm_status: Option<String>,
}

impl AptosRpc {
    pub fn new(base: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.as_str().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    /// Point-in-time fungible-asset balance of `owner`, via the
    /// `0x1::primary_fungible_store::balance` view function.
    pub async fn fungible_balance(
        &self,
        owner: &AccountAddress,
        asset: &AccountAddress,
    ) -> Result<u64, SettleError> {
        let body = serde_json::json!({
            "function": "0x1::primary_fungible_store::balance",
            "type_arguments": ["0x1::fungible_asset::Metadata"],
            "arguments": [owner.to_string(), asset.to_string()],
        });
        let response = self
            .http
            .post(self.endpoint("view"))
            .json(&body)
            .send()
            .await
            .map_err(|e| SettleError::Rpc(format!("balance query: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SettleError::Rpc(format!("balance query: {status}: {text}")));
        }
        let values: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| SettleError::Rpc(format!("balance response: {e}")))?;
        let raw = values
            .first()
            .and_then(|v| v.as_str())
            .ok_or_else(|| SettleError::Rpc("balance response missing value".to_string()))?;
        raw.parse::<u64>()
            .map_err(|e| SettleError::Rpc(format!("balance response: {e}")))
    }

    /// Dry-runs the transaction against the chain VM. The payload must carry
    /// zeroed signatures; the node rejects real ones on this endpoint.
    pub async fn simulate(&self, signed_transaction: Vec<u8>) -> Result<(), SettleError> {
        let response = self
            .http
            .post(self.endpoint(
                "transactions/simulate?estimate_gas_unit_price=false&estimate_max_gas_amount=false",
            ))
            .header(reqwest::header::CONTENT_TYPE, BCS_SIGNED_TRANSACTION)
            .body(signed_transaction)
            .send()
            .await
            .map_err(|e| SettleError::Rpc(format!("simulation request: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SettleError::Simulation(format!("{status}: {text}")));
        }
        let outcomes: Vec<SimulationOutcome> = response
            .json()
            .await
            .map_err(|e| SettleError::Rpc(format!("simulation response: {e}")))?;
        let outcome = outcomes
            .into_iter()
            .next()
            .ok_or_else(|| SettleError::Rpc("empty simulation response".to_string()))?;
        if outcome.success {
            Ok(())
        } else {
            // The chain's status string is reported verbatim.
            Err(SettleError::Simulation(outcome.vm_status))
        }
    }

    /// Broadcasts the fully signed transaction. Single attempt; the caller
    /// owns retry policy once broadcast may have happened.
    pub async fn submit(&self, signed_transaction: Vec<u8>) -> Result<String, SettleError> {
        let response = self
            .http
            .post(self.endpoint("transactions"))
            .header(reqwest::header::CONTENT_TYPE, BCS_SIGNED_TRANSACTION)
            .body(signed_transaction)
            .send()
            .await
            .map_err(|e| SettleError::Submission(format!("broadcast: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SettleError::Submission(format!("{status}: {text}")));
        }
        let pending: PendingTransaction = response
            .json()
            .await
            .map_err(|e| SettleError::Submission(format!("broadcast response: {e}")))?;
        Ok(pending.hash)
    }

    /// Polls until the hash is committed, or until `timeout` elapses.
    ///
    /// A timeout is reported as [`SettleError::ConfirmationTimeout`], which
    /// still names the hash: the transaction was broadcast and may land.
    pub async fn wait_for_transaction(
        &self,
        hash: &str,
        timeout: Duration,
    ) -> Result<(), SettleError> {
        let poll = async {
            loop {
                match self.transaction_by_hash(hash).await? {
                    TransactionState::Pending => {
                        tokio::time::sleep(CONFIRMATION_POLL_INTERVAL).await;
                    }
                    TransactionState::Committed => return Ok(()),
                    TransactionState::Failed(vm_status) => {
                        return Err(SettleError::Submission(format!(
                            "transaction {hash} rejected on-chain: {vm_status}"
                        )));
                    }
                }
            }
        };
        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(SettleError::ConfirmationTimeout {
                hash: hash.to_string(),
                waited_secs: timeout.as_secs(),
            }),
        }
    }

    async fn transaction_by_hash(&self, hash: &str) -> Result<TransactionState, SettleError> {
        let response = self
            .http
            .get(self.endpoint(&format!("transactions/by_hash/{hash}")))
            .send()
            .await
            .map_err(|e| SettleError::Rpc(format!("confirmation poll: {e}")))?;
        // The node answers 404 until the transaction reaches the mempool view.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(TransactionState::Pending);
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SettleError::Rpc(format!("confirmation poll: {status}: {text}")));
        }
        let committed: CommittedTransaction = response
            .json()
            .await
            .map_err(|e| SettleError::Rpc(format!("confirmation response: {e}")))?;
        if committed.transaction_type == "pending_transaction" {
            return Ok(TransactionState::Pending);
        }
        match committed.success {
            Some(false) => Ok(TransactionState::Failed(
                committed.vm_status.unwrap_or_else(|| "unknown".to_string()),
            )),
            _ => Ok(TransactionState::Committed),
        }
    }
}

enum TransactionState {
    Pending,
    Committed,
    Failed(String),
}
