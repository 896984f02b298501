//! Wire types and the settlement error taxonomy.
//!
//! A [`SettlementRequest`] carries a pre-signed, chain-specific transaction
//! blob plus optional expected payment terms. Adapters answer with a
//! [`SettlementResult`]: exactly one of success or failure, with `payer`
//! populated as soon as the sender address is decodable. The result shape is
//! shared by `/verify` and `/settle` and maps directly to the HTTP body.

use serde::{Deserialize, Serialize};

/// A request to verify or settle one pre-signed payment instruction.
///
/// Expected terms are optional; when present they are authoritative and must
/// match the decoded transaction exactly. `expected_amount` is a decimal
/// integer string, never floating point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRequest {
    /// CAIP-2 identifier or legacy alias, e.g. `"aptos:1"` or `"aptos"`.
    pub network: String,
    /// Base64-encoded, chain-specific signed transaction payload.
    pub signed_transaction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_asset: Option<String>,
}

/// Outcome of a verify or settle call.
///
/// `transaction_hash` is present only on a successful settlement. `payer` is
/// best-effort metadata, not a success signal: it is filled in whenever the
/// sender address could be decoded, including on most failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl SettlementResult {
    /// A transaction accepted by verification but not (yet) submitted.
    pub fn verified(payer: impl Into<String>) -> Self {
        Self {
            success: true,
            transaction_hash: None,
            payer: Some(payer.into()),
            error_message: None,
        }
    }

    /// A settled transaction with its on-chain hash.
    pub fn settled(transaction_hash: impl Into<String>, payer: impl Into<String>) -> Self {
        Self {
            success: true,
            transaction_hash: Some(transaction_hash.into()),
            payer: Some(payer.into()),
            error_message: None,
        }
    }

    /// A rejection at any pipeline stage, with the best-available payer.
    pub fn rejected(payer: Option<String>, error: SettleError) -> Self {
        Self {
            success: false,
            transaction_hash: None,
            payer,
            error_message: Some(error.to_string()),
        }
    }
}

/// Everything that can go wrong between decoding a payload and confirming
/// its inclusion on chain.
///
/// Each pipeline stage converts its own faults into one of these; nothing
/// escapes past an adapter as an unhandled fault. Messages are stable and
/// human-readable — callers match on them, so changes are breaking.
#[derive(Debug, thiserror::Error)]
pub enum SettleError {
    /// Payload bytes are malformed or structurally inconsistent.
    #[error("Malformed payload: {0}")]
    Decoding(String),
    /// Chain id embedded in the transaction differs from the requested network.
    #[error("Chain ID mismatch: expected {expected}, got {got}")]
    ChainMismatch { expected: u64, got: u64 },
    /// Address derived from the authenticator's public key is not the declared sender.
    #[error("Sender/authenticator mismatch")]
    AuthenticatorMismatch,
    /// Expiration timestamp is inside the safety buffer.
    #[error("Transaction expired")]
    Expired,
    /// The call target is not in the transfer whitelist.
    #[error("Unsupported function: {0}")]
    UnsupportedOperation(String),
    /// The whitelisted operation was called with the wrong argument count.
    #[error("Expected {expected} function arguments, got {got}")]
    ArgumentShape { expected: usize, got: usize },
    /// Decoded asset differs from the caller-supplied expectation.
    #[error("Asset mismatch")]
    AssetMismatch,
    /// Decoded recipient differs from the caller-supplied expectation.
    #[error("Recipient mismatch")]
    RecipientMismatch,
    /// Decoded amount differs from the caller-supplied expectation.
    #[error("Amount mismatch: expected {expected}, got {got}")]
    AmountMismatch { expected: String, got: String },
    /// A caller-supplied expectation could not be parsed for this chain.
    #[error("Invalid expected value: {0}")]
    Expectation(String),
    /// Point-in-time balance query came back below the transfer amount.
    #[error("Insufficient balance: has {has}, needs {needs}")]
    InsufficientBalance { has: String, needs: String },
    /// Dry-run rejected by the chain's execution environment.
    #[error("Simulation failed: {0}")]
    Simulation(String),
    /// Broadcast was attempted and failed, or the chain rejected the transaction.
    #[error("Submission failed: {0}")]
    Submission(String),
    /// Broadcast happened, but the bounded confirmation wait elapsed.
    /// The transaction may still land; this is not a terminal failure.
    #[error("Transaction {hash} submitted but unconfirmed after {waited_secs}s")]
    ConfirmationTimeout { hash: String, waited_secs: u64 },
    /// Transport-level RPC failure on a read-only call.
    #[error("RPC error: {0}")]
    Rpc(String),
}
