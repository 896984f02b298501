//! Chain adapters.
//!
//! One adapter per supported network family, each implementing the same
//! verify-then-settle contract over chain-specific cryptography and RPC.
//! The Aptos adapter is the reference implementation of the full pipeline;
//! the EVM and Solana adapters generalize it to their chains' semantics.
//!
//! Pipeline ordering is a deliberate policy: cheap, side-effect-free local
//! checks (chain identity, authenticator, expiration, whitelist, argument
//! shape, expected-value matching) always run before any RPC call (balance,
//! simulation, submission), so rejected requests never reach the chain.

pub mod aptos;
pub mod eip155;
pub mod solana;

use crate::network::ChainId;
use crate::types::{SettlementRequest, SettlementResult};

/// Buffer below which a transaction expiration is considered already lost.
///
/// A transaction expiring sooner than this past `now` would race the
/// submission round-trip; reject it up front instead.
pub const EXPIRATION_BUFFER_SECS: u64 = 5;

/// The uniform per-chain verify/settle contract.
///
/// Implementations must be stateless across requests apart from their pooled
/// RPC client, and must never let a fault escape: every failure is converted
/// into a structured [`SettlementResult`] carrying the best-available payer.
#[async_trait::async_trait]
pub trait ChainAdapter: Send + Sync {
    /// The chain this adapter instance is bound to.
    fn chain_id(&self) -> &ChainId;

    /// Runs the read-only pipeline: decode, local checks, balance query.
    ///
    /// Idempotent and free of on-chain side effects; safe to call any
    /// number of times before (or without) settling.
    async fn verify(&self, request: &SettlementRequest) -> SettlementResult;

    /// Runs the full pipeline: everything `verify` does, then simulation,
    /// a single submission attempt, and a bounded confirmation wait.
    ///
    /// Submission is single-attempt by design. Once broadcast has happened,
    /// a blind retry risks double settlement on some chains, so retry policy
    /// is left to the caller, which knows whether broadcast occurred from
    /// the error message shape.
    async fn settle(&self, request: &SettlementRequest) -> SettlementResult;
}

/// Seconds since the Unix epoch, for expiration checks.
pub(crate) fn unix_now_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
