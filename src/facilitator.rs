//! The facilitator interface: verify and settle pre-signed payments.
//!
//! Implementors route a [`SettlementRequest`] to the right chain adapter and
//! pass its result through unchanged. Routing failures (unknown or
//! unconfigured network) are configuration-style errors, reported separately
//! from verification failures, which always arrive as a well-formed
//! [`SettlementResult`].

use std::fmt::{Debug, Display};
use std::sync::Arc;

use crate::types::{SettlementRequest, SettlementResult};

/// Asynchronous verify/settle interface over one or more chains.
pub trait Facilitator {
    /// Routing-level error type; never used for verification failures.
    type Error: Debug + Display;

    /// Verifies that the signed payload satisfies the expected terms,
    /// without submitting anything to the chain.
    fn verify(
        &self,
        request: &SettlementRequest,
    ) -> impl Future<Output = Result<SettlementResult, Self::Error>> + Send;

    /// Verifies and then submits the payload, waiting for confirmation.
    fn settle(
        &self,
        request: &SettlementRequest,
    ) -> impl Future<Output = Result<SettlementResult, Self::Error>> + Send;

    /// Network identifiers this facilitator can settle on.
    fn supported(&self) -> Vec<String>;
}

impl<T: Facilitator> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(
        &self,
        request: &SettlementRequest,
    ) -> impl Future<Output = Result<SettlementResult, Self::Error>> + Send {
        self.as_ref().verify(request)
    }

    fn settle(
        &self,
        request: &SettlementRequest,
    ) -> impl Future<Output = Result<SettlementResult, Self::Error>> + Send {
        self.as_ref().settle(request)
    }

    fn supported(&self) -> Vec<String> {
        self.as_ref().supported()
    }
}
