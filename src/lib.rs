//! Verify-then-settle facilitator for pre-signed on-chain payments.
//!
//! A client hands over a base64-encoded, pre-signed transaction together
//! with the payment terms it is supposed to satisfy (recipient, amount,
//! asset, network). The facilitator decodes the payload, checks it against
//! those terms without ever holding keys or mutating the transaction, and
//! on `/settle` relays it to the chain and waits for confirmation.
//!
//! Structure:
//! - [`types`] — wire types and the settlement error taxonomy
//! - [`network`] — CAIP-2 chain identifiers and legacy aliases
//! - [`chain`] — per-family adapters (Aptos, EVM, Solana)
//! - [`orchestrator`] — the adapter registry and request routing
//! - [`handlers`] — the axum HTTP surface
//! - [`config`], [`telemetry`], [`sig_down`] — service plumbing

pub mod chain;
pub mod config;
pub mod facilitator;
pub mod handlers;
pub mod network;
pub mod orchestrator;
pub mod sig_down;
pub mod telemetry;
pub mod types;
pub mod util;
