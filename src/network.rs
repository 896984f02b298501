//! Network identifiers and their resolution.
//!
//! Incoming requests name a network either by a CAIP-2 identifier
//! (`"<namespace>:<reference>"`, e.g. `aptos:1`) or by a legacy human alias
//! (e.g. `"aptos-testnet"`). Both forms resolve deterministically to exactly
//! one [`ChainId`]; anything else is a hard error, never a silent default.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// CAIP-2 namespace for Aptos chains.
pub const APTOS_NAMESPACE: &str = "aptos";
/// CAIP-2 namespace for EVM chains.
pub const EIP155_NAMESPACE: &str = "eip155";
/// CAIP-2 namespace for Solana clusters.
pub const SOLANA_NAMESPACE: &str = "solana";

/// Genesis-hash prefix identifying Solana mainnet-beta in CAIP-2.
pub const SOLANA_MAINNET_REFERENCE: &str = "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp";
/// Genesis-hash prefix identifying Solana devnet in CAIP-2.
pub const SOLANA_DEVNET_REFERENCE: &str = "EtWTRABZaYq6iMfeYKouRu166VU2xqa1";

/// A CAIP-2 chain identifier: a namespace plus a chain reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainId {
    pub namespace: String,
    pub reference: String,
}

impl ChainId {
    pub fn new(namespace: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            reference: reference.into(),
        }
    }

    /// The chain family this identifier belongs to, if supported.
    pub fn family(&self) -> Option<ChainFamily> {
        match self.namespace.as_str() {
            APTOS_NAMESPACE => Some(ChainFamily::Aptos),
            EIP155_NAMESPACE => Some(ChainFamily::Eip155),
            SOLANA_NAMESPACE => Some(ChainFamily::Solana),
            _ => None,
        }
    }
}

impl Display for ChainId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

/// Error produced when a network identifier cannot be resolved.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NetworkIdError {
    #[error("Unknown network identifier: {0}")]
    UnknownAlias(String),
    #[error("Unknown network namespace: {0}")]
    UnknownNamespace(String),
    #[error("Invalid network identifier: {0}")]
    InvalidFormat(String),
}

impl FromStr for ChainId {
    type Err = NetworkIdError;

    /// Parses a CAIP-2 string or resolves a legacy alias.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((namespace, reference)) = s.split_once(':') {
            if namespace.is_empty() || reference.is_empty() {
                return Err(NetworkIdError::InvalidFormat(s.to_string()));
            }
            let chain_id = ChainId::new(namespace, reference);
            if chain_id.family().is_none() {
                return Err(NetworkIdError::UnknownNamespace(namespace.to_string()));
            }
            return Ok(chain_id);
        }
        resolve_alias(s).ok_or_else(|| NetworkIdError::UnknownAlias(s.to_string()))
    }
}

/// Maps legacy human aliases to their CAIP-2 equivalents.
///
/// Both the alias and the CAIP-2 form must resolve to the same adapter.
fn resolve_alias(alias: &str) -> Option<ChainId> {
    let chain_id = match alias {
        "aptos" => ChainId::new(APTOS_NAMESPACE, "1"),
        "aptos-testnet" => ChainId::new(APTOS_NAMESPACE, "2"),
        "base" => ChainId::new(EIP155_NAMESPACE, "8453"),
        "base-sepolia" => ChainId::new(EIP155_NAMESPACE, "84532"),
        "polygon" => ChainId::new(EIP155_NAMESPACE, "137"),
        "polygon-amoy" => ChainId::new(EIP155_NAMESPACE, "80002"),
        "solana" => ChainId::new(SOLANA_NAMESPACE, SOLANA_MAINNET_REFERENCE),
        "solana-devnet" => ChainId::new(SOLANA_NAMESPACE, SOLANA_DEVNET_REFERENCE),
        _ => return None,
    };
    Some(chain_id)
}

impl Serialize for ChainId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ChainId::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Supported chain families. Each family has one adapter implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainFamily {
    Aptos,
    Eip155,
    Solana,
}
