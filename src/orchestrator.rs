//! Request routing across configured chain adapters.
//!
//! The registry is built once at startup from configuration and holds one
//! adapter per configured chain. Requests name a network (CAIP-2 or alias);
//! the registry resolves it and dispatches to the adapter, which owns the
//! whole verify/settle pipeline. Routing failures are the only errors that
//! surface here; everything downstream arrives as a [`SettlementResult`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::chain::aptos::AptosAdapter;
use crate::chain::eip155::Eip155Adapter;
use crate::chain::solana::SolanaAdapter;
use crate::chain::ChainAdapter;
use crate::config::{ChainEntry, Config};
use crate::facilitator::Facilitator;
use crate::network::{ChainFamily, ChainId, NetworkIdError};
use crate::types::{SettlementRequest, SettlementResult};

/// Errors that prevent a request from reaching any adapter.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error(transparent)]
    UnknownNetwork(#[from] NetworkIdError),
    /// The network resolved but no adapter is configured for it.
    #[error("Network not configured: {0}")]
    NotConfigured(ChainId),
}

/// Errors in the configuration that prevent an adapter from being built.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unsupported chain namespace: {0}")]
    UnsupportedNamespace(ChainId),
    #[error("Invalid chain reference for {chain}: {reason}")]
    InvalidReference { chain: ChainId, reason: String },
}

pub struct AdapterRegistry {
    adapters: HashMap<ChainId, Arc<dyn ChainAdapter>>,
}

impl AdapterRegistry {
    /// Builds one adapter per configured chain. Fails fast on the first
    /// entry that cannot be built; a partially capable server is worse than
    /// a loud startup error.
    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        let mut adapters: HashMap<ChainId, Arc<dyn ChainAdapter>> = HashMap::new();
        for (chain_id, entry) in config.chains() {
            let adapter = Self::build_adapter(chain_id, entry)?;
            info!(chain = %chain_id, rpc = %entry.rpc(), "configured chain");
            adapters.insert(chain_id.clone(), adapter);
        }
        Ok(Self { adapters })
    }

    fn build_adapter(
        chain_id: &ChainId,
        entry: &ChainEntry,
    ) -> Result<Arc<dyn ChainAdapter>, RegistryError> {
        let family = chain_id
            .family()
            .ok_or_else(|| RegistryError::UnsupportedNamespace(chain_id.clone()))?;
        let adapter: Arc<dyn ChainAdapter> = match family {
            ChainFamily::Aptos => {
                let chain_ref: u8 = chain_id.reference.parse().map_err(|_| {
                    RegistryError::InvalidReference {
                        chain: chain_id.clone(),
                        reason: "Aptos chain reference must be a small integer".to_string(),
                    }
                })?;
                Arc::new(AptosAdapter::new(
                    chain_id.clone(),
                    chain_ref,
                    entry.rpc().clone(),
                    entry.confirmation_timeout(),
                ))
            }
            ChainFamily::Eip155 => {
                let chain_ref: u64 = chain_id.reference.parse().map_err(|_| {
                    RegistryError::InvalidReference {
                        chain: chain_id.clone(),
                        reason: "eip155 chain reference must be an integer".to_string(),
                    }
                })?;
                Arc::new(Eip155Adapter::new(
                    chain_id.clone(),
                    chain_ref,
                    entry.rpc().clone(),
                    entry.confirmation_timeout(),
                ))
            }
            ChainFamily::Solana => Arc::new(SolanaAdapter::new(
                chain_id.clone(),
                entry.rpc().clone(),
                entry.confirmation_timeout(),
            )),
        };
        Ok(adapter)
    }

    /// Resolves a network name (CAIP-2 or alias) to its configured adapter.
    fn route(&self, network: &str) -> Result<&Arc<dyn ChainAdapter>, RoutingError> {
        let chain_id: ChainId = network.parse()?;
        self.adapters
            .get(&chain_id)
            .ok_or(RoutingError::NotConfigured(chain_id))
    }
}

impl Facilitator for AdapterRegistry {
    type Error = RoutingError;

    async fn verify(&self, request: &SettlementRequest) -> Result<SettlementResult, RoutingError> {
        let adapter = self.route(&request.network)?;
        Ok(adapter.verify(request).await)
    }

    async fn settle(&self, request: &SettlementRequest) -> Result<SettlementResult, RoutingError> {
        let adapter = self.route(&request.network)?;
        Ok(adapter.settle(request).await)
    }

    fn supported(&self) -> Vec<String> {
        let mut networks: Vec<String> = self
            .adapters
            .keys()
            .map(|chain_id| chain_id.to_string())
            .collect();
        networks.sort();
        networks
    }
}
