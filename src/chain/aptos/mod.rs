//! Aptos settlement adapter.
//!
//! Verifies a BCS-encoded, pre-signed fungible-asset transfer against the
//! expected payment terms, then relays it to a fullnode. The adapter never
//! holds keys and never mutates the transaction: what the payer signed is
//! exactly what reaches the chain.

pub mod codec;
pub mod rpc;

use std::time::Duration;

use tracing::{info, instrument, warn};
use url::Url;

use self::codec::{AccountAddress, DecodedPayload, EntryFunction};
use self::rpc::AptosRpc;
use super::{ChainAdapter, EXPIRATION_BUFFER_SECS, unix_now_secs};
use crate::network::ChainId;
use crate::types::{SettleError, SettlementRequest, SettlementResult};

/// USDC fungible-asset metadata address on Aptos mainnet.
pub const USDC_MAINNET: &str =
    "0xbae207659db88bea0cbead6da0ed00aac12edcdda169e591cd41c94180b46f3b";
/// USDC fungible-asset metadata address on Aptos testnet.
pub const USDC_TESTNET: &str =
    "0x69091fbab5f7d635ee7ac5098cf0c1efbe31d68fec0f2cd565e8d168daf52832";

/// Entry functions the adapter is willing to relay. Both take the same
/// `(asset, recipient, amount)` argument shape.
const TRANSFER_WHITELIST: &[(&str, &str)] = &[
    ("primary_fungible_store", "transfer"),
    ("fungible_asset", "transfer"),
];

const TRANSFER_ARG_COUNT: usize = 3;

/// The transfer terms extracted from a whitelisted call, after all local
/// checks have passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TransferTerms {
    asset: AccountAddress,
    recipient: AccountAddress,
    amount: u64,
}

pub struct AptosAdapter {
    chain: ChainId,
    /// The on-transaction chain id byte (`1` mainnet, `2` testnet).
    chain_ref: u8,
    rpc: AptosRpc,
    confirmation_timeout: Duration,
}

impl AptosAdapter {
    pub fn new(
        chain: ChainId,
        chain_ref: u8,
        rpc_url: Url,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            chain,
            chain_ref,
            rpc: AptosRpc::new(rpc_url),
            confirmation_timeout,
        }
    }

    /// Local, side-effect-free checks, in their fixed order: chain identity,
    /// authenticator consistency, expiration, operation whitelist, argument
    /// shape, expected-value matching. The first failure wins.
    fn check_local(
        &self,
        decoded: &DecodedPayload,
        request: &SettlementRequest,
    ) -> Result<TransferTerms, SettleError> {
        let raw = &decoded.raw_transaction;

        if raw.chain_id != self.chain_ref {
            return Err(SettleError::ChainMismatch {
                expected: u64::from(self.chain_ref),
                got: u64::from(raw.chain_id),
            });
        }

        // Multi-signer schemes have no single derivable address; for them
        // the chain itself is the authority on key validity.
        if decoded.authenticator.is_single_signer()
            && decoded.authenticator.derived_address()? != raw.sender
        {
            return Err(SettleError::AuthenticatorMismatch);
        }

        if raw.expiration_timestamp_secs < unix_now_secs() + EXPIRATION_BUFFER_SECS {
            return Err(SettleError::Expired);
        }

        let entry_function = raw.entry_function();
        if !is_whitelisted(entry_function) {
            return Err(SettleError::UnsupportedOperation(format!(
                "{}::{}",
                entry_function.module.name, entry_function.function
            )));
        }

        if entry_function.args.len() != TRANSFER_ARG_COUNT {
            return Err(SettleError::ArgumentShape {
                expected: TRANSFER_ARG_COUNT,
                got: entry_function.args.len(),
            });
        }

        let terms = TransferTerms {
            asset: codec::arg_address(&entry_function.args[0])?,
            recipient: codec::arg_address(&entry_function.args[1])?,
            amount: codec::arg_u64(&entry_function.args[2])?,
        };

        if let Some(expected) = &request.expected_asset {
            let expected: AccountAddress =
                expected.parse().map_err(SettleError::Expectation)?;
            if expected != terms.asset {
                return Err(SettleError::AssetMismatch);
            }
        }
        if let Some(expected) = &request.expected_amount {
            let expected_amount: u64 = expected
                .parse()
                .map_err(|_| SettleError::Expectation(format!("not an integer amount: {expected}")))?;
            if expected_amount != terms.amount {
                return Err(SettleError::AmountMismatch {
                    expected: expected_amount.to_string(),
                    got: terms.amount.to_string(),
                });
            }
        }
        if let Some(expected) = &request.expected_recipient {
            let expected: AccountAddress =
                expected.parse().map_err(SettleError::Expectation)?;
            if expected != terms.recipient {
                return Err(SettleError::RecipientMismatch);
            }
        }

        Ok(terms)
    }

    async fn check_balance(
        &self,
        sender: &AccountAddress,
        terms: &TransferTerms,
    ) -> Result<(), SettleError> {
        let has = self.rpc.fungible_balance(sender, &terms.asset).await?;
        if has < terms.amount {
            return Err(SettleError::InsufficientBalance {
                has: has.to_string(),
                needs: terms.amount.to_string(),
            });
        }
        Ok(())
    }

    /// Decode plus all verification stages. Returns the decoded payload so
    /// `settle` can continue without re-parsing.
    async fn verify_inner(
        &self,
        request: &SettlementRequest,
    ) -> Result<DecodedPayload, (Option<String>, SettleError)> {
        let decoded = codec::decode(&request.signed_transaction).map_err(|e| (None, e))?;
        let payer = decoded.sender().to_string();
        let terms = self
            .check_local(&decoded, request)
            .map_err(|e| (Some(payer.clone()), e))?;
        self.check_balance(&decoded.sender(), &terms)
            .await
            .map_err(|e| (Some(payer), e))?;
        Ok(decoded)
    }
}

fn is_whitelisted(entry_function: &EntryFunction) -> bool {
    entry_function.module.address == AccountAddress::ONE
        && TRANSFER_WHITELIST.iter().any(|(module, function)| {
            entry_function.module.name.as_str() == *module
                && entry_function.function.as_str() == *function
        })
}

#[async_trait::async_trait]
impl ChainAdapter for AptosAdapter {
    fn chain_id(&self) -> &ChainId {
        &self.chain
    }

    #[instrument(skip_all, fields(network = %self.chain))]
    async fn verify(&self, request: &SettlementRequest) -> SettlementResult {
        match self.verify_inner(request).await {
            Ok(decoded) => SettlementResult::verified(decoded.sender().to_string()),
            Err((payer, error)) => {
                info!(%error, "verification rejected");
                SettlementResult::rejected(payer, error)
            }
        }
    }

    #[instrument(skip_all, fields(network = %self.chain))]
    async fn settle(&self, request: &SettlementRequest) -> SettlementResult {
        let decoded = match self.verify_inner(request).await {
            Ok(decoded) => decoded,
            Err((payer, error)) => {
                info!(%error, "settlement rejected before submission");
                return SettlementResult::rejected(payer, error);
            }
        };
        let payer = decoded.sender().to_string();

        let staged = async {
            self.rpc.simulate(decoded.simulation_bytes()?).await?;
            let hash = self.rpc.submit(decoded.signed_transaction_bytes()?).await?;
            info!(%hash, "transaction broadcast");
            self.rpc
                .wait_for_transaction(&hash, self.confirmation_timeout)
                .await?;
            Ok::<String, SettleError>(hash)
        };
        match staged.await {
            Ok(hash) => {
                info!(%hash, payer, "settled");
                SettlementResult::settled(hash, payer)
            }
            Err(error) => {
                warn!(%error, payer, "settlement failed");
                SettlementResult::rejected(Some(payer), error)
            }
        }
    }
}
