//! EVM settlement adapter.
//!
//! Works on any eip155 chain: the payload is an EIP-2718 typed-transaction
//! envelope, signed by the payer. There is no declared sender on the wire,
//! so the payer is whoever the signature recovers to; a tampered payload
//! recovers to a different address and fails the balance check rather than
//! impersonating anyone. EVM transactions carry no expiration field, so the
//! expiration stage does not exist on this chain.

use std::time::Duration;

use alloy_consensus::Transaction;
use alloy_consensus::transaction::SignerRecoverable;
use alloy_consensus::TxEnvelope;
use alloy_eips::eip2718::Decodable2718;
use alloy_primitives::{Address, TxKind, U256};
use alloy_provider::{PendingTransactionError, Provider, RootProvider, WatchTxError};
use alloy_rpc_types_eth::TransactionRequest;
use alloy_sol_types::{SolCall, sol};
use tracing::{info, instrument, warn};
use url::Url;

use super::ChainAdapter;
use crate::network::ChainId;
use crate::types::{SettleError, SettlementRequest, SettlementResult};
use crate::util::b64;

/// USDC contract on Base mainnet.
pub const USDC_BASE: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";
/// USDC contract on Base Sepolia.
pub const USDC_BASE_SEPOLIA: &str = "0x036CbD53842c5426634e7929541eC2318f3dCF7e";

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function transfer(address to, uint256 value) external returns (bool);
        function balanceOf(address owner) external view returns (uint256);
    }
}

/// The transfer terms extracted from a whitelisted calldata payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TransferTerms {
    asset: Address,
    recipient: Address,
    amount: U256,
}

pub struct Eip155Adapter {
    chain: ChainId,
    /// The numeric eip155 chain id signed into every transaction.
    chain_ref: u64,
    provider: RootProvider,
    confirmation_timeout: Duration,
}

impl Eip155Adapter {
    pub fn new(
        chain: ChainId,
        chain_ref: u64,
        rpc_url: Url,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            chain,
            chain_ref,
            provider: RootProvider::new_http(rpc_url),
            confirmation_timeout,
        }
    }

    fn decode(&self, request: &SettlementRequest) -> Result<(TxEnvelope, Vec<u8>), SettleError> {
        let bytes = b64::decode(&request.signed_transaction)
            .map_err(|e| SettleError::Decoding(format!("base64: {e}")))?;
        let envelope = TxEnvelope::decode_2718(&mut bytes.as_slice())
            .map_err(|e| SettleError::Decoding(format!("transaction envelope: {e}")))?;
        Ok((envelope, bytes))
    }

    /// Local checks in pipeline order. The recovered signer doubles as the
    /// authenticator-consistency stage: recovery failure means the signature
    /// does not authorize any sender.
    fn check_local(
        &self,
        envelope: &TxEnvelope,
        request: &SettlementRequest,
    ) -> Result<(Address, TransferTerms), SettleError> {
        match envelope.chain_id() {
            Some(got) if got == self.chain_ref => {}
            Some(got) => {
                return Err(SettleError::ChainMismatch {
                    expected: self.chain_ref,
                    got,
                });
            }
            // Pre-eip155 transactions are replayable across chains.
            None => {
                return Err(SettleError::Decoding(
                    "transaction carries no chain id".to_string(),
                ));
            }
        }

        let payer = envelope
            .recover_signer()
            .map_err(|_| SettleError::AuthenticatorMismatch)?;

        let TxKind::Call(asset) = envelope.kind() else {
            return Err(SettleError::UnsupportedOperation(
                "contract creation".to_string(),
            ));
        };
        if envelope.value() != U256::ZERO {
            return Err(SettleError::UnsupportedOperation(
                "native value transfer".to_string(),
            ));
        }
        let input = envelope.input();
        let call = IERC20::transferCall::abi_decode(input).map_err(|_| {
            let selector = if input.len() >= 4 {
                format!("selector 0x{}", hex::encode(&input[..4]))
            } else {
                "empty calldata".to_string()
            };
            SettleError::UnsupportedOperation(selector)
        })?;

        let terms = TransferTerms {
            asset,
            recipient: call.to,
            amount: call.value,
        };

        if let Some(expected) = &request.expected_asset {
            let expected: Address = expected
                .parse()
                .map_err(|e| SettleError::Expectation(format!("asset address: {e}")))?;
            if expected != terms.asset {
                return Err(SettleError::AssetMismatch);
            }
        }
        if let Some(expected) = &request.expected_amount {
            let expected_amount = U256::from_str_radix(expected, 10)
                .map_err(|_| SettleError::Expectation(format!("not an integer amount: {expected}")))?;
            if expected_amount != terms.amount {
                return Err(SettleError::AmountMismatch {
                    expected: expected_amount.to_string(),
                    got: terms.amount.to_string(),
                });
            }
        }
        if let Some(expected) = &request.expected_recipient {
            let expected: Address = expected
                .parse()
                .map_err(|e| SettleError::Expectation(format!("recipient address: {e}")))?;
            if expected != terms.recipient {
                return Err(SettleError::RecipientMismatch);
            }
        }

        Ok((payer, terms))
    }

    async fn check_balance(&self, payer: Address, terms: &TransferTerms) -> Result<(), SettleError> {
        let erc20 = IERC20::new(terms.asset, &self.provider);
        let has = erc20
            .balanceOf(payer)
            .call()
            .await
            .map_err(|e| SettleError::Rpc(format!("balance query: {e}")))?;
        if has < terms.amount {
            return Err(SettleError::InsufficientBalance {
                has: has.to_string(),
                needs: terms.amount.to_string(),
            });
        }
        Ok(())
    }

    /// Executes the call without state changes via `eth_call`, from the
    /// payer's address, so reverts surface before broadcast.
    async fn simulate(&self, payer: Address, envelope: &TxEnvelope) -> Result<(), SettleError> {
        let tx = TransactionRequest {
            from: Some(payer),
            to: Some(envelope.kind()),
            input: envelope.input().clone().into(),
            ..Default::default()
        };
        self.provider
            .call(tx)
            .await
            .map_err(|e| SettleError::Simulation(e.to_string()))?;
        Ok(())
    }

    async fn submit_and_confirm(&self, raw: &[u8]) -> Result<String, SettleError> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| SettleError::Submission(format!("broadcast: {e}")))?;
        let hash = format!("{:#x}", pending.tx_hash());
        info!(%hash, "transaction broadcast");

        let receipt = pending
            .with_timeout(Some(self.confirmation_timeout))
            .get_receipt()
            .await
            .map_err(|e| match e {
                PendingTransactionError::TxWatcher(WatchTxError::Timeout) => {
                    SettleError::ConfirmationTimeout {
                        hash: hash.clone(),
                        waited_secs: self.confirmation_timeout.as_secs(),
                    }
                }
                other => SettleError::Rpc(format!("confirmation: {other}")),
            })?;
        if !receipt.status() {
            return Err(SettleError::Submission(format!(
                "transaction {hash} reverted on-chain"
            )));
        }
        Ok(hash)
    }

    async fn verify_inner(
        &self,
        request: &SettlementRequest,
    ) -> Result<(TxEnvelope, Vec<u8>, Address), (Option<String>, SettleError)> {
        let (envelope, raw) = self.decode(request).map_err(|e| (None, e))?;
        // Best-effort payer attribution for rejections; the pipeline's own
        // recovery happens inside the ordered checks.
        let payer_hint = envelope
            .recover_signer()
            .ok()
            .map(|address| format!("{address:#x}"));
        let (payer, terms) = self
            .check_local(&envelope, request)
            .map_err(|e| (payer_hint, e))?;
        self.check_balance(payer, &terms)
            .await
            .map_err(|e| (Some(format!("{payer:#x}")), e))?;
        Ok((envelope, raw, payer))
    }
}

#[async_trait::async_trait]
impl ChainAdapter for Eip155Adapter {
    fn chain_id(&self) -> &ChainId {
        &self.chain
    }

    #[instrument(skip_all, fields(network = %self.chain))]
    async fn verify(&self, request: &SettlementRequest) -> SettlementResult {
        match self.verify_inner(request).await {
            Ok((_, _, payer)) => SettlementResult::verified(format!("{payer:#x}")),
            Err((payer, error)) => {
                info!(%error, "verification rejected");
                SettlementResult::rejected(payer, error)
            }
        }
    }

    #[instrument(skip_all, fields(network = %self.chain))]
    async fn settle(&self, request: &SettlementRequest) -> SettlementResult {
        let (envelope, raw, payer) = match self.verify_inner(request).await {
            Ok(decoded) => decoded,
            Err((payer, error)) => {
                info!(%error, "settlement rejected before submission");
                return SettlementResult::rejected(payer, error);
            }
        };
        let payer_hex = format!("{payer:#x}");

        let staged = async {
            self.simulate(payer, &envelope).await?;
            self.submit_and_confirm(&raw).await
        };
        match staged.await {
            Ok(hash) => {
                info!(%hash, payer = %payer_hex, "settled");
                SettlementResult::settled(hash, payer_hex)
            }
            Err(error) => {
                warn!(%error, payer = %payer_hex, "settlement failed");
                SettlementResult::rejected(Some(payer_hex), error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_consensus::{SignableTransaction, TxEip1559};
    use alloy_eips::eip2718::Encodable2718;
    use alloy_primitives::{Bytes, address};
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;

    const ASSET: Address = address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e");
    const RECIPIENT: Address = address!("0x1111111111111111111111111111111111111111");

    fn adapter(chain_ref: u64) -> Eip155Adapter {
        Eip155Adapter::new(
            ChainId::new("eip155", chain_ref.to_string()),
            chain_ref,
            "http://localhost:8545".parse().unwrap(),
            Duration::from_secs(30),
        )
    }

    fn transfer_calldata(recipient: Address, amount: u64) -> Bytes {
        IERC20::transferCall {
            to: recipient,
            value: U256::from(amount),
        }
        .abi_encode()
        .into()
    }

    fn signed_envelope(
        signer: &PrivateKeySigner,
        chain_id: u64,
        value: U256,
        input: Bytes,
    ) -> TxEnvelope {
        let tx = TxEip1559 {
            chain_id,
            nonce: 0,
            gas_limit: 100_000,
            max_fee_per_gas: 2_000_000_000,
            max_priority_fee_per_gas: 1_000_000_000,
            to: TxKind::Call(ASSET),
            value,
            access_list: Default::default(),
            input,
        };
        let signature = signer.sign_hash_sync(&tx.signature_hash()).unwrap();
        TxEnvelope::Eip1559(tx.into_signed(signature))
    }

    fn bare_request() -> SettlementRequest {
        SettlementRequest {
            network: "eip155:84532".to_string(),
            signed_transaction: String::new(),
            expected_recipient: None,
            expected_amount: None,
            expected_asset: None,
        }
    }

    #[test]
    fn accepts_a_valid_transfer_and_recovers_the_signer() {
        let signer = PrivateKeySigner::random();
        let envelope = signed_envelope(
            &signer,
            84532,
            U256::ZERO,
            transfer_calldata(RECIPIENT, 100),
        );
        let (payer, terms) = adapter(84532)
            .check_local(&envelope, &bare_request())
            .unwrap();
        assert_eq!(payer, signer.address());
        assert_eq!(terms.asset, ASSET);
        assert_eq!(terms.recipient, RECIPIENT);
        assert_eq!(terms.amount, U256::from(100u64));
    }

    #[test]
    fn rejects_wrong_chain_with_both_ids_in_message() {
        let signer = PrivateKeySigner::random();
        let envelope =
            signed_envelope(&signer, 8453, U256::ZERO, transfer_calldata(RECIPIENT, 100));
        let err = adapter(84532)
            .check_local(&envelope, &bare_request())
            .unwrap_err();
        assert_eq!(err.to_string(), "Chain ID mismatch: expected 84532, got 8453");
    }

    #[test]
    fn rejects_non_transfer_calldata_by_selector() {
        let signer = PrivateKeySigner::random();
        // approve(address,uint256)
        let mut calldata = vec![0x09, 0x5e, 0xa7, 0xb3];
        calldata.extend_from_slice(&[0u8; 64]);
        let envelope = signed_envelope(&signer, 84532, U256::ZERO, calldata.into());
        let err = adapter(84532)
            .check_local(&envelope, &bare_request())
            .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported function: selector 0x095ea7b3");
    }

    #[test]
    fn rejects_native_value_transfer() {
        let signer = PrivateKeySigner::random();
        let envelope = signed_envelope(
            &signer,
            84532,
            U256::from(1u64),
            transfer_calldata(RECIPIENT, 100),
        );
        let err = adapter(84532)
            .check_local(&envelope, &bare_request())
            .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported function: native value transfer");
    }

    #[test]
    fn matches_expected_terms() {
        let signer = PrivateKeySigner::random();
        let envelope = signed_envelope(
            &signer,
            84532,
            U256::ZERO,
            transfer_calldata(RECIPIENT, 100),
        );
        let mut request = bare_request();
        request.expected_asset = Some(format!("{ASSET:#x}"));
        request.expected_recipient = Some(format!("{RECIPIENT:#x}"));
        request.expected_amount = Some("100".to_string());
        adapter(84532).check_local(&envelope, &request).unwrap();

        request.expected_amount = Some("1000".to_string());
        let err = adapter(84532).check_local(&envelope, &request).unwrap_err();
        assert_eq!(err.to_string(), "Amount mismatch: expected 1000, got 100");
    }

    #[test]
    fn rejects_recipient_mismatch() {
        let signer = PrivateKeySigner::random();
        let envelope = signed_envelope(
            &signer,
            84532,
            U256::ZERO,
            transfer_calldata(RECIPIENT, 100),
        );
        let mut request = bare_request();
        request.expected_recipient =
            Some("0x2222222222222222222222222222222222222222".to_string());
        let err = adapter(84532).check_local(&envelope, &request).unwrap_err();
        assert_eq!(err.to_string(), "Recipient mismatch");
    }

    #[tokio::test]
    async fn truncated_envelope_rejects_without_payer() {
        let signer = PrivateKeySigner::random();
        let envelope = signed_envelope(
            &signer,
            84532,
            U256::ZERO,
            transfer_calldata(RECIPIENT, 100),
        );
        let mut encoded = Vec::new();
        envelope.encode_2718(&mut encoded);
        encoded.truncate(encoded.len() / 2);

        let mut request = bare_request();
        request.signed_transaction = b64::encode(&encoded);
        let result = adapter(84532).verify(&request).await;
        assert!(!result.success);
        assert!(result.payer.is_none());
        assert!(
            result
                .error_message
                .as_deref()
                .unwrap()
                .starts_with("Malformed payload:")
        );
    }

    #[test]
    fn round_trips_through_wire_encoding() {
        let signer = PrivateKeySigner::random();
        let envelope = signed_envelope(
            &signer,
            84532,
            U256::ZERO,
            transfer_calldata(RECIPIENT, 100),
        );
        let mut encoded = Vec::new();
        envelope.encode_2718(&mut encoded);

        let mut request = bare_request();
        request.signed_transaction = b64::encode(&encoded);
        let (decoded, raw) = adapter(84532).decode(&request).unwrap();
        assert_eq!(raw, encoded);
        assert_eq!(
            decoded.recover_signer().unwrap(),
            envelope.recover_signer().unwrap()
        );
    }
}
