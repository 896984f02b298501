//! Solana settlement adapter.
//!
//! The payload is a bincode-encoded `VersionedTransaction`, fully signed by
//! the payer. Solana transactions embed neither a chain id nor an expiration
//! timestamp; the recent blockhash binds both the target cluster and the
//! validity window, and the chain enforces it during simulation and
//! submission. The local stages therefore start at signature verification.
//!
//! Only SPL Token `TransferChecked` is relayable, optionally preceded by
//! compute-budget instructions. The recipient expectation names the
//! destination token account, which is what the instruction moves funds to.

use std::str::FromStr;
use std::time::Duration;

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSimulateTransactionConfig;
use solana_commitment_config::CommitmentConfig;
use solana_compute_budget_interface::ID as COMPUTE_BUDGET_PROGRAM;
use solana_pubkey::Pubkey;
use solana_transaction::versioned::VersionedTransaction;
use spl_token::instruction::TokenInstruction;
use tracing::{info, instrument, warn};
use url::Url;

use super::ChainAdapter;
use crate::network::ChainId;
use crate::types::{SettleError, SettlementRequest, SettlementResult};
use crate::util::b64;

/// USDC mint on Solana mainnet-beta.
pub const USDC_MAINNET_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
/// USDC mint on Solana devnet.
pub const USDC_DEVNET_MINT: &str = "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU";

const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_millis(1_000);
const TRANSFER_ACCOUNT_COUNT: usize = 4;

/// The transfer terms extracted from a whitelisted instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TransferTerms {
    mint: Pubkey,
    source: Pubkey,
    destination: Pubkey,
    amount: u64,
}

pub struct SolanaAdapter {
    chain: ChainId,
    rpc: RpcClient,
    confirmation_timeout: Duration,
}

impl SolanaAdapter {
    pub fn new(chain: ChainId, rpc_url: Url, confirmation_timeout: Duration) -> Self {
        Self {
            chain,
            rpc: RpcClient::new_with_commitment(
                rpc_url.to_string(),
                CommitmentConfig::confirmed(),
            ),
            confirmation_timeout,
        }
    }

    fn decode(&self, request: &SettlementRequest) -> Result<VersionedTransaction, SettleError> {
        let bytes = b64::decode(&request.signed_transaction)
            .map_err(|e| SettleError::Decoding(format!("base64: {e}")))?;
        bincode::deserialize::<VersionedTransaction>(&bytes)
            .map_err(|e| SettleError::Decoding(format!("transaction: {e}")))
    }

    /// Local checks in pipeline order: structure, signatures, instruction
    /// whitelist, account shape, expected-value matching.
    fn check_local(
        &self,
        transaction: &VersionedTransaction,
        request: &SettlementRequest,
    ) -> Result<(Pubkey, TransferTerms), SettleError> {
        let message = &transaction.message;

        // Account keys reached through lookup tables cannot be resolved
        // without extra RPC; such transactions are outside the schema.
        if message
            .address_table_lookups()
            .is_some_and(|lookups| !lookups.is_empty())
        {
            return Err(SettleError::Decoding(
                "address lookup tables are not supported".to_string(),
            ));
        }

        let keys = message.static_account_keys();
        let required_signers = usize::from(message.header().num_required_signatures);
        if transaction.signatures.len() != required_signers || required_signers > keys.len() {
            return Err(SettleError::Decoding(format!(
                "expected {required_signers} signatures, got {}",
                transaction.signatures.len()
            )));
        }

        let message_bytes = message.serialize();
        for (signature, key) in transaction.signatures.iter().zip(keys.iter()) {
            if !signature.verify(key.as_ref(), &message_bytes) {
                return Err(SettleError::AuthenticatorMismatch);
            }
        }

        let mut transfer: Option<(Pubkey, TransferTerms)> = None;
        for instruction in message.instructions() {
            // Deserialization does not validate instruction indices, so a
            // signed message can still point outside its own key table.
            let program = keys
                .get(usize::from(instruction.program_id_index))
                .ok_or_else(|| {
                    SettleError::Decoding(format!(
                        "program index {} out of range",
                        instruction.program_id_index
                    ))
                })?;
            if *program == COMPUTE_BUDGET_PROGRAM {
                continue;
            }
            if *program != spl_token::ID {
                return Err(SettleError::UnsupportedOperation(format!(
                    "program {program}"
                )));
            }
            let amount = match TokenInstruction::unpack(&instruction.data) {
                Ok(TokenInstruction::TransferChecked { amount, .. }) => amount,
                _ => {
                    return Err(SettleError::UnsupportedOperation(
                        "token instruction other than TransferChecked".to_string(),
                    ));
                }
            };
            if transfer.is_some() {
                return Err(SettleError::UnsupportedOperation(
                    "multiple transfer instructions".to_string(),
                ));
            }
            if instruction.accounts.len() < TRANSFER_ACCOUNT_COUNT {
                return Err(SettleError::ArgumentShape {
                    expected: TRANSFER_ACCOUNT_COUNT,
                    got: instruction.accounts.len(),
                });
            }
            let account = |position: usize| -> Result<Pubkey, SettleError> {
                let index = usize::from(instruction.accounts[position]);
                keys.get(index).copied().ok_or_else(|| {
                    SettleError::Decoding(format!("account index {index} out of range"))
                })
            };
            let terms = TransferTerms {
                source: account(0)?,
                mint: account(1)?,
                destination: account(2)?,
                amount,
            };
            let authority = account(3)?;
            transfer = Some((authority, terms));
        }
        let (authority, terms) = transfer.ok_or_else(|| {
            SettleError::UnsupportedOperation("no token transfer instruction".to_string())
        })?;

        // The transferring authority must have actually signed; otherwise
        // the verified signatures authorize nothing relevant.
        let authority_signed = keys
            .iter()
            .take(required_signers)
            .any(|key| *key == authority);
        if !authority_signed {
            return Err(SettleError::AuthenticatorMismatch);
        }

        if let Some(expected) = &request.expected_asset {
            let expected = Pubkey::from_str(expected)
                .map_err(|e| SettleError::Expectation(format!("asset mint: {e}")))?;
            if expected != terms.mint {
                return Err(SettleError::AssetMismatch);
            }
        }
        if let Some(expected) = &request.expected_amount {
            let expected_amount: u64 = expected.parse().map_err(|_| {
                SettleError::Expectation(format!("not an integer amount: {expected}"))
            })?;
            if expected_amount != terms.amount {
                return Err(SettleError::AmountMismatch {
                    expected: expected_amount.to_string(),
                    got: terms.amount.to_string(),
                });
            }
        }
        if let Some(expected) = &request.expected_recipient {
            let expected = Pubkey::from_str(expected)
                .map_err(|e| SettleError::Expectation(format!("recipient account: {e}")))?;
            if expected != terms.destination {
                return Err(SettleError::RecipientMismatch);
            }
        }

        Ok((authority, terms))
    }

    async fn check_balance(&self, terms: &TransferTerms) -> Result<(), SettleError> {
        let balance = self
            .rpc
            .get_token_account_balance(&terms.source)
            .await
            .map_err(|e| SettleError::Rpc(format!("balance query: {e}")))?;
        let has: u64 = balance
            .amount
            .parse()
            .map_err(|e| SettleError::Rpc(format!("balance response: {e}")))?;
        if has < terms.amount {
            return Err(SettleError::InsufficientBalance {
                has: has.to_string(),
                needs: terms.amount.to_string(),
            });
        }
        Ok(())
    }

    async fn simulate(&self, transaction: &VersionedTransaction) -> Result<(), SettleError> {
        let config = RpcSimulateTransactionConfig {
            sig_verify: true,
            commitment: Some(CommitmentConfig::confirmed()),
            ..Default::default()
        };
        let response = self
            .rpc
            .simulate_transaction_with_config(transaction, config)
            .await
            .map_err(|e| SettleError::Rpc(format!("simulation request: {e}")))?;
        if let Some(err) = response.value.err {
            return Err(SettleError::Simulation(err.to_string()));
        }
        Ok(())
    }

    async fn submit_and_confirm(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<String, SettleError> {
        let signature = self
            .rpc
            .send_transaction(transaction)
            .await
            .map_err(|e| SettleError::Submission(format!("broadcast: {e}")))?;
        let hash = signature.to_string();
        info!(%hash, "transaction broadcast");

        let poll = async {
            loop {
                let confirmed = self
                    .rpc
                    .confirm_transaction(&signature)
                    .await
                    .map_err(|e| SettleError::Rpc(format!("confirmation poll: {e}")))?;
                if confirmed {
                    return Ok(());
                }
                tokio::time::sleep(CONFIRMATION_POLL_INTERVAL).await;
            }
        };
        match tokio::time::timeout(self.confirmation_timeout, poll).await {
            Ok(Ok(())) => Ok(hash),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SettleError::ConfirmationTimeout {
                hash,
                waited_secs: self.confirmation_timeout.as_secs(),
            }),
        }
    }

    async fn verify_inner(
        &self,
        request: &SettlementRequest,
    ) -> Result<(VersionedTransaction, Pubkey), (Option<String>, SettleError)> {
        let transaction = self.decode(request).map_err(|e| (None, e))?;
        let (payer, terms) = self
            .check_local(&transaction, request)
            .map_err(|e| (None, e))?;
        self.check_balance(&terms)
            .await
            .map_err(|e| (Some(payer.to_string()), e))?;
        Ok((transaction, payer))
    }
}

#[async_trait::async_trait]
impl ChainAdapter for SolanaAdapter {
    fn chain_id(&self) -> &ChainId {
        &self.chain
    }

    #[instrument(skip_all, fields(network = %self.chain))]
    async fn verify(&self, request: &SettlementRequest) -> SettlementResult {
        match self.verify_inner(request).await {
            Ok((_, payer)) => SettlementResult::verified(payer.to_string()),
            Err((payer, error)) => {
                info!(%error, "verification rejected");
                SettlementResult::rejected(payer, error)
            }
        }
    }

    #[instrument(skip_all, fields(network = %self.chain))]
    async fn settle(&self, request: &SettlementRequest) -> SettlementResult {
        let (transaction, payer) = match self.verify_inner(request).await {
            Ok(verified) => verified,
            Err((payer, error)) => {
                info!(%error, "settlement rejected before submission");
                return SettlementResult::rejected(payer, error);
            }
        };
        let payer = payer.to_string();

        let staged = async {
            self.simulate(&transaction).await?;
            self.submit_and_confirm(&transaction).await
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

#[cfg(test)]
mod tests {
    use super::*;
    use solana_hash::Hash;
    use solana_keypair::Keypair;
    use solana_message::Message;
    use solana_signer::Signer;
    use solana_transaction::Transaction;

    fn adapter() -> SolanaAdapter {
        SolanaAdapter::new(
            ChainId::new("solana", "EtWTRABZaYq6iMfeYKouRu166VU2xqa1"),
            "http://localhost:8899".parse().unwrap(),
            Duration::from_secs(30),
        )
    }

    fn signed_transfer(
        authority: &Keypair,
        mint: Pubkey,
        source: Pubkey,
        destination: Pubkey,
        amount: u64,
    ) -> VersionedTransaction {
        let instruction = spl_token::instruction::transfer_checked(
            &spl_token::ID,
            &source,
            &mint,
            &destination,
            &authority.pubkey(),
            &[],
            amount,
            6,
        )
        .unwrap();
        let message = Message::new(&[instruction], Some(&authority.pubkey()));
        Transaction::new(&[authority], message, Hash::default()).into()
    }

    fn bare_request() -> SettlementRequest {
        SettlementRequest {
            network: "solana-devnet".to_string(),
            signed_transaction: String::new(),
            expected_recipient: None,
            expected_amount: None,
            expected_asset: None,
        }
    }

    #[test]
    fn accepts_a_signed_transfer_checked() {
        let authority = Keypair::new();
        let mint = Pubkey::new_unique();
        let source = Pubkey::new_unique();
        let destination = Pubkey::new_unique();
        let transaction = signed_transfer(&authority, mint, source, destination, 100);

        let (payer, terms) = adapter()
            .check_local(&transaction, &bare_request())
            .unwrap();
        assert_eq!(payer, authority.pubkey());
        assert_eq!(terms.mint, mint);
        assert_eq!(terms.source, source);
        assert_eq!(terms.destination, destination);
        assert_eq!(terms.amount, 100);
    }

    #[test]
    fn rejects_tampered_signature() {
        let authority = Keypair::new();
        let mut transaction = signed_transfer(
            &authority,
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            100,
        );
        transaction.signatures[0] = Default::default();
        let err = adapter()
            .check_local(&transaction, &bare_request())
            .unwrap_err();
        assert_eq!(err.to_string(), "Sender/authenticator mismatch");
    }

    #[test]
    fn rejects_foreign_program_instruction() {
        let authority = Keypair::new();
        let instruction = solana_instruction::Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[1, 2, 3],
            vec![],
        );
        let message = Message::new(&[instruction], Some(&authority.pubkey()));
        let transaction: VersionedTransaction =
            Transaction::new(&[&authority], message, Hash::default()).into();
        let err = adapter()
            .check_local(&transaction, &bare_request())
            .unwrap_err();
        assert!(matches!(err, SettleError::UnsupportedOperation(_)));
    }

    #[test]
    fn rejects_out_of_range_program_index() {
        // A message can point its instruction at a key index that does not
        // exist; the signature is still valid because it signs the message
        // bytes as-is.
        let authority = Keypair::new();
        let message = Message {
            header: solana_message::MessageHeader {
                num_required_signatures: 1,
                num_readonly_signed_accounts: 0,
                num_readonly_unsigned_accounts: 0,
            },
            account_keys: vec![authority.pubkey()],
            recent_blockhash: Hash::default(),
            instructions: vec![solana_message::compiled_instruction::CompiledInstruction {
                program_id_index: 200,
                accounts: vec![],
                data: vec![],
            }],
        };
        let message = solana_message::VersionedMessage::Legacy(message);
        let signature = authority.sign_message(&message.serialize());
        let transaction = VersionedTransaction {
            signatures: vec![signature],
            message,
        };
        let err = adapter()
            .check_local(&transaction, &bare_request())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Malformed payload: program index 200 out of range"
        );
    }

    #[test]
    fn rejects_non_transfer_token_instruction() {
        let authority = Keypair::new();
        let source = Pubkey::new_unique();
        let destination = Pubkey::new_unique();
        // Unchecked transfer carries no mint and is not whitelisted.
        #[allow(deprecated)]
        let instruction = spl_token::instruction::transfer(
            &spl_token::ID,
            &source,
            &destination,
            &authority.pubkey(),
            &[],
            100,
        )
        .unwrap();
        let message = Message::new(&[instruction], Some(&authority.pubkey()));
        let transaction: VersionedTransaction =
            Transaction::new(&[&authority], message, Hash::default()).into();
        let err = adapter()
            .check_local(&transaction, &bare_request())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unsupported function: token instruction other than TransferChecked"
        );
    }

    #[test]
    fn matches_expected_terms() {
        let authority = Keypair::new();
        let mint = Pubkey::new_unique();
        let destination = Pubkey::new_unique();
        let transaction =
            signed_transfer(&authority, mint, Pubkey::new_unique(), destination, 100);

        let mut request = bare_request();
        request.expected_asset = Some(mint.to_string());
        request.expected_recipient = Some(destination.to_string());
        request.expected_amount = Some("100".to_string());
        adapter().check_local(&transaction, &request).unwrap();

        request.expected_amount = Some("1000".to_string());
        let err = adapter().check_local(&transaction, &request).unwrap_err();
        assert_eq!(err.to_string(), "Amount mismatch: expected 1000, got 100");

        request.expected_amount = None;
        request.expected_recipient = Some(Pubkey::new_unique().to_string());
        let err = adapter().check_local(&transaction, &request).unwrap_err();
        assert_eq!(err.to_string(), "Recipient mismatch");
    }

    #[tokio::test]
    async fn garbage_payload_rejects_without_payer() {
        let mut request = bare_request();
        request.signed_transaction = b64::encode([0u8, 1, 2, 3]);
        let result = adapter().verify(&request).await;
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
}
