//! BCS payload codec for Aptos signed transactions.
//!
//! The wire payload is base64 of a JSON object
//! `{"transaction": [u8...], "senderAuthenticator": [u8...]}` whose inner
//! byte arrays are BCS: a `SimpleTransaction` (raw transaction plus optional
//! fee-payer address) and an `AccountAuthenticator`. This module carries an
//! explicit schema for exactly the structures the facilitator is willing to
//! relay; anything outside that schema (script payloads, keyless or
//! multi-key authenticators) fails decoding up front rather than reaching
//! the pipeline half-parsed.
//!
//! No network I/O happens here. Entry-function argument bytes stay opaque:
//! their types are only known once the operation whitelist has resolved the
//! call, so argument decoding is deferred to [`arg_address`] / [`arg_u64`]
//! at the stage that consumes them.

use serde::de::{EnumAccess, VariantAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Sha3_256};
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

use crate::types::SettleError;
use crate::util::b64;

/// Signature scheme identifiers used in authentication-key derivation.
const SCHEME_ED25519: u8 = 0x00;
const SCHEME_MULTI_ED25519: u8 = 0x01;
const SCHEME_SINGLE_KEY: u8 = 0x02;

/// `TransactionPayload` BCS variant index for entry functions.
const PAYLOAD_VARIANT_ENTRY_FUNCTION: u32 = 2;

/// `TransactionAuthenticator` BCS variant index wrapping a single-sender
/// `AccountAuthenticator` on the submission wire.
const TXN_AUTH_VARIANT_SINGLE_SENDER: u8 = 4;

/// A 32-byte Aptos account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountAddress(pub [u8; 32]);

impl AccountAddress {
    /// The framework address `0x1`.
    pub const ONE: AccountAddress = {
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        AccountAddress(bytes)
    };
}

impl Display for AccountAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Debug for AccountAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl FromStr for AccountAddress {
    type Err = String;

    /// Accepts `0x`-prefixed or bare hex, short forms left-padded (`0x1`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        if stripped.is_empty() || stripped.len() > 64 {
            return Err(format!("Invalid Aptos address: {s}"));
        }
        let padded = format!("{stripped:0>64}");
        let bytes = hex::decode(&padded).map_err(|e| format!("Invalid Aptos address: {e}"))?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(AccountAddress(out))
    }
}

/// A Move identifier. BCS-encoded as a length-prefixed UTF-8 string.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(pub String);

impl Identifier {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A Move type tag. Variant order is protocol-defined and load-bearing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeTag {
    Bool,
    U8,
    U64,
    U128,
    Address,
    Signer,
    Vector(Box<TypeTag>),
    Struct(Box<StructTag>),
    U16,
    U32,
    U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructTag {
    pub address: AccountAddress,
    pub module: Identifier,
    pub name: Identifier,
    pub type_args: Vec<TypeTag>,
}

/// A module identity: publishing address plus module name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleId {
    pub address: AccountAddress,
    pub name: Identifier,
}

/// A parsed on-chain entry-function call. Argument bytes remain opaque
/// until the whitelist resolves their types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFunction {
    pub module: ModuleId,
    pub function: Identifier,
    pub ty_args: Vec<TypeTag>,
    pub args: Vec<Vec<u8>>,
}

/// The transaction payload. Only entry functions are relayable; any other
/// variant is a structural decode error, not a runtime crash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionPayload {
    EntryFunction(EntryFunction),
}

impl Serialize for TransactionPayload {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            TransactionPayload::EntryFunction(entry_function) => serializer
                .serialize_newtype_variant(
                    "TransactionPayload",
                    PAYLOAD_VARIANT_ENTRY_FUNCTION,
                    "EntryFunction",
                    entry_function,
                ),
        }
    }
}

impl<'de> Deserialize<'de> for TransactionPayload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PayloadVisitor;

        impl<'de> Visitor<'de> for PayloadVisitor {
            type Value = TransactionPayload;

            fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str("an entry-function transaction payload")
            }

            fn visit_enum<A>(self, data: A) -> Result<Self::Value, A::Error>
            where
                A: EnumAccess<'de>,
            {
                let (index, variant) = data.variant::<u32>()?;
                if index == PAYLOAD_VARIANT_ENTRY_FUNCTION {
                    let entry_function = variant.newtype_variant::<EntryFunction>()?;
                    Ok(TransactionPayload::EntryFunction(entry_function))
                } else {
                    Err(serde::de::Error::custom(format!(
                        "transaction payload variant {index} is not an entry function"
                    )))
                }
            }
        }

        deserializer.deserialize_enum(
            "TransactionPayload",
            &["Script", "ModuleBundle", "EntryFunction", "Multisig"],
            PayloadVisitor,
        )
    }
}

/// The signed-over transaction body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub sender: AccountAddress,
    pub sequence_number: u64,
    pub payload: TransactionPayload,
    pub max_gas_amount: u64,
    pub gas_unit_price: u64,
    pub expiration_timestamp_secs: u64,
    pub chain_id: u8,
}

impl RawTransaction {
    pub fn entry_function(&self) -> &EntryFunction {
        let TransactionPayload::EntryFunction(entry_function) = &self.payload;
        entry_function
    }
}

/// Raw transaction plus optional fee-payer address, as serialized by client
/// SDK transaction builders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleTransaction {
    pub raw_transaction: RawTransaction,
    pub fee_payer_address: Option<AccountAddress>,
}

/// Signature plus public-key material authorizing the sender.
///
/// Variant order mirrors the chain's `AccountAuthenticator` BCS layout.
/// Multi-key and keyless schemes are outside the relayable schema and fail
/// structurally at decode time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountAuthenticator {
    Ed25519 {
        public_key: Vec<u8>,
        signature: Vec<u8>,
    },
    MultiEd25519 {
        public_key: Vec<u8>,
        signature: Vec<u8>,
    },
    SingleKey {
        public_key: AnyPublicKey,
        signature: AnySignature,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnyPublicKey {
    Ed25519 { public_key: Vec<u8> },
    Secp256k1Ecdsa { public_key: Vec<u8> },
    Secp256r1Ecdsa { public_key: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnySignature {
    Ed25519 { signature: Vec<u8> },
    Secp256k1Ecdsa { signature: Vec<u8> },
}

impl AccountAuthenticator {
    /// Derives the account address implied by the public-key material.
    ///
    /// Aptos authentication keys are `sha3-256(material ‖ scheme_byte)`;
    /// for un-rotated accounts the account address equals the auth key.
    pub fn derived_address(&self) -> Result<AccountAddress, SettleError> {
        let (material, scheme): (Vec<u8>, u8) = match self {
            AccountAuthenticator::Ed25519 { public_key, .. } => {
                (public_key.clone(), SCHEME_ED25519)
            }
            AccountAuthenticator::MultiEd25519 { public_key, .. } => {
                (public_key.clone(), SCHEME_MULTI_ED25519)
            }
            AccountAuthenticator::SingleKey { public_key, .. } => {
                let bytes = bcs::to_bytes(public_key)
                    .map_err(|e| SettleError::Decoding(format!("public key encoding: {e}")))?;
                (bytes, SCHEME_SINGLE_KEY)
            }
        };
        let mut hasher = Sha3_256::new();
        hasher.update(&material);
        hasher.update([scheme]);
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Ok(AccountAddress(out))
    }

    /// Whether the derivation check of [`derived_address`] is meaningful
    /// for this scheme (it is skipped for multi-signer schemes).
    ///
    /// [`derived_address`]: AccountAuthenticator::derived_address
    pub fn is_single_signer(&self) -> bool {
        !matches!(self, AccountAuthenticator::MultiEd25519 { .. })
    }

    /// A copy with all signature bytes zeroed, as the simulation endpoint
    /// requires.
    pub fn zeroed_for_simulation(&self) -> AccountAuthenticator {
        match self {
            AccountAuthenticator::Ed25519 {
                public_key,
                signature,
            } => AccountAuthenticator::Ed25519 {
                public_key: public_key.clone(),
                signature: vec![0u8; signature.len()],
            },
            AccountAuthenticator::MultiEd25519 {
                public_key,
                signature,
            } => AccountAuthenticator::MultiEd25519 {
                public_key: public_key.clone(),
                signature: vec![0u8; signature.len()],
            },
            AccountAuthenticator::SingleKey {
                public_key,
                signature,
            } => {
                let zeroed = match signature {
                    AnySignature::Ed25519 { signature } => AnySignature::Ed25519 {
                        signature: vec![0u8; signature.len()],
                    },
                    AnySignature::Secp256k1Ecdsa { signature } => AnySignature::Secp256k1Ecdsa {
                        signature: vec![0u8; signature.len()],
                    },
                };
                AccountAuthenticator::SingleKey {
                    public_key: public_key.clone(),
                    signature: zeroed,
                }
            }
        }
    }

    /// BCS bytes of this authenticator wrapped as the on-wire
    /// `TransactionAuthenticator`.
    ///
    /// The Ed25519 and MultiEd25519 variants share tags and field layout
    /// with the transaction-level authenticator, so their bytes pass
    /// through unchanged; single-key authenticators are wrapped in the
    /// single-sender variant.
    pub fn wire_bytes(&self) -> Result<Vec<u8>, SettleError> {
        let account_bytes = bcs::to_bytes(self)
            .map_err(|e| SettleError::Decoding(format!("authenticator encoding: {e}")))?;
        match self {
            AccountAuthenticator::Ed25519 { .. } | AccountAuthenticator::MultiEd25519 { .. } => {
                Ok(account_bytes)
            }
            AccountAuthenticator::SingleKey { .. } => {
                let mut out = Vec::with_capacity(1 + account_bytes.len());
                out.push(TXN_AUTH_VARIANT_SINGLE_SENDER);
                out.extend_from_slice(&account_bytes);
                Ok(out)
            }
        }
    }
}

/// JSON envelope inside the base64 wire payload.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePayload {
    transaction: Vec<u8>,
    sender_authenticator: Vec<u8>,
}

/// A fully decoded Aptos payment payload. Owned by one adapter invocation;
/// never shared across requests.
#[derive(Debug, Clone)]
pub struct DecodedPayload {
    pub raw_transaction: RawTransaction,
    pub authenticator: AccountAuthenticator,
}

impl DecodedPayload {
    pub fn sender(&self) -> AccountAddress {
        self.raw_transaction.sender
    }

    /// BCS bytes of the `SignedTransaction` to broadcast: the raw
    /// transaction followed by the wire authenticator. The facilitator
    /// never re-signs; the client's original authenticator is relayed.
    pub fn signed_transaction_bytes(&self) -> Result<Vec<u8>, SettleError> {
        self.signed_bytes_with(&self.authenticator)
    }

    /// Same as [`signed_transaction_bytes`], but with signatures zeroed
    /// for the simulation endpoint.
    ///
    /// [`signed_transaction_bytes`]: DecodedPayload::signed_transaction_bytes
    pub fn simulation_bytes(&self) -> Result<Vec<u8>, SettleError> {
        self.signed_bytes_with(&self.authenticator.zeroed_for_simulation())
    }

    fn signed_bytes_with(&self, authenticator: &AccountAuthenticator) -> Result<Vec<u8>, SettleError> {
        let mut out = bcs::to_bytes(&self.raw_transaction)
            .map_err(|e| SettleError::Decoding(format!("transaction encoding: {e}")))?;
        out.extend_from_slice(&authenticator.wire_bytes()?);
        Ok(out)
    }
}

/// Decodes the base64 wire payload into a [`DecodedPayload`].
///
/// Both nested BCS structures must deserialize exactly, consuming all their
/// bytes; truncated or trailing input fails here instead of propagating.
pub fn decode(signed_transaction_b64: &str) -> Result<DecodedPayload, SettleError> {
    let json_bytes = b64::decode(signed_transaction_b64)
        .map_err(|e| SettleError::Decoding(format!("base64: {e}")))?;
    let wire: WirePayload = serde_json::from_slice(&json_bytes)
        .map_err(|e| SettleError::Decoding(format!("payload envelope: {e}")))?;

    let simple: SimpleTransaction = bcs::from_bytes(&wire.transaction)
        .map_err(|e| SettleError::Decoding(format!("transaction: {e}")))?;
    let authenticator: AccountAuthenticator = bcs::from_bytes(&wire.sender_authenticator)
        .map_err(|e| SettleError::Decoding(format!("authenticator: {e}")))?;

    Ok(DecodedPayload {
        raw_transaction: simple.raw_transaction,
        authenticator,
    })
}

/// Decodes one opaque entry-function argument as an address.
pub fn arg_address(bytes: &[u8]) -> Result<AccountAddress, SettleError> {
    bcs::from_bytes(bytes).map_err(|e| SettleError::Decoding(format!("address argument: {e}")))
}

/// Decodes one opaque entry-function argument as a u64 amount.
pub fn arg_u64(bytes: &[u8]) -> Result<u64, SettleError> {
    bcs::from_bytes(bytes).map_err(|e| SettleError::Decoding(format!("amount argument: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    pub(crate) fn transfer_entry_function(
        asset: AccountAddress,
        recipient: AccountAddress,
        amount: u64,
    ) -> EntryFunction {
        EntryFunction {
            module: ModuleId {
                address: AccountAddress::ONE,
                name: Identifier::new("primary_fungible_store"),
            },
            function: Identifier::new("transfer"),
            ty_args: vec![TypeTag::Struct(Box::new(StructTag {
                address: AccountAddress::ONE,
                module: Identifier::new("fungible_asset"),
                name: Identifier::new("Metadata"),
                type_args: vec![],
            }))],
            args: vec![
                bcs::to_bytes(&asset).unwrap(),
                bcs::to_bytes(&recipient).unwrap(),
                bcs::to_bytes(&amount).unwrap(),
            ],
        }
    }

    fn sample_raw_transaction() -> RawTransaction {
        let asset: AccountAddress = "0xaaa".parse().unwrap();
        let recipient: AccountAddress = "0xbbb".parse().unwrap();
        RawTransaction {
            sender: "0xabc".parse().unwrap(),
            sequence_number: 7,
            payload: TransactionPayload::EntryFunction(transfer_entry_function(
                asset, recipient, 100,
            )),
            max_gas_amount: 200_000,
            gas_unit_price: 100,
            expiration_timestamp_secs: 2_000_000_000,
            chain_id: 2,
        }
    }

    fn encode_wire(transaction: &[u8], authenticator: &[u8]) -> String {
        let json = serde_json::json!({
            "transaction": transaction,
            "senderAuthenticator": authenticator,
        });
        base64::engine::general_purpose::STANDARD.encode(json.to_string())
    }

    #[test]
    fn round_trips_a_transfer_payload() {
        let raw = sample_raw_transaction();
        let simple = SimpleTransaction {
            raw_transaction: raw.clone(),
            fee_payer_address: None,
        };
        let authenticator = AccountAuthenticator::Ed25519 {
            public_key: vec![1u8; 32],
            signature: vec![2u8; 64],
        };
        let wire = encode_wire(
            &bcs::to_bytes(&simple).unwrap(),
            &bcs::to_bytes(&authenticator).unwrap(),
        );

        let decoded = decode(&wire).unwrap();
        assert_eq!(decoded.raw_transaction, raw);
        assert_eq!(decoded.authenticator, authenticator);
        assert_eq!(decoded.sender(), "0xabc".parse().unwrap());

        let entry_function = decoded.raw_transaction.entry_function();
        assert_eq!(entry_function.function.as_str(), "transfer");
        assert_eq!(entry_function.args.len(), 3);
        assert_eq!(arg_u64(&entry_function.args[2]).unwrap(), 100);
    }

    #[test]
    fn fee_payer_suffix_is_parsed_not_guessed() {
        let simple = SimpleTransaction {
            raw_transaction: sample_raw_transaction(),
            fee_payer_address: Some("0xfee".parse().unwrap()),
        };
        let authenticator = AccountAuthenticator::Ed25519 {
            public_key: vec![1u8; 32],
            signature: vec![2u8; 64],
        };
        let wire = encode_wire(
            &bcs::to_bytes(&simple).unwrap(),
            &bcs::to_bytes(&authenticator).unwrap(),
        );
        let decoded = decode(&wire).unwrap();
        assert_eq!(decoded.raw_transaction, simple.raw_transaction);
    }

    #[test]
    fn truncated_transaction_fails_decoding() {
        let simple = SimpleTransaction {
            raw_transaction: sample_raw_transaction(),
            fee_payer_address: None,
        };
        let mut bytes = bcs::to_bytes(&simple).unwrap();
        bytes.truncate(bytes.len() - 5);
        let authenticator = AccountAuthenticator::Ed25519 {
            public_key: vec![1u8; 32],
            signature: vec![2u8; 64],
        };
        let wire = encode_wire(&bytes, &bcs::to_bytes(&authenticator).unwrap());
        let err = decode(&wire).unwrap_err();
        assert!(matches!(err, SettleError::Decoding(_)), "got {err:?}");
    }

    #[test]
    fn garbage_base64_fails_decoding() {
        let err = decode("not-valid-base64!!!").unwrap_err();
        assert!(matches!(err, SettleError::Decoding(_)));
    }

    #[test]
    fn unknown_authenticator_variant_fails_structurally() {
        let simple = SimpleTransaction {
            raw_transaction: sample_raw_transaction(),
            fee_payer_address: None,
        };
        // Variant tag 9 does not exist in the authenticator schema.
        let bogus_auth = vec![9u8, 0, 0];
        let wire = encode_wire(&bcs::to_bytes(&simple).unwrap(), &bogus_auth);
        let err = decode(&wire).unwrap_err();
        assert!(matches!(err, SettleError::Decoding(_)));
    }

    #[test]
    fn ed25519_address_derivation_matches_scheme() {
        let public_key = vec![7u8; 32];
        let authenticator = AccountAuthenticator::Ed25519 {
            public_key: public_key.clone(),
            signature: vec![0u8; 64],
        };
        let mut hasher = Sha3_256::new();
        hasher.update(&public_key);
        hasher.update([0u8]);
        let expected: [u8; 32] = hasher.finalize().into();
        assert_eq!(authenticator.derived_address().unwrap().0, expected);
    }

    #[test]
    fn single_key_wire_bytes_wrap_in_single_sender() {
        let authenticator = AccountAuthenticator::SingleKey {
            public_key: AnyPublicKey::Ed25519 {
                public_key: vec![7u8; 32],
            },
            signature: AnySignature::Ed25519 {
                signature: vec![8u8; 64],
            },
        };
        let wire = authenticator.wire_bytes().unwrap();
        assert_eq!(wire[0], TXN_AUTH_VARIANT_SINGLE_SENDER);
        assert_eq!(&wire[1..], &bcs::to_bytes(&authenticator).unwrap()[..]);
    }

    #[test]
    fn ed25519_wire_bytes_pass_through() {
        let authenticator = AccountAuthenticator::Ed25519 {
            public_key: vec![1u8; 32],
            signature: vec![2u8; 64],
        };
        assert_eq!(
            authenticator.wire_bytes().unwrap(),
            bcs::to_bytes(&authenticator).unwrap()
        );
    }

    #[test]
    fn simulation_bytes_zero_the_signature_only() {
        let decoded = DecodedPayload {
            raw_transaction: sample_raw_transaction(),
            authenticator: AccountAuthenticator::Ed25519 {
                public_key: vec![1u8; 32],
                signature: vec![2u8; 64],
            },
        };
        let signed = decoded.signed_transaction_bytes().unwrap();
        let simulated = decoded.simulation_bytes().unwrap();
        assert_eq!(signed.len(), simulated.len());
        assert_ne!(signed, simulated);
        assert!(simulated.ends_with(&[0u8; 64]));
    }

    #[test]
    fn short_addresses_left_pad() {
        let one: AccountAddress = "0x1".parse().unwrap();
        assert_eq!(one, AccountAddress::ONE);
        assert_eq!(
            one.to_string(),
            "0x0000000000000000000000000000000000000000000000000000000000000001"
        );
    }
}
