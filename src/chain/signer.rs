//! Signer account.
//!
//! Holds the process's single secp256k1 key and produces signed EIP-155
//! legacy transactions. The key is parsed from a `SecretString` once and
//! never leaves this struct; `Debug` prints only the address.

use alloy_primitives::{hex, keccak256, Address, Bytes, TxHash, U256};
use alloy_rlp::{Encodable, Header};
use k256::ecdsa::SigningKey;
use secrecy::zeroize::Zeroize;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("Signer secret is not valid hex")]
    NotHex,

    #[error("Signer secret must be 32 bytes, got {0}")]
    BadLength(usize),

    #[error("Signer secret is not a valid secp256k1 scalar")]
    InvalidKey,

    #[error("ECDSA signing failed: {0}")]
    Ecdsa(String),
}

/// A plain value transfer, before signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransfer {
    pub nonce: u64,
    /// Wei per gas unit.
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    /// Wei.
    pub value: U256,
    pub chain_id: u64,
}

impl LegacyTransfer {
    /// RLP payload that gets hashed and signed (EIP-155 form).
    pub fn signing_payload(&self) -> Vec<u8> {
        let empty_data: &[u8] = &[];
        encode_list(&[
            &self.nonce,
            &self.gas_price,
            &self.gas_limit,
            &self.to,
            &self.value,
            &empty_data,
            &self.chain_id,
            &0u8,
            &0u8,
        ])
    }

    pub fn signing_hash(&self) -> TxHash {
        keccak256(self.signing_payload())
    }
}

/// A transaction ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransfer {
    pub raw: Bytes,
    /// Hash of `raw`; what the network will call this transaction.
    pub hash: TxHash,
    pub nonce: u64,
}

pub struct SignerAccount {
    key: SigningKey,
    address: Address,
}

impl SignerAccount {
    /// Parse a hex private key (with or without `0x`).
    pub fn from_secret(secret: &SecretString) -> Result<Self, SignerError> {
        let text = secret.expose_secret().trim();
        let digits = text.strip_prefix("0x").unwrap_or(text);

        let mut bytes = hex::decode(digits).map_err(|_| SignerError::NotHex)?;
        if bytes.len() != 32 {
            let len = bytes.len();
            bytes.zeroize();
            return Err(SignerError::BadLength(len));
        }

        let key = SigningKey::from_slice(&bytes);
        bytes.zeroize();
        let key = key.map_err(|_| SignerError::InvalidKey)?;

        let address = address_of(&key);
        debug!(%address, "Signer account loaded");
        Ok(Self { key, address })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign `tx`, binding its chain id into `v` per EIP-155.
    pub fn sign(&self, tx: &LegacyTransfer) -> Result<SignedTransfer, SignerError> {
        let digest = tx.signing_hash();
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(digest.as_slice())
            .map_err(|e| SignerError::Ecdsa(e.to_string()))?;

        let sig_bytes = signature.to_bytes();
        let r = U256::from_be_slice(&sig_bytes[..32]);
        let s = U256::from_be_slice(&sig_bytes[32..]);
        let v = u64::from(recovery_id.to_byte()) + 35 + 2 * tx.chain_id;

        let empty_data: &[u8] = &[];
        let raw = encode_list(&[
            &tx.nonce,
            &tx.gas_price,
            &tx.gas_limit,
            &tx.to,
            &tx.value,
            &empty_data,
            &v,
            &r,
            &s,
        ]);
        let hash = keccak256(&raw);

        Ok(SignedTransfer {
            raw: Bytes::from(raw),
            hash,
            nonce: tx.nonce,
        })
    }
}

impl fmt::Debug for SignerAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerAccount")
            .field("address", &self.address)
            .field("key", &"<redacted>")
            .finish()
    }
}

fn address_of(key: &SigningKey) -> Address {
    let point = key.verifying_key().to_encoded_point(false);
    // Skip the 0x04 uncompressed-point tag.
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

fn encode_list(fields: &[&dyn Encodable]) -> Vec<u8> {
    let payload_length: usize = fields.iter().map(|f| f.length()).sum();
    let header = Header {
        list: true,
        payload_length,
    };
    let mut out = Vec::with_capacity(header.length() + payload_length);
    header.encode(&mut out);
    for field in fields {
        field.encode(&mut out);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
