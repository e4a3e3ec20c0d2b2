//! secp256k1 / Keccak-256 primitives for permit issuers
//!
//! Provides:
//! - Issuer key generation and loading
//! - Prehash signing with recoverable signatures
//! - Signer recovery (issuer identity from a signature)
//! - Address derivation and EIP-55 checksums

use crate::errors::{PermitGateError, Result};
use crate::types::Address;
use k256::{
    ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey},
    SecretKey,
};
use sha3::{Digest, Keccak256};
use zeroize::Zeroize;

/// Signing key of an off-chain permit authority
pub struct IssuerKey {
    signing_key: SigningKey,
}

impl IssuerKey {
    /// Create a new random key
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        Self { signing_key }
    }

    /// Create from raw private key bytes (32 bytes)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(PermitGateError::InvalidKeyFormat(format!(
                "Expected 32 bytes, got {}",
                bytes.len()
            )));
        }

        let secret_key = SecretKey::from_slice(bytes)
            .map_err(|e| PermitGateError::InvalidKeyFormat(e.to_string()))?;

        Ok(Self {
            signing_key: SigningKey::from(secret_key),
        })
    }

    /// Create from a hex-encoded private key, wiping the decoded buffer afterwards
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = hex::decode(s.trim().strip_prefix("0x").unwrap_or(s.trim()))
            .map_err(|e| PermitGateError::InvalidKeyFormat(e.to_string()))?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    /// Issuer identity derived from the public key
    pub fn address(&self) -> Address {
        address_of(self.signing_key.verifying_key())
    }

    /// Sign a 32-byte digest
    pub fn sign_hash(&self, hash: &[u8; 32]) -> Result<IssuerSignature> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(hash)
            .map_err(|e| PermitGateError::SigningFailed(e.to_string()))?;

        let mut r = [0u8; 32];
        r.copy_from_slice(&signature.r().to_bytes());
        let mut s = [0u8; 32];
        s.copy_from_slice(&signature.s().to_bytes());

        Ok(IssuerSignature {
            r,
            s,
            v: recovery_id.to_byte(),
        })
    }
}

/// Recoverable signature (r, s, recovery id)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuerSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub v: u8,
}

impl IssuerSignature {
    /// Full signature bytes (65 bytes: r || s || v)
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut sig = [0u8; 65];
        sig[0..32].copy_from_slice(&self.r);
        sig[32..64].copy_from_slice(&self.s);
        sig[64] = self.v;
        sig
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }
}

/// Recover the signer address of a 65-byte signature over `hash`.
///
/// Accepts recovery ids as 0/1 or in the legacy 27/28 form.
pub fn recover_signer(hash: &[u8; 32], signature: &[u8]) -> Result<Address> {
    if signature.len() != 65 {
        return Err(PermitGateError::InvalidSignature(format!(
            "Expected 65 bytes, got {}",
            signature.len()
        )));
    }

    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| PermitGateError::InvalidSignature(e.to_string()))?;
    let v = match signature[64] {
        27 | 28 => signature[64] - 27,
        v => v,
    };
    let recovery_id = RecoveryId::from_byte(v)
        .ok_or_else(|| PermitGateError::InvalidSignature(format!("Bad recovery id {}", v)))?;

    let key = VerifyingKey::recover_from_prehash(hash, &sig, recovery_id)
        .map_err(|e| PermitGateError::InvalidSignature(e.to_string()))?;
    Ok(address_of(&key))
}

fn address_of(key: &VerifyingKey) -> Address {
    let pubkey = key.to_encoded_point(false);
    // Skip the 0x04 prefix and hash the remaining 64 bytes
    let hash = Keccak256::digest(&pubkey.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    Address(address)
}

/// Compute keccak256 hash
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Compute keccak256 over the concatenation of 32-byte words
pub fn keccak_words(words: &[[u8; 32]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for word in words {
        hasher.update(word);
    }
    hasher.finalize().into()
}

/// Big-endian 32-byte word of an unsigned integer
pub fn uint_word(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Convert an address to checksummed format (EIP-55)
pub fn checksum_address(address: &[u8; 20]) -> String {
    let addr_hex = hex::encode(address);
    let hash = hex::encode(Keccak256::digest(addr_hex.as_bytes()));

    let mut result = String::with_capacity(42);
    result.push_str("0x");

    for (c, h) in addr_hex.chars().zip(hash.chars()) {
        if c.is_ascii_alphabetic() && h >= '8' {
            result.push(c.to_ascii_uppercase());
        } else {
            result.push(c);
        }
    }

    result
}

/// Parse a hex address string to bytes
pub fn parse_address(addr: &str) -> Result<[u8; 20]> {
    let addr = addr.strip_prefix("0x").unwrap_or(addr);

    if addr.len() != 40 {
        return Err(PermitGateError::InvalidAddress(
            "Address must be 40 hex chars".to_string(),
        ));
    }

    let bytes = hex::decode(addr).map_err(|e| PermitGateError::InvalidAddress(e.to_string()))?;
    let mut result = [0u8; 20];
    result.copy_from_slice(&bytes);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_checksum() {
        // Test vector from EIP-55
        let addr = hex::decode("5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").unwrap();
        let mut address = [0u8; 20];
        address.copy_from_slice(&addr);

        let checksummed = checksum_address(&address);
        assert_eq!(checksummed, "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
    }

    #[test]
    fn test_sign_and_recover() {
        let key = IssuerKey::generate();
        let digest = keccak256(b"permit digest");

        let sig = key.sign_hash(&digest).unwrap();
        assert!(sig.v <= 1);

        let signer = recover_signer(&digest, &sig.to_bytes()).unwrap();
        assert_eq!(signer, key.address());

        // Legacy 27/28 recovery ids recover the same signer
        let mut legacy = sig.to_bytes();
        legacy[64] += 27;
        assert_eq!(recover_signer(&digest, &legacy).unwrap(), key.address());
    }

    #[test]
    fn test_recover_other_digest_yields_other_signer() {
        let key = IssuerKey::generate();
        let sig = key.sign_hash(&keccak256(b"one")).unwrap();

        match recover_signer(&keccak256(b"two"), &sig.to_bytes()) {
            Ok(signer) => assert_ne!(signer, key.address()),
            Err(e) => assert!(matches!(e, PermitGateError::InvalidSignature(_))),
        }
    }

    #[test]
    fn test_recover_rejects_bad_length() {
        let result = recover_signer(&[0u8; 32], &[0u8; 64]);
        assert!(matches!(result, Err(PermitGateError::InvalidSignature(_))));
    }

    #[test]
    fn test_from_hex() {
        let key = IssuerKey::from_hex(
            "0x0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
        )
        .unwrap();
        let again = IssuerKey::from_bytes(
            &hex::decode("0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef")
                .unwrap(),
        )
        .unwrap();
        assert_eq!(key.address(), again.address());
        assert!(IssuerKey::from_hex("abcd").is_err());
    }
}
