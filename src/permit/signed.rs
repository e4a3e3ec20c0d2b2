//! Permit data, structured hashing and the inline context encoding

use crate::codec::hash_values;
use crate::crypto::{keccak256, keccak_words, uint_word, IssuerKey};
use crate::errors::{PermitGateError, Result};
use crate::types::{Address, Selector, Value};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Hash binding a permit to one concrete action
pub type IntentHash = [u8; 32];

const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

const PERMIT_TYPE: &str = "Permit(bytes32 permitId,address caller,address subject,bytes4 selector,\
bytes32 parameters,bytes32 metadata,uint64 maxUses,uint64 expiry)";

/// Globally unique permit identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PermitId(pub [u8; 32]);

impl PermitId {
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl FromStr for PermitId {
    type Err = PermitGateError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))?;
        let id: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            PermitGateError::Codec(format!("Permit id must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(id))
    }
}

impl fmt::Display for PermitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PermitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PermitId({})", self)
    }
}

impl Serialize for PermitId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PermitId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}

/// Signing domain of a permit issuer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl PermitDomain {
    pub fn separator(&self) -> [u8; 32] {
        keccak_words(&[
            keccak256(DOMAIN_TYPE.as_bytes()),
            keccak256(self.name.as_bytes()),
            keccak256(self.version.as_bytes()),
            uint_word(self.chain_id as u128),
            self.verifying_contract.to_word(),
        ])
    }
}

/// Off-chain authorization of one future action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permit {
    pub permit_id: PermitId,
    pub caller: Address,
    pub subject: Address,
    pub selector: Selector,
    #[serde(default)]
    pub parameters: Vec<Value>,
    #[serde(default, with = "hex_bytes")]
    pub metadata: Vec<u8>,
    /// Zero means unlimited
    #[serde(default)]
    pub max_uses: u64,
    /// Unix seconds; zero means never
    #[serde(default)]
    pub expiry: u64,
}

impl Permit {
    pub fn struct_hash(&self) -> [u8; 32] {
        keccak_words(&[
            keccak256(PERMIT_TYPE.as_bytes()),
            self.permit_id.0,
            self.caller.to_word(),
            self.subject.to_word(),
            self.selector.to_word(),
            hash_values(&self.parameters),
            keccak256(&self.metadata),
            uint_word(self.max_uses as u128),
            uint_word(self.expiry as u128),
        ])
    }

    /// Digest an issuer signs: `keccak(0x19 0x01 || domain || struct_hash)`
    pub fn digest(&self, domain: &PermitDomain) -> [u8; 32] {
        let mut preimage = Vec::with_capacity(66);
        preimage.extend_from_slice(&[0x19, 0x01]);
        preimage.extend_from_slice(&domain.separator());
        preimage.extend_from_slice(&self.struct_hash());
        keccak256(&preimage)
    }

    pub fn sign(self, key: &IssuerKey, domain: &PermitDomain) -> Result<SignedPermit> {
        let signature = key.sign_hash(&self.digest(domain))?;
        Ok(SignedPermit {
            permit: self,
            signature: signature.to_bytes().to_vec(),
        })
    }
}

/// Intent hash over (caller, subject, selector, parameters)
pub fn intent_hash(caller: &Address, subject: &Address, selector: &Selector, parameters: &[Value]) -> IntentHash {
    keccak_words(&[
        caller.to_word(),
        subject.to_word(),
        selector.to_word(),
        hash_values(parameters),
    ])
}

impl Encodable for Permit {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(8);
        s.append(&self.permit_id.0.as_slice());
        s.append(&self.caller);
        s.append(&self.subject);
        s.append(&self.selector.0.as_slice());
        s.append_list::<Value, Value>(&self.parameters);
        s.append(&self.metadata);
        s.append(&self.max_uses);
        s.append(&self.expiry);
    }
}

impl Decodable for Permit {
    fn decode(rlp: &Rlp) -> std::result::Result<Self, DecoderError> {
        if rlp.item_count()? != 8 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let permit_id: [u8; 32] = rlp
            .at(0)?
            .data()?
            .try_into()
            .map_err(|_| DecoderError::Custom("permit id must be 32 bytes"))?;
        let selector: [u8; 4] = rlp
            .at(3)?
            .data()?
            .try_into()
            .map_err(|_| DecoderError::Custom("selector must be 4 bytes"))?;

        Ok(Self {
            permit_id: PermitId(permit_id),
            caller: rlp.val_at(1)?,
            subject: rlp.val_at(2)?,
            selector: Selector(selector),
            parameters: rlp.list_at(4)?,
            metadata: rlp.val_at(5)?,
            max_uses: rlp.val_at(6)?,
            expiry: rlp.val_at(7)?,
        })
    }
}

/// A permit together with its issuer signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPermit {
    pub permit: Permit,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

impl SignedPermit {
    /// Encode as inline payload context
    pub fn to_context(&self) -> Vec<u8> {
        let mut stream = RlpStream::new_list(2);
        stream.append(&self.permit);
        stream.append(&self.signature);
        stream.out().to_vec()
    }

    pub fn from_context(context: &[u8]) -> Result<Self> {
        let rlp = Rlp::new(context);
        if rlp.item_count()? != 2 {
            return Err(PermitGateError::Codec(
                "signed permit must be a two item list".to_string(),
            ));
        }
        Ok(Self {
            permit: rlp.val_at(0)?,
            signature: rlp.val_at(1)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::recover_signer;

    fn domain() -> PermitDomain {
        PermitDomain {
            name: "permitgate".to_string(),
            version: "1".to_string(),
            chain_id: 1,
            verifying_contract: Address([0xcc; 20]),
        }
    }

    fn permit() -> Permit {
        Permit {
            permit_id: PermitId([7; 32]),
            caller: Address([1; 20]),
            subject: Address([2; 20]),
            selector: Selector::from_signature("transfer(address,uint256)"),
            parameters: vec![Value::Address(Address([3; 20])), Value::Uint(50)],
            metadata: b"invoice-42".to_vec(),
            max_uses: 1,
            expiry: 1_000,
        }
    }

    #[test]
    fn test_digest_binds_fields_and_domain() {
        let base = permit().digest(&domain());

        let mut other = permit();
        other.max_uses = 2;
        assert_ne!(other.digest(&domain()), base);

        let mut other = permit();
        other.parameters[1] = Value::Uint(51);
        assert_ne!(other.digest(&domain()), base);

        let mut other_domain = domain();
        other_domain.chain_id = 2;
        assert_ne!(permit().digest(&other_domain), base);
    }

    #[test]
    fn test_signed_permit_recovers_issuer() {
        let key = IssuerKey::generate();
        let signed = permit().sign(&key, &domain()).unwrap();

        let issuer = recover_signer(&signed.permit.digest(&domain()), &signed.signature).unwrap();
        assert_eq!(issuer, key.address());
    }

    #[test]
    fn test_context_encoding() {
        let key = IssuerKey::generate();
        let signed = permit().sign(&key, &domain()).unwrap();

        let decoded = SignedPermit::from_context(&signed.to_context()).unwrap();
        assert_eq!(decoded, signed);
        assert!(SignedPermit::from_context(&[0xc0]).is_err());
        assert!(SignedPermit::from_context(&[0x01, 0x02]).is_err());
    }

    #[test]
    fn test_context_encoding_of_long_permits() {
        let key = IssuerKey::generate();
        let cases = [(50u128, 0u64), (200, 1), (9_999, 2), (1u128 << 100, 1)];

        for (amount, max_uses) in cases {
            let mut p = permit();
            p.parameters[1] = Value::Uint(amount);
            p.max_uses = max_uses;
            p.metadata = vec![0xab; 64];
            let signed = p.sign(&key, &domain()).unwrap();

            let context = signed.to_context();
            assert!(context.len() > 56);
            let decoded = SignedPermit::from_context(&context).unwrap();
            assert_eq!(decoded, signed);
            assert_eq!(
                recover_signer(&decoded.permit.digest(&domain()), &decoded.signature).unwrap(),
                key.address()
            );
        }
    }

    #[test]
    fn test_permit_json_shape() {
        let json = serde_json::to_value(permit()).unwrap();
        assert_eq!(
            json["permit_id"],
            "0x0707070707070707070707070707070707070707070707070707070707070707"
        );
        assert_eq!(json["selector"], "0xa9059cbb");
        assert_eq!(json["metadata"], format!("0x{}", hex::encode(b"invoice-42")));

        let back: Permit = serde_json::from_value(json).unwrap();
        assert_eq!(back, permit());
    }

    #[test]
    fn test_intent_hash_covers_selector() {
        let p = permit();
        let a = intent_hash(&p.caller, &p.subject, &p.selector, &p.parameters);
        let b = intent_hash(&p.caller, &p.subject, &Selector([0; 4]), &p.parameters);
        assert_ne!(a, b);
    }
}
