//! Core identities and values shared by the engine, extractors and policies

use crate::crypto::{checksum_address, keccak256, parse_address};
use crate::errors::{PermitGateError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 20-byte identity of a target, caller, issuer, relay or owner
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 20 {
            return Err(PermitGateError::InvalidAddress(format!(
                "Expected 20 bytes, got {}",
                bytes.len()
            )));
        }
        let mut addr = [0u8; 20];
        addr.copy_from_slice(bytes);
        Ok(Self(addr))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Left-pads the address to a 32-byte word
    pub fn to_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&self.0);
        word
    }
}

impl FromStr for Address {
    type Err = PermitGateError;

    fn from_str(s: &str) -> Result<Self> {
        parse_address(s).map(Address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&checksum_address(&self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 4-byte identifier of one action shape
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Selector(pub [u8; 4]);

impl Selector {
    /// Derive a selector from a textual signature like `transfer(address,uint256)`
    pub fn from_signature(signature: &str) -> Self {
        let hash = keccak256(signature.as_bytes());
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&hash[..4]);
        Self(selector)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Right-pads the selector to a 32-byte word
    pub fn to_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[..4].copy_from_slice(&self.0);
        word
    }
}

impl FromStr for Selector {
    type Err = PermitGateError;

    /// Accepts either `0x`-prefixed hex or a textual signature
    fn from_str(s: &str) -> Result<Self> {
        if let Some(hex_part) = s.strip_prefix("0x") {
            let bytes = hex::decode(hex_part)?;
            if bytes.len() != 4 {
                return Err(PermitGateError::Codec(format!(
                    "Selector must be 4 bytes, got {}",
                    bytes.len()
                )));
            }
            let mut selector = [0u8; 4];
            selector.copy_from_slice(&bytes);
            return Ok(Self(selector));
        }
        if !s.contains('(') || !s.ends_with(')') {
            return Err(PermitGateError::Codec(format!("Invalid selector: {}", s)));
        }
        Ok(Self::from_signature(s))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Selector({})", self)
    }
}

impl Serialize for Selector {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Kind of a parameter value, used by extractor schemas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Uint,
    Bool,
    Address,
    Bytes,
    Text,
}

impl ValueKind {
    pub fn tag(&self) -> u8 {
        match self {
            ValueKind::Uint => 0,
            ValueKind::Bool => 1,
            ValueKind::Address => 2,
            ValueKind::Bytes => 3,
            ValueKind::Text => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ValueKind::Uint),
            1 => Some(ValueKind::Bool),
            2 => Some(ValueKind::Address),
            3 => Some(ValueKind::Bytes),
            4 => Some(ValueKind::Text),
            _ => None,
        }
    }
}

/// A typed parameter value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Uint(u128),
    Bool(bool),
    Address(Address),
    Bytes(Vec<u8>),
    Text(String),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Uint(_) => ValueKind::Uint,
            Value::Bool(_) => ValueKind::Bool,
            Value::Address(_) => ValueKind::Address,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Text(_) => ValueKind::Text,
        }
    }

    pub fn as_uint(&self) -> Option<u128> {
        match self {
            Value::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            Value::Address(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<u128> for Value {
    fn from(v: u128) -> Self {
        Value::Uint(v)
    }
}

impl From<Address> for Value {
    fn from(a: Address) -> Self {
        Value::Address(a)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// A named value produced by an extractor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
}

impl Parameter {
    pub fn new(name: &str, value: impl Into<Value>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
        }
    }
}

/// One action invocation submitted by a protected target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Action being gated
    pub selector: Selector,
    /// Identity invoking the action on the target
    pub caller: Address,
    /// Raw call data, parsed by the extractor bound to the selector
    #[serde(default)]
    pub data: Vec<u8>,
    /// Optional inline context (e.g. a signed permit)
    #[serde(default)]
    pub context: Vec<u8>,
}

impl Payload {
    pub fn new(selector: Selector, caller: Address, data: Vec<u8>) -> Self {
        Self {
            selector,
            caller,
            data,
            context: vec![],
        }
    }

    pub fn with_context(mut self, context: Vec<u8>) -> Self {
        self.context = context;
        self
    }
}
