//! RLP encoding of call data, typed values and configuration blobs
//!
//! Call data is an RLP list of untyped fields; the extractor bound to a
//! selector knows the kind of each field. Typed encoding (`[tag, raw]` pairs)
//! is used wherever values travel without a schema: permit parameters,
//! inline context and parameter hashes.

use crate::crypto::keccak256;
use crate::errors::{PermitGateError, Result};
use crate::types::{Address, Value, ValueKind};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

pub(crate) fn u128_to_be_bytes_trimmed(value: u128) -> Vec<u8> {
    if value == 0 {
        return vec![];
    }
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(16);
    bytes[start..].to_vec()
}

pub(crate) fn decode_uint(rlp: &Rlp) -> std::result::Result<u128, DecoderError> {
    let data = rlp.data()?;
    if data.len() > 16 {
        return Err(DecoderError::Custom("uint does not fit in 128 bits"));
    }
    if data.first() == Some(&0) {
        return Err(DecoderError::Custom("uint has a leading zero"));
    }
    let mut buf = [0u8; 16];
    buf[16 - data.len()..].copy_from_slice(data);
    Ok(u128::from_be_bytes(buf))
}

pub(crate) fn decode_address(rlp: &Rlp) -> std::result::Result<Address, DecoderError> {
    let data = rlp.data()?;
    Address::from_slice(data).map_err(|_| DecoderError::Custom("address must be 20 bytes"))
}

fn append_raw_value(stream: &mut RlpStream, value: &Value) {
    match value {
        Value::Uint(v) => stream.append(&u128_to_be_bytes_trimmed(*v).as_slice()),
        Value::Bool(true) => stream.append(&[1u8].as_slice()),
        Value::Bool(false) => stream.append_empty_data(),
        Value::Address(a) => stream.append(&a.0.as_slice()),
        Value::Bytes(b) => stream.append(&b.as_slice()),
        Value::Text(t) => stream.append(&t.as_bytes()),
    };
}

fn decode_raw_value(rlp: &Rlp, kind: ValueKind) -> std::result::Result<Value, DecoderError> {
    Ok(match kind {
        ValueKind::Uint => Value::Uint(decode_uint(rlp)?),
        ValueKind::Bool => match rlp.data()? {
            [] => Value::Bool(false),
            [1] => Value::Bool(true),
            _ => return Err(DecoderError::Custom("bool must be empty or 0x01")),
        },
        ValueKind::Address => Value::Address(decode_address(rlp)?),
        ValueKind::Bytes => Value::Bytes(rlp.data()?.to_vec()),
        ValueKind::Text => Value::Text(
            String::from_utf8(rlp.data()?.to_vec())
                .map_err(|_| DecoderError::Custom("text must be utf-8"))?,
        ),
    })
}

impl Encodable for Address {
    // Encode in place: a nested `append` would count the address twice
    // towards the enclosing list.
    fn rlp_append(&self, s: &mut RlpStream) {
        s.encoder().encode_value(&self.0);
    }
}

impl Decodable for Address {
    fn decode(rlp: &Rlp) -> std::result::Result<Self, DecoderError> {
        decode_address(rlp)
    }
}

/// Typed form: `[tag, raw]`
impl Encodable for Value {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.kind().tag());
        append_raw_value(s, self);
    }
}

impl Decodable for Value {
    fn decode(rlp: &Rlp) -> std::result::Result<Self, DecoderError> {
        if rlp.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let tag: u8 = rlp.val_at(0)?;
        let kind = ValueKind::from_tag(tag).ok_or(DecoderError::Custom("unknown value tag"))?;
        decode_raw_value(&rlp.at(1)?, kind)
    }
}

/// Encode call data as an RLP list of untyped fields
pub fn encode_call_data(values: &[Value]) -> Vec<u8> {
    let mut stream = RlpStream::new_list(values.len());
    for value in values {
        append_raw_value(&mut stream, value);
    }
    stream.out().to_vec()
}

/// Decode call data against a schema of field kinds
pub fn decode_call_data(data: &[u8], kinds: &[ValueKind]) -> Result<Vec<Value>> {
    let rlp = Rlp::new(data);
    if !rlp.is_list() {
        return Err(PermitGateError::Codec("call data must be an RLP list".to_string()));
    }
    let count = rlp.item_count()?;
    if count != kinds.len() {
        return Err(PermitGateError::Codec(format!(
            "expected {} fields, got {}",
            kinds.len(),
            count
        )));
    }
    kinds
        .iter()
        .enumerate()
        .map(|(i, kind)| -> Result<Value> { Ok(decode_raw_value(&rlp.at(i)?, *kind)?) })
        .collect()
}

/// Typed RLP encoding of a value list
pub fn encode_values(values: &[Value]) -> Vec<u8> {
    let mut stream = RlpStream::new_list(values.len());
    for value in values {
        stream.append(value);
    }
    stream.out().to_vec()
}

pub fn decode_values(data: &[u8]) -> Result<Vec<Value>> {
    Ok(Rlp::new(data).as_list()?)
}

/// Keccak-256 of the typed encoding of a value list
pub fn hash_values(values: &[Value]) -> [u8; 32] {
    keccak256(&encode_values(values))
}

/// Encode a single value as a configuration blob
pub fn encode_config(values: &[Value]) -> Vec<u8> {
    encode_call_data(values)
}

/// Decode a configuration blob against the kinds a policy expects
pub fn decode_config(data: &[u8], kinds: &[ValueKind]) -> Result<Vec<Value>> {
    decode_call_data(data, kinds)
        .map_err(|e| PermitGateError::Configuration(format!("malformed configuration: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    #[test]
    fn test_call_data_against_schema() {
        let data = encode_call_data(&[Value::Address(addr(7)), Value::Uint(1_000)]);
        let values = decode_call_data(&data, &[ValueKind::Address, ValueKind::Uint]).unwrap();
        assert_eq!(values, vec![Value::Address(addr(7)), Value::Uint(1_000)]);

        // Wrong arity is rejected
        assert!(decode_call_data(&data, &[ValueKind::Address]).is_err());
        // An address field cannot be read from a short uint
        assert!(decode_call_data(&data, &[ValueKind::Uint, ValueKind::Address]).is_err());
    }

    #[test]
    fn test_zero_and_bool_encodings() {
        let data = encode_call_data(&[Value::Uint(0), Value::Bool(false), Value::Bool(true)]);
        let values =
            decode_call_data(&data, &[ValueKind::Uint, ValueKind::Bool, ValueKind::Bool]).unwrap();
        assert_eq!(values, vec![Value::Uint(0), Value::Bool(false), Value::Bool(true)]);
    }

    #[test]
    fn test_typed_values_keep_kinds() {
        let values = vec![
            Value::Address(addr(1)),
            Value::Uint(u128::MAX),
            Value::Text("memo".to_string()),
            Value::Bytes(vec![0, 1, 2]),
        ];
        assert_eq!(decode_values(&encode_values(&values)).unwrap(), values);
    }

    #[test]
    fn test_hash_distinguishes_kinds() {
        // Same raw bytes, different kinds
        let as_bytes = hash_values(&[Value::Bytes(vec![1])]);
        let as_bool = hash_values(&[Value::Bool(true)]);
        assert_ne!(as_bytes, as_bool);
    }

    #[test]
    fn test_addresses_inside_lists() {
        let mut stream = RlpStream::new_list(3);
        stream.append(&addr(1));
        stream.append(&7u64);
        stream.append(&addr(2));
        let data = stream.out().to_vec();

        let rlp = Rlp::new(&data);
        assert_eq!(rlp.item_count().unwrap(), 3);
        assert_eq!(rlp.val_at::<Address>(0).unwrap(), addr(1));
        assert_eq!(rlp.val_at::<u64>(1).unwrap(), 7);
        assert_eq!(rlp.val_at::<Address>(2).unwrap(), addr(2));
        assert!(rlp.at(3).is_err());
    }

    #[test]
    fn test_malformed_config_is_configuration_error() {
        let result = decode_config(&[0x01], &[ValueKind::Uint]);
        assert!(matches!(result, Err(PermitGateError::Configuration(_))));
    }
}
