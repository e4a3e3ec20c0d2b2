//! Schema-driven extractor for RLP call data

use crate::codec::decode_call_data;
use crate::errors::Result;
use crate::extract::Extractor;
use crate::types::{Parameter, Payload, ValueKind};
use serde::{Deserialize, Serialize};

/// One named field of a call data schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: ValueKind,
}

impl Field {
    pub fn new(name: &str, kind: ValueKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }

    pub fn uint(name: &str) -> Self {
        Self::new(name, ValueKind::Uint)
    }

    pub fn address(name: &str) -> Self {
        Self::new(name, ValueKind::Address)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, ValueKind::Bool)
    }
}

/// Decodes call data as an RLP list matching `fields`, in order.
///
/// Optionally injects the payload caller as an extra named parameter, so that
/// `transfer(to, amount)` can expose the same `from` as `transferFrom`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldExtractor {
    pub fields: Vec<Field>,
    #[serde(default)]
    pub caller_as: Option<String>,
}

impl FieldExtractor {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields,
            caller_as: None,
        }
    }

    /// Expose the payload caller under `name`, ahead of the decoded fields
    pub fn with_caller_as(mut self, name: &str) -> Self {
        self.caller_as = Some(name.to_string());
        self
    }

    /// `transfer(to, amount)` -> from (caller), to, amount
    pub fn transfer() -> Self {
        Self::new(vec![Field::address("to"), Field::uint("amount")]).with_caller_as("from")
    }

    /// `transferFrom(from, to, amount)` -> from, to, amount
    pub fn transfer_from() -> Self {
        Self::new(vec![Field::address("from"), Field::address("to"), Field::uint("amount")])
    }

    /// `mint(to, amount)` -> to, amount
    pub fn mint() -> Self {
        Self::new(vec![Field::address("to"), Field::uint("amount")])
    }
}

impl Extractor for FieldExtractor {
    fn extract(&self, payload: &Payload) -> Result<Vec<Parameter>> {
        let mut params = Vec::with_capacity(self.fields.len() + 1);
        if let Some(name) = &self.caller_as {
            params.push(Parameter::new(name, payload.caller));
        }

        if self.fields.is_empty() {
            return Ok(params);
        }

        let kinds: Vec<ValueKind> = self.fields.iter().map(|f| f.kind).collect();
        let values = decode_call_data(&payload.data, &kinds)?;
        params.extend(
            self.fields
                .iter()
                .zip(values)
                .map(|(field, value)| Parameter::new(&field.name, value)),
        );

        Ok(params)
    }
}
