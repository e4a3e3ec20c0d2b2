//! Parameter extraction pipeline
//!
//! This module provides:
//! - `Extractor`: raw payload -> named parameters, once per decision
//! - `Mapper`: named parameters -> the exact argument list one policy expects
//! - `FieldExtractor`: schema-driven extraction of RLP call data

pub mod fields;

pub use fields::{Field, FieldExtractor};

use crate::errors::{PermitGateError, Result};
use crate::types::{Parameter, Payload, Value};

/// Turns a raw action invocation into named parameters
pub trait Extractor: Send + Sync {
    fn extract(&self, payload: &Payload) -> Result<Vec<Parameter>>;
}

impl<F> Extractor for F
where
    F: Fn(&Payload) -> Result<Vec<Parameter>> + Send + Sync,
{
    fn extract(&self, payload: &Payload) -> Result<Vec<Parameter>> {
        self(payload)
    }
}

/// Overrides default name-based routing of parameters for one policy
pub trait Mapper: Send + Sync {
    fn map(&self, parameters: &[Parameter]) -> Result<Vec<Value>>;
}

impl<F> Mapper for F
where
    F: Fn(&[Parameter]) -> Result<Vec<Value>> + Send + Sync,
{
    fn map(&self, parameters: &[Parameter]) -> Result<Vec<Value>> {
        self(parameters)
    }
}

/// Default mapping: pick each declared name out of the extracted parameters.
///
/// Every declared name must be present; the error lists all missing names.
pub fn map_by_name(policy: &str, declared: &[String], extracted: &[Parameter]) -> Result<Vec<Value>> {
    let mut values = Vec::with_capacity(declared.len());
    let mut missing = Vec::new();

    for name in declared {
        match extracted.iter().find(|p| &p.name == name) {
            Some(param) => values.push(param.value.clone()),
            None => missing.push(name.clone()),
        }
    }

    if !missing.is_empty() {
        return Err(PermitGateError::MissingParameters {
            policy: policy.to_string(),
            names: missing,
        });
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, Selector};

    #[test]
    fn test_map_by_name_reorders() {
        let extracted = vec![Parameter::new("to", Address([2; 20])), Parameter::new("amount", 5u128)];
        let declared = vec!["amount".to_string(), "to".to_string()];

        let values = map_by_name("max", &declared, &extracted).unwrap();
        assert_eq!(values, vec![Value::Uint(5), Value::Address(Address([2; 20]))]);
    }

    #[test]
    fn test_map_by_name_reports_missing() {
        let extracted = vec![Parameter::new("amount", 5u128)];
        let declared = vec!["amount".to_string(), "to".to_string(), "from".to_string()];

        match map_by_name("max", &declared, &extracted) {
            Err(PermitGateError::MissingParameters { policy, names }) => {
                assert_eq!(policy, "max");
                assert_eq!(names, vec!["to".to_string(), "from".to_string()]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_closures_are_extractors_and_mappers() {
        let extractor = |payload: &Payload| -> Result<Vec<Parameter>> {
            Ok(vec![Parameter::new("caller", payload.caller)])
        };
        let payload = Payload::new(Selector([1, 2, 3, 4]), Address([9; 20]), vec![]);
        let params = extractor.extract(&payload).unwrap();
        assert_eq!(params[0].value, Value::Address(Address([9; 20])));

        let sum = |params: &[Parameter]| -> Result<Vec<Value>> {
            let total = params.iter().filter_map(|p| p.value.as_uint()).sum::<u128>();
            Ok(vec![Value::Uint(total)])
        };
        let mapped = sum
            .map(&[Parameter::new("a", 2u128), Parameter::new("b", 3u128)])
            .unwrap();
        assert_eq!(mapped, vec![Value::Uint(5)]);
    }
}
