//! Amount-capped transfer permits
//!
//! The intent covers (caller, subject, from, to) but neither the selector nor
//! the amount, so one permit serves both `transfer` and `transferFrom`. The
//! amount is checked separately against the cap carried by the permit.

use crate::clock::Clock;
use crate::crypto::keccak_words;
use crate::errors::{PermitGateError, Result};
use crate::permit::signed::{IntentHash, Permit, PermitDomain};
use crate::permit::validator::{CertifiedActionValidator, PermitRules, StoredPermit};
use crate::policy::PolicyContext;
use crate::types::{Address, Value};
use std::sync::Arc;

/// Policy parameters, in order
pub const TRANSFER_PARAMS: [&str; 3] = ["from", "to", "amount"];

#[derive(Debug, Clone, Copy, Default)]
pub struct TransferRules;

impl TransferRules {
    fn intent(caller: &Address, subject: &Address, from: &Address, to: &Address) -> IntentHash {
        keccak_words(&[caller.to_word(), subject.to_word(), from.to_word(), to.to_word()])
    }

    /// Permit parameters: `[from, to, max_amount]`
    fn permit_fields(parameters: &[Value]) -> Result<(Address, Address, u128)> {
        match parameters {
            [Value::Address(from), Value::Address(to), Value::Uint(max_amount)] => {
                Ok((*from, *to, *max_amount))
            }
            _ => Err(PermitGateError::Codec(
                "transfer permit parameters must be [from, to, max_amount]".to_string(),
            )),
        }
    }
}

impl PermitRules for TransferRules {
    fn type_and_version(&self) -> &'static str {
        "TransferCapPolicy 1.0.0"
    }

    fn call_intent(&self, ctx: &PolicyContext<'_>) -> Result<IntentHash> {
        let from = ctx.address_param(0)?;
        let to = ctx.address_param(1)?;
        Ok(Self::intent(&ctx.caller, &ctx.subject, &from, &to))
    }

    fn permit_intent(&self, permit: &Permit) -> Result<IntentHash> {
        let (from, to, _) = Self::permit_fields(&permit.parameters)?;
        Ok(Self::intent(&permit.caller, &permit.subject, &from, &to))
    }

    fn validate_use(&self, permit: &StoredPermit, ctx: &PolicyContext<'_>) -> Result<bool> {
        let (_, _, max_amount) = Self::permit_fields(&permit.parameters)?;
        Ok(ctx.uint_param(2)? <= max_amount)
    }
}

/// Transfer permits capped by amount
pub type TransferCapPolicy = CertifiedActionValidator<TransferRules>;

impl CertifiedActionValidator<TransferRules> {
    pub fn transfer_cap(id: &str, owner: Address, domain: PermitDomain, clock: Arc<dyn Clock>) -> Self {
        Self::new(id, owner, domain, clock, TransferRules)
    }

    pub fn params() -> Vec<String> {
        TRANSFER_PARAMS.iter().map(|name| name.to_string()).collect()
    }
}
