//! Trusted relay permits
//!
//! A single relay presents permits on behalf of off-chain issuers it has
//! already authenticated. The signature bytes are the 20-byte issuer identity
//! the relay asserts, so no cryptographic recovery takes place.

use crate::clock::Clock;
use crate::errors::{PermitGateError, Result};
use crate::permit::signed::PermitDomain;
use crate::permit::validator::{CertifiedActionValidator, PermitRules};
use crate::types::Address;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct RelayRules {
    pub relay: Address,
}

impl PermitRules for RelayRules {
    fn type_and_version(&self) -> &'static str {
        "RelayPermitPolicy 1.0.0"
    }

    fn authorize_presenter(&self, presenter: &Address) -> Result<()> {
        if *presenter != self.relay {
            return Err(PermitGateError::PresenterNotAllowed(presenter.to_string()));
        }
        Ok(())
    }

    fn recover_issuer(&self, _digest: &[u8; 32], signature: &[u8]) -> Result<Address> {
        Address::from_slice(signature).map_err(|_| {
            PermitGateError::InvalidSignature(format!(
                "Expected a 20 byte issuer, got {} bytes",
                signature.len()
            ))
        })
    }

    fn accepts_inline(&self) -> Result<()> {
        Err(PermitGateError::rejected("contextual permits are not accepted"))
    }
}

/// Permits presented by one trusted relay
pub type RelayPermitPolicy = CertifiedActionValidator<RelayRules>;

impl CertifiedActionValidator<RelayRules> {
    pub fn relayed(
        id: &str,
        owner: Address,
        relay: Address,
        domain: PermitDomain,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(id, owner, domain, clock, RelayRules { relay })
    }

    pub fn relay(&self) -> Address {
        self.rules().relay
    }
}
