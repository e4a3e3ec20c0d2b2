//! Signed permits
//!
//! This module provides:
//! - Permit data, EIP-712 style digests and the inline context encoding
//! - `CertifiedActionValidator`, the permit policy, generic over a flavour
//! - Flavours for plain actions, amount-capped transfers and a trusted relay

pub mod relay;
pub mod signed;
pub mod transfer;
pub mod validator;

pub use relay::{RelayPermitPolicy, RelayRules};
pub use signed::{intent_hash, IntentHash, Permit, PermitDomain, PermitId, SignedPermit};
pub use transfer::{TransferCapPolicy, TransferRules, TRANSFER_PARAMS};
pub use validator::{
    ActionRules, CertifiedActionPolicy, CertifiedActionValidator, PermitRules, StoredPermit,
};
