//! permitgate - Composable authorization engine with signed action permits
//!
//! Decouples protected operations ("targets") from the rules that gate them:
//! - Ordered chains of pluggable policies per (target, selector)
//! - A parameter pipeline turning raw call data into named values
//! - Signed permits that pre-authorize one future action, with expiry,
//!   usage caps and revocation (including lazy revocation of an issuer)
//!
//! # Example
//!
//! ```no_run
//! use permitgate::extract::FieldExtractor;
//! use permitgate::policy::{MaxPolicy, PolicyEngine};
//! use permitgate::types::{Address, Payload, Selector, Value};
//! use std::sync::Arc;
//!
//! let token = Address([0xaa; 20]);
//! let transfer = Selector::from_signature("transfer(address,uint256)");
//!
//! let engine = PolicyEngine::new(true);
//! engine.set_extractor(transfer, Arc::new(FieldExtractor::transfer()))?;
//! engine.add_policy(token, transfer, Arc::new(MaxPolicy::new("max", 100)), vec!["amount".into()])?;
//!
//! let data = permitgate::codec::encode_call_data(&[Value::Address(Address([1; 20])), Value::Uint(100)]);
//! engine.run(&token, &Payload::new(transfer, Address([2; 20]), data))?;
//! # Ok::<(), permitgate::errors::PermitGateError>(())
//! ```

pub mod clock;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod extract;
pub mod permit;
pub mod policy;
pub mod types;

pub use errors::{PermitGateError, Result};
