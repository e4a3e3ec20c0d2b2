//! Policy enforcement for protected actions
//!
//! This module provides:
//! - The `Policy` capability set every policy module implements
//! - The policy engine that walks per-(target, selector) chains
//! - Leaf policies (limits, pause switch, address lists, time windows, mint caps)
//! - The JSON policy manifest used to configure an engine from disk

pub mod engine;
pub mod manifest;
pub mod rules;

pub use engine::{Outcome, PolicyEngine, DEFAULT_MAX_CHAIN_LENGTH};
pub use manifest::{
    BindingManifest, ChainManifest, PolicyEntry, PolicyManifest, RuleSpec, TargetManifest,
};
pub use rules::{
    AllowListPolicy, IntervalPolicy, IntervalWindow, MaxPolicy, PausePolicy, RejectListPolicy,
    ReserveFeed, ReserveMintPolicy, ReserveReport, SenderAllowlistPolicy, SupplySource,
};

use crate::errors::{PermitGateError, Result};
use crate::types::{Address, Selector, Value};

/// Successful result of a policy decision.
///
/// A denial is not a decision: policies raise `PermitGateError::Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Authorize the action and stop walking the chain
    Allowed,
    /// No opinion, defer to the next policy
    Continue,
}

/// Everything a policy sees about one action
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext<'a> {
    /// Identity invoking the action
    pub caller: Address,
    /// Protected target the action is invoked on
    pub subject: Address,
    pub selector: Selector,
    /// Parameters after mapping, in the order the policy declared
    pub parameters: &'a [Value],
    /// Inline context supplied with the payload
    pub context: &'a [u8],
}

impl<'a> PolicyContext<'a> {
    /// Parameter at `index`, or a fault naming the policy's expectation
    pub fn param(&self, index: usize) -> Result<&'a Value> {
        self.parameters.get(index).ok_or_else(|| {
            PermitGateError::Internal(format!(
                "expected at least {} parameters, got {}",
                index + 1,
                self.parameters.len()
            ))
        })
    }

    pub fn uint_param(&self, index: usize) -> Result<u128> {
        self.param(index)?.as_uint().ok_or_else(|| {
            PermitGateError::Internal(format!("parameter {} is not a uint", index))
        })
    }

    pub fn address_param(&self, index: usize) -> Result<Address> {
        self.param(index)?.as_address().ok_or_else(|| {
            PermitGateError::Internal(format!("parameter {} is not an address", index))
        })
    }
}

/// A pluggable decision unit bound into engine chains
pub trait Policy: Send + Sync {
    /// Identity of this policy instance; unique within a chain
    fn id(&self) -> &str;

    /// Type and version tag for audit, e.g. `MaxPolicy 1.0.0`
    fn type_and_version(&self) -> &'static str;

    fn run(&self, ctx: &PolicyContext<'_>) -> Result<Decision>;

    /// Commit the side effect of an `Allowed` decision. Only called for the
    /// policy that allowed, and only on the authoritative path.
    fn post_run(&self, _ctx: &PolicyContext<'_>) -> Result<()> {
        Ok(())
    }

    fn on_install(&self, _selector: Selector) -> Result<()> {
        Ok(())
    }

    fn on_uninstall(&self, _selector: Selector) -> Result<()> {
        Ok(())
    }

    /// Apply a configuration blob relayed by the engine
    fn configure(&self, config_selector: Selector, _data: &[u8]) -> Result<()> {
        Err(PermitGateError::Configuration(format!(
            "policy {} does not accept configuration {}",
            self.id(),
            config_selector
        )))
    }
}
