//! Leaf policies
//!
//! Concrete policies that can be bound into engine chains:
//! - Amount limits
//! - Pause switches
//! - Address allow and reject lists
//! - Time-slot windows
//! - Sender allowlists that bypass the rest of a chain
//! - Reserve-backed mint caps
//!
//! Every policy accepts RLP configuration blobs through [`Policy::configure`].

use crate::clock::Clock;
use crate::codec::decode_config;
use crate::errors::{PermitGateError, Result};
use crate::policy::{Decision, Policy, PolicyContext};
use crate::types::{Address, Selector, ValueKind};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::info;

fn config_uint(data: &[u8], index: usize, arity: usize) -> Result<u128> {
    let values = decode_config(data, &vec![ValueKind::Uint; arity])?;
    values[index]
        .as_uint()
        .ok_or_else(|| PermitGateError::Configuration("expected a uint".to_string()))
}

fn config_u64(data: &[u8], index: usize, arity: usize) -> Result<u64> {
    u64::try_from(config_uint(data, index, arity)?)
        .map_err(|_| PermitGateError::Configuration("value out of range".to_string()))
}

fn config_address(data: &[u8]) -> Result<Address> {
    decode_config(data, &[ValueKind::Address])?[0]
        .as_address()
        .ok_or_else(|| PermitGateError::Configuration("expected an address".to_string()))
}

fn unsupported(policy: &str, selector: Selector) -> PermitGateError {
    PermitGateError::Configuration(format!(
        "policy {} does not accept configuration {}",
        policy, selector
    ))
}

/// Every parameter of `ctx`, as addresses
fn address_params(ctx: &PolicyContext<'_>) -> Result<Vec<Address>> {
    (0..ctx.parameters.len()).map(|i| ctx.address_param(i)).collect()
}

/// Shared address set behind the list policies
#[derive(Debug, Default)]
struct AddressSet(RwLock<HashSet<Address>>);

impl AddressSet {
    fn from_addresses(addresses: impl IntoIterator<Item = Address>) -> Self {
        Self(RwLock::new(addresses.into_iter().collect()))
    }

    fn insert(&self, address: Address) -> Result<bool> {
        Ok(self.0.write()?.insert(address))
    }

    fn remove(&self, address: &Address) -> Result<bool> {
        Ok(self.0.write()?.remove(address))
    }

    fn contains(&self, address: &Address) -> Result<bool> {
        Ok(self.0.read()?.contains(address))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.0.read()?.len())
    }
}

/// Rejects amounts above a configured maximum
#[derive(Debug)]
pub struct MaxPolicy {
    id: String,
    max: RwLock<u128>,
}

impl MaxPolicy {
    /// `setMax(uint256)`
    pub const SET_MAX: Selector = Selector([0x1f, 0xe9, 0xea, 0xbc]);

    pub fn new(id: &str, max: u128) -> Self {
        Self {
            id: id.to_string(),
            max: RwLock::new(max),
        }
    }

    pub fn max(&self) -> u128 {
        *self.max.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl Policy for MaxPolicy {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_and_version(&self) -> &'static str {
        "MaxPolicy 1.0.0"
    }

    fn run(&self, ctx: &PolicyContext<'_>) -> Result<Decision> {
        let amount = ctx.uint_param(0)?;
        if amount > *self.max.read()? {
            return Err(PermitGateError::rejected("amount exceeds maximum limit"));
        }
        Ok(Decision::Continue)
    }

    fn configure(&self, config_selector: Selector, data: &[u8]) -> Result<()> {
        if config_selector != Self::SET_MAX {
            return Err(unsupported(&self.id, config_selector));
        }
        let max = config_uint(data, 0, 1)?;
        *self.max.write()? = max;
        info!("Policy {} max set to {}", self.id, max);
        Ok(())
    }
}

/// Rejects everything while paused
#[derive(Debug)]
pub struct PausePolicy {
    id: String,
    paused: AtomicBool,
}

impl PausePolicy {
    /// `setPaused(bool)`
    pub const SET_PAUSED: Selector = Selector([0x16, 0xc3, 0x8b, 0x3c]);

    pub fn new(id: &str, paused: bool) -> Self {
        Self {
            id: id.to_string(),
            paused: AtomicBool::new(paused),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
        info!("Policy {} paused: {}", self.id, paused);
    }
}

impl Policy for PausePolicy {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_and_version(&self) -> &'static str {
        "PausePolicy 1.0.0"
    }

    fn run(&self, _ctx: &PolicyContext<'_>) -> Result<Decision> {
        if self.is_paused() {
            return Err(PermitGateError::rejected("action is paused"));
        }
        Ok(Decision::Continue)
    }

    fn configure(&self, config_selector: Selector, data: &[u8]) -> Result<()> {
        if config_selector != Self::SET_PAUSED {
            return Err(unsupported(&self.id, config_selector));
        }
        let paused = decode_config(data, &[ValueKind::Bool])?[0]
            .as_bool()
            .ok_or_else(|| PermitGateError::Configuration("expected a bool".to_string()))?;
        self.set_paused(paused);
        Ok(())
    }
}

/// Rejects when any address parameter is missing from the list
#[derive(Debug)]
pub struct AllowListPolicy {
    id: String,
    addresses: AddressSet,
}

impl AllowListPolicy {
    /// `addAllowed(address)`
    pub const ADD: Selector = Selector([0xcb, 0x85, 0x23, 0xc6]);
    /// `removeAllowed(address)`
    pub const REMOVE: Selector = Selector([0x64, 0x70, 0xdb, 0x2f]);

    pub fn new(id: &str) -> Self {
        Self::with_addresses(id, [])
    }

    pub fn with_addresses(id: &str, addresses: impl IntoIterator<Item = Address>) -> Self {
        Self {
            id: id.to_string(),
            addresses: AddressSet::from_addresses(addresses),
        }
    }

    pub fn allow(&self, address: Address) -> Result<bool> {
        self.addresses.insert(address)
    }

    pub fn disallow(&self, address: &Address) -> Result<bool> {
        self.addresses.remove(address)
    }

    pub fn is_allowed(&self, address: &Address) -> Result<bool> {
        self.addresses.contains(address)
    }

    pub fn count(&self) -> Result<usize> {
        self.addresses.len()
    }
}

impl Policy for AllowListPolicy {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_and_version(&self) -> &'static str {
        "AllowListPolicy 1.0.0"
    }

    fn run(&self, ctx: &PolicyContext<'_>) -> Result<Decision> {
        for address in address_params(ctx)? {
            if !self.addresses.contains(&address)? {
                return Err(PermitGateError::rejected("address is not on the allow list"));
            }
        }
        Ok(Decision::Continue)
    }

    fn configure(&self, config_selector: Selector, data: &[u8]) -> Result<()> {
        let address = match config_selector {
            Self::ADD | Self::REMOVE => config_address(data)?,
            other => return Err(unsupported(&self.id, other)),
        };
        if config_selector == Self::ADD {
            self.addresses.insert(address)?;
            info!("Policy {} allowed {}", self.id, address);
        } else {
            self.addresses.remove(&address)?;
            info!("Policy {} no longer allows {}", self.id, address);
        }
        Ok(())
    }
}

/// Rejects when any address parameter is on the list
#[derive(Debug)]
pub struct RejectListPolicy {
    id: String,
    addresses: AddressSet,
}

impl RejectListPolicy {
    /// `addRejected(address)`
    pub const ADD: Selector = Selector([0xfb, 0xbf, 0x4f, 0x51]);
    /// `removeRejected(address)`
    pub const REMOVE: Selector = Selector([0xb3, 0x30, 0x0e, 0x52]);

    pub fn new(id: &str) -> Self {
        Self::with_addresses(id, [])
    }

    pub fn with_addresses(id: &str, addresses: impl IntoIterator<Item = Address>) -> Self {
        Self {
            id: id.to_string(),
            addresses: AddressSet::from_addresses(addresses),
        }
    }

    pub fn reject(&self, address: Address) -> Result<bool> {
        self.addresses.insert(address)
    }

    pub fn unreject(&self, address: &Address) -> Result<bool> {
        self.addresses.remove(address)
    }

    pub fn is_rejected(&self, address: &Address) -> Result<bool> {
        self.addresses.contains(address)
    }
}

impl Policy for RejectListPolicy {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_and_version(&self) -> &'static str {
        "RejectListPolicy 1.0.0"
    }

    fn run(&self, ctx: &PolicyContext<'_>) -> Result<Decision> {
        for address in address_params(ctx)? {
            if self.addresses.contains(&address)? {
                return Err(PermitGateError::rejected("address is on the reject list"));
            }
        }
        Ok(Decision::Continue)
    }

    fn configure(&self, config_selector: Selector, data: &[u8]) -> Result<()> {
        let address = match config_selector {
            Self::ADD | Self::REMOVE => config_address(data)?,
            other => return Err(unsupported(&self.id, other)),
        };
        if config_selector == Self::ADD {
            self.addresses.insert(address)?;
            info!("Policy {} rejects {}", self.id, address);
        } else {
            self.addresses.remove(&address)?;
            info!("Policy {} no longer rejects {}", self.id, address);
        }
        Ok(())
    }
}

/// Slot layout of an [`IntervalPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalWindow {
    /// Seconds per slot
    pub slot_duration: u64,
    /// Slots per cycle
    pub cycle_slots: u64,
    /// First allowed slot
    pub start: u64,
    /// First disallowed slot after `start`
    pub end: u64,
}

impl IntervalWindow {
    fn validate(&self) -> Result<()> {
        if self.slot_duration == 0 || self.cycle_slots == 0 {
            return Err(PermitGateError::Configuration(
                "slot duration and cycle length must be positive".to_string(),
            ));
        }
        if self.start >= self.cycle_slots || self.end > self.cycle_slots {
            return Err(PermitGateError::Configuration(format!(
                "window [{}, {}) does not fit a cycle of {} slots",
                self.start, self.end, self.cycle_slots
            )));
        }
        if self.start == self.end {
            return Err(PermitGateError::Configuration("window is empty".to_string()));
        }
        Ok(())
    }

    pub fn slot_at(&self, now: u64) -> u64 {
        (now / self.slot_duration) % self.cycle_slots
    }

    /// `start <= slot < end`, wrapping past the cycle end when `start > end`
    pub fn contains(&self, slot: u64) -> bool {
        if self.start < self.end {
            slot >= self.start && slot < self.end
        } else {
            slot >= self.start || slot < self.end
        }
    }
}

/// Allows execution only inside a recurring window of time slots
pub struct IntervalPolicy {
    id: String,
    clock: Arc<dyn Clock>,
    window: RwLock<IntervalWindow>,
}

impl IntervalPolicy {
    /// `setInterval(uint256,uint256)`: start, end
    pub const SET_INTERVAL: Selector = Selector([0x5f, 0x17, 0xe6, 0x16]);
    /// `setCycle(uint256,uint256)`: slot duration, cycle slots
    pub const SET_CYCLE: Selector = Selector([0xf7, 0x6e, 0x08, 0x3b]);

    pub fn new(id: &str, clock: Arc<dyn Clock>, window: IntervalWindow) -> Result<Self> {
        window.validate()?;
        Ok(Self {
            id: id.to_string(),
            clock,
            window: RwLock::new(window),
        })
    }

    /// Hour slots over a day, allowed from `start_hour` until `end_hour`
    pub fn hourly(id: &str, clock: Arc<dyn Clock>, start_hour: u64, end_hour: u64) -> Result<Self> {
        Self::new(
            id,
            clock,
            IntervalWindow {
                slot_duration: 3600,
                cycle_slots: 24,
                start: start_hour,
                end: end_hour,
            },
        )
    }

    pub fn window(&self) -> Result<IntervalWindow> {
        Ok(*self.window.read()?)
    }

    fn update(&self, apply: impl FnOnce(&mut IntervalWindow)) -> Result<()> {
        let mut window = self.window.write()?;
        let mut next = *window;
        apply(&mut next);
        next.validate()?;
        *window = next;
        info!(
            "Policy {} window set to [{}, {}) of {} x {}s slots",
            self.id, next.start, next.end, next.cycle_slots, next.slot_duration
        );
        Ok(())
    }
}

impl Policy for IntervalPolicy {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_and_version(&self) -> &'static str {
        "IntervalPolicy 1.0.0"
    }

    fn run(&self, _ctx: &PolicyContext<'_>) -> Result<Decision> {
        let window = self.window.read()?;
        let slot = window.slot_at(self.clock.now());
        if !window.contains(slot) {
            return Err(PermitGateError::rejected(
                "execution outside allowed time interval",
            ));
        }
        Ok(Decision::Continue)
    }

    fn configure(&self, config_selector: Selector, data: &[u8]) -> Result<()> {
        if config_selector != Self::SET_INTERVAL && config_selector != Self::SET_CYCLE {
            return Err(unsupported(&self.id, config_selector));
        }
        let first = config_u64(data, 0, 2)?;
        let second = config_u64(data, 1, 2)?;

        if config_selector == Self::SET_INTERVAL {
            self.update(|w| {
                w.start = first;
                w.end = second;
            })
        } else {
            self.update(|w| {
                w.slot_duration = first;
                w.cycle_slots = second;
            })
        }
    }
}

/// Allows listed callers outright, skipping the rest of the chain
#[derive(Debug)]
pub struct SenderAllowlistPolicy {
    id: String,
    senders: AddressSet,
}

impl SenderAllowlistPolicy {
    /// `addSender(address)`
    pub const ADD: Selector = Selector([0xb6, 0x97, 0xf5, 0x31]);
    /// `removeSender(address)`
    pub const REMOVE: Selector = Selector([0xb2, 0xf8, 0x76, 0x43]);

    pub fn new(id: &str) -> Self {
        Self::with_senders(id, [])
    }

    pub fn with_senders(id: &str, senders: impl IntoIterator<Item = Address>) -> Self {
        Self {
            id: id.to_string(),
            senders: AddressSet::from_addresses(senders),
        }
    }

    pub fn add_sender(&self, sender: Address) -> Result<bool> {
        self.senders.insert(sender)
    }

    pub fn remove_sender(&self, sender: &Address) -> Result<bool> {
        self.senders.remove(sender)
    }

    pub fn is_sender(&self, sender: &Address) -> Result<bool> {
        self.senders.contains(sender)
    }
}

impl Policy for SenderAllowlistPolicy {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_and_version(&self) -> &'static str {
        "SenderAllowlistPolicy 1.0.0"
    }

    fn run(&self, ctx: &PolicyContext<'_>) -> Result<Decision> {
        if self.senders.contains(&ctx.caller)? {
            return Ok(Decision::Allowed);
        }
        Ok(Decision::Continue)
    }

    fn configure(&self, config_selector: Selector, data: &[u8]) -> Result<()> {
        let sender = match config_selector {
            Self::ADD | Self::REMOVE => config_address(data)?,
            other => return Err(unsupported(&self.id, other)),
        };
        if config_selector == Self::ADD {
            self.senders.insert(sender)?;
            info!("Policy {} added sender {}", self.id, sender);
        } else {
            self.senders.remove(&sender)?;
            info!("Policy {} removed sender {}", self.id, sender);
        }
        Ok(())
    }
}

/// Latest attested reserve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReserveReport {
    pub amount: u128,
    /// Unix seconds of the attestation
    pub updated_at: u64,
}

/// Source of reserve attestations
pub trait ReserveFeed: Send + Sync {
    fn latest(&self) -> Result<ReserveReport>;
}

/// Source of the current token supply
pub trait SupplySource: Send + Sync {
    fn total_supply(&self) -> Result<u128>;
}

/// Caps mints so supply never exceeds the attested reserve
pub struct ReserveMintPolicy {
    id: String,
    feed: Arc<dyn ReserveFeed>,
    supply: Arc<dyn SupplySource>,
    clock: Arc<dyn Clock>,
    /// Maximum report age in seconds; zero disables the check
    max_staleness: RwLock<u64>,
}

impl ReserveMintPolicy {
    /// `setMaxStaleness(uint256)`
    pub const SET_MAX_STALENESS: Selector = Selector([0x10, 0x0b, 0xc9, 0xe1]);

    pub fn new(
        id: &str,
        feed: Arc<dyn ReserveFeed>,
        supply: Arc<dyn SupplySource>,
        clock: Arc<dyn Clock>,
        max_staleness: u64,
    ) -> Self {
        Self {
            id: id.to_string(),
            feed,
            supply,
            clock,
            max_staleness: RwLock::new(max_staleness),
        }
    }

    pub fn max_staleness(&self) -> Result<u64> {
        Ok(*self.max_staleness.read()?)
    }
}

impl Policy for ReserveMintPolicy {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_and_version(&self) -> &'static str {
        "ReserveMintPolicy 1.0.0"
    }

    fn run(&self, ctx: &PolicyContext<'_>) -> Result<Decision> {
        let amount = ctx.uint_param(0)?;
        let report = self.feed.latest()?;

        let max_staleness = *self.max_staleness.read()?;
        if max_staleness > 0 && self.clock.now() > report.updated_at.saturating_add(max_staleness) {
            return Err(PermitGateError::rejected("reserve report is stale"));
        }

        let supply = self.supply.total_supply()?;
        match supply.checked_add(amount) {
            Some(after) if after <= report.amount => Ok(Decision::Continue),
            _ => Err(PermitGateError::rejected("mint exceeds available reserves")),
        }
    }

    fn configure(&self, config_selector: Selector, data: &[u8]) -> Result<()> {
        if config_selector != Self::SET_MAX_STALENESS {
            return Err(unsupported(&self.id, config_selector));
        }
        let seconds = config_u64(data, 0, 1)?;
        *self.max_staleness.write()? = seconds;
        info!("Policy {} max staleness set to {}s", self.id, seconds);
        Ok(())
    }
}
