//! Signed permit validator
//!
//! A policy that allows an action when an allowed issuer signed a permit for
//! exactly that action. Permits are either presented ahead of time, keyed by
//! their intent hash, or carried inline in the payload context.
//!
//! Issuer revocation is lazy: every stored permit records its issuer, and the
//! live issuer set is consulted at each validation, so disallowing an issuer
//! invalidates all of its permits at once and allowing it again restores them
//! with their usage counters intact.

use crate::clock::Clock;
use crate::crypto::recover_signer;
use crate::errors::{PermitGateError, Result};
use crate::permit::signed::{intent_hash, IntentHash, Permit, PermitDomain, PermitId, SignedPermit};
use crate::policy::{Decision, Policy, PolicyContext};
use crate::types::{Address, Selector, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

const NO_PRE_PRESENTED: &str = "no valid pre-presented permit found";
const INVALID_INLINE: &str = "invalid signed permit in context";
const NO_PERMIT: &str = "no valid permit found";

/// Record kept for every presented (or revoked) permit id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPermit {
    /// Struct hash of the permit this record was created from
    pub permit_hash: [u8; 32],
    pub max_uses: u64,
    pub expiry: u64,
    pub uses: u64,
    pub revoked: bool,
    pub issuer: Address,
    pub parameters: Vec<Value>,
}

impl StoredPermit {
    fn new(permit: &Permit, issuer: Address) -> Self {
        Self {
            permit_hash: permit.struct_hash(),
            max_uses: permit.max_uses,
            expiry: permit.expiry,
            uses: 0,
            revoked: false,
            issuer,
            parameters: permit.parameters.clone(),
        }
    }

    fn tombstone() -> Self {
        Self {
            permit_hash: [0u8; 32],
            max_uses: 0,
            expiry: 0,
            uses: 0,
            revoked: true,
            issuer: Address::ZERO,
            parameters: vec![],
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_uses != 0 && self.uses >= self.max_uses
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expiry != 0 && now > self.expiry
    }
}

/// Behaviour that differs between permit flavours
pub trait PermitRules: Send + Sync {
    fn type_and_version(&self) -> &'static str;

    /// Intent of the action being decided
    fn call_intent(&self, ctx: &PolicyContext<'_>) -> Result<IntentHash> {
        Ok(intent_hash(&ctx.caller, &ctx.subject, &ctx.selector, ctx.parameters))
    }

    /// Intent a permit authorizes
    fn permit_intent(&self, permit: &Permit) -> Result<IntentHash> {
        Ok(intent_hash(
            &permit.caller,
            &permit.subject,
            &permit.selector,
            &permit.parameters,
        ))
    }

    fn authorize_presenter(&self, _presenter: &Address) -> Result<()> {
        Ok(())
    }

    /// Issuer identity behind `signature` over `digest`
    fn recover_issuer(&self, digest: &[u8; 32], signature: &[u8]) -> Result<Address> {
        recover_signer(digest, signature)
    }

    fn accepts_inline(&self) -> Result<()> {
        Ok(())
    }

    /// Flavour-specific check of a permit against the action
    fn validate_use(&self, _permit: &StoredPermit, _ctx: &PolicyContext<'_>) -> Result<bool> {
        Ok(true)
    }
}

/// Plain flavour: intent over (caller, subject, selector, parameters)
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionRules;

impl PermitRules for ActionRules {
    fn type_and_version(&self) -> &'static str {
        "CertifiedActionValidatorPolicy 1.0.0"
    }
}

struct ValidatorState {
    owner: Address,
    permits: HashMap<PermitId, StoredPermit>,
    intents: HashMap<IntentHash, PermitId>,
    issuers: HashSet<Address>,
}

/// Permit that satisfied a decision
enum Resolved {
    PrePresented(PermitId),
    Inline { id: PermitId, fresh: StoredPermit },
}

/// Signed permit policy, generic over its flavour
pub struct CertifiedActionValidator<R: PermitRules> {
    id: String,
    rules: R,
    domain: PermitDomain,
    clock: Arc<dyn Clock>,
    state: RwLock<ValidatorState>,
}

impl<R: PermitRules> CertifiedActionValidator<R> {
    pub fn new(id: &str, owner: Address, domain: PermitDomain, clock: Arc<dyn Clock>, rules: R) -> Self {
        Self {
            id: id.to_string(),
            rules,
            domain,
            clock,
            state: RwLock::new(ValidatorState {
                owner,
                permits: HashMap::new(),
                intents: HashMap::new(),
                issuers: HashSet::new(),
            }),
        }
    }

    pub fn domain(&self) -> &PermitDomain {
        &self.domain
    }

    pub fn rules(&self) -> &R {
        &self.rules
    }

    /// Store a permit ahead of the action it authorizes.
    ///
    /// The newest permit for an intent supersedes any earlier one.
    pub fn present(&self, presenter: Address, permit: &Permit, signature: &[u8]) -> Result<()> {
        self.rules.authorize_presenter(&presenter)?;

        let mut state = self.state.write()?;
        if let Some(stored) = state.permits.get(&permit.permit_id) {
            return Err(if stored.revoked {
                PermitGateError::PermitRevoked(permit.permit_id.to_string())
            } else {
                PermitGateError::PermitAlreadyPresented(permit.permit_id.to_string())
            });
        }

        let issuer = self.rules.recover_issuer(&permit.digest(&self.domain), signature)?;
        if !state.issuers.contains(&issuer) {
            warn!("Permit {} signed by unknown issuer {}", permit.permit_id, issuer);
            return Err(PermitGateError::IssuerNotAllowed(issuer.to_string()));
        }

        let intent = self.rules.permit_intent(permit)?;
        state
            .permits
            .insert(permit.permit_id, StoredPermit::new(permit, issuer));
        if let Some(previous) = state.intents.insert(intent, permit.permit_id) {
            debug!("Permit {} supersedes {}", permit.permit_id, previous);
        }

        info!(
            "Permit {} presented by {} (issuer {}, max uses {}, expiry {})",
            permit.permit_id, presenter, issuer, permit.max_uses, permit.expiry
        );
        Ok(())
    }

    /// Whether `signature` over `permit` comes from a currently allowed issuer
    pub fn check(&self, permit: &Permit, signature: &[u8]) -> Result<bool> {
        let issuer = match self.rules.recover_issuer(&permit.digest(&self.domain), signature) {
            Ok(issuer) => issuer,
            Err(_) => return Ok(false),
        };
        Ok(self.state.read()?.issuers.contains(&issuer))
    }

    /// Irreversibly revoke a permit id, presented or not
    pub fn revoke(&self, sender: Address, permit_id: PermitId) -> Result<()> {
        let mut state = self.state.write()?;
        Self::ensure_owner(&state, &sender)?;
        state
            .permits
            .entry(permit_id)
            .and_modify(|stored| stored.revoked = true)
            .or_insert_with(StoredPermit::tombstone);
        info!("Permit {} revoked", permit_id);
        Ok(())
    }

    pub fn allow_issuer(&self, sender: Address, issuer: Address) -> Result<()> {
        let mut state = self.state.write()?;
        Self::ensure_owner(&state, &sender)?;
        state.issuers.insert(issuer);
        info!("Issuer {} allowed", issuer);
        Ok(())
    }

    /// Disallow an issuer; every permit it signed stops validating
    pub fn disallow_issuer(&self, sender: Address, issuer: Address) -> Result<()> {
        let mut state = self.state.write()?;
        Self::ensure_owner(&state, &sender)?;
        state.issuers.remove(&issuer);
        info!("Issuer {} disallowed", issuer);
        Ok(())
    }

    pub fn transfer_ownership(&self, sender: Address, new_owner: Address) -> Result<()> {
        let mut state = self.state.write()?;
        Self::ensure_owner(&state, &sender)?;
        state.owner = new_owner;
        info!("Ownership of {} transferred to {}", self.id, new_owner);
        Ok(())
    }

    fn ensure_owner(state: &ValidatorState, sender: &Address) -> Result<()> {
        if state.owner != *sender {
            return Err(PermitGateError::NotOwner(sender.to_string()));
        }
        Ok(())
    }

    pub fn owner(&self) -> Result<Address> {
        Ok(self.state.read()?.owner)
    }

    pub fn usage(&self, permit_id: &PermitId) -> Result<u64> {
        self.state
            .read()?
            .permits
            .get(permit_id)
            .map(|stored| stored.uses)
            .ok_or_else(|| PermitGateError::UnknownPermit(permit_id.to_string()))
    }

    pub fn is_issuer_allowed(&self, issuer: &Address) -> Result<bool> {
        Ok(self.state.read()?.issuers.contains(issuer))
    }

    pub fn stored_permit(&self, permit_id: &PermitId) -> Result<Option<StoredPermit>> {
        Ok(self.state.read()?.permits.get(permit_id).cloned())
    }

    pub fn intent_permit(&self, intent: &IntentHash) -> Result<Option<PermitId>> {
        Ok(self.state.read()?.intents.get(intent).copied())
    }

    fn is_valid(&self, state: &ValidatorState, stored: &StoredPermit, ctx: &PolicyContext<'_>) -> Result<bool> {
        if !state.issuers.contains(&stored.issuer) {
            debug!("Issuer {} is no longer allowed", stored.issuer);
            return Ok(false);
        }
        if stored.revoked || stored.is_expired(self.clock.now()) || stored.is_exhausted() {
            return Ok(false);
        }
        self.rules.validate_use(stored, ctx)
    }

    /// Find the permit authorizing `ctx`: pre-presented first, then inline
    fn resolve(&self, state: &ValidatorState, ctx: &PolicyContext<'_>) -> Result<Resolved> {
        let intent = self.rules.call_intent(ctx)?;

        if let Some(id) = state.intents.get(&intent) {
            let valid = match state.permits.get(id) {
                Some(stored) => self.is_valid(state, stored, ctx)?,
                None => false,
            };
            if !valid {
                return Err(PermitGateError::rejected(NO_PRE_PRESENTED));
            }
            return Ok(Resolved::PrePresented(*id));
        }

        if ctx.context.is_empty() {
            return Err(PermitGateError::rejected(NO_PERMIT));
        }

        self.rules.accepts_inline()?;
        let signed =
            SignedPermit::from_context(ctx.context).map_err(|_| PermitGateError::rejected(INVALID_INLINE))?;
        if self.rules.permit_intent(&signed.permit)? != intent {
            return Err(PermitGateError::rejected(INVALID_INLINE));
        }
        let issuer = self
            .rules
            .recover_issuer(&signed.permit.digest(&self.domain), &signed.signature)
            .map_err(|_| PermitGateError::rejected(INVALID_INLINE))?;

        let fresh = StoredPermit::new(&signed.permit, issuer);
        // A stored id only carries over to the exact permit and issuer it was recorded for
        let stored = match state.permits.get(&signed.permit.permit_id) {
            Some(stored)
                if stored.permit_hash == fresh.permit_hash && stored.issuer == issuer =>
            {
                stored
            }
            Some(_) => {
                warn!("Inline permit {} collides with a stored record", signed.permit.permit_id);
                return Err(PermitGateError::rejected(INVALID_INLINE));
            }
            None => &fresh,
        };
        if !self.is_valid(state, stored, ctx)? {
            return Err(PermitGateError::rejected(INVALID_INLINE));
        }

        Ok(Resolved::Inline {
            id: signed.permit.permit_id,
            fresh,
        })
    }
}

impl<R: PermitRules> Policy for CertifiedActionValidator<R> {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_and_version(&self) -> &'static str {
        self.rules.type_and_version()
    }

    fn run(&self, ctx: &PolicyContext<'_>) -> Result<Decision> {
        let state = self.state.read()?;
        self.resolve(&state, ctx)?;
        Ok(Decision::Allowed)
    }

    /// Consume one use of the permit that allowed the action
    fn post_run(&self, ctx: &PolicyContext<'_>) -> Result<()> {
        let mut state = self.state.write()?;
        match self.resolve(&state, ctx)? {
            Resolved::PrePresented(id) => {
                let stored = state
                    .permits
                    .get_mut(&id)
                    .ok_or_else(|| PermitGateError::UnknownPermit(id.to_string()))?;
                stored.uses += 1;
                info!("Permit {} used ({} of {})", id, stored.uses, stored.max_uses);
            }
            Resolved::Inline { id, fresh } => {
                let stored = state.permits.entry(id).or_insert(fresh);
                stored.uses += 1;
                info!("Inline permit {} used ({} of {})", id, stored.uses, stored.max_uses);
            }
        }
        Ok(())
    }

    fn on_install(&self, selector: Selector) -> Result<()> {
        debug!("Permit policy {} installed for {}", self.id, selector);
        Ok(())
    }
}

/// Permits over (caller, subject, selector, parameters)
pub type CertifiedActionPolicy = CertifiedActionValidator<ActionRules>;

impl CertifiedActionValidator<ActionRules> {
    pub fn certified_action(id: &str, owner: Address, domain: PermitDomain, clock: Arc<dyn Clock>) -> Self {
        Self::new(id, owner, domain, clock, ActionRules)
    }
}
