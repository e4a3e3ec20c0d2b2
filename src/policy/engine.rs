//! Policy engine
//!
//! Evaluates protected actions against the policy chain bound to their
//! (target, selector) pair: first `Allowed` wins, first rejection aborts, an
//! exhausted chain falls back to the default-allow setting.

use crate::config::EngineConfig;
use crate::errors::{PermitGateError, Result};
use crate::extract::{map_by_name, Extractor, Mapper};
use crate::policy::{Decision, Policy, PolicyContext};
use crate::types::{Address, Parameter, Payload, Selector, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Default cap on the number of policies in one chain
pub const DEFAULT_MAX_CHAIN_LENGTH: usize = 8;

/// Successful result of an engine decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A policy in the chain allowed the action
    Allowed { policy: String },
    /// No policy allowed, and the default-allow fallback applied
    DefaultAllowed,
}

impl Outcome {
    /// Policy that allowed the action, if any
    pub fn allowed_by(&self) -> Option<&str> {
        match self {
            Outcome::Allowed { policy } => Some(policy),
            Outcome::DefaultAllowed => None,
        }
    }
}

struct PolicyBinding {
    policy: Arc<dyn Policy>,
    params: Vec<String>,
}

#[derive(Debug, Default)]
struct TargetState {
    attached: bool,
    default_allow: Option<bool>,
}

#[derive(Default)]
struct EngineState {
    default_allow: bool,
    targets: HashMap<Address, TargetState>,
    chains: HashMap<Address, HashMap<Selector, Vec<PolicyBinding>>>,
    extractors: HashMap<Selector, Arc<dyn Extractor>>,
    mappers: HashMap<String, Arc<dyn Mapper>>,
    config_versions: HashMap<String, u64>,
}

impl EngineState {
    fn default_allow_for(&self, target: &Address) -> bool {
        self.targets
            .get(target)
            .and_then(|t| t.default_allow)
            .unwrap_or(self.default_allow)
    }

    fn chain(&self, target: &Address, selector: &Selector) -> &[PolicyBinding] {
        self.chains
            .get(target)
            .and_then(|by_selector| by_selector.get(selector))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn find_policy(&self, policy_id: &str) -> Option<Arc<dyn Policy>> {
        self.chains
            .values()
            .flat_map(|by_selector| by_selector.values())
            .flatten()
            .find(|binding| binding.policy.id() == policy_id)
            .map(|binding| binding.policy.clone())
    }
}

/// Policy engine for evaluating protected actions
pub struct PolicyEngine {
    max_chain_length: usize,
    state: RwLock<EngineState>,
}

impl PolicyEngine {
    /// Create a new policy engine with the default chain cap
    pub fn new(default_allow: bool) -> Self {
        Self::with_max_chain_length(default_allow, DEFAULT_MAX_CHAIN_LENGTH)
    }

    pub fn with_max_chain_length(default_allow: bool, max_chain_length: usize) -> Self {
        Self {
            max_chain_length,
            state: RwLock::new(EngineState {
                default_allow,
                ..EngineState::default()
            }),
        }
    }

    /// Create an engine from the `engine` configuration section
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::with_max_chain_length(config.default_allow, config.max_chain_length)
    }

    pub fn max_chain_length(&self) -> usize {
        self.max_chain_length
    }

    /// Register a target. Fails if it is already attached.
    pub fn attach(&self, target: Address) -> Result<()> {
        let mut state = self.state.write()?;
        let entry = state.targets.entry(target).or_default();
        if entry.attached {
            return Err(PermitGateError::Configuration(format!(
                "target {} is already attached",
                target
            )));
        }
        entry.attached = true;
        info!("Attached target {}", target);
        Ok(())
    }

    /// Unregister a target. Fails if it is not attached.
    pub fn detach(&self, target: Address) -> Result<()> {
        let mut state = self.state.write()?;
        match state.targets.get_mut(&target) {
            Some(entry) if entry.attached => {
                entry.attached = false;
                info!("Detached target {}", target);
                Ok(())
            }
            _ => Err(PermitGateError::Configuration(format!(
                "target {} is not attached",
                target
            ))),
        }
    }

    pub fn is_attached(&self, target: &Address) -> Result<bool> {
        let state = self.state.read()?;
        Ok(state.targets.get(target).map(|t| t.attached).unwrap_or(false))
    }

    /// Global fallback when a chain is empty or exhausted
    pub fn set_default_allow(&self, allow: bool) -> Result<()> {
        self.state.write()?.default_allow = allow;
        info!("Set global default allow to {}", allow);
        Ok(())
    }

    /// Per-target fallback; wins over the global setting while present
    pub fn set_target_default_allow(&self, target: Address, allow: bool) -> Result<()> {
        let mut state = self.state.write()?;
        state.targets.entry(target).or_default().default_allow = Some(allow);
        info!("Set default allow for {} to {}", target, allow);
        Ok(())
    }

    pub fn clear_target_default_allow(&self, target: Address) -> Result<()> {
        let mut state = self.state.write()?;
        if let Some(entry) = state.targets.get_mut(&target) {
            entry.default_allow = None;
        }
        Ok(())
    }

    /// Effective fallback for `target`
    pub fn default_allow_for(&self, target: &Address) -> Result<bool> {
        Ok(self.state.read()?.default_allow_for(target))
    }

    /// Bind parameter extraction for an action shape, for every target
    pub fn set_extractor(&self, selector: Selector, extractor: Arc<dyn Extractor>) -> Result<()> {
        self.state.write()?.extractors.insert(selector, extractor);
        info!("Set extractor for selector {}", selector);
        Ok(())
    }

    pub fn set_extractors(&self, selectors: &[Selector], extractor: Arc<dyn Extractor>) -> Result<()> {
        let mut state = self.state.write()?;
        for selector in selectors {
            state.extractors.insert(*selector, extractor.clone());
        }
        info!("Set extractor for {} selectors", selectors.len());
        Ok(())
    }

    pub fn remove_extractor(&self, selector: Selector) -> Result<()> {
        let mut state = self.state.write()?;
        if state.extractors.remove(&selector).is_none() {
            return Err(PermitGateError::Configuration(format!(
                "no extractor bound to selector {}",
                selector
            )));
        }
        Ok(())
    }

    pub fn has_extractor(&self, selector: &Selector) -> Result<bool> {
        Ok(self.state.read()?.extractors.contains_key(selector))
    }

    /// Override default parameter routing for one policy
    pub fn set_policy_mapper(&self, policy_id: &str, mapper: Arc<dyn Mapper>) -> Result<()> {
        if policy_id.is_empty() {
            return Err(PermitGateError::Configuration("policy id is empty".to_string()));
        }
        self.state.write()?.mappers.insert(policy_id.to_string(), mapper);
        info!("Set mapper for policy {}", policy_id);
        Ok(())
    }

    pub fn clear_policy_mapper(&self, policy_id: &str) -> Result<()> {
        if self.state.write()?.mappers.remove(policy_id).is_none() {
            return Err(PermitGateError::Configuration(format!(
                "no mapper set for policy {}",
                policy_id
            )));
        }
        Ok(())
    }

    pub fn has_policy_mapper(&self, policy_id: &str) -> Result<bool> {
        Ok(self.state.read()?.mappers.contains_key(policy_id))
    }

    /// Append a policy to the chain of (target, selector)
    pub fn add_policy(
        &self,
        target: Address,
        selector: Selector,
        policy: Arc<dyn Policy>,
        params: Vec<String>,
    ) -> Result<()> {
        self.insert_policy(target, selector, policy, params, None)
    }

    /// Insert a policy at `position` in the chain of (target, selector)
    pub fn add_policy_at(
        &self,
        target: Address,
        selector: Selector,
        policy: Arc<dyn Policy>,
        params: Vec<String>,
        position: usize,
    ) -> Result<()> {
        self.insert_policy(target, selector, policy, params, Some(position))
    }

    fn insert_policy(
        &self,
        target: Address,
        selector: Selector,
        policy: Arc<dyn Policy>,
        params: Vec<String>,
        position: Option<usize>,
    ) -> Result<()> {
        let policy_id = policy.id().to_string();
        if policy_id.is_empty() {
            return Err(PermitGateError::Configuration("policy id is empty".to_string()));
        }
        if params.iter().any(String::is_empty) {
            return Err(PermitGateError::Configuration(format!(
                "policy {} declares an empty parameter name",
                policy_id
            )));
        }

        let mut state = self.state.write()?;
        let chain = state.chains.entry(target).or_default().entry(selector).or_default();

        if chain.iter().any(|b| b.policy.id() == policy_id) {
            return Err(PermitGateError::Configuration(format!(
                "policy {} is already in the chain for {} {}",
                policy_id, target, selector
            )));
        }
        if chain.len() >= self.max_chain_length {
            return Err(PermitGateError::Configuration(format!(
                "chain for {} {} is full ({} policies)",
                target, selector, self.max_chain_length
            )));
        }
        let position = position.unwrap_or(chain.len());
        if position > chain.len() {
            return Err(PermitGateError::Configuration(format!(
                "position {} is past the end of a chain of {}",
                position,
                chain.len()
            )));
        }

        policy.on_install(selector)?;
        chain.insert(position, PolicyBinding { policy, params });

        info!(
            "Added policy {} to {} {} at position {}",
            policy_id, target, selector, position
        );
        Ok(())
    }

    /// Remove the first occurrence of `policy_id`, preserving the order of the rest
    pub fn remove_policy(&self, target: Address, selector: Selector, policy_id: &str) -> Result<()> {
        let mut state = self.state.write()?;
        let chain = state
            .chains
            .get_mut(&target)
            .and_then(|by_selector| by_selector.get_mut(&selector));

        let Some(chain) = chain else {
            return Err(PermitGateError::Configuration(format!(
                "no chain for {} {}",
                target, selector
            )));
        };
        let Some(index) = chain.iter().position(|b| b.policy.id() == policy_id) else {
            return Err(PermitGateError::Configuration(format!(
                "policy {} is not in the chain for {} {}",
                policy_id, target, selector
            )));
        };

        chain[index].policy.on_uninstall(selector)?;
        chain.remove(index);

        info!("Removed policy {} from {} {}", policy_id, target, selector);
        Ok(())
    }

    /// Policy ids of the chain for (target, selector), in evaluation order
    pub fn policies(&self, target: &Address, selector: &Selector) -> Result<Vec<String>> {
        let state = self.state.read()?;
        Ok(state
            .chain(target, selector)
            .iter()
            .map(|b| b.policy.id().to_string())
            .collect())
    }

    /// Relay a configuration blob to an installed policy.
    ///
    /// `expected_version` must equal the current version; the version only
    /// advances when the policy accepts the blob. Returns the new version.
    pub fn set_policy_configuration(
        &self,
        policy_id: &str,
        expected_version: u64,
        config_selector: Selector,
        config_data: &[u8],
    ) -> Result<u64> {
        let mut state = self.state.write()?;
        let policy = state.find_policy(policy_id).ok_or_else(|| {
            PermitGateError::Configuration(format!("policy {} is not installed", policy_id))
        })?;

        let current = state.config_versions.get(policy_id).copied().unwrap_or(0);
        if current != expected_version {
            warn!(
                "Configuration of {} rejected: expected version {}, current {}",
                policy_id, expected_version, current
            );
            return Err(PermitGateError::VersionConflict {
                policy: policy_id.to_string(),
                expected: expected_version,
                current,
            });
        }

        policy.configure(config_selector, config_data)?;
        let next = current + 1;
        state.config_versions.insert(policy_id.to_string(), next);

        info!(
            "Configured policy {} with {} (version {})",
            policy_id, config_selector, next
        );
        Ok(next)
    }

    pub fn config_version(&self, policy_id: &str) -> Result<u64> {
        Ok(self
            .state
            .read()?
            .config_versions
            .get(policy_id)
            .copied()
            .unwrap_or(0))
    }

    /// Evaluate without committing side effects
    pub fn check(&self, target: &Address, payload: &Payload) -> Result<Outcome> {
        let state = self.state.read()?;
        evaluate(&state, target, payload, false)
    }

    /// Authoritative evaluation: the allowing policy's post-commit hook runs,
    /// and any error means the whole action must not happen.
    pub fn run(&self, target: &Address, payload: &Payload) -> Result<Outcome> {
        // Write lock serializes authoritative decisions
        let state = self.state.write()?;
        evaluate(&state, target, payload, true)
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new(false)
    }
}

fn evaluate(state: &EngineState, target: &Address, payload: &Payload, commit: bool) -> Result<Outcome> {
    let chain = state.chain(target, &payload.selector);
    if chain.is_empty() {
        debug!("Empty chain for {} {}", target, payload.selector);
        return fallback(state, target);
    }

    let extracted = extract(state, payload)?;

    for binding in chain {
        let policy_id = binding.policy.id();
        let values = map_params(state, binding, &extracted)?;
        let ctx = PolicyContext {
            caller: payload.caller,
            subject: *target,
            selector: payload.selector,
            parameters: &values,
            context: &payload.context,
        };

        match binding.policy.run(&ctx) {
            Ok(Decision::Allowed) => {
                if commit {
                    binding.policy.post_run(&ctx).map_err(|e| {
                        warn!("Post-commit hook of {} failed: {}", policy_id, e);
                        PermitGateError::PostCommitFault {
                            policy: policy_id.to_string(),
                            reason: e.to_string(),
                        }
                    })?;
                }
                debug!("Policy {} allowed {} on {}", policy_id, payload.selector, target);
                return Ok(Outcome::Allowed {
                    policy: policy_id.to_string(),
                });
            }
            Ok(Decision::Continue) => {
                debug!("Policy {} continued", policy_id);
            }
            Err(PermitGateError::Rejected(reason)) => {
                warn!(
                    "Policy {} rejected {} on {} from {}: {}",
                    policy_id, payload.selector, target, payload.caller, reason
                );
                return Err(PermitGateError::PolicyRejected {
                    policy: policy_id.to_string(),
                    reason,
                    payload: Box::new(payload.clone()),
                });
            }
            Err(e) => {
                warn!("Policy {} failed: {}", policy_id, e);
                return Err(PermitGateError::PolicyFault {
                    policy: policy_id.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    debug!("Chain for {} {} exhausted", target, payload.selector);
    fallback(state, target)
}

fn fallback(state: &EngineState, target: &Address) -> Result<Outcome> {
    if state.default_allow_for(target) {
        Ok(Outcome::DefaultAllowed)
    } else {
        Err(PermitGateError::DefaultReject)
    }
}

fn extract(state: &EngineState, payload: &Payload) -> Result<Vec<Parameter>> {
    match state.extractors.get(&payload.selector) {
        Some(extractor) => extractor.extract(payload).map_err(|e| PermitGateError::Extraction {
            selector: payload.selector,
            reason: e.to_string(),
        }),
        None => Ok(vec![]),
    }
}

fn map_params(state: &EngineState, binding: &PolicyBinding, extracted: &[Parameter]) -> Result<Vec<Value>> {
    let policy_id = binding.policy.id();
    match state.mappers.get(policy_id) {
        Some(mapper) => mapper.map(extracted).map_err(|e| PermitGateError::Mapper {
            policy: policy_id.to_string(),
            reason: e.to_string(),
        }),
        None => map_by_name(policy_id, &binding.params, extracted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_call_data, encode_config};
    use crate::extract::FieldExtractor;
    use crate::clock::ManualClock;
    use crate::policy::rules::{IntervalPolicy, MaxPolicy, PausePolicy, SenderAllowlistPolicy};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Test policy with a fixed behaviour and call counters
    struct Fixed {
        id: String,
        behaviour: Behaviour,
        fail_post_run: bool,
        runs: AtomicUsize,
        post_runs: AtomicUsize,
        installs: AtomicUsize,
        uninstalls: AtomicUsize,
    }

    #[derive(Clone, Copy)]
    enum Behaviour {
        Allow,
        Continue,
        Reject,
        Fault,
    }

    impl Fixed {
        fn new(id: &str, behaviour: Behaviour) -> Arc<Self> {
            Self::build(id, behaviour, false)
        }

        fn failing_post_run(id: &str) -> Arc<Self> {
            Self::build(id, Behaviour::Allow, true)
        }

        fn build(id: &str, behaviour: Behaviour, fail_post_run: bool) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                behaviour,
                fail_post_run,
                runs: AtomicUsize::new(0),
                post_runs: AtomicUsize::new(0),
                installs: AtomicUsize::new(0),
                uninstalls: AtomicUsize::new(0),
            })
        }
    }

    impl Policy for Fixed {
        fn id(&self) -> &str {
            &self.id
        }

        fn type_and_version(&self) -> &'static str {
            "FixedPolicy 1.0.0"
        }

        fn run(&self, _ctx: &PolicyContext<'_>) -> Result<Decision> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Allow => Ok(Decision::Allowed),
                Behaviour::Continue => Ok(Decision::Continue),
                Behaviour::Reject => Err(PermitGateError::rejected("fixed rejection")),
                Behaviour::Fault => Err(PermitGateError::Internal("broken".to_string())),
            }
        }

        fn post_run(&self, _ctx: &PolicyContext<'_>) -> Result<()> {
            self.post_runs.fetch_add(1, Ordering::SeqCst);
            if self.fail_post_run {
                return Err(PermitGateError::Internal("counter desync".to_string()));
            }
            Ok(())
        }

        fn on_install(&self, _selector: Selector) -> Result<()> {
            self.installs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_uninstall(&self, _selector: Selector) -> Result<()> {
            self.uninstalls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn target() -> Address {
        Address([0xaa; 20])
    }

    fn caller() -> Address {
        Address([0x01; 20])
    }

    fn transfer() -> Selector {
        Selector::from_signature("transfer(address,uint256)")
    }

    fn payload(amount: u128) -> Payload {
        Payload::new(
            transfer(),
            caller(),
            encode_call_data(&[Value::Address(Address([0x02; 20])), Value::Uint(amount)]),
        )
    }

    fn amount() -> Vec<String> {
        vec!["amount".to_string()]
    }

    #[test]
    fn test_empty_chain_is_default_reject() {
        let engine = PolicyEngine::new(false);
        for amount in [0, 1, 100, u128::MAX] {
            let result = engine.run(&target(), &payload(amount));
            assert!(matches!(result, Err(PermitGateError::DefaultReject)));
            let result = engine.check(&target(), &payload(amount));
            assert!(matches!(result, Err(PermitGateError::DefaultReject)));
        }
    }

    #[test]
    fn test_default_allow_and_target_override() {
        let engine = PolicyEngine::new(false);
        engine.set_default_allow(true).unwrap();
        assert_eq!(engine.run(&target(), &payload(1)).unwrap(), Outcome::DefaultAllowed);

        // Override always wins when present
        engine.set_target_default_allow(target(), false).unwrap();
        assert!(matches!(
            engine.run(&target(), &payload(1)),
            Err(PermitGateError::DefaultReject)
        ));
        // Other targets still use the global default
        assert_eq!(
            engine.run(&Address([0xbb; 20]), &payload(1)).unwrap(),
            Outcome::DefaultAllowed
        );

        engine.clear_target_default_allow(target()).unwrap();
        assert!(engine.default_allow_for(&target()).unwrap());
    }

    #[test]
    fn test_attach_detach_are_not_idempotent() {
        let engine = PolicyEngine::new(false);
        assert!(matches!(engine.detach(target()), Err(PermitGateError::Configuration(_))));

        engine.attach(target()).unwrap();
        assert!(engine.is_attached(&target()).unwrap());
        assert!(matches!(engine.attach(target()), Err(PermitGateError::Configuration(_))));

        engine.detach(target()).unwrap();
        assert!(!engine.is_attached(&target()).unwrap());
        assert!(matches!(engine.detach(target()), Err(PermitGateError::Configuration(_))));

        engine.attach(target()).unwrap();
    }

    #[test]
    fn test_ordering_law() {
        // A allows the caller outright, B rejects everything
        let allow = Arc::new(SenderAllowlistPolicy::new("bypass"));
        allow.add_sender(caller()).unwrap();
        let reject = Arc::new(PausePolicy::new("pause", true));

        let engine = PolicyEngine::new(false);
        engine.add_policy(target(), transfer(), allow.clone(), vec![]).unwrap();
        engine.add_policy(target(), transfer(), reject.clone(), vec![]).unwrap();
        assert_eq!(
            engine.run(&target(), &payload(1)).unwrap(),
            Outcome::Allowed {
                policy: "bypass".to_string()
            }
        );

        // Same policies, opposite order
        let engine = PolicyEngine::new(false);
        engine.add_policy(target(), transfer(), reject, vec![]).unwrap();
        engine.add_policy(target(), transfer(), allow, vec![]).unwrap();
        match engine.run(&target(), &payload(1)) {
            Err(PermitGateError::PolicyRejected { policy, reason, payload: rejected }) => {
                assert_eq!(policy, "pause");
                assert_eq!(reason, "action is paused");
                assert_eq!(*rejected, payload(1));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_rejection_stops_before_later_policies_and_default() {
        let reject = Fixed::new("reject", Behaviour::Reject);
        let later = Fixed::new("later", Behaviour::Allow);

        let engine = PolicyEngine::new(true);
        engine.add_policy(target(), transfer(), reject.clone(), vec![]).unwrap();
        engine.add_policy(target(), transfer(), later.clone(), vec![]).unwrap();

        let err = engine.run(&target(), &payload(1)).unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(later.runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fault_is_distinct_from_rejection() {
        let engine = PolicyEngine::new(true);
        engine
            .add_policy(target(), transfer(), Fixed::new("broken", Behaviour::Fault), vec![])
            .unwrap();

        match engine.run(&target(), &payload(1)) {
            Err(err @ PermitGateError::PolicyFault { .. }) => {
                assert!(err.is_fault());
                assert!(!err.is_rejection());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_exhausted_chain_falls_to_default() {
        let first = Fixed::new("first", Behaviour::Continue);
        let second = Fixed::new("second", Behaviour::Continue);

        let engine = PolicyEngine::new(false);
        engine.add_policy(target(), transfer(), first.clone(), vec![]).unwrap();
        engine.add_policy(target(), transfer(), second.clone(), vec![]).unwrap();
        assert!(matches!(
            engine.run(&target(), &payload(1)),
            Err(PermitGateError::DefaultReject)
        ));

        engine.set_target_default_allow(target(), true).unwrap();
        assert_eq!(engine.run(&target(), &payload(1)).unwrap(), Outcome::DefaultAllowed);
        assert_eq!(first.runs.load(Ordering::SeqCst), 2);
        assert_eq!(second.runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_post_run_only_on_authoritative_path() {
        let allow = Fixed::new("allow", Behaviour::Allow);
        let engine = PolicyEngine::new(false);
        engine.add_policy(target(), transfer(), allow.clone(), vec![]).unwrap();

        engine.check(&target(), &payload(1)).unwrap();
        assert_eq!(allow.post_runs.load(Ordering::SeqCst), 0);

        engine.run(&target(), &payload(1)).unwrap();
        assert_eq!(allow.post_runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_post_run_failure_is_fatal() {
        let engine = PolicyEngine::new(true);
        engine
            .add_policy(target(), transfer(), Fixed::failing_post_run("counter"), vec![])
            .unwrap();

        // The read-only path never commits, so it succeeds
        assert!(engine.check(&target(), &payload(1)).is_ok());
        assert!(matches!(
            engine.run(&target(), &payload(1)),
            Err(PermitGateError::PostCommitFault { .. })
        ));
    }

    #[test]
    fn test_threshold_scenario() {
        let engine = PolicyEngine::new(true);
        engine
            .set_extractor(transfer(), Arc::new(FieldExtractor::transfer()))
            .unwrap();
        engine
            .add_policy(target(), transfer(), Arc::new(MaxPolicy::new("max", 100)), amount())
            .unwrap();

        assert_eq!(engine.run(&target(), &payload(100)).unwrap(), Outcome::DefaultAllowed);
        match engine.run(&target(), &payload(101)) {
            Err(PermitGateError::PolicyRejected { policy, reason, .. }) => {
                assert_eq!(policy, "max");
                assert_eq!(reason, "amount exceeds maximum limit");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_interval_scenario() {
        let clock = Arc::new(ManualClock::new(0));
        let engine = PolicyEngine::new(true);
        engine
            .add_policy(
                target(),
                transfer(),
                Arc::new(IntervalPolicy::hourly("hours", clock.clone(), 11, 17).unwrap()),
                vec![],
            )
            .unwrap();

        clock.set(16 * 3600);
        assert_eq!(engine.run(&target(), &payload(1)).unwrap(), Outcome::DefaultAllowed);

        clock.set(18 * 3600);
        match engine.run(&target(), &payload(1)) {
            Err(PermitGateError::PolicyRejected { policy, reason, .. }) => {
                assert_eq!(policy, "hours");
                assert_eq!(reason, "execution outside allowed time interval");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_missing_parameters() {
        let engine = PolicyEngine::new(true);
        // No extractor bound: the selector carries no parameters
        engine
            .add_policy(target(), transfer(), Arc::new(MaxPolicy::new("max", 100)), amount())
            .unwrap();

        let err = engine.run(&target(), &payload(1)).unwrap_err();
        assert!(matches!(err, PermitGateError::MissingParameters { .. }));
        assert!(err.to_string().contains("missing policy parameters"));
    }

    #[test]
    fn test_extraction_failure_names_selector() {
        let engine = PolicyEngine::new(true);
        engine
            .set_extractor(transfer(), Arc::new(FieldExtractor::transfer()))
            .unwrap();
        engine
            .add_policy(target(), transfer(), Arc::new(MaxPolicy::new("max", 100)), amount())
            .unwrap();

        let bad = Payload::new(transfer(), caller(), vec![0x01]);
        match engine.run(&target(), &bad) {
            Err(PermitGateError::Extraction { selector, .. }) => assert_eq!(selector, transfer()),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_custom_mapper_overrides_names() {
        let engine = PolicyEngine::new(true);
        engine
            .set_extractor(transfer(), Arc::new(FieldExtractor::transfer()))
            .unwrap();
        // Declares a name the extractor never produces; the mapper takes over
        engine
            .add_policy(
                target(),
                transfer(),
                Arc::new(MaxPolicy::new("max", 100)),
                vec!["doubled".to_string()],
            )
            .unwrap();
        let doubled = |params: &[Parameter]| -> Result<Vec<Value>> {
            let amount = params
                .iter()
                .find(|p| p.name == "amount")
                .and_then(|p| p.value.as_uint())
                .ok_or_else(|| PermitGateError::Codec("no amount".to_string()))?;
            Ok(vec![Value::Uint(amount * 2)])
        };
        engine.set_policy_mapper("max", Arc::new(doubled)).unwrap();
        assert!(engine.has_policy_mapper("max").unwrap());

        assert!(engine.run(&target(), &payload(50)).is_ok());
        assert!(engine.run(&target(), &payload(51)).unwrap_err().is_rejection());

        let failing = |_: &[Parameter]| -> Result<Vec<Value>> { Err(PermitGateError::Codec("nope".to_string())) };
        engine.set_policy_mapper("max", Arc::new(failing)).unwrap();
        assert!(matches!(
            engine.run(&target(), &payload(1)),
            Err(PermitGateError::Mapper { .. })
        ));
    }

    #[test]
    fn test_add_policy_validation() {
        let engine = PolicyEngine::new(false);
        let policy = Fixed::new("one", Behaviour::Continue);

        engine.add_policy(target(), transfer(), policy.clone(), vec![]).unwrap();
        assert_eq!(policy.installs.load(Ordering::SeqCst), 1);

        // Duplicate
        assert!(matches!(
            engine.add_policy(target(), transfer(), policy.clone(), vec![]),
            Err(PermitGateError::Configuration(_))
        ));
        // The "null" policy
        assert!(engine
            .add_policy(target(), transfer(), Fixed::new("", Behaviour::Continue), vec![])
            .is_err());
        // Position past the end
        assert!(engine
            .add_policy_at(target(), transfer(), Fixed::new("two", Behaviour::Continue), vec![], 5)
            .is_err());
        // Same policy is fine in another chain
        engine
            .add_policy(target(), Selector([9; 4]), policy.clone(), vec![])
            .unwrap();
        assert_eq!(policy.installs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_capacity_law() {
        let engine = PolicyEngine::with_max_chain_length(false, 3);
        for i in 0..3 {
            engine
                .add_policy(target(), transfer(), Fixed::new(&format!("p{}", i), Behaviour::Continue), vec![])
                .unwrap();
        }

        let extra = Fixed::new("extra", Behaviour::Continue);
        assert!(matches!(
            engine.add_policy(target(), transfer(), extra.clone(), vec![]),
            Err(PermitGateError::Configuration(_))
        ));
        assert!(matches!(
            engine.add_policy_at(target(), transfer(), extra.clone(), vec![], 0),
            Err(PermitGateError::Configuration(_))
        ));
        assert_eq!(extra.installs.load(Ordering::SeqCst), 0);
        assert_eq!(engine.policies(&target(), &transfer()).unwrap().len(), 3);
    }

    #[test]
    fn test_add_at_and_remove_preserve_order() {
        let engine = PolicyEngine::new(false);
        let a = Fixed::new("a", Behaviour::Continue);
        let b = Fixed::new("b", Behaviour::Continue);
        let c = Fixed::new("c", Behaviour::Continue);

        engine.add_policy(target(), transfer(), a.clone(), vec![]).unwrap();
        engine.add_policy(target(), transfer(), c.clone(), vec![]).unwrap();
        engine.add_policy_at(target(), transfer(), b.clone(), vec![], 1).unwrap();
        assert_eq!(engine.policies(&target(), &transfer()).unwrap(), vec!["a", "b", "c"]);

        engine.remove_policy(target(), transfer(), "b").unwrap();
        assert_eq!(engine.policies(&target(), &transfer()).unwrap(), vec!["a", "c"]);
        assert_eq!(b.uninstalls.load(Ordering::SeqCst), 1);

        // No match: nothing uninstalled
        assert!(engine.remove_policy(target(), transfer(), "b").is_err());
        assert_eq!(b.uninstalls.load(Ordering::SeqCst), 1);
        assert_eq!(a.uninstalls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_policy_configuration_versions() {
        let max = Arc::new(MaxPolicy::new("max", 100));
        let engine = PolicyEngine::new(true);
        engine
            .set_extractor(transfer(), Arc::new(FieldExtractor::transfer()))
            .unwrap();
        engine.add_policy(target(), transfer(), max.clone(), amount()).unwrap();
        assert_eq!(engine.config_version("max").unwrap(), 0);

        let raise = encode_config(&[Value::Uint(500)]);
        let version = engine
            .set_policy_configuration("max", 0, MaxPolicy::SET_MAX, &raise)
            .unwrap();
        assert_eq!(version, 1);
        assert_eq!(max.max(), 500);
        assert!(engine.run(&target(), &payload(400)).is_ok());

        // A second administrator still holding version 0 loses the race
        match engine.set_policy_configuration("max", 0, MaxPolicy::SET_MAX, &raise) {
            Err(PermitGateError::VersionConflict { expected, current, .. }) => {
                assert_eq!(expected, 0);
                assert_eq!(current, 1);
            }
            other => panic!("unexpected: {:?}", other),
        }

        // Rejected blobs do not advance the version
        assert!(engine
            .set_policy_configuration("max", 1, Selector([0; 4]), &raise)
            .is_err());
        assert_eq!(engine.config_version("max").unwrap(), 1);

        // Unknown policy
        assert!(matches!(
            engine.set_policy_configuration("nope", 0, MaxPolicy::SET_MAX, &raise),
            Err(PermitGateError::Configuration(_))
        ));
    }

    #[test]
    fn test_changes_visible_to_next_decision() {
        let engine = PolicyEngine::new(true);
        let pause = Arc::new(PausePolicy::new("pause", false));
        engine.add_policy(target(), transfer(), pause.clone(), vec![]).unwrap();
        assert!(engine.run(&target(), &payload(1)).is_ok());

        pause.set_paused(true);
        assert!(engine.run(&target(), &payload(1)).unwrap_err().is_rejection());

        engine.remove_policy(target(), transfer(), "pause").unwrap();
        assert!(engine.run(&target(), &payload(1)).is_ok());
    }

    #[test]
    fn test_extractor_bindings() {
        let engine = PolicyEngine::new(false);
        let other = Selector::from_signature("transferFrom(address,address,uint256)");
        engine
            .set_extractors(&[transfer(), other], Arc::new(FieldExtractor::transfer_from()))
            .unwrap();
        assert!(engine.has_extractor(&transfer()).unwrap());
        assert!(engine.has_extractor(&other).unwrap());

        engine.remove_extractor(other).unwrap();
        assert!(!engine.has_extractor(&other).unwrap());
        assert!(engine.remove_extractor(other).is_err());
    }
}
