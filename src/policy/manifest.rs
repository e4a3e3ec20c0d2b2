//! Policy manifest
//!
//! JSON description of an engine's targets, chains, extractor schemas and the
//! leaf policies bound into them. Loaded at startup and applied to a fresh
//! [`PolicyEngine`].

use crate::clock::Clock;
use crate::errors::{PermitGateError, Result};
use crate::extract::FieldExtractor;
use crate::permit::{CertifiedActionPolicy, PermitDomain, RelayPermitPolicy, TransferCapPolicy};
use crate::policy::rules::{
    AllowListPolicy, IntervalPolicy, IntervalWindow, MaxPolicy, PausePolicy, RejectListPolicy,
    SenderAllowlistPolicy,
};
use crate::policy::{Policy, PolicyEngine};
use crate::types::{Address, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Amounts travel as decimal strings so the full u128 range survives JSON
mod amount {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        struct AmountVisitor;

        impl<'de> Visitor<'de> for AmountVisitor {
            type Value = u128;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an unsigned integer or a decimal string")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<u128, E> {
                Ok(value as u128)
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<u128, E> {
                value.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

/// A leaf or permit policy, by type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleSpec {
    Max {
        #[serde(with = "amount")]
        max: u128,
    },
    Pause {
        #[serde(default)]
        paused: bool,
    },
    AllowList {
        #[serde(default)]
        addresses: Vec<Address>,
    },
    RejectList {
        #[serde(default)]
        addresses: Vec<Address>,
    },
    Interval {
        slot_duration: u64,
        cycle_slots: u64,
        start: u64,
        end: u64,
    },
    SenderAllowlist {
        #[serde(default)]
        senders: Vec<Address>,
    },
    CertifiedAction {
        owner: Address,
        #[serde(default)]
        issuers: Vec<Address>,
    },
    TransferCap {
        owner: Address,
        #[serde(default)]
        issuers: Vec<Address>,
    },
    Relay {
        owner: Address,
        relay: Address,
        #[serde(default)]
        issuers: Vec<Address>,
    },
}

impl RuleSpec {
    /// Human-readable description
    pub fn description(&self) -> String {
        match self {
            RuleSpec::Max { max } => format!("Max amount {}", max),
            RuleSpec::Pause { paused } => format!("Pause switch (paused: {})", paused),
            RuleSpec::AllowList { addresses } => format!("Allow only {} addresses", addresses.len()),
            RuleSpec::RejectList { addresses } => format!("Reject {} addresses", addresses.len()),
            RuleSpec::Interval {
                slot_duration,
                cycle_slots,
                start,
                end,
            } => format!(
                "Slots [{}, {}) of {} x {}s",
                start, end, cycle_slots, slot_duration
            ),
            RuleSpec::SenderAllowlist { senders } => format!("Bypass for {} senders", senders.len()),
            RuleSpec::CertifiedAction { issuers, .. } => {
                format!("Signed permits from {} issuers", issuers.len())
            }
            RuleSpec::TransferCap { issuers, .. } => {
                format!("Capped transfer permits from {} issuers", issuers.len())
            }
            RuleSpec::Relay { relay, .. } => format!("Permits relayed by {}", relay),
        }
    }

    /// Build the policy this rule describes.
    ///
    /// Permit rules come back type-erased, so the permits they accept can only
    /// arrive inline in the payload context. Construct the validator directly to
    /// present permits ahead of time.
    pub fn build(&self, id: &str, clock: Arc<dyn Clock>, domain: &PermitDomain) -> Result<Arc<dyn Policy>> {
        let policy: Arc<dyn Policy> = match self {
            RuleSpec::Max { max } => Arc::new(MaxPolicy::new(id, *max)),
            RuleSpec::Pause { paused } => Arc::new(PausePolicy::new(id, *paused)),
            RuleSpec::AllowList { addresses } => {
                Arc::new(AllowListPolicy::with_addresses(id, addresses.iter().copied()))
            }
            RuleSpec::RejectList { addresses } => {
                Arc::new(RejectListPolicy::with_addresses(id, addresses.iter().copied()))
            }
            RuleSpec::Interval {
                slot_duration,
                cycle_slots,
                start,
                end,
            } => Arc::new(IntervalPolicy::new(
                id,
                clock,
                IntervalWindow {
                    slot_duration: *slot_duration,
                    cycle_slots: *cycle_slots,
                    start: *start,
                    end: *end,
                },
            )?),
            RuleSpec::SenderAllowlist { senders } => {
                Arc::new(SenderAllowlistPolicy::with_senders(id, senders.iter().copied()))
            }
            RuleSpec::CertifiedAction { owner, issuers } => {
                let policy = CertifiedActionPolicy::certified_action(id, *owner, domain.clone(), clock);
                for issuer in issuers {
                    policy.allow_issuer(*owner, *issuer)?;
                }
                Arc::new(policy)
            }
            RuleSpec::TransferCap { owner, issuers } => {
                let policy = TransferCapPolicy::transfer_cap(id, *owner, domain.clone(), clock);
                for issuer in issuers {
                    policy.allow_issuer(*owner, *issuer)?;
                }
                Arc::new(policy)
            }
            RuleSpec::Relay {
                owner,
                relay,
                issuers,
            } => {
                let policy = RelayPermitPolicy::relayed(id, *owner, *relay, domain.clone(), clock);
                for issuer in issuers {
                    policy.allow_issuer(*owner, *issuer)?;
                }
                Arc::new(policy)
            }
        };
        Ok(policy)
    }
}

/// A named policy instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub id: String,
    pub rule: RuleSpec,
}

/// One policy binding in a chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingManifest {
    /// Id of a policy from [`PolicyManifest::policies`]
    pub policy: String,
    /// Parameter names the policy expects, in order
    #[serde(default)]
    pub params: Vec<String>,
}

/// Policy chain of one action shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainManifest {
    pub selector: Selector,
    #[serde(default)]
    pub policies: Vec<BindingManifest>,
}

/// One protected target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetManifest {
    pub address: Address,
    #[serde(default)]
    pub default_allow: Option<bool>,
    #[serde(default)]
    pub chains: Vec<ChainManifest>,
}

/// Policy manifest file format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyManifest {
    /// Version
    pub version: u32,
    /// Global default-allow; the engine configuration applies when absent
    #[serde(default)]
    pub default_allow: Option<bool>,
    /// Extractor schema per selector
    #[serde(default)]
    pub extractors: BTreeMap<Selector, FieldExtractor>,
    #[serde(default)]
    pub policies: Vec<PolicyEntry>,
    #[serde(default)]
    pub targets: Vec<TargetManifest>,
}

impl Default for PolicyManifest {
    fn default() -> Self {
        Self {
            version: 1,
            default_allow: None,
            extractors: BTreeMap::new(),
            policies: vec![],
            targets: vec![],
        }
    }
}

impl PolicyManifest {
    /// Load from file; a missing file is an empty manifest
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| PermitGateError::Config(e.to_string()))
    }

    /// Save to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Build every policy and wire targets, extractors and chains into `engine`.
    ///
    /// Returns the built policies by id.
    pub fn apply(
        &self,
        engine: &PolicyEngine,
        clock: Arc<dyn Clock>,
        domain: &PermitDomain,
    ) -> Result<HashMap<String, Arc<dyn Policy>>> {
        let mut built: HashMap<String, Arc<dyn Policy>> = HashMap::new();
        for entry in &self.policies {
            if built.contains_key(&entry.id) {
                return Err(PermitGateError::Configuration(format!(
                    "policy {} is declared twice",
                    entry.id
                )));
            }
            let policy = entry.rule.build(&entry.id, clock.clone(), domain)?;
            built.insert(entry.id.clone(), policy);
        }

        if let Some(allow) = self.default_allow {
            engine.set_default_allow(allow)?;
        }
        for (selector, schema) in &self.extractors {
            engine.set_extractor(*selector, Arc::new(schema.clone()))?;
        }

        for target in &self.targets {
            engine.attach(target.address)?;
            if let Some(allow) = target.default_allow {
                engine.set_target_default_allow(target.address, allow)?;
            }
            for chain in &target.chains {
                for binding in &chain.policies {
                    let policy = built.get(&binding.policy).ok_or_else(|| {
                        PermitGateError::Configuration(format!(
                            "chain {} {} references unknown policy {}",
                            target.address, chain.selector, binding.policy
                        ))
                    })?;
                    engine.add_policy(
                        target.address,
                        chain.selector,
                        policy.clone(),
                        binding.params.clone(),
                    )?;
                }
            }
        }

        info!(
            "Applied manifest: {} policies, {} targets, {} extractors",
            built.len(),
            self.targets.len(),
            self.extractors.len()
        );
        Ok(built)
    }
}
