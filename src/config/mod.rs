//! Configuration management for permitgate
//!
//! Supports loading configuration from:
//! - Environment variables (PERMITGATE_*)
//! - Config file (config.toml)
//! - Built-in defaults

use crate::errors::{PermitGateError, Result};
use crate::permit::PermitDomain;
use crate::policy::DEFAULT_MAX_CHAIN_LENGTH;
use crate::types::Address;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Policy engine configuration
    pub engine: EngineConfig,

    /// Permit signing domain
    pub permits: PermitsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Policy engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of policies per (target, selector) chain
    pub max_chain_length: usize,

    /// Global fallback when a chain is empty or exhausted
    pub default_allow: bool,

    /// Path to the JSON policy manifest
    pub manifest_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chain_length: DEFAULT_MAX_CHAIN_LENGTH,
            default_allow: false,
            manifest_path: Some(PathBuf::from("./config/policies.json")),
        }
    }
}

/// Permit signing domain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermitsConfig {
    pub domain_name: String,

    pub domain_version: String,

    pub chain_id: u64,

    /// Address the permits are bound to (0x-prefixed hex)
    pub verifying_contract: String,
}

impl Default for PermitsConfig {
    fn default() -> Self {
        Self {
            domain_name: "permitgate".to_string(),
            domain_version: "1".to_string(),
            chain_id: 1,
            verifying_contract: format!("{}", Address::ZERO),
        }
    }
}

impl PermitsConfig {
    pub fn domain(&self) -> Result<PermitDomain> {
        Ok(PermitDomain {
            name: self.domain_name.clone(),
            version: self.domain_version.clone(),
            chain_id: self.chain_id,
            verifying_contract: self.verifying_contract.parse()?,
        })
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Start with defaults
        let defaults = config::Config::try_from(&Config::default())
            .map_err(|e| PermitGateError::Config(e.to_string()))?;
        builder = builder.add_source(defaults);

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        } else {
            builder = builder
                .add_source(config::File::with_name("config").required(false))
                .add_source(config::File::with_name("/etc/permitgate/config").required(false));
        }

        // Load from environment (PERMITGATE_ENGINE__DEFAULT_ALLOW, etc.)
        builder = builder.add_source(
            config::Environment::with_prefix("PERMITGATE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| PermitGateError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| PermitGateError::Config(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_chain_length == 0 {
            return Err(PermitGateError::Config(
                "engine.max_chain_length must be at least 1".to_string(),
            ));
        }

        self.permits
            .domain()
            .map_err(|e| PermitGateError::Config(format!("permits.verifying_contract: {}", e)))?;

        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(PermitGateError::Config(format!(
                "logging.format must be json or pretty, got {}",
                self.logging.format
            )));
        }

        if let Some(path) = &self.engine.manifest_path {
            if !path.exists() {
                info!("Policy manifest {:?} does not exist, starting empty", path);
            }
        }

        Ok(())
    }
}
