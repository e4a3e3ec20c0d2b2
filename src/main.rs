//! permitgate - policy engine command line
//!
//! Loads configuration and a policy manifest, then either evaluates an action
//! against the configured chains or signs a permit as the off-chain authority.
//!
//! # Usage
//!
//! ```bash
//! # Evaluate an action request
//! permitgate evaluate request.json --config /etc/permitgate/config.toml
//!
//! # Sign a permit with an issuer key
//! PERMITGATE_ISSUER_KEY=0x... permitgate sign permit.json
//! ```

use permitgate::clock::SystemClock;
use permitgate::codec::encode_call_data;
use permitgate::config::{Config, LoggingConfig};
use permitgate::crypto::IssuerKey;
use permitgate::errors::{PermitGateError, Result};
use permitgate::permit::{Permit, SignedPermit};
use permitgate::policy::{Outcome, PolicyEngine, PolicyManifest};
use permitgate::types::{Address, Payload, Selector, Value};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable holding the hex issuer key for `sign`
const ISSUER_KEY_VAR: &str = "PERMITGATE_ISSUER_KEY";

/// Action to evaluate, as read from disk
#[derive(Debug, Deserialize)]
struct ActionRequest {
    target: Address,
    selector: Selector,
    caller: Address,
    /// Call arguments, encoded as RLP call data
    #[serde(default)]
    args: Vec<Value>,
    /// Inline permit carried as payload context
    #[serde(default)]
    permit: Option<SignedPermit>,
    /// Evaluate without committing permit usage
    #[serde(default)]
    dry_run: bool,
}

impl ActionRequest {
    fn payload(&self) -> Payload {
        let payload = Payload::new(self.selector, self.caller, encode_call_data(&self.args));
        match &self.permit {
            Some(permit) => payload.with_context(permit.to_context()),
            None => payload,
        }
    }
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let config_path = flag_value(&args, "--config");
    let config = Config::load(config_path.as_deref())?;

    init_logging(&config.logging);
    config.validate()?;

    info!("Starting permitgate v{}", VERSION);

    match (args.get(1).map(String::as_str), args.get(2)) {
        (Some("evaluate"), Some(path)) => evaluate(&config, Path::new(path)),
        (Some("sign"), Some(path)) => sign(&config, Path::new(path)),
        _ => {
            eprintln!("usage: permitgate <evaluate REQUEST.json | sign PERMIT.json> [--config PATH]");
            Err(PermitGateError::Config("missing command".to_string()))
        }
    }
}

/// Initialize logging
fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // Logs go to stderr so command output stays machine readable
    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn build_engine(config: &Config) -> Result<PolicyEngine> {
    let engine = PolicyEngine::from_config(&config.engine);

    if let Some(path) = &config.engine.manifest_path {
        let manifest = PolicyManifest::load(path)?;
        let policies = manifest.apply(&engine, Arc::new(SystemClock), &config.permits.domain()?)?;
        info!("Loaded {} policies from {:?}", policies.len(), path);
    } else {
        warn!("No policy manifest configured, every chain is empty");
    }

    Ok(engine)
}

fn evaluate(config: &Config, path: &Path) -> Result<()> {
    let engine = build_engine(config)?;
    let request: ActionRequest = serde_json::from_str(&fs::read_to_string(path)?)
        .map_err(|e| PermitGateError::Config(format!("invalid request {:?}: {}", path, e)))?;

    let payload = request.payload();
    let result = if request.dry_run {
        engine.check(&request.target, &payload)
    } else {
        engine.run(&request.target, &payload)
    };

    match result {
        Ok(Outcome::Allowed { policy }) => {
            println!("allowed by {}", policy);
            Ok(())
        }
        Ok(Outcome::DefaultAllowed) => {
            println!("allowed by default");
            Ok(())
        }
        Err(e) if e.is_rejection() => {
            println!("rejected: {}", e);
            Err(e)
        }
        Err(e) => {
            error!("Evaluation failed: {}", e);
            Err(e)
        }
    }
}

fn sign(config: &Config, path: &Path) -> Result<()> {
    let permit: Permit = serde_json::from_str(&fs::read_to_string(path)?)
        .map_err(|e| PermitGateError::Config(format!("invalid permit {:?}: {}", path, e)))?;

    let key_hex = Zeroizing::new(env::var(ISSUER_KEY_VAR).map_err(|_| {
        PermitGateError::Config(format!("{} environment variable not set", ISSUER_KEY_VAR))
    })?);
    let key = IssuerKey::from_hex(&key_hex)?;

    let domain = config.permits.domain()?;
    let signed = permit.sign(&key, &domain)?;
    info!(
        "Signed permit {} as issuer {}",
        signed.permit.permit_id,
        key.address()
    );

    println!("{}", serde_json::to_string_pretty(&signed)?);
    Ok(())
}
