//! Configuration loading, validation, and environment overrides for the DTN
//! RPC coordination engine.
//!
//! This crate provides [`RpcConfig`] — the top-level runtime settings read
//! from `rpc.conf` (§6.6) — together with helpers for loading from a TOML
//! file, applying `DTNRPC_<KEY>` environment overrides, and producing
//! advisory [`ConfigWarning`]s.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use dtrpc_core::{CapabilityRecord, Sid, SidParseError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A deprecated key was present in the configuration file.
    DeprecatedField {
        /// Name of the deprecated key.
        field: String,
        /// Suggested replacement, if any.
        suggestion: Option<String>,
    },
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
    /// An unrecognized key was present and is ignored.
    UnknownField {
        /// Name of the unrecognized key.
        field: String,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::DeprecatedField { field, suggestion } => {
                write!(f, "deprecated field '{field}'")?;
                if let Some(s) = suggestion {
                    write!(f, " — use '{s}' instead")?;
                }
                Ok(())
            }
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
            ConfigWarning::UnknownField { field } => {
                write!(f, "unrecognized field '{field}', ignored")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Server-selection policy, mirrored from `dtrpc_selector::SelectorPolicy`
/// so this crate does not have to depend on the selector crate just for a
/// schema-friendly config enum. Converted at the call site that builds a
/// `Selector`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    /// Positional first after the deterministic `best` sort.
    First,
    /// Uniform random choice.
    Random,
    /// Deterministic sort by distance/cpu_load/memory/disk_space.
    Best,
    /// `best`'s sort, indexed by a Gamma-distributed draw.
    Probabilistic,
}

impl Default for SelectorKind {
    fn default() -> Self {
        SelectorKind::Best
    }
}

/// Top-level runtime configuration for one DTN RPC node (§6.6).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct RpcConfig {
    /// Store backend host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Store backend port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Basic auth user for the store backend.
    #[serde(default = "default_user")]
    pub user: String,

    /// Basic auth password for the store backend.
    #[serde(default = "default_passwd")]
    pub passwd: String,

    /// This node's SID. `None` means auto-detect from the store's identity
    /// endpoint at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_sid: Option<String>,

    /// Directory holding offered executables.
    #[serde(default = "default_bins")]
    pub bins: PathBuf,

    /// Path to the `rpcs.toml` procedure/capability declarations.
    #[serde(default = "default_rpcs")]
    pub rpcs: PathBuf,

    /// Server selection policy.
    #[serde(default)]
    pub selector: SelectorKind,

    /// Seed for the selector's PRNG (`random`/`probabilistic`).
    #[serde(default)]
    pub selector_seed: u64,

    /// Dispatch inbound CALLs sequentially instead of in parallel.
    #[serde(default)]
    pub queue: bool,

    /// Static capability baseline resampled before each OFFER publication
    /// (§4.2 "Capability liveness"). `rpcs.toml` says what this node can
    /// run; this says how loaded it currently is.
    #[serde(default)]
    pub capabilities: CapabilityRecord,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    4110
}

fn default_user() -> String {
    "pyserval".to_string()
}

fn default_passwd() -> String {
    "pyserval".to_string()
}

fn default_bins() -> PathBuf {
    PathBuf::from("./bin")
}

fn default_rpcs() -> PathBuf {
    PathBuf::from("./rpcs.toml")
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            passwd: default_passwd(),
            local_sid: None,
            bins: default_bins(),
            rpcs: default_rpcs(),
            selector: SelectorKind::default(),
            selector_seed: 0,
            queue: false,
            capabilities: CapabilityRecord::new(),
        }
    }
}

impl RpcConfig {
    /// Parse and validate `self.local_sid`, if present.
    pub fn parsed_local_sid(&self) -> Result<Option<Sid>, SidParseError> {
        self.local_sid.as_deref().map(Sid::parse).transpose()
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load an [`RpcConfig`] from an optional TOML file path, applying
/// environment overrides afterward.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, starts from [`RpcConfig::default()`].
pub fn load_config(path: Option<&Path>) -> Result<RpcConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => RpcConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into an [`RpcConfig`].
pub fn parse_toml(content: &str) -> Result<RpcConfig, ConfigError> {
    toml::from_str::<RpcConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply `DTNRPC_<KEY>` environment variable overrides in place.
///
/// Recognised variables: `DTNRPC_HOST`, `DTNRPC_PORT`, `DTNRPC_USER`,
/// `DTNRPC_PASSWD`, `DTNRPC_LOCAL_SID`, `DTNRPC_BINS`, `DTNRPC_RPCS`,
/// `DTNRPC_SELECTOR`, `DTNRPC_SELECTOR_SEED`, `DTNRPC_QUEUE`. Malformed
/// numeric/enum overrides are ignored rather than treated as fatal, since
/// the file (or default) value already parsed successfully.
pub fn apply_env_overrides(config: &mut RpcConfig) {
    if let Ok(val) = std::env::var("DTNRPC_HOST") {
        config.host = val;
    }
    if let Ok(val) = std::env::var("DTNRPC_PORT")
        && let Ok(port) = val.parse()
    {
        config.port = port;
    }
    if let Ok(val) = std::env::var("DTNRPC_USER") {
        config.user = val;
    }
    if let Ok(val) = std::env::var("DTNRPC_PASSWD") {
        config.passwd = val;
    }
    if let Ok(val) = std::env::var("DTNRPC_LOCAL_SID") {
        config.local_sid = Some(val);
    }
    if let Ok(val) = std::env::var("DTNRPC_BINS") {
        config.bins = PathBuf::from(val);
    }
    if let Ok(val) = std::env::var("DTNRPC_RPCS") {
        config.rpcs = PathBuf::from(val);
    }
    if let Ok(val) = std::env::var("DTNRPC_SELECTOR") {
        match val.to_ascii_lowercase().as_str() {
            "first" => config.selector = SelectorKind::First,
            "random" => config.selector = SelectorKind::Random,
            "best" => config.selector = SelectorKind::Best,
            "probabilistic" => config.selector = SelectorKind::Probabilistic,
            _ => {}
        }
    }
    if let Ok(val) = std::env::var("DTNRPC_SELECTOR_SEED")
        && let Ok(seed) = val.parse()
    {
        config.selector_seed = seed;
    }
    if let Ok(val) = std::env::var("DTNRPC_QUEUE") {
        config.queue = matches!(val.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (malformed `local_sid`, nonexistent `bins`/`rpcs` paths) come
/// back as [`ConfigError::ValidationError`]; soft issues come back as
/// warnings.
pub fn validate_config(config: &RpcConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if let Err(e) = config.parsed_local_sid() {
        errors.push(format!("invalid local_sid: {e}"));
    }

    if !config.bins.exists() {
        errors.push(format!(
            "bins directory does not exist: {}",
            config.bins.display()
        ));
    }
    if !config.rpcs.exists() {
        errors.push(format!(
            "rpcs declaration file does not exist: {}",
            config.rpcs.display()
        ));
    }

    if config.local_sid.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "local_sid".into(),
            hint: "identity will be auto-detected from the store at startup".into(),
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}
