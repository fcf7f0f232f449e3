// work-order-config/src/config.rs
// ============================================================================
// Module: Work Order Configuration
// Description: Configuration loading and validation for the control plane.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: serde, thiserror, toml, work-order-core
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size limits and
//! unknown keys rejected. Missing or invalid configuration fails closed:
//! every cross-field rule (heartbeat below TTL, non-zero limits, known
//! states in transition overrides) is checked before an engine config is
//! produced.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use work_order_core::EngineConfig;
use work_order_core::ItemState;
use work_order_core::LeaseSettings;
use work_order_core::MaintenanceSettings;
use work_order_core::OperationTag;
use work_order_core::OrderState;
use work_order_core::PartialsSettings;
use work_order_core::TransitionTable;
use work_order_core::core::filter::DEFAULT_META_PATH_DEPTH;
use work_order_core::runtime::default_enforce_on;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
pub const DEFAULT_CONFIG_NAME: &str = "work-order.toml";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Default lease TTL in seconds.
const DEFAULT_LEASE_TTL_SECONDS: u64 = 600;
/// Default heartbeat cadence in seconds.
const DEFAULT_HEARTBEAT_SECONDS: u64 = 120;
/// Default retry budget.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default idempotency header.
const DEFAULT_IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";
/// Default part count limit per item.
const DEFAULT_MAX_PARTS_PER_ITEM: u32 = 100;
/// Default part payload size limit in bytes.
const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1_048_576;
/// Default dead-letter threshold in hours.
const DEFAULT_DEAD_LETTER_AFTER_HOURS: u64 = 48;
/// Default staleness threshold in hours.
const DEFAULT_STALE_ORDER_THRESHOLD_HOURS: u64 = 24;
/// Default tenant path inside order payloads.
const DEFAULT_TENANT_PAYLOAD_PATH: &str = "tenant_id";
/// Default store path.
const DEFAULT_STORE_PATH: &str = "work-order.db";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("config io error: {0}")]
    Io(String),
    /// Config file exceeds the size limit.
    #[error("config file too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual file size.
        actual_bytes: usize,
    },
    /// Config file failed to parse.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Config value failed validation.
    #[error("config invalid: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: File Shape
// ============================================================================

/// Lease section.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LeaseSection {
    /// Maximum unheartbeated lease lifetime in seconds.
    ttl_seconds: Option<u64>,
    /// Advisory heartbeat cadence in seconds.
    heartbeat_every_seconds: Option<u64>,
    /// Lease backend selection.
    backend: Option<LeaseBackendKind>,
    /// Per-agent active-lease cap.
    max_per_agent: Option<u32>,
    /// Per-type active-lease cap.
    max_per_type: Option<u32>,
    /// Dotted payload path matched by the dispatch tenant filter.
    tenant_payload_path: Option<String>,
}

/// Lease backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LeaseBackendKind {
    /// Row-lock backend over the work-order store.
    #[default]
    Database,
    /// Conditional set-with-expiry key-value backend.
    Keyvalue,
}

/// Retry section.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RetrySection {
    /// Default retry budget for planned items.
    default_max_attempts: Option<u32>,
}

/// Idempotency section.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct IdempotencySection {
    /// Idempotency header name surfaced to HTTP adapters.
    header_name: Option<String>,
    /// Operation tags the guard is enforced on.
    enforce_on: Option<Vec<OperationTag>>,
}

/// Partials section.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialsSection {
    /// Whether partial submissions are accepted.
    enabled: Option<bool>,
    /// Maximum part rows per item.
    max_parts_per_item: Option<u32>,
    /// Maximum serialized part payload size in bytes.
    max_payload_bytes: Option<usize>,
}

/// State machine section: optional adjacency overrides.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StateMachineSection {
    /// Order adjacency override: state to allowed destination states.
    order_transitions: Option<BTreeMap<OrderState, Vec<OrderState>>>,
    /// Item adjacency override: state to allowed destination states.
    item_transitions: Option<BTreeMap<ItemState, Vec<ItemState>>>,
}

/// Maintenance section.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MaintenanceSection {
    /// Hours a failed order or item may idle before dead-lettering.
    dead_letter_after_hours: Option<u64>,
    /// Hours an unfinished order may idle before being surfaced as stale.
    stale_order_threshold_hours: Option<u64>,
}

/// Store section.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StoreSection {
    /// Path to the SQLite database file.
    path: Option<PathBuf>,
}

/// Filters section.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FiltersSection {
    /// Maximum depth of dotted `meta` filter paths.
    meta_path_depth: Option<usize>,
}

/// Raw configuration file shape.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    /// Lease section.
    #[serde(default)]
    lease: LeaseSection,
    /// Retry section.
    #[serde(default)]
    retry: RetrySection,
    /// Idempotency section.
    #[serde(default)]
    idempotency: IdempotencySection,
    /// Partials section.
    #[serde(default)]
    partials: PartialsSection,
    /// State machine section.
    #[serde(default)]
    state_machine: StateMachineSection,
    /// Maintenance section.
    #[serde(default)]
    maintenance: MaintenanceSection,
    /// Store section.
    #[serde(default)]
    store: StoreSection,
    /// Filters section.
    #[serde(default)]
    filters: FiltersSection,
}

// ============================================================================
// SECTION: Resolved Configuration
// ============================================================================

/// Fully validated configuration for a work-order deployment.
#[derive(Debug, Clone)]
pub struct WorkOrderConfig {
    /// Engine configuration consumed at construction.
    pub engine: EngineConfig,
    /// Selected lease backend.
    pub lease_backend: LeaseBackendKind,
    /// Path to the SQLite database file.
    pub store_path: PathBuf,
}

impl Default for WorkOrderConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            lease_backend: LeaseBackendKind::Database,
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
        }
    }
}

impl WorkOrderConfig {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read, exceeds the
    /// size limit, fails to parse, or fails validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let metadata = fs::metadata(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        let actual_bytes = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if actual_bytes > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::TooLarge {
                max_bytes: MAX_CONFIG_FILE_SIZE,
                actual_bytes,
            });
        }
        let text = fs::read_to_string(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        Self::from_toml(&text)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            toml::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))?;
        Self::resolve(file)
    }

    /// Resolves a parsed file into a validated configuration.
    fn resolve(file: ConfigFile) -> Result<Self, ConfigError> {
        let ttl_seconds = file.lease.ttl_seconds.unwrap_or(DEFAULT_LEASE_TTL_SECONDS);
        let heartbeat = file
            .lease
            .heartbeat_every_seconds
            .unwrap_or(DEFAULT_HEARTBEAT_SECONDS);
        if ttl_seconds == 0 {
            return Err(ConfigError::Invalid("lease.ttl_seconds must be non-zero".to_string()));
        }
        if heartbeat == 0 || heartbeat >= ttl_seconds {
            return Err(ConfigError::Invalid(
                "lease.heartbeat_every_seconds must be non-zero and below lease.ttl_seconds"
                    .to_string(),
            ));
        }
        if file.lease.max_per_agent == Some(0) || file.lease.max_per_type == Some(0) {
            return Err(ConfigError::Invalid(
                "lease caps must be non-zero; omit a cap to disable it".to_string(),
            ));
        }

        let partials = PartialsSettings {
            enabled: file.partials.enabled.unwrap_or(true),
            max_parts_per_item: file
                .partials
                .max_parts_per_item
                .unwrap_or(DEFAULT_MAX_PARTS_PER_ITEM),
            max_payload_bytes: file
                .partials
                .max_payload_bytes
                .unwrap_or(DEFAULT_MAX_PAYLOAD_BYTES),
        };
        if partials.max_parts_per_item == 0 || partials.max_payload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "partials limits must be non-zero".to_string(),
            ));
        }

        let default_max_attempts = file
            .retry
            .default_max_attempts
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if default_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.default_max_attempts must be non-zero".to_string(),
            ));
        }

        let order_transitions = file.state_machine.order_transitions.map_or_else(
            work_order_core::default_order_transitions,
            |overrides| build_table(&overrides),
        );
        let item_transitions = file.state_machine.item_transitions.map_or_else(
            work_order_core::default_item_transitions,
            |overrides| build_table(&overrides),
        );

        let maintenance = MaintenanceSettings {
            dead_letter_after_hours: file
                .maintenance
                .dead_letter_after_hours
                .unwrap_or(DEFAULT_DEAD_LETTER_AFTER_HOURS),
            stale_order_threshold_hours: file
                .maintenance
                .stale_order_threshold_hours
                .unwrap_or(DEFAULT_STALE_ORDER_THRESHOLD_HOURS),
        };
        if maintenance.dead_letter_after_hours == 0 || maintenance.stale_order_threshold_hours == 0
        {
            return Err(ConfigError::Invalid(
                "maintenance thresholds must be non-zero".to_string(),
            ));
        }

        let meta_path_depth = file.filters.meta_path_depth.unwrap_or(DEFAULT_META_PATH_DEPTH);
        if meta_path_depth == 0 {
            return Err(ConfigError::Invalid(
                "filters.meta_path_depth must be non-zero".to_string(),
            ));
        }

        let enforce_on: BTreeSet<OperationTag> = file
            .idempotency
            .enforce_on
            .map_or_else(default_enforce_on, |tags| tags.into_iter().collect());

        let engine = EngineConfig {
            lease: LeaseSettings {
                ttl_seconds,
                heartbeat_every_seconds: heartbeat,
                max_per_agent: file.lease.max_per_agent,
                max_per_type: file.lease.max_per_type,
                tenant_payload_path: file
                    .lease
                    .tenant_payload_path
                    .unwrap_or_else(|| DEFAULT_TENANT_PAYLOAD_PATH.to_string()),
            },
            default_max_attempts,
            idempotency_header_name: file
                .idempotency
                .header_name
                .unwrap_or_else(|| DEFAULT_IDEMPOTENCY_HEADER.to_string()),
            idempotency_enforce_on: enforce_on,
            partials,
            order_transitions,
            item_transitions,
            maintenance,
            meta_path_depth,
        };

        Ok(Self {
            engine,
            lease_backend: file.lease.backend.unwrap_or_default(),
            store_path: file
                .store
                .path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH)),
        })
    }
}

/// Builds a transition table from an override map.
fn build_table<S: Ord + Copy>(overrides: &BTreeMap<S, Vec<S>>) -> TransitionTable<S> {
    let edges: Vec<(S, S)> = overrides
        .iter()
        .flat_map(|(from, tos)| tos.iter().map(move |to| (*from, *to)))
        .collect();
    TransitionTable::from_edges(&edges)
}
