//! Source options.
//!
//! The engine hands over a flat string map. [`SourceOptions::from_map`] picks
//! out the keys Tidemark understands and fails eagerly, naming the option, when
//! a mandatory one is missing or a value cannot be parsed.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tidemark_coord::{CoordEndpoint, CoordPaths, CoordResult, SESSION_TIMEOUT_DEFAULT};
use tidemark_core::ShardId;
use tidemark_source::SourceIdentity;

use crate::error::ConfigError;

/// Option keys.
pub mod keys {
    /// Coordination-store connect string.
    pub const COORD_CONNECT: &str = "coord.connect";
    /// Session timeout in milliseconds.
    pub const COORD_SESSION_TIMEOUT_MS: &str = "coord.session.timeout.ms";
    /// Connection timeout in milliseconds.
    pub const COORD_CONNECTION_TIMEOUT_MS: &str = "coord.connection.timeout.ms";
    /// Checkpoint root path.
    pub const CHECKPOINT_ROOT: &str = "checkpoint.root";
    /// Project name.
    pub const PROJECT: &str = "source.project";
    /// Logstore name.
    pub const LOGSTORE: &str = "source.logstore";
    /// Log-service endpoint.
    pub const SOURCE_ENDPOINT: &str = "source.endpoint";
    /// Credential id.
    pub const ACCESS_KEY_ID: &str = "source.access.key.id";
    /// Credential secret.
    pub const ACCESS_KEY_SECRET: &str = "source.access.key.secret";
    /// Per-batch record cap.
    pub const MAX_OFFSETS_PER_TRIGGER: &str = "maxOffsetsPerTrigger";
    /// Starting-position policy.
    pub const STARTING_OFFSETS: &str = "startingOffsets";
    /// Enables the dynamic-config watcher.
    pub const DYNAMIC_CONFIG_ENABLE: &str = "dynamicConfig.enable";
    /// Path of the dynamic-config document.
    pub const DYNAMIC_CONFIG_PATH: &str = "dynamicConfig.path";
}

/// Default location of the dynamic-config document.
pub const DYNAMIC_CONFIG_PATH_DEFAULT: &str = "/tidemark/dynamic_config";

// -----------------------------------------------------------------------------
// Starting Position
// -----------------------------------------------------------------------------

/// Where a brand-new checkpoint starts reading.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StartingPosition {
    /// The oldest retained record of every shard.
    Earliest,
    /// Only records arriving after the first plan.
    #[default]
    Latest,
    /// Per-shard temporal bounds (epoch seconds). Unlisted shards start at earliest.
    Explicit(BTreeMap<ShardId, u64>),
}

impl StartingPosition {
    /// Parses `earliest`, `latest` or a JSON object such as `{"0": 1700000000}`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOption` for anything else.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("earliest") {
            return Ok(Self::Earliest);
        }
        if trimmed.eq_ignore_ascii_case("latest") {
            return Ok(Self::Latest);
        }

        let invalid = |reason: String| ConfigError::InvalidOption {
            name: keys::STARTING_OFFSETS,
            value: value.to_string(),
            reason,
        };

        let raw: BTreeMap<String, u64> = serde_json::from_str(trimmed).map_err(|e| {
            invalid(format!(
                "expected 'earliest', 'latest' or {{\"<shard>\": <epoch secs>}}: {e}"
            ))
        })?;
        let mut bounds = BTreeMap::new();
        for (shard, bound) in raw {
            let id: u64 = shard
                .parse()
                .map_err(|_| invalid(format!("shard id {shard:?} is not an integer")))?;
            bounds.insert(ShardId::new(id), bound);
        }
        Ok(Self::Explicit(bounds))
    }
}

// -----------------------------------------------------------------------------
// Source Options
// -----------------------------------------------------------------------------

/// Validated options for one streaming source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOptions {
    /// Coordination-store connection identity.
    pub coord: CoordEndpoint,
    /// Checkpoint root in the coordination store.
    pub checkpoint_root: String,
    /// Project name.
    pub project: String,
    /// Logstore name.
    pub logstore: String,
    /// Log-source client identity.
    pub source: SourceIdentity,
    /// Per-batch record cap. `None` means uncapped.
    pub max_offsets_per_trigger: Option<u64>,
    /// Starting-position policy for a fresh checkpoint.
    pub starting_position: StartingPosition,
    /// Whether to watch the dynamic-config document.
    pub dynamic_config_enabled: bool,
    /// Path of the dynamic-config document.
    pub dynamic_config_path: String,
}

impl SourceOptions {
    /// Creates options with defaults for everything optional.
    #[must_use]
    pub fn new(
        coord_connect: impl Into<String>,
        checkpoint_root: impl Into<String>,
        project: impl Into<String>,
        logstore: impl Into<String>,
        source: SourceIdentity,
    ) -> Self {
        Self {
            coord: CoordEndpoint::new(coord_connect, SESSION_TIMEOUT_DEFAULT, None),
            checkpoint_root: checkpoint_root.into(),
            project: project.into(),
            logstore: logstore.into(),
            source,
            max_offsets_per_trigger: None,
            starting_position: StartingPosition::default(),
            dynamic_config_enabled: false,
            dynamic_config_path: DYNAMIC_CONFIG_PATH_DEFAULT.to_string(),
        }
    }

    /// Builds options from the engine's string map.
    ///
    /// # Errors
    ///
    /// Returns `MissingOption` naming the first absent mandatory key, or
    /// `InvalidOption` for a value that cannot be parsed.
    pub fn from_map(options: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| -> Result<String, ConfigError> {
            options
                .get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(ConfigError::MissingOption { name })
        };
        let optional = |name: &'static str| options.get(name).map(|v| v.trim());

        let source = SourceIdentity::new(
            required(keys::SOURCE_ENDPOINT)?,
            required(keys::ACCESS_KEY_ID)?,
            required(keys::ACCESS_KEY_SECRET)?,
        );
        let mut opts = Self::new(
            required(keys::COORD_CONNECT)?,
            required(keys::CHECKPOINT_ROOT)?,
            required(keys::PROJECT)?,
            required(keys::LOGSTORE)?,
            source,
        );

        let session_timeout = optional(keys::COORD_SESSION_TIMEOUT_MS)
            .map(|v| parse_millis(keys::COORD_SESSION_TIMEOUT_MS, v))
            .transpose()?
            .unwrap_or(SESSION_TIMEOUT_DEFAULT);
        let connection_timeout = optional(keys::COORD_CONNECTION_TIMEOUT_MS)
            .map(|v| parse_millis(keys::COORD_CONNECTION_TIMEOUT_MS, v))
            .transpose()?;
        opts = opts.with_timeouts(session_timeout, connection_timeout);

        if let Some(v) = optional(keys::MAX_OFFSETS_PER_TRIGGER) {
            opts = opts.with_max_offsets_per_trigger(parse_cap(v)?);
        }
        if let Some(v) = optional(keys::STARTING_OFFSETS) {
            opts = opts.with_starting_position(StartingPosition::parse(v)?);
        }
        if let Some(v) = optional(keys::DYNAMIC_CONFIG_ENABLE) {
            let enabled = v.parse::<bool>().map_err(|_| ConfigError::InvalidOption {
                name: keys::DYNAMIC_CONFIG_ENABLE,
                value: v.to_string(),
                reason: "expected 'true' or 'false'".to_string(),
            })?;
            opts.dynamic_config_enabled = enabled;
        }
        if let Some(v) = optional(keys::DYNAMIC_CONFIG_PATH) {
            opts = opts.with_dynamic_config_path(v);
        }

        opts.validate()?;
        Ok(opts)
    }

    /// Sets the session and connection timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, session: Duration, connection: Option<Duration>) -> Self {
        self.coord = CoordEndpoint::new(self.coord.connect, session, connection);
        self
    }

    /// Sets the per-batch record cap.
    #[must_use]
    pub const fn with_max_offsets_per_trigger(mut self, cap: u64) -> Self {
        self.max_offsets_per_trigger = Some(cap);
        self
    }

    /// Sets the starting-position policy.
    #[must_use]
    pub fn with_starting_position(mut self, position: StartingPosition) -> Self {
        self.starting_position = position;
        self
    }

    /// Sets the path of the dynamic-config document.
    #[must_use]
    pub fn with_dynamic_config_path(mut self, path: impl Into<String>) -> Self {
        self.dynamic_config_path = path.into();
        self
    }

    /// Enables or disables the dynamic-config watcher.
    #[must_use]
    pub const fn with_dynamic_config(mut self, enabled: bool) -> Self {
        self.dynamic_config_enabled = enabled;
        self
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOption` for a zero cap, a zero timeout or a relative
    /// dynamic-config path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_offsets_per_trigger == Some(0) {
            return Err(ConfigError::InvalidOption {
                name: keys::MAX_OFFSETS_PER_TRIGGER,
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.coord.session_timeout.is_zero() {
            return Err(ConfigError::InvalidOption {
                name: keys::COORD_SESSION_TIMEOUT_MS,
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.coord.connection_timeout.is_zero() {
            return Err(ConfigError::InvalidOption {
                name: keys::COORD_CONNECTION_TIMEOUT_MS,
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if !self.dynamic_config_path.starts_with('/') {
            return Err(ConfigError::InvalidOption {
                name: keys::DYNAMIC_CONFIG_PATH,
                value: self.dynamic_config_path.clone(),
                reason: "must be an absolute path".to_string(),
            });
        }
        Ok(())
    }

    /// Returns the coordination-store layout for this source.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPathComponent` if the project or logstore name cannot
    /// be embedded in a path.
    pub fn paths(&self) -> CoordResult<CoordPaths> {
        CoordPaths::new(&self.checkpoint_root, &self.project, &self.logstore)
    }
}

fn parse_millis(name: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ConfigError::InvalidOption {
            name,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn parse_cap(value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|e| ConfigError::InvalidOption {
        name: keys::MAX_OFFSETS_PER_TRIGGER,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
