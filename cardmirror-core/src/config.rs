//! Reconciliation session configuration.
//!
//! Only `collection_id` is required; every other field has a documented
//! default. Configs are deserialized from TOML and must pass `validate()`
//! before a session starts.

use crate::{CollectionId, ConfigError, MirrorResult};
use serde::Deserialize;
use std::path::Path;

/// Member reference scheme used by group objects.
pub const DEFAULT_MEMBER_REFERENCE_SCHEME: &str = "urn:uuid";

/// Labels longer than this (in chars) are truncated.
pub const DEFAULT_MAX_LABEL_LEN: usize = 255;

fn default_member_reference_scheme() -> String {
    DEFAULT_MEMBER_REFERENCE_SCHEME.to_string()
}

fn default_max_label_len() -> usize {
    DEFAULT_MAX_LABEL_LEN
}

fn default_true() -> bool {
    true
}

/// Settings for one collection's reconciliation sessions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Collection whose rows this session owns.
    pub collection_id: CollectionId,

    /// Two-part scheme prefix of member references (`urn:uuid`).
    #[serde(default = "default_member_reference_scheme")]
    pub member_reference_scheme: String,

    /// Delete confirmed-empty implicit groups at finalize. When false the
    /// candidates are only reported.
    #[serde(default = "default_true")]
    pub prune_empty_implicit_groups: bool,

    #[serde(default = "default_max_label_len")]
    pub max_label_len: usize,

    /// Warn when a delete notification arrives after a change.
    #[serde(default = "default_true")]
    pub warn_on_out_of_order_delete: bool,
}

impl SyncConfig {
    /// Config with defaults for the given collection.
    pub fn for_collection(collection_id: CollectionId) -> Self {
        Self {
            collection_id,
            member_reference_scheme: default_member_reference_scheme(),
            prune_empty_implicit_groups: true,
            max_label_len: DEFAULT_MAX_LABEL_LEN,
            warn_on_out_of_order_delete: true,
        }
    }

    pub fn from_toml_str(contents: &str) -> MirrorResult<Self> {
        let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        if !table.contains_key("collection_id") {
            return Err(ConfigError::MissingRequired {
                field: "collection_id".to_string(),
            }
            .into());
        }
        let config: SyncConfig = toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> MirrorResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - member_reference_scheme is two non-empty parts joined by `:`,
    ///   without whitespace
    /// - max_label_len > 0
    pub fn validate(&self) -> MirrorResult<()> {
        let parts: Vec<&str> = self.member_reference_scheme.split(':').collect();
        let malformed = parts.len() != 2
            || parts
                .iter()
                .any(|p| p.is_empty() || p.chars().any(char::is_whitespace));
        if malformed {
            return Err(ConfigError::InvalidValue {
                field: "member_reference_scheme".to_string(),
                value: self.member_reference_scheme.clone(),
                reason: "must be two non-empty parts joined by ':', without whitespace"
                    .to_string(),
            }
            .into());
        }

        if self.max_label_len == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_label_len".to_string(),
                value: self.max_label_len.to_string(),
                reason: "must be > 0".to_string(),
            }
            .into());
        }

        Ok(())
    }
}
