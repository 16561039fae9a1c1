//! Enum types for CARDMIRROR entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Entity type discriminator used in errors and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Individual,
    Group,
    Membership,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityType::Individual => "Individual",
            EntityType::Group => "Group",
            EntityType::Membership => "Membership",
        };
        f.write_str(s)
    }
}

// ============================================================================
// GROUP KIND
// ============================================================================

/// Where a group's membership comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupKind {
    /// A first-class remote object with its own URI and member list
    Explicit,
    /// A named bucket derived from labels embedded in individuals
    Implicit,
}

impl GroupKind {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            GroupKind::Explicit => "explicit",
            GroupKind::Implicit => "implicit",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, GroupKindParseError> {
        match s.to_lowercase().as_str() {
            "explicit" => Ok(GroupKind::Explicit),
            "implicit" => Ok(GroupKind::Implicit),
            _ => Err(GroupKindParseError(s.to_string())),
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for GroupKind {
    type Err = GroupKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid group kind string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupKindParseError(pub String);

impl fmt::Display for GroupKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid group kind: {}", self.0)
    }
}

impl std::error::Error for GroupKindParseError {}

// ============================================================================
// RECORD KIND
// ============================================================================

/// Type discriminator carried by a parsed contact record.
///
/// Anything other than [`RecordKind::Group`] is mirrored as an individual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RecordKind {
    #[default]
    Individual,
    Group,
    Org,
    Location,
}

impl RecordKind {
    /// Whether records of this kind are deferred as group objects.
    pub fn is_group(&self) -> bool {
        matches!(self, RecordKind::Group)
    }

    /// Parse a discriminator value; unknown values fall back to `Individual`.
    pub fn from_discriminator(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "group" => RecordKind::Group,
            "org" => RecordKind::Org,
            "location" => RecordKind::Location,
            _ => RecordKind::Individual,
        }
    }

    /// Canonical discriminator value.
    pub fn as_discriminator(&self) -> &'static str {
        match self {
            RecordKind::Individual => "individual",
            RecordKind::Group => "group",
            RecordKind::Org => "org",
            RecordKind::Location => "location",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_kind_db_roundtrip() {
        for kind in [GroupKind::Explicit, GroupKind::Implicit] {
            assert_eq!(GroupKind::from_db_str(kind.as_db_str()).unwrap(), kind);
        }
        assert_eq!("IMPLICIT".parse::<GroupKind>().unwrap(), GroupKind::Implicit);
    }

    #[test]
    fn test_group_kind_parse_error() {
        let err = GroupKind::from_db_str("label").unwrap_err();
        assert_eq!(err.to_string(), "Invalid group kind: label");
    }

    #[test]
    fn test_record_kind_discriminator() {
        assert!(RecordKind::from_discriminator(" Group ").is_group());
        assert_eq!(RecordKind::from_discriminator("org"), RecordKind::Org);
        assert_eq!(
            RecordKind::from_discriminator("something-else"),
            RecordKind::Individual
        );
        assert!(!RecordKind::Location.is_group());
    }
}
