//! Identity types for CARDMIRROR entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// SHA-256 content hash of a stored record body.
pub type ContentHash = [u8; 32];

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Common behavior of the strongly-typed entity identifiers.
///
/// Local identifiers are UUIDv7 so that rows sort by allocation time.
pub trait EntityIdType: Copy + Eq + std::hash::Hash + fmt::Display {
    /// Wrap an existing UUID.
    fn new(uuid: Uuid) -> Self;

    /// Access the underlying UUID.
    fn as_uuid(&self) -> Uuid;

    /// Allocate a fresh timestamp-sortable identifier.
    fn now_v7() -> Self {
        Self::new(Uuid::now_v7())
    }

    /// The nil identifier, used as a placeholder in tests.
    fn nil() -> Self {
        Self::new(Uuid::nil())
    }
}

macro_rules! define_entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl EntityIdType for $name {
            fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_entity_id!(
    /// Local identifier of an individual contact row.
    IndividualId
);

define_entity_id!(
    /// Local identifier of a group row (explicit or implicit).
    GroupId
);

define_entity_id!(
    /// Identifier of the synchronized collection (one remote address book).
    CollectionId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        let a = compute_content_hash(b"BEGIN:VCARD");
        let b = compute_content_hash(b"BEGIN:VCARD");
        let c = compute_content_hash(b"END:VCARD");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_ids_are_distinct_and_parse_back() {
        let a = IndividualId::now_v7();
        let b = IndividualId::now_v7();
        assert_ne!(a, b);

        let parsed: IndividualId = a.to_string().parse().unwrap();
        assert_eq!(parsed, a);
    }

    #[test]
    fn test_nil_id_display() {
        assert_eq!(
            GroupId::nil().to_string(),
            "00000000-0000-0000-0000-000000000000"
        );
    }
}
