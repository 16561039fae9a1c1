//! Entity types mirrored into local storage

use crate::{
    compute_content_hash, CollectionId, ContactRecord, ContentHash, GroupId, GroupKind,
    IndividualId, Timestamp,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

// ============================================================================
// INDIVIDUAL
// ============================================================================

/// Display/indexing fields extracted from an individual's record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndividualSummary {
    pub display_name: String,
    pub emails: Vec<String>,
    /// Embedded unique key, used to resolve group member references
    pub uid: Option<String>,
}

impl IndividualSummary {
    /// Extract summary fields from a (possibly codec-normalized) record.
    pub fn from_record(record: &ContactRecord) -> Self {
        let display_name = record
            .formatted_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .or_else(|| record.emails.first().map(String::as_str))
            .or(record.uid.as_deref())
            .unwrap_or_default()
            .to_string();

        Self {
            display_name,
            emails: record.emails.clone(),
            uid: record.uid.clone(),
        }
    }
}

/// A single-entity contact mirrored from the remote collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Individual {
    pub individual_id: IndividualId,
    pub collection_id: CollectionId,
    /// Server-assigned path, unique within the collection
    pub uri: String,
    pub version_tag: String,
    /// Serialized record body as produced by the codec
    pub body: Vec<u8>,
    pub content_hash: ContentHash,
    pub summary: IndividualSummary,
    pub updated_at: Timestamp,
}

impl Individual {
    pub fn new(
        individual_id: IndividualId,
        collection_id: CollectionId,
        uri: impl Into<String>,
        version_tag: impl Into<String>,
        body: Vec<u8>,
        summary: IndividualSummary,
    ) -> Self {
        Self {
            individual_id,
            collection_id,
            uri: uri.into(),
            version_tag: version_tag.into(),
            content_hash: compute_content_hash(&body),
            body,
            summary,
            updated_at: Utc::now(),
        }
    }

    /// Hex rendering of the body hash, for logs.
    pub fn content_hash_hex(&self) -> String {
        hex::encode(self.content_hash)
    }
}

// ============================================================================
// GROUP
// ============================================================================

/// Kind-specific data of a group.
///
/// Only explicit groups carry remote identity; an implicit group exists
/// purely by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupOrigin {
    Explicit {
        uri: String,
        version_tag: String,
        body: Vec<u8>,
        content_hash: ContentHash,
    },
    Implicit,
}

/// A membership bucket, explicit or label-derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub group_id: GroupId,
    pub collection_id: CollectionId,
    pub name: String,
    pub origin: GroupOrigin,
    pub updated_at: Timestamp,
}

impl Group {
    /// Build an explicit group from a remote group object.
    pub fn explicit(
        group_id: GroupId,
        collection_id: CollectionId,
        name: impl Into<String>,
        uri: impl Into<String>,
        version_tag: impl Into<String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            group_id,
            collection_id,
            name: name.into(),
            origin: GroupOrigin::Explicit {
                uri: uri.into(),
                version_tag: version_tag.into(),
                content_hash: compute_content_hash(&body),
                body,
            },
            updated_at: Utc::now(),
        }
    }

    /// Build a label-derived group.
    pub fn implicit(
        group_id: GroupId,
        collection_id: CollectionId,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group_id,
            collection_id,
            name: name.into(),
            origin: GroupOrigin::Implicit,
            updated_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> GroupKind {
        match self.origin {
            GroupOrigin::Explicit { .. } => GroupKind::Explicit,
            GroupOrigin::Implicit => GroupKind::Implicit,
        }
    }

    pub fn is_implicit(&self) -> bool {
        self.kind() == GroupKind::Implicit
    }

    pub fn uri(&self) -> Option<&str> {
        match &self.origin {
            GroupOrigin::Explicit { uri, .. } => Some(uri),
            GroupOrigin::Implicit => None,
        }
    }

    pub fn version_tag(&self) -> Option<&str> {
        match &self.origin {
            GroupOrigin::Explicit { version_tag, .. } => Some(version_tag),
            GroupOrigin::Implicit => None,
        }
    }
}

// ============================================================================
// MEMBERSHIP AND LISTING ROWS
// ============================================================================

/// One group ↔ individual edge, regardless of group kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Membership {
    pub group_id: GroupId,
    pub individual_id: IndividualId,
}

/// Identifier, URI and version tag of a stored remote object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedRow<Id> {
    pub id: Id,
    pub uri: String,
    pub version_tag: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityIdType;

    #[test]
    fn test_summary_prefers_formatted_name() {
        let record = ContactRecord::individual("u1")
            .with_name("  Grace Hopper ")
            .with_email("grace@example.org");
        let summary = IndividualSummary::from_record(&record);
        assert_eq!(summary.display_name, "Grace Hopper");
        assert_eq!(summary.uid.as_deref(), Some("u1"));
    }

    #[test]
    fn test_summary_falls_back_to_email_then_uid() {
        let record = ContactRecord::individual("u1").with_email("grace@example.org");
        assert_eq!(
            IndividualSummary::from_record(&record).display_name,
            "grace@example.org"
        );

        let record = ContactRecord::individual("u2").with_name("   ");
        assert_eq!(IndividualSummary::from_record(&record).display_name, "u2");
    }

    #[test]
    fn test_individual_hashes_body() {
        let ind = Individual::new(
            IndividualId::now_v7(),
            CollectionId::now_v7(),
            "/book/u1.vcf",
            "\"etag-1\"",
            b"BEGIN:VCARD".to_vec(),
            IndividualSummary::default(),
        );
        assert_eq!(ind.content_hash, compute_content_hash(b"BEGIN:VCARD"));
        assert_eq!(ind.content_hash_hex().len(), 64);
    }

    #[test]
    fn test_group_kinds() {
        let collection = CollectionId::now_v7();
        let implicit = Group::implicit(GroupId::now_v7(), collection, "work");
        assert!(implicit.is_implicit());
        assert_eq!(implicit.uri(), None);
        assert_eq!(implicit.version_tag(), None);

        let explicit = Group::explicit(
            GroupId::now_v7(),
            collection,
            "Team",
            "/book/team.vcf",
            "\"g1\"",
            Vec::new(),
        );
        assert_eq!(explicit.kind(), GroupKind::Explicit);
        assert_eq!(explicit.uri(), Some("/book/team.vcf"));
        assert_eq!(explicit.version_tag(), Some("\"g1\""));
    }
}
