//! Parsed contact record model and the codec seam.
//!
//! Parsing the remote text format is owned by a [`RecordCodec`]
//! implementation. The reconciler only sees the structured
//! [`ContactRecord`] and the bytes the codec produces for storage.

use crate::{RecordError, RecordKind};
use serde::{Deserialize, Serialize};

/// How an embedded binary attachment is carried in the record text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentEncoding {
    /// Legacy inline parameter encoding (`ENCODING=b`)
    Inline,
    /// `data:` URI
    DataUri,
    /// External reference, no embedded bytes
    Uri,
}

/// Embedded binary attachment such as a photo or logo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub media_type: String,
    pub encoding: AttachmentEncoding,
    pub data: Vec<u8>,
}

/// Structured view of one remote contact object.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContactRecord {
    /// Type discriminator
    pub kind: RecordKind,
    /// Embedded unique key, referenced by group members
    pub uid: Option<String>,
    /// Formatted display name
    pub formatted_name: Option<String>,
    pub emails: Vec<String>,
    /// Labels that derive implicit group membership
    pub categories: Vec<String>,
    /// Raw member references (group records only)
    pub members: Vec<String>,
    pub photo: Option<Attachment>,
}

impl ContactRecord {
    /// Create an individual record with the given unique key.
    pub fn individual(uid: impl Into<String>) -> Self {
        Self {
            kind: RecordKind::Individual,
            uid: Some(uid.into()),
            ..Default::default()
        }
    }

    /// Create a group record with the given unique key.
    pub fn group(uid: impl Into<String>) -> Self {
        Self {
            kind: RecordKind::Group,
            uid: Some(uid.into()),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.formatted_name = Some(name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.emails.push(email.into());
        self
    }

    pub fn with_categories<I, T>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_members<I, T>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.members = members.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_photo(mut self, photo: Attachment) -> Self {
        self.photo = Some(photo);
        self
    }

    /// Whether this record is deferred as a group object.
    pub fn is_group(&self) -> bool {
        self.kind.is_group()
    }
}

/// Converts between the remote payload and [`ContactRecord`].
///
/// `encode` takes the record mutably: a codec may normalize it while
/// serializing (for example re-encoding embedded attachments), and the
/// normalized record is what gets persisted.
pub trait RecordCodec: Send + Sync {
    /// Decode a raw payload. `Err` marks the payload unparseable.
    fn decode(&self, raw: &[u8]) -> Result<ContactRecord, RecordError>;

    /// Encode a record into the storage representation.
    fn encode(&self, record: &mut ContactRecord) -> Result<Vec<u8>, RecordError>;
}

// ============================================================================
// MEMBER REFERENCES
// ============================================================================

/// A validated three-part member reference such as `urn:uuid:<key>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberReference {
    key: String,
}

impl MemberReference {
    /// Parse a raw reference against a two-part scheme (`"urn:uuid"`).
    ///
    /// Scheme parts compare case-insensitively. The key must be non-empty
    /// and contain no whitespace.
    pub fn parse(raw: &str, scheme: &str) -> Result<Self, RecordError> {
        let malformed = |reason: &str| RecordError::MalformedMemberReference {
            reference: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut expected = scheme.split(':');
        let (Some(ns), Some(sub), None) = (expected.next(), expected.next(), expected.next())
        else {
            return Err(malformed("reference scheme must have two parts"));
        };

        let parts: Vec<&str> = raw.trim().splitn(3, ':').collect();
        if parts.len() != 3 {
            return Err(malformed("expected three colon-separated parts"));
        }
        if !parts[0].eq_ignore_ascii_case(ns) || !parts[1].eq_ignore_ascii_case(sub) {
            return Err(malformed("unsupported scheme"));
        }

        let key = parts[2];
        if key.is_empty() {
            return Err(malformed("empty key"));
        }
        if key.chars().any(char::is_whitespace) {
            return Err(malformed("key contains whitespace"));
        }

        Ok(Self {
            key: key.to_string(),
        })
    }

    /// The embedded unique key of the referenced individual.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Render the reference back in the given scheme.
    pub fn to_reference(&self, scheme: &str) -> String {
        format!("{}:{}", scheme, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEME: &str = "urn:uuid";

    #[test]
    fn test_parse_valid_reference() {
        let r = MemberReference::parse("urn:uuid:4fbe8971-0bc3-424c-9c26-36c3e1eff6b1", SCHEME)
            .unwrap();
        assert_eq!(r.key(), "4fbe8971-0bc3-424c-9c26-36c3e1eff6b1");
    }

    #[test]
    fn test_parse_is_case_insensitive_on_scheme() {
        let r = MemberReference::parse("  URN:UUID:abc  ", SCHEME).unwrap();
        assert_eq!(r.key(), "abc");
        assert_eq!(r.to_reference(SCHEME), "urn:uuid:abc");
    }

    #[test]
    fn test_key_may_contain_colons() {
        let r = MemberReference::parse("urn:uuid:a:b", SCHEME).unwrap();
        assert_eq!(r.key(), "a:b");
    }

    #[test]
    fn test_malformed_references() {
        for raw in [
            "",
            "abc",
            "urn:abc",
            "mailto:someone:example.org",
            "urn:uuid:",
            "urn:uuid:has space",
        ] {
            let err = MemberReference::parse(raw, SCHEME).unwrap_err();
            assert!(
                matches!(err, RecordError::MalformedMemberReference { .. }),
                "expected malformed for {raw:?}"
            );
        }
    }

    #[test]
    fn test_builder_helpers() {
        let record = ContactRecord::individual("u1")
            .with_name("Ada")
            .with_email("ada@example.org")
            .with_categories(["work", "friends"]);
        assert!(!record.is_group());
        assert_eq!(record.categories.len(), 2);

        let group = ContactRecord::group("g1").with_members(["urn:uuid:u1"]);
        assert!(group.is_group());
        assert_eq!(group.members, vec!["urn:uuid:u1".to_string()]);
    }
}
