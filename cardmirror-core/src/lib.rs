//! CARDMIRROR Core - Entity Types
//!
//! Data structures shared by the storage layer and the reconciliation engine:
//! identifiers, the individual/group model, the parsed record model with its
//! codec seam, configuration and the error taxonomy.

pub mod config;
pub mod entities;
pub mod enums;
pub mod error;
pub mod identity;
pub mod record;

pub use config::{SyncConfig, DEFAULT_MAX_LABEL_LEN, DEFAULT_MEMBER_REFERENCE_SCHEME};
pub use entities::{Group, GroupOrigin, Individual, IndividualSummary, Membership, TaggedRow};
pub use enums::{EntityType, GroupKind, GroupKindParseError, RecordKind};
pub use error::{ConfigError, MirrorError, MirrorResult, RecordError, StorageError};
pub use identity::{
    compute_content_hash, CollectionId, ContentHash, EntityIdType, GroupId, IndividualId,
    Timestamp,
};
pub use record::{Attachment, AttachmentEncoding, ContactRecord, MemberReference, RecordCodec};
