//! CARDMIRROR Sync - Change Reconciliation Engine
//!
//! Mirrors one remote contact collection into a [`ContactStore`]. A session
//! loads a [`LocalSnapshot`], consumes add/change/delete notifications
//! through a [`Reconciler`], and finalizes by writing deferred group objects
//! and removing implicit groups that lost their last member.
//!
//! ```text
//! ChangeSource ──notifications──▶ Reconciler ──units of work──▶ ContactStore
//!                                    │
//!                                    ├─ LocalSnapshot / LiveIndex
//!                                    ├─ MembershipResolver (labels → implicit groups)
//!                                    └─ ReconcileReport
//! ```
//!
//! [`ContactStore`]: cardmirror_storage::ContactStore

pub mod fallback;
pub mod membership;
pub mod reconciler;
pub mod report;
pub mod snapshot;
pub mod source;

pub use fallback::{FallbackEnumerator, TagDiff};
pub use membership::{normalize_labels, MembershipDiff, MembershipResolver, ResolvedGroups};
pub use reconciler::Reconciler;
pub use report::{GcSummary, MemberStats, ObjectAction, ObjectOutcome, ReconcileReport};
pub use snapshot::{LiveIndex, LocalSnapshot, ObjectTag};
pub use source::{
    run_session, ChangeBatch, ChangeSink, ChangeSource, DiscoveryMode, PendingChange,
};
