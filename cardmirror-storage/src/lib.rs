//! CARDMIRROR Storage - Storage Trait and Mock Implementation
//!
//! Defines the relational storage abstraction the reconciler writes through.
//! A production backend maps each method onto one SQL statement inside the
//! connection's current transaction; [`MockStore`] keeps everything in memory
//! with snapshot-based rollback.

pub mod mock;
pub mod transaction;

pub use mock::{FailPoint, MockStore};
pub use transaction::{in_transaction, Transaction};

use cardmirror_core::{
    CollectionId, Group, GroupId, GroupKind, Individual, IndividualId, MirrorResult, TaggedRow,
};
use std::collections::{BTreeSet, HashSet};

// ============================================================================
// STORAGE TRAIT
// ============================================================================

/// Storage collaborator for one or more mirrored collections.
///
/// Methods take `&self`; implementations synchronize internally. All writes
/// between `begin` and `commit` form one unit of work, and `rollback`
/// discards them. Nested transactions are not supported.
pub trait ContactStore: Send + Sync {
    // === Transactions ===

    /// Begin a unit of work.
    fn begin(&self) -> MirrorResult<()>;

    /// Commit the current unit of work.
    fn commit(&self) -> MirrorResult<()>;

    /// Discard the current unit of work.
    fn rollback(&self) -> MirrorResult<()>;

    // === Individual Operations ===

    /// List (id, uri, tag) of every individual in a collection.
    fn individual_list_tags(
        &self,
        collection_id: CollectionId,
    ) -> MirrorResult<Vec<TaggedRow<IndividualId>>>;

    /// Get an individual by ID.
    fn individual_get(&self, id: IndividualId) -> MirrorResult<Option<Individual>>;

    /// List every individual in a collection.
    fn individual_list(&self, collection_id: CollectionId) -> MirrorResult<Vec<Individual>>;

    /// Insert a new individual. Fails if the URI is already used.
    fn individual_insert(&self, individual: &Individual) -> MirrorResult<()>;

    /// Overwrite an existing individual row.
    fn individual_update(&self, individual: &Individual) -> MirrorResult<()>;

    /// Delete an individual row. Its membership edges must already be gone.
    /// Returns false if the row did not exist.
    fn individual_delete(&self, id: IndividualId) -> MirrorResult<bool>;

    // === Group Operations ===

    /// List (id, uri, tag) of every explicit group in a collection.
    fn group_list_tags(&self, collection_id: CollectionId) -> MirrorResult<Vec<TaggedRow<GroupId>>>;

    /// List group IDs of one kind in a collection.
    fn group_list_ids_by_kind(
        &self,
        collection_id: CollectionId,
        kind: GroupKind,
    ) -> MirrorResult<Vec<GroupId>>;

    /// Get a group by ID.
    fn group_get(&self, id: GroupId) -> MirrorResult<Option<Group>>;

    /// List every group in a collection.
    fn group_list(&self, collection_id: CollectionId) -> MirrorResult<Vec<Group>>;

    /// Implicit groups in a collection whose name is in `names`.
    fn group_find_implicit_by_names(
        &self,
        collection_id: CollectionId,
        names: &BTreeSet<String>,
    ) -> MirrorResult<Vec<Group>>;

    /// Insert a new group.
    fn group_insert(&self, group: &Group) -> MirrorResult<()>;

    /// Overwrite an existing group row.
    fn group_update(&self, group: &Group) -> MirrorResult<()>;

    /// Delete a group row. Its membership edges must already be gone.
    fn group_delete(&self, id: GroupId) -> MirrorResult<bool>;

    /// Delete the listed groups that are implicit and belong to the
    /// collection; other IDs are ignored. Returns the number deleted.
    fn group_delete_implicit(
        &self,
        collection_id: CollectionId,
        ids: &[GroupId],
    ) -> MirrorResult<usize>;

    // === Membership Operations ===

    /// Groups of `individual_id` restricted to the `among` set.
    fn membership_groups_of(
        &self,
        individual_id: IndividualId,
        among: &HashSet<GroupId>,
    ) -> MirrorResult<Vec<GroupId>>;

    /// Members of a group.
    fn membership_members_of(&self, group_id: GroupId) -> MirrorResult<Vec<IndividualId>>;

    /// Insert edges from one individual to each listed group.
    fn membership_insert(&self, individual_id: IndividualId, groups: &[GroupId])
        -> MirrorResult<()>;

    /// Delete edges from one individual to each listed group.
    fn membership_delete(
        &self,
        individual_id: IndividualId,
        groups: &[GroupId],
    ) -> MirrorResult<usize>;

    /// Delete every edge of an individual.
    fn membership_delete_for_individual(&self, individual_id: IndividualId) -> MirrorResult<usize>;

    /// Delete every edge of a group.
    fn membership_delete_for_group(&self, group_id: GroupId) -> MirrorResult<usize>;

    /// Insert-from-query: add an edge to `group_id` for every individual of
    /// the collection whose unique key is in `uids`. Returns edges inserted.
    fn membership_insert_by_uid(
        &self,
        collection_id: CollectionId,
        group_id: GroupId,
        uids: &BTreeSet<String>,
    ) -> MirrorResult<usize>;

    /// Subset of `candidates` that still has at least one member edge.
    fn group_ids_with_members(&self, candidates: &HashSet<GroupId>)
        -> MirrorResult<HashSet<GroupId>>;
}
