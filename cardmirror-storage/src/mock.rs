//! In-memory [`ContactStore`] for tests.
//!
//! `begin` snapshots every table and `rollback` restores the snapshot, which
//! gives the same all-or-nothing behavior as a relational transaction. Edges
//! are checked like foreign keys: inserting an edge to a missing row fails,
//! and deleting a row that still has edges fails.

use crate::ContactStore;
use cardmirror_core::{
    CollectionId, EntityType, Group, GroupId, GroupKind, Individual, IndividualId, Membership,
    MirrorResult, StorageError, TaggedRow,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Operations that can be forced to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Begin,
    Commit,
    IndividualList,
    IndividualInsert,
    IndividualUpdate,
    IndividualDelete,
    GroupList,
    GroupFindImplicit,
    GroupInsert,
    GroupUpdate,
    GroupDelete,
    GroupDeleteImplicit,
    MembershipQuery,
    MembershipInsert,
    MembershipDelete,
    MembershipInsertByUid,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    individuals: HashMap<IndividualId, Individual>,
    groups: HashMap<GroupId, Group>,
    memberships: HashSet<Membership>,
}

impl Tables {
    fn uri_in_use(
        &self,
        collection_id: CollectionId,
        uri: &str,
        except_individual: Option<IndividualId>,
        except_group: Option<GroupId>,
    ) -> bool {
        let individual_hit = self.individuals.values().any(|i| {
            i.collection_id == collection_id
                && i.uri == uri
                && Some(i.individual_id) != except_individual
        });
        let group_hit = self.groups.values().any(|g| {
            g.collection_id == collection_id
                && g.uri() == Some(uri)
                && Some(g.group_id) != except_group
        });
        individual_hit || group_hit
    }

    fn has_edges_for_individual(&self, id: IndividualId) -> bool {
        self.memberships.iter().any(|m| m.individual_id == id)
    }

    fn has_edges_for_group(&self, id: GroupId) -> bool {
        self.memberships.iter().any(|m| m.group_id == id)
    }
}

/// In-memory mock storage for testing.
#[derive(Debug, Default)]
pub struct MockStore {
    tables: RwLock<Tables>,
    /// Pre-transaction snapshot; `Some` while a transaction is open.
    backup: Mutex<Option<Tables>>,
    failures: RwLock<HashSet<FailPoint>>,
    operations: AtomicUsize,
}

impl MockStore {
    /// Create a new mock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call of `point` fail until cleared.
    pub fn fail_on(&self, point: FailPoint) {
        if let Ok(mut failures) = self.failures.write() {
            failures.insert(point);
        }
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        if let Ok(mut failures) = self.failures.write() {
            failures.clear();
        }
    }

    /// Number of trait calls served so far.
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    /// Whether a transaction is currently open.
    pub fn in_transaction(&self) -> bool {
        self.backup.lock().map(|b| b.is_some()).unwrap_or(false)
    }

    /// Get count of stored individuals.
    pub fn individual_count(&self) -> usize {
        self.tables.read().map(|t| t.individuals.len()).unwrap_or(0)
    }

    /// Get count of stored groups of both kinds.
    pub fn group_count(&self) -> usize {
        self.tables.read().map(|t| t.groups.len()).unwrap_or(0)
    }

    /// Get count of stored membership edges.
    pub fn membership_count(&self) -> usize {
        self.tables.read().map(|t| t.memberships.len()).unwrap_or(0)
    }

    /// All membership edges, sorted.
    pub fn memberships(&self) -> Vec<Membership> {
        let mut edges: Vec<Membership> = self
            .tables
            .read()
            .map(|t| t.memberships.iter().copied().collect())
            .unwrap_or_default();
        edges.sort();
        edges
    }

    fn touch(&self, point: Option<FailPoint>) -> MirrorResult<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        if let Some(point) = point {
            let failures = self.failures.read().map_err(|_| StorageError::LockPoisoned)?;
            if failures.contains(&point) {
                return Err(StorageError::Injected {
                    operation: format!("{point:?}"),
                }
                .into());
            }
        }
        Ok(())
    }

    fn read(&self) -> MirrorResult<RwLockReadGuard<'_, Tables>> {
        Ok(self.tables.read().map_err(|_| StorageError::LockPoisoned)?)
    }

    fn write(&self) -> MirrorResult<RwLockWriteGuard<'_, Tables>> {
        Ok(self.tables.write().map_err(|_| StorageError::LockPoisoned)?)
    }
}

impl ContactStore for MockStore {
    // === Transactions ===

    fn begin(&self) -> MirrorResult<()> {
        self.touch(Some(FailPoint::Begin))?;
        let mut backup = self.backup.lock().map_err(|_| StorageError::LockPoisoned)?;
        if backup.is_some() {
            return Err(StorageError::TransactionFailed {
                reason: "transaction already open".to_string(),
            }
            .into());
        }
        *backup = Some(self.read()?.clone());
        Ok(())
    }

    fn commit(&self) -> MirrorResult<()> {
        self.touch(Some(FailPoint::Commit))?;
        let mut backup = self.backup.lock().map_err(|_| StorageError::LockPoisoned)?;
        if backup.take().is_none() {
            return Err(StorageError::TransactionFailed {
                reason: "commit without open transaction".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn rollback(&self) -> MirrorResult<()> {
        self.touch(None)?;
        let mut backup = self.backup.lock().map_err(|_| StorageError::LockPoisoned)?;
        let Some(saved) = backup.take() else {
            return Err(StorageError::TransactionFailed {
                reason: "rollback without open transaction".to_string(),
            }
            .into());
        };
        *self.write()? = saved;
        Ok(())
    }

    // === Individual Operations ===

    fn individual_list_tags(
        &self,
        collection_id: CollectionId,
    ) -> MirrorResult<Vec<TaggedRow<IndividualId>>> {
        self.touch(Some(FailPoint::IndividualList))?;
        let tables = self.read()?;
        Ok(tables
            .individuals
            .values()
            .filter(|i| i.collection_id == collection_id)
            .map(|i| TaggedRow {
                id: i.individual_id,
                uri: i.uri.clone(),
                version_tag: i.version_tag.clone(),
            })
            .collect())
    }

    fn individual_get(&self, id: IndividualId) -> MirrorResult<Option<Individual>> {
        self.touch(None)?;
        Ok(self.read()?.individuals.get(&id).cloned())
    }

    fn individual_list(&self, collection_id: CollectionId) -> MirrorResult<Vec<Individual>> {
        self.touch(Some(FailPoint::IndividualList))?;
        let tables = self.read()?;
        Ok(tables
            .individuals
            .values()
            .filter(|i| i.collection_id == collection_id)
            .cloned()
            .collect())
    }

    fn individual_insert(&self, individual: &Individual) -> MirrorResult<()> {
        self.touch(Some(FailPoint::IndividualInsert))?;
        let mut tables = self.write()?;
        if tables.individuals.contains_key(&individual.individual_id) {
            return Err(StorageError::InsertFailed {
                entity_type: EntityType::Individual,
                reason: "already exists".to_string(),
            }
            .into());
        }
        if tables.uri_in_use(individual.collection_id, &individual.uri, None, None) {
            return Err(StorageError::DuplicateUri {
                uri: individual.uri.clone(),
            }
            .into());
        }
        tables
            .individuals
            .insert(individual.individual_id, individual.clone());
        Ok(())
    }

    fn individual_update(&self, individual: &Individual) -> MirrorResult<()> {
        self.touch(Some(FailPoint::IndividualUpdate))?;
        let mut tables = self.write()?;
        if !tables.individuals.contains_key(&individual.individual_id) {
            return Err(StorageError::NotFound {
                entity_type: EntityType::Individual,
                id: individual.individual_id.to_string(),
            }
            .into());
        }
        if tables.uri_in_use(
            individual.collection_id,
            &individual.uri,
            Some(individual.individual_id),
            None,
        ) {
            return Err(StorageError::DuplicateUri {
                uri: individual.uri.clone(),
            }
            .into());
        }
        tables
            .individuals
            .insert(individual.individual_id, individual.clone());
        Ok(())
    }

    fn individual_delete(&self, id: IndividualId) -> MirrorResult<bool> {
        self.touch(Some(FailPoint::IndividualDelete))?;
        let mut tables = self.write()?;
        if tables.has_edges_for_individual(id) {
            return Err(StorageError::DeleteFailed {
                entity_type: EntityType::Individual,
                reason: format!("membership edges still reference {id}"),
            }
            .into());
        }
        Ok(tables.individuals.remove(&id).is_some())
    }

    // === Group Operations ===

    fn group_list_tags(
        &self,
        collection_id: CollectionId,
    ) -> MirrorResult<Vec<TaggedRow<GroupId>>> {
        self.touch(Some(FailPoint::GroupList))?;
        let tables = self.read()?;
        Ok(tables
            .groups
            .values()
            .filter(|g| g.collection_id == collection_id)
            .filter_map(|g| {
                Some(TaggedRow {
                    id: g.group_id,
                    uri: g.uri()?.to_string(),
                    version_tag: g.version_tag()?.to_string(),
                })
            })
            .collect())
    }

    fn group_list_ids_by_kind(
        &self,
        collection_id: CollectionId,
        kind: GroupKind,
    ) -> MirrorResult<Vec<GroupId>> {
        self.touch(Some(FailPoint::GroupList))?;
        let tables = self.read()?;
        Ok(tables
            .groups
            .values()
            .filter(|g| g.collection_id == collection_id && g.kind() == kind)
            .map(|g| g.group_id)
            .collect())
    }

    fn group_get(&self, id: GroupId) -> MirrorResult<Option<Group>> {
        self.touch(None)?;
        Ok(self.read()?.groups.get(&id).cloned())
    }

    fn group_list(&self, collection_id: CollectionId) -> MirrorResult<Vec<Group>> {
        self.touch(Some(FailPoint::GroupList))?;
        let tables = self.read()?;
        Ok(tables
            .groups
            .values()
            .filter(|g| g.collection_id == collection_id)
            .cloned()
            .collect())
    }

    fn group_find_implicit_by_names(
        &self,
        collection_id: CollectionId,
        names: &BTreeSet<String>,
    ) -> MirrorResult<Vec<Group>> {
        self.touch(Some(FailPoint::GroupFindImplicit))?;
        let tables = self.read()?;
        Ok(tables
            .groups
            .values()
            .filter(|g| {
                g.collection_id == collection_id && g.is_implicit() && names.contains(&g.name)
            })
            .cloned()
            .collect())
    }

    fn group_insert(&self, group: &Group) -> MirrorResult<()> {
        self.touch(Some(FailPoint::GroupInsert))?;
        let mut tables = self.write()?;
        if tables.groups.contains_key(&group.group_id) {
            return Err(StorageError::InsertFailed {
                entity_type: EntityType::Group,
                reason: "already exists".to_string(),
            }
            .into());
        }
        if let Some(uri) = group.uri() {
            if tables.uri_in_use(group.collection_id, uri, None, None) {
                return Err(StorageError::DuplicateUri {
                    uri: uri.to_string(),
                }
                .into());
            }
        }
        tables.groups.insert(group.group_id, group.clone());
        Ok(())
    }

    fn group_update(&self, group: &Group) -> MirrorResult<()> {
        self.touch(Some(FailPoint::GroupUpdate))?;
        let mut tables = self.write()?;
        if !tables.groups.contains_key(&group.group_id) {
            return Err(StorageError::NotFound {
                entity_type: EntityType::Group,
                id: group.group_id.to_string(),
            }
            .into());
        }
        if let Some(uri) = group.uri() {
            if tables.uri_in_use(group.collection_id, uri, None, Some(group.group_id)) {
                return Err(StorageError::DuplicateUri {
                    uri: uri.to_string(),
                }
                .into());
            }
        }
        tables.groups.insert(group.group_id, group.clone());
        Ok(())
    }

    fn group_delete(&self, id: GroupId) -> MirrorResult<bool> {
        self.touch(Some(FailPoint::GroupDelete))?;
        let mut tables = self.write()?;
        if tables.has_edges_for_group(id) {
            return Err(StorageError::DeleteFailed {
                entity_type: EntityType::Group,
                reason: format!("membership edges still reference {id}"),
            }
            .into());
        }
        Ok(tables.groups.remove(&id).is_some())
    }

    fn group_delete_implicit(
        &self,
        collection_id: CollectionId,
        ids: &[GroupId],
    ) -> MirrorResult<usize> {
        self.touch(Some(FailPoint::GroupDeleteImplicit))?;
        let mut tables = self.write()?;
        let targets: Vec<GroupId> = ids
            .iter()
            .copied()
            .filter(|id| {
                tables
                    .groups
                    .get(id)
                    .is_some_and(|g| g.collection_id == collection_id && g.is_implicit())
            })
            .collect();

        if let Some(busy) = targets.iter().find(|id| tables.has_edges_for_group(**id)) {
            return Err(StorageError::DeleteFailed {
                entity_type: EntityType::Group,
                reason: format!("membership edges still reference {busy}"),
            }
            .into());
        }

        for id in &targets {
            tables.groups.remove(id);
        }
        Ok(targets.len())
    }

    // === Membership Operations ===

    fn membership_groups_of(
        &self,
        individual_id: IndividualId,
        among: &HashSet<GroupId>,
    ) -> MirrorResult<Vec<GroupId>> {
        self.touch(Some(FailPoint::MembershipQuery))?;
        let tables = self.read()?;
        Ok(tables
            .memberships
            .iter()
            .filter(|m| m.individual_id == individual_id && among.contains(&m.group_id))
            .map(|m| m.group_id)
            .collect())
    }

    fn membership_members_of(&self, group_id: GroupId) -> MirrorResult<Vec<IndividualId>> {
        self.touch(Some(FailPoint::MembershipQuery))?;
        let tables = self.read()?;
        Ok(tables
            .memberships
            .iter()
            .filter(|m| m.group_id == group_id)
            .map(|m| m.individual_id)
            .collect())
    }

    fn membership_insert(
        &self,
        individual_id: IndividualId,
        groups: &[GroupId],
    ) -> MirrorResult<()> {
        self.touch(Some(FailPoint::MembershipInsert))?;
        let mut tables = self.write()?;
        if !tables.individuals.contains_key(&individual_id) {
            return Err(StorageError::InsertFailed {
                entity_type: EntityType::Membership,
                reason: format!("unknown individual {individual_id}"),
            }
            .into());
        }
        if let Some(missing) = groups.iter().find(|g| !tables.groups.contains_key(g)) {
            return Err(StorageError::InsertFailed {
                entity_type: EntityType::Membership,
                reason: format!("unknown group {missing}"),
            }
            .into());
        }
        for group_id in groups {
            tables.memberships.insert(Membership {
                group_id: *group_id,
                individual_id,
            });
        }
        Ok(())
    }

    fn membership_delete(
        &self,
        individual_id: IndividualId,
        groups: &[GroupId],
    ) -> MirrorResult<usize> {
        self.touch(Some(FailPoint::MembershipDelete))?;
        let mut tables = self.write()?;
        let removed = groups
            .iter()
            .filter(|group_id| {
                tables.memberships.remove(&Membership {
                    group_id: **group_id,
                    individual_id,
                })
            })
            .count();
        Ok(removed)
    }

    fn membership_delete_for_individual(&self, individual_id: IndividualId) -> MirrorResult<usize> {
        self.touch(Some(FailPoint::MembershipDelete))?;
        let mut tables = self.write()?;
        let before = tables.memberships.len();
        tables
            .memberships
            .retain(|m| m.individual_id != individual_id);
        Ok(before - tables.memberships.len())
    }

    fn membership_delete_for_group(&self, group_id: GroupId) -> MirrorResult<usize> {
        self.touch(Some(FailPoint::MembershipDelete))?;
        let mut tables = self.write()?;
        let before = tables.memberships.len();
        tables.memberships.retain(|m| m.group_id != group_id);
        Ok(before - tables.memberships.len())
    }

    fn membership_insert_by_uid(
        &self,
        collection_id: CollectionId,
        group_id: GroupId,
        uids: &BTreeSet<String>,
    ) -> MirrorResult<usize> {
        self.touch(Some(FailPoint::MembershipInsertByUid))?;
        let mut tables = self.write()?;
        if !tables.groups.contains_key(&group_id) {
            return Err(StorageError::InsertFailed {
                entity_type: EntityType::Membership,
                reason: format!("unknown group {group_id}"),
            }
            .into());
        }

        let members: Vec<IndividualId> = tables
            .individuals
            .values()
            .filter(|i| {
                i.collection_id == collection_id
                    && i.summary.uid.as_ref().is_some_and(|uid| uids.contains(uid))
            })
            .map(|i| i.individual_id)
            .collect();

        let inserted = members
            .into_iter()
            .filter(|individual_id| {
                tables.memberships.insert(Membership {
                    group_id,
                    individual_id: *individual_id,
                })
            })
            .count();
        Ok(inserted)
    }

    fn group_ids_with_members(
        &self,
        candidates: &HashSet<GroupId>,
    ) -> MirrorResult<HashSet<GroupId>> {
        self.touch(Some(FailPoint::MembershipQuery))?;
        let tables = self.read()?;
        Ok(tables
            .memberships
            .iter()
            .map(|m| m.group_id)
            .filter(|g| candidates.contains(g))
            .collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use cardmirror_core::{EntityIdType, IndividualSummary, MirrorError};

    fn make_individual(collection_id: CollectionId, uri: &str, uid: &str) -> Individual {
        Individual::new(
            IndividualId::now_v7(),
            collection_id,
            uri,
            "\"1\"",
            format!("UID:{uid}").into_bytes(),
            IndividualSummary {
                display_name: uid.to_string(),
                emails: Vec::new(),
                uid: Some(uid.to_string()),
            },
        )
    }

    fn make_explicit_group(collection_id: CollectionId, uri: &str) -> Group {
        Group::explicit(
            GroupId::now_v7(),
            collection_id,
            "Team",
            uri,
            "\"g1\"",
            b"KIND:group".to_vec(),
        )
    }

    // ========================================================================
    // Individual Tests
    // ========================================================================

    #[test]
    fn test_individual_insert_get() {
        let store = MockStore::new();
        let collection = CollectionId::now_v7();
        let ind = make_individual(collection, "/a.vcf", "a");

        store.individual_insert(&ind).unwrap();
        let retrieved = store.individual_get(ind.individual_id).unwrap();
        assert_eq!(retrieved, Some(ind.clone()));
        assert_eq!(store.individual_list(collection).unwrap(), vec![ind]);
    }

    #[test]
    fn test_individual_insert_duplicate_uri() {
        let store = MockStore::new();
        let collection = CollectionId::now_v7();
        store
            .individual_insert(&make_individual(collection, "/a.vcf", "a"))
            .unwrap();

        let result = store.individual_insert(&make_individual(collection, "/a.vcf", "b"));
        assert!(matches!(
            result,
            Err(MirrorError::Storage(StorageError::DuplicateUri { .. }))
        ));

        // Same URI in another collection is fine
        store
            .individual_insert(&make_individual(CollectionId::now_v7(), "/a.vcf", "c"))
            .unwrap();
    }

    #[test]
    fn test_uri_shared_between_individuals_and_groups() {
        let store = MockStore::new();
        let collection = CollectionId::now_v7();
        store
            .group_insert(&make_explicit_group(collection, "/x.vcf"))
            .unwrap();

        let result = store.individual_insert(&make_individual(collection, "/x.vcf", "a"));
        assert!(result.is_err());
    }

    #[test]
    fn test_individual_update_missing() {
        let store = MockStore::new();
        let result = store.individual_update(&make_individual(CollectionId::now_v7(), "/a", "a"));
        assert!(matches!(
            result,
            Err(MirrorError::Storage(StorageError::NotFound { .. }))
        ));
    }

    #[test]
    fn test_individual_delete_requires_edges_gone() {
        let store = MockStore::new();
        let collection = CollectionId::now_v7();
        let ind = make_individual(collection, "/a.vcf", "a");
        let group = Group::implicit(GroupId::now_v7(), collection, "work");
        store.individual_insert(&ind).unwrap();
        store.group_insert(&group).unwrap();
        store
            .membership_insert(ind.individual_id, &[group.group_id])
            .unwrap();

        assert!(store.individual_delete(ind.individual_id).is_err());

        assert_eq!(
            store
                .membership_delete_for_individual(ind.individual_id)
                .unwrap(),
            1
        );
        assert!(store.individual_delete(ind.individual_id).unwrap());
        assert!(!store.individual_delete(ind.individual_id).unwrap());
    }

    // ========================================================================
    // Group Tests
    // ========================================================================

    #[test]
    fn test_group_list_tags_only_explicit() {
        let store = MockStore::new();
        let collection = CollectionId::now_v7();
        let explicit = make_explicit_group(collection, "/team.vcf");
        store.group_insert(&explicit).unwrap();
        store
            .group_insert(&Group::implicit(GroupId::now_v7(), collection, "work"))
            .unwrap();

        let tags = store.group_list_tags(collection).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].uri, "/team.vcf");
        assert_eq!(tags[0].id, explicit.group_id);

        let implicit = store
            .group_list_ids_by_kind(collection, GroupKind::Implicit)
            .unwrap();
        assert_eq!(implicit.len(), 1);
    }

    #[test]
    fn test_group_find_implicit_by_names() {
        let store = MockStore::new();
        let collection = CollectionId::now_v7();
        store
            .group_insert(&Group::implicit(GroupId::now_v7(), collection, "work"))
            .unwrap();
        store
            .group_insert(&Group::implicit(GroupId::now_v7(), collection, "home"))
            .unwrap();
        store
            .group_insert(&Group::implicit(GroupId::now_v7(), CollectionId::now_v7(), "work"))
            .unwrap();

        let names: BTreeSet<String> = ["work".to_string(), "gym".to_string()].into();
        let found = store.group_find_implicit_by_names(collection, &names).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "work");
    }

    #[test]
    fn test_group_delete_implicit_skips_explicit_and_foreign() {
        let store = MockStore::new();
        let collection = CollectionId::now_v7();
        let implicit = Group::implicit(GroupId::now_v7(), collection, "work");
        let foreign = Group::implicit(GroupId::now_v7(), CollectionId::now_v7(), "work");
        let explicit = make_explicit_group(collection, "/team.vcf");
        for g in [&implicit, &foreign, &explicit] {
            store.group_insert(g).unwrap();
        }

        let deleted = store
            .group_delete_implicit(
                collection,
                &[implicit.group_id, foreign.group_id, explicit.group_id],
            )
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.group_count(), 2);
    }

    // ========================================================================
    // Membership Tests
    // ========================================================================

    #[test]
    fn test_membership_insert_rejects_unknown_group() {
        let store = MockStore::new();
        let collection = CollectionId::now_v7();
        let ind = make_individual(collection, "/a.vcf", "a");
        store.individual_insert(&ind).unwrap();

        assert!(store
            .membership_insert(ind.individual_id, &[GroupId::now_v7()])
            .is_err());
    }

    #[test]
    fn test_membership_groups_of_restricted() {
        let store = MockStore::new();
        let collection = CollectionId::now_v7();
        let ind = make_individual(collection, "/a.vcf", "a");
        let work = Group::implicit(GroupId::now_v7(), collection, "work");
        let team = make_explicit_group(collection, "/team.vcf");
        store.individual_insert(&ind).unwrap();
        store.group_insert(&work).unwrap();
        store.group_insert(&team).unwrap();
        store
            .membership_insert(ind.individual_id, &[work.group_id, team.group_id])
            .unwrap();

        let among: HashSet<GroupId> = [work.group_id].into();
        let groups = store
            .membership_groups_of(ind.individual_id, &among)
            .unwrap();
        assert_eq!(groups, vec![work.group_id]);
    }

    #[test]
    fn test_membership_insert_by_uid() {
        let store = MockStore::new();
        let collection = CollectionId::now_v7();
        let a = make_individual(collection, "/a.vcf", "a");
        let b = make_individual(collection, "/b.vcf", "b");
        let other = make_individual(CollectionId::now_v7(), "/c.vcf", "c");
        let team = make_explicit_group(collection, "/team.vcf");
        for ind in [&a, &b, &other] {
            store.individual_insert(ind).unwrap();
        }
        store.group_insert(&team).unwrap();

        let uids: BTreeSet<String> =
            ["a".to_string(), "c".to_string(), "missing".to_string()].into();
        let inserted = store
            .membership_insert_by_uid(collection, team.group_id, &uids)
            .unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(
            store.membership_members_of(team.group_id).unwrap(),
            vec![a.individual_id]
        );
    }

    #[test]
    fn test_group_ids_with_members() {
        let store = MockStore::new();
        let collection = CollectionId::now_v7();
        let ind = make_individual(collection, "/a.vcf", "a");
        let busy = Group::implicit(GroupId::now_v7(), collection, "busy");
        let empty = Group::implicit(GroupId::now_v7(), collection, "empty");
        store.individual_insert(&ind).unwrap();
        store.group_insert(&busy).unwrap();
        store.group_insert(&empty).unwrap();
        store
            .membership_insert(ind.individual_id, &[busy.group_id])
            .unwrap();

        let candidates: HashSet<GroupId> = [busy.group_id, empty.group_id].into();
        let alive = store.group_ids_with_members(&candidates).unwrap();
        assert_eq!(alive, [busy.group_id].into());
    }

    // ========================================================================
    // Transaction and Failure Injection Tests
    // ========================================================================

    #[test]
    fn test_rollback_restores_tables() {
        let store = MockStore::new();
        let collection = CollectionId::now_v7();
        store
            .individual_insert(&make_individual(collection, "/a.vcf", "a"))
            .unwrap();

        store.begin().unwrap();
        store
            .individual_insert(&make_individual(collection, "/b.vcf", "b"))
            .unwrap();
        assert_eq!(store.individual_count(), 2);
        store.rollback().unwrap();

        assert_eq!(store.individual_count(), 1);
    }

    #[test]
    fn test_commit_without_begin_fails() {
        let store = MockStore::new();
        assert!(store.commit().is_err());
        assert!(store.rollback().is_err());
    }

    #[test]
    fn test_fail_on_and_clear() {
        let store = MockStore::new();
        let collection = CollectionId::now_v7();
        store.fail_on(FailPoint::IndividualInsert);
        assert!(store
            .individual_insert(&make_individual(collection, "/a.vcf", "a"))
            .is_err());

        store.clear_failures();
        assert!(store
            .individual_insert(&make_individual(collection, "/a.vcf", "a"))
            .is_ok());
    }

    #[test]
    fn test_operation_count() {
        let store = MockStore::new();
        assert_eq!(store.operation_count(), 0);
        let _ = store.individual_get(IndividualId::now_v7());
        assert_eq!(store.operation_count(), 1);
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use cardmirror_core::{EntityIdType, IndividualSummary};
    use proptest::prelude::*;

    proptest! {
        /// Rolled-back inserts never become visible.
        #[test]
        fn prop_rollback_discards_inserts(
            uris in prop::collection::btree_set("/[a-z]{1,8}\\.vcf", 1..10),
        ) {
            let store = MockStore::new();
            let collection = CollectionId::now_v7();

            store.begin().unwrap();
            for uri in &uris {
                let ind = Individual::new(
                    IndividualId::now_v7(),
                    collection,
                    uri.as_str(),
                    "\"1\"",
                    Vec::new(),
                    IndividualSummary::default(),
                );
                store.individual_insert(&ind).unwrap();
            }
            prop_assert_eq!(store.individual_count(), uris.len());
            store.rollback().unwrap();

            prop_assert_eq!(store.individual_count(), 0);
        }

        /// Edge insertion is idempotent.
        #[test]
        fn prop_membership_insert_idempotent(repeats in 1usize..5) {
            let store = MockStore::new();
            let collection = CollectionId::now_v7();
            let ind = Individual::new(
                IndividualId::now_v7(),
                collection,
                "/a.vcf",
                "\"1\"",
                Vec::new(),
                IndividualSummary::default(),
            );
            let group = Group::implicit(GroupId::now_v7(), collection, "work");
            store.individual_insert(&ind).unwrap();
            store.group_insert(&group).unwrap();

            for _ in 0..repeats {
                store.membership_insert(ind.individual_id, &[group.group_id]).unwrap();
            }
            prop_assert_eq!(store.membership_count(), 1);
        }
    }
}
