//! Pre-session view of the local mirror.
//!
//! [`LocalSnapshot`] is loaded once when a session starts and never changes.
//! [`LiveIndex`] starts as a copy of it and tracks the session's own writes,
//! so that a URI deleted and recreated within one session is treated as new.

use cardmirror_core::{CollectionId, GroupId, GroupKind, IndividualId, MirrorResult};
use cardmirror_storage::ContactStore;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Local identifier and version tag of a remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTag<Id> {
    pub id: Id,
    pub version_tag: String,
}

/// URI-keyed indexes of individuals and explicit groups plus the set of
/// implicit group IDs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalSnapshot {
    individuals: HashMap<String, ObjectTag<IndividualId>>,
    explicit_groups: HashMap<String, ObjectTag<GroupId>>,
    implicit_groups: HashSet<GroupId>,
}

impl LocalSnapshot {
    /// Load the complete local state of one collection.
    pub fn load<S: ContactStore + ?Sized>(
        store: &S,
        collection_id: CollectionId,
    ) -> MirrorResult<Self> {
        let individuals = store
            .individual_list_tags(collection_id)?
            .into_iter()
            .map(|row| {
                (
                    row.uri,
                    ObjectTag {
                        id: row.id,
                        version_tag: row.version_tag,
                    },
                )
            })
            .collect();

        let explicit_groups = store
            .group_list_tags(collection_id)?
            .into_iter()
            .map(|row| {
                (
                    row.uri,
                    ObjectTag {
                        id: row.id,
                        version_tag: row.version_tag,
                    },
                )
            })
            .collect();

        let implicit_groups = store
            .group_list_ids_by_kind(collection_id, GroupKind::Implicit)?
            .into_iter()
            .collect();

        let snapshot = Self {
            individuals,
            explicit_groups,
            implicit_groups,
        };

        tracing::debug!(
            collection_id = %collection_id,
            individuals = snapshot.individuals.len(),
            explicit_groups = snapshot.explicit_groups.len(),
            implicit_groups = snapshot.implicit_groups.len(),
            "Loaded local snapshot"
        );

        Ok(snapshot)
    }

    pub fn individual(&self, uri: &str) -> Option<&ObjectTag<IndividualId>> {
        self.individuals.get(uri)
    }

    pub fn explicit_group(&self, uri: &str) -> Option<&ObjectTag<GroupId>> {
        self.explicit_groups.get(uri)
    }

    pub fn implicit_groups(&self) -> &HashSet<GroupId> {
        &self.implicit_groups
    }

    pub fn individual_count(&self) -> usize {
        self.individuals.len()
    }

    pub fn explicit_group_count(&self) -> usize {
        self.explicit_groups.len()
    }

    /// URI → version tag across individuals and explicit groups.
    pub fn existing_tags(&self) -> BTreeMap<String, String> {
        self.individuals
            .iter()
            .map(|(uri, tag)| (uri.clone(), tag.version_tag.clone()))
            .chain(
                self.explicit_groups
                    .iter()
                    .map(|(uri, tag)| (uri.clone(), tag.version_tag.clone())),
            )
            .collect()
    }

    /// Working copy for a session.
    pub fn live_index(&self) -> LiveIndex {
        LiveIndex {
            individuals: self.individuals.clone(),
            explicit_groups: self.explicit_groups.clone(),
            implicit_groups: self.implicit_groups.clone(),
        }
    }
}

/// Session-local, mutable copy of the snapshot indexes.
///
/// Only updated after the corresponding unit of work has committed.
#[derive(Debug, Clone, Default)]
pub struct LiveIndex {
    individuals: HashMap<String, ObjectTag<IndividualId>>,
    explicit_groups: HashMap<String, ObjectTag<GroupId>>,
    implicit_groups: HashSet<GroupId>,
}

impl LiveIndex {
    pub fn individual_id(&self, uri: &str) -> Option<IndividualId> {
        self.individuals.get(uri).map(|t| t.id)
    }

    pub fn explicit_group_id(&self, uri: &str) -> Option<GroupId> {
        self.explicit_groups.get(uri).map(|t| t.id)
    }

    pub fn implicit_groups(&self) -> &HashSet<GroupId> {
        &self.implicit_groups
    }

    pub fn upsert_individual(&mut self, uri: &str, id: IndividualId, version_tag: &str) {
        self.individuals.insert(
            uri.to_string(),
            ObjectTag {
                id,
                version_tag: version_tag.to_string(),
            },
        );
    }

    pub fn remove_individual(&mut self, uri: &str) -> Option<IndividualId> {
        self.individuals.remove(uri).map(|t| t.id)
    }

    pub fn upsert_explicit_group(&mut self, uri: &str, id: GroupId, version_tag: &str) {
        self.explicit_groups.insert(
            uri.to_string(),
            ObjectTag {
                id,
                version_tag: version_tag.to_string(),
            },
        );
    }

    pub fn remove_explicit_group(&mut self, uri: &str) -> Option<GroupId> {
        self.explicit_groups.remove(uri).map(|t| t.id)
    }

    /// Record implicit groups created during the session.
    pub fn add_implicit_groups(&mut self, ids: impl IntoIterator<Item = GroupId>) {
        self.implicit_groups.extend(ids);
    }

    pub fn remove_implicit_groups<'a>(&mut self, ids: impl IntoIterator<Item = &'a GroupId>) {
        for id in ids {
            self.implicit_groups.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardmirror_core::{EntityIdType, Group, Individual, IndividualSummary};
    use cardmirror_storage::MockStore;

    fn seed(store: &MockStore, collection: CollectionId) -> (IndividualId, GroupId, GroupId) {
        let ind = Individual::new(
            IndividualId::now_v7(),
            collection,
            "/a.vcf",
            "\"a1\"",
            Vec::new(),
            IndividualSummary::default(),
        );
        let team = Group::explicit(
            GroupId::now_v7(),
            collection,
            "Team",
            "/team.vcf",
            "\"t1\"",
            Vec::new(),
        );
        let work = Group::implicit(GroupId::now_v7(), collection, "work");
        store.individual_insert(&ind).unwrap();
        store.group_insert(&team).unwrap();
        store.group_insert(&work).unwrap();
        (ind.individual_id, team.group_id, work.group_id)
    }

    #[test]
    fn test_load_partitions_by_kind() {
        let store = MockStore::new();
        let collection = CollectionId::now_v7();
        let (ind, team, work) = seed(&store, collection);

        let snapshot = LocalSnapshot::load(&store, collection).unwrap();
        assert_eq!(snapshot.individual("/a.vcf").map(|t| t.id), Some(ind));
        assert_eq!(snapshot.explicit_group("/team.vcf").map(|t| t.id), Some(team));
        assert!(snapshot.implicit_groups().contains(&work));
        assert!(!snapshot.implicit_groups().contains(&team));
    }

    #[test]
    fn test_existing_tags_excludes_implicit_groups() {
        let store = MockStore::new();
        let collection = CollectionId::now_v7();
        seed(&store, collection);

        let tags = LocalSnapshot::load(&store, collection)
            .unwrap()
            .existing_tags();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get("/a.vcf").map(String::as_str), Some("\"a1\""));
        assert_eq!(tags.get("/team.vcf").map(String::as_str), Some("\"t1\""));
    }

    #[test]
    fn test_load_ignores_other_collections() {
        let store = MockStore::new();
        seed(&store, CollectionId::now_v7());

        let snapshot = LocalSnapshot::load(&store, CollectionId::now_v7()).unwrap();
        assert_eq!(snapshot, LocalSnapshot::default());
    }

    #[test]
    fn test_live_index_diverges_from_snapshot() {
        let store = MockStore::new();
        let collection = CollectionId::now_v7();
        let (ind, _, _) = seed(&store, collection);

        let snapshot = LocalSnapshot::load(&store, collection).unwrap();
        let mut live = snapshot.live_index();
        assert_eq!(live.remove_individual("/a.vcf"), Some(ind));
        assert_eq!(live.individual_id("/a.vcf"), None);

        // The pre-session view is untouched
        assert!(snapshot.individual("/a.vcf").is_some());
    }
}
