//! Label-derived ("implicit") group membership.
//!
//! [`MembershipResolver`] is the only code path that creates implicit
//! groups. [`MembershipDiff`] turns an individual's old and new group sets
//! into the edges to delete and insert.

use cardmirror_core::{CollectionId, EntityIdType, Group, GroupId, MirrorResult};
use cardmirror_storage::{ContactStore, Transaction};
use std::collections::{BTreeSet, HashSet};

/// Trim labels, drop blanks, truncate to `max_len` chars and dedupe.
pub fn normalize_labels<I, T>(labels: I, max_len: usize) -> BTreeSet<String>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    labels
        .into_iter()
        .filter_map(|label| {
            let trimmed = label.as_ref().trim();
            if trimmed.is_empty() {
                return None;
            }
            Some(trimmed.chars().take(max_len).collect::<String>().trim_end().to_string())
        })
        .collect()
}

/// Implicit groups matching a label set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedGroups {
    /// Every matching group, existing or new
    pub group_ids: BTreeSet<GroupId>,
    /// Groups created by this resolution
    pub created: Vec<GroupId>,
}

/// Resolves labels to implicit groups of one collection.
#[derive(Debug, Clone, Copy)]
pub struct MembershipResolver {
    collection_id: CollectionId,
    max_label_len: usize,
}

impl MembershipResolver {
    pub fn new(collection_id: CollectionId, max_label_len: usize) -> Self {
        Self {
            collection_id,
            max_label_len,
        }
    }

    /// Resolve `labels` as part of the caller's open unit of work, creating
    /// the groups that do not exist yet.
    ///
    /// Returns without touching storage when no usable label remains.
    pub fn resolve_implicit_groups<S, T>(
        &self,
        tx: &Transaction<'_, S>,
        labels: &[T],
    ) -> MirrorResult<ResolvedGroups>
    where
        S: ContactStore + ?Sized,
        T: AsRef<str>,
    {
        let names = normalize_labels(labels, self.max_label_len);
        if names.is_empty() {
            return Ok(ResolvedGroups::default());
        }
        resolve_names(&**tx, self.collection_id, &names)
    }
}

fn resolve_names<S: ContactStore + ?Sized>(
    store: &S,
    collection_id: CollectionId,
    names: &BTreeSet<String>,
) -> MirrorResult<ResolvedGroups> {
    let existing = store.group_find_implicit_by_names(collection_id, names)?;

    let found: HashSet<&str> = existing.iter().map(|g| g.name.as_str()).collect();
    let mut resolved = ResolvedGroups {
        group_ids: existing.iter().map(|g| g.group_id).collect(),
        created: Vec::new(),
    };

    for name in names.iter().filter(|name| !found.contains(name.as_str())) {
        let group = Group::implicit(GroupId::now_v7(), collection_id, name.as_str());
        store.group_insert(&group)?;
        tracing::debug!(group_id = %group.group_id, name = %name, "Created implicit group");
        resolved.group_ids.insert(group.group_id);
        resolved.created.push(group.group_id);
    }

    Ok(resolved)
}

// ============================================================================
// MEMBERSHIP DIFF
// ============================================================================

/// Edges to add and remove for one individual.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub added: Vec<GroupId>,
    pub removed: Vec<GroupId>,
}

impl MembershipDiff {
    pub fn compute(old: &BTreeSet<GroupId>, new: &BTreeSet<GroupId>) -> Self {
        Self {
            added: new.difference(old).copied().collect(),
            removed: old.difference(new).copied().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Applying a diff to the old set yields the new set.
        #[test]
        fn prop_diff_applies(old in prop::collection::btree_set(0u8..16, 0..8),
                             new in prop::collection::btree_set(0u8..16, 0..8)) {
            let ids: Vec<GroupId> = (0..16).map(|_| GroupId::now_v7()).collect();
            let old: BTreeSet<GroupId> = old.into_iter().map(|i| ids[i as usize]).collect();
            let new: BTreeSet<GroupId> = new.into_iter().map(|i| ids[i as usize]).collect();

            let diff = MembershipDiff::compute(&old, &new);
            let mut applied = old.clone();
            for id in &diff.removed {
                applied.remove(id);
            }
            applied.extend(diff.added.iter().copied());
            prop_assert_eq!(applied, new);
        }

        /// Normalized labels are never blank and never padded.
        #[test]
        fn prop_normalized_labels_are_trimmed(
            labels in prop::collection::vec("[ a-z]{0,12}", 0..10),
        ) {
            for label in normalize_labels(&labels, 8) {
                prop_assert!(!label.is_empty());
                prop_assert_eq!(label.trim(), label.as_str());
                prop_assert!(label.chars().count() <= 8);
            }
        }
    }
}
