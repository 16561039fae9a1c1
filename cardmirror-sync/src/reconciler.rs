//! Change reconciliation session.
//!
//! A [`Reconciler`] is one session against one collection. It loads the
//! local snapshot on construction, applies individual changes as they
//! arrive, queues group objects until every individual is in place, and in
//! [`Reconciler::finalize`] writes the queued groups and removes implicit
//! groups that lost their last member.
//!
//! # Units of work
//!
//! ```text
//! delete individual   [edges + row]
//! delete group        [edges + row]
//! change individual   [row] then [implicit groups + edge diff]
//! finalize            [group row + edges] per group, then [empty implicit groups]
//! ```
//!
//! No error escapes a single object's processing. Failures roll back the
//! affected unit, are recorded in the [`ReconcileReport`] and mark the
//! session degraded.

use crate::membership::{MembershipDiff, MembershipResolver};
use crate::report::{GcSummary, ObjectAction, ReconcileReport};
use crate::snapshot::{LiveIndex, LocalSnapshot};
use cardmirror_core::{
    CollectionId, ContactRecord, EntityIdType, EntityType, Group, GroupId, Individual,
    IndividualId, IndividualSummary, MemberReference, MirrorResult, RecordCodec, SyncConfig,
};
use cardmirror_storage::{in_transaction, ContactStore};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// A group object waiting for finalize.
#[derive(Debug, Clone)]
struct DeferredGroup {
    uri: String,
    version_tag: String,
    record: ContactRecord,
}

/// One reconciliation session.
pub struct Reconciler<'s, S: ContactStore + ?Sized, C: RecordCodec + ?Sized> {
    store: &'s S,
    codec: &'s C,
    config: SyncConfig,
    snapshot: LocalSnapshot,
    live: LiveIndex,
    deferred: Vec<DeferredGroup>,
    gc_candidates: BTreeSet<GroupId>,
    report: ReconcileReport,
    changes_seen: bool,
}

impl<'s, S: ContactStore + ?Sized, C: RecordCodec + ?Sized> Reconciler<'s, S, C> {
    /// Start a session: validate the config and load the local snapshot.
    pub fn begin(store: &'s S, codec: &'s C, config: SyncConfig) -> MirrorResult<Self> {
        config.validate()?;
        let snapshot = LocalSnapshot::load(store, config.collection_id)?;
        let live = snapshot.live_index();

        tracing::info!(
            collection_id = %config.collection_id,
            individuals = snapshot.individual_count(),
            explicit_groups = snapshot.explicit_group_count(),
            implicit_groups = snapshot.implicit_groups().len(),
            "Reconciliation session started"
        );

        Ok(Self {
            store,
            codec,
            config,
            snapshot,
            live,
            deferred: Vec::new(),
            gc_candidates: BTreeSet::new(),
            report: ReconcileReport::new(),
            changes_seen: false,
        })
    }

    pub fn collection_id(&self) -> CollectionId {
        self.config.collection_id
    }

    pub fn report(&self) -> &ReconcileReport {
        &self.report
    }

    pub fn is_degraded(&self) -> bool {
        self.report.degraded
    }

    /// Group objects queued for finalize.
    pub fn pending_groups(&self) -> usize {
        self.deferred.len()
    }

    /// Pre-session URI → version tag of individuals and explicit groups.
    pub fn existing_tags(&self) -> BTreeMap<String, String> {
        self.snapshot.existing_tags()
    }

    /// Mark the session degraded for a failure outside object processing.
    pub fn record_session_error(&mut self, error: impl Into<String>) {
        self.report.record_session_error(error);
    }

    // ========================================================================
    // NOTIFICATIONS
    // ========================================================================

    /// A remote object was added or modified. `None` means the payload
    /// could not be parsed.
    pub fn on_changed(&mut self, uri: &str, version_tag: &str, record: Option<ContactRecord>) {
        self.changes_seen = true;

        let Some(record) = record else {
            tracing::warn!(uri, "Skipping unparseable object");
            self.report.record(
                uri,
                None,
                ObjectAction::Skipped,
                Some("unparseable payload".to_string()),
            );
            return;
        };

        if record.is_group() {
            tracing::debug!(uri, "Deferring group object");
            self.deferred.push(DeferredGroup {
                uri: uri.to_string(),
                version_tag: version_tag.to_string(),
                record,
            });
            self.report
                .record(uri, Some(EntityType::Group), ObjectAction::Deferred, None);
            return;
        }

        self.upsert_individual(uri, version_tag, record);
    }

    /// A remote object was added or modified, as a raw payload.
    pub fn on_payload(&mut self, uri: &str, version_tag: &str, raw: &[u8]) {
        match self.codec.decode(raw) {
            Ok(record) => self.on_changed(uri, version_tag, Some(record)),
            Err(e) => {
                self.changes_seen = true;
                tracing::warn!(uri, error = %e, "Skipping unparseable object");
                self.report
                    .record(uri, None, ObjectAction::Skipped, Some(e.to_string()));
            }
        }
    }

    /// A remote object was removed.
    pub fn on_deleted(&mut self, uri: &str) {
        if self.changes_seen && self.config.warn_on_out_of_order_delete {
            tracing::warn!(uri, "Delete notification arrived after a change");
        }

        // A group object queued earlier this session must not be written at
        // finalize.
        let queued = self.deferred.len();
        self.deferred.retain(|group| group.uri != uri);
        let dropped = queued - self.deferred.len();
        if dropped > 0 {
            tracing::debug!(uri, dropped, "Dropped deferred group object");
        }

        if let Some(individual_id) = self.live.individual_id(uri) {
            let implicit = self.live.implicit_groups();
            match in_transaction(self.store, |tx| {
                remove_individual_rows(&**tx, individual_id, implicit)
            }) {
                Ok(former_groups) => {
                    self.gc_candidates.extend(former_groups);
                    self.live.remove_individual(uri);
                    tracing::debug!(uri, individual_id = %individual_id, "Deleted individual");
                    self.report.record(
                        uri,
                        Some(EntityType::Individual),
                        ObjectAction::Deleted,
                        None,
                    );
                }
                Err(e) => {
                    tracing::error!(uri, error = %e, "Failed to delete individual");
                    self.report.record(
                        uri,
                        Some(EntityType::Individual),
                        ObjectAction::Failed,
                        Some(e.to_string()),
                    );
                }
            }
        } else if let Some(group_id) = self.live.explicit_group_id(uri) {
            match in_transaction(self.store, |tx| remove_explicit_group_rows(&**tx, group_id)) {
                Ok(()) => {
                    self.live.remove_explicit_group(uri);
                    tracing::debug!(uri, group_id = %group_id, "Deleted group");
                    self.report
                        .record(uri, Some(EntityType::Group), ObjectAction::Deleted, None);
                }
                Err(e) => {
                    tracing::error!(uri, error = %e, "Failed to delete group");
                    self.report.record(
                        uri,
                        Some(EntityType::Group),
                        ObjectAction::Failed,
                        Some(e.to_string()),
                    );
                }
            }
        } else if dropped > 0 {
            self.report
                .record(uri, Some(EntityType::Group), ObjectAction::Deleted, None);
        } else {
            tracing::info!(uri, "Delete for unknown URI ignored");
            self.report.record(uri, None, ObjectAction::Ignored, None);
        }
    }

    // ========================================================================
    // FINALIZE
    // ========================================================================

    /// Write deferred group objects, then remove implicit groups left empty.
    pub fn finalize(mut self) -> ReconcileReport {
        let deferred = std::mem::take(&mut self.deferred);
        if !deferred.is_empty() {
            tracing::debug!(count = deferred.len(), "Processing deferred group objects");
        }
        for group in deferred {
            self.upsert_group(group);
        }

        self.collect_empty_implicit_groups();

        self.report.finish();
        tracing::info!(
            collection_id = %self.config.collection_id,
            degraded = self.report.degraded,
            objects = self.report.outcomes.len(),
            gc_removed = self.report.gc.removed,
            "Reconciliation session finished"
        );
        self.report
    }

    // ========================================================================
    // INDIVIDUALS
    // ========================================================================

    fn upsert_individual(&mut self, uri: &str, version_tag: &str, mut record: ContactRecord) {
        // The codec may normalize the record; persist what it produced.
        let body = match self.codec.encode(&mut record) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(uri, error = %e, "Failed to encode individual");
                self.report.record(
                    uri,
                    Some(EntityType::Individual),
                    ObjectAction::Failed,
                    Some(e.to_string()),
                );
                return;
            }
        };

        let existing = self.live.individual_id(uri);
        let displaced_group = self.live.explicit_group_id(uri);
        let individual_id = existing.unwrap_or_else(IndividualId::now_v7);
        let individual = Individual::new(
            individual_id,
            self.config.collection_id,
            uri,
            version_tag,
            body,
            IndividualSummary::from_record(&record),
        );

        let written = in_transaction(self.store, |tx| {
            if let Some(group_id) = displaced_group {
                remove_explicit_group_rows(&**tx, group_id)?;
            }
            match existing {
                Some(_) => tx.individual_update(&individual),
                None => tx.individual_insert(&individual),
            }
        });
        if let Err(e) = written {
            tracing::error!(uri, error = %e, "Failed to write individual");
            self.report.record(
                uri,
                Some(EntityType::Individual),
                ObjectAction::Failed,
                Some(e.to_string()),
            );
            return;
        }

        if displaced_group.is_some() {
            tracing::info!(uri, "Group object replaced by individual");
            self.live.remove_explicit_group(uri);
        }
        self.live.upsert_individual(uri, individual_id, version_tag);
        tracing::debug!(
            uri,
            individual_id = %individual_id,
            content_hash = %individual.content_hash_hex(),
            "Wrote individual"
        );

        let action = if existing.is_some() {
            ObjectAction::Updated
        } else {
            ObjectAction::Created
        };

        let synced =
            self.sync_implicit_memberships(individual_id, existing.is_some(), &record.categories);
        match synced {
            Ok(()) => {
                self.report
                    .record(uri, Some(EntityType::Individual), action, None);
            }
            Err(e) => {
                tracing::error!(uri, error = %e, "Membership update rolled back");
                self.report.record(
                    uri,
                    Some(EntityType::Individual),
                    ObjectAction::PartiallyApplied,
                    Some(e.to_string()),
                );
            }
        }
    }

    /// Second unit of work of an individual upsert.
    fn sync_implicit_memberships(
        &mut self,
        individual_id: IndividualId,
        had_row: bool,
        labels: &[String],
    ) -> MirrorResult<()> {
        let resolver =
            MembershipResolver::new(self.config.collection_id, self.config.max_label_len);
        let implicit = self.live.implicit_groups();

        let (created, diff) = in_transaction(self.store, |tx| {
            let resolved = resolver.resolve_implicit_groups(tx, labels)?;
            let previous: BTreeSet<GroupId> = if had_row {
                tx.membership_groups_of(individual_id, implicit)?
                    .into_iter()
                    .collect()
            } else {
                BTreeSet::new()
            };

            let diff = MembershipDiff::compute(&previous, &resolved.group_ids);
            if !diff.removed.is_empty() {
                tx.membership_delete(individual_id, &diff.removed)?;
            }
            if !diff.added.is_empty() {
                tx.membership_insert(individual_id, &diff.added)?;
            }
            Ok((resolved.created, diff))
        })?;

        if !diff.is_empty() {
            tracing::debug!(
                individual_id = %individual_id,
                added = diff.added.len(),
                removed = diff.removed.len(),
                "Updated implicit memberships"
            );
        }
        self.live.add_implicit_groups(created);
        self.gc_candidates.extend(diff.removed);
        Ok(())
    }

    // ========================================================================
    // GROUP OBJECTS
    // ========================================================================

    fn upsert_group(&mut self, deferred: DeferredGroup) {
        let DeferredGroup {
            uri,
            version_tag,
            mut record,
        } = deferred;

        let body = match self.codec.encode(&mut record) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(uri = %uri, error = %e, "Failed to encode group");
                self.report.record(
                    &uri,
                    Some(EntityType::Group),
                    ObjectAction::Failed,
                    Some(e.to_string()),
                );
                return;
            }
        };

        let mut malformed = 0usize;
        let member_keys: BTreeSet<String> = record
            .members
            .iter()
            .filter_map(|raw| {
                match MemberReference::parse(raw, &self.config.member_reference_scheme) {
                    Ok(reference) => Some(reference.key().to_string()),
                    Err(e) => {
                        tracing::warn!(
                            uri = %uri,
                            error = %e,
                            "Skipping malformed member reference"
                        );
                        malformed += 1;
                        None
                    }
                }
            })
            .collect();
        self.report.members.malformed += malformed;

        let existing = self.live.explicit_group_id(&uri);
        let displaced_individual = self.live.individual_id(&uri);
        let group_id = existing.unwrap_or_else(GroupId::now_v7);
        let name = record
            .formatted_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(uri.as_str())
            .to_string();
        let group = Group::explicit(
            group_id,
            self.config.collection_id,
            name,
            uri.as_str(),
            version_tag.as_str(),
            body,
        );

        let collection_id = self.config.collection_id;
        let implicit = self.live.implicit_groups();
        let result = in_transaction(self.store, |tx| {
            let former_groups = match displaced_individual {
                Some(individual_id) => remove_individual_rows(&**tx, individual_id, implicit)?,
                None => Vec::new(),
            };
            match existing {
                Some(_) => tx.group_update(&group)?,
                None => tx.group_insert(&group)?,
            }
            tx.membership_delete_for_group(group_id)?;
            let resolved = if member_keys.is_empty() {
                0
            } else {
                tx.membership_insert_by_uid(collection_id, group_id, &member_keys)?
            };
            Ok((former_groups, resolved))
        });

        match result {
            Ok((former_groups, resolved)) => {
                if displaced_individual.is_some() {
                    tracing::info!(uri = %uri, "Individual replaced by group object");
                    self.live.remove_individual(&uri);
                }
                self.gc_candidates.extend(former_groups);
                self.live.upsert_explicit_group(&uri, group_id, &version_tag);

                let unresolved = member_keys.len().saturating_sub(resolved);
                self.report.members.resolved += resolved;
                self.report.members.unresolved += unresolved;
                tracing::debug!(
                    uri = %uri,
                    group_id = %group_id,
                    members = resolved,
                    unresolved,
                    "Wrote group"
                );

                let action = if existing.is_some() {
                    ObjectAction::Updated
                } else {
                    ObjectAction::Created
                };
                self.report.record(&uri, Some(EntityType::Group), action, None);
            }
            Err(e) => {
                tracing::error!(uri = %uri, error = %e, "Failed to write group, rolled back");
                self.report.record(
                    &uri,
                    Some(EntityType::Group),
                    ObjectAction::Failed,
                    Some(e.to_string()),
                );
            }
        }
    }

    // ========================================================================
    // GARBAGE COLLECTION
    // ========================================================================

    fn collect_empty_implicit_groups(&mut self) {
        if self.gc_candidates.is_empty() {
            return;
        }

        let candidates: HashSet<GroupId> = self.gc_candidates.iter().copied().collect();
        let collection_id = self.config.collection_id;
        let prune = self.config.prune_empty_implicit_groups;

        let result = in_transaction(self.store, |tx| {
            let alive = tx.group_ids_with_members(&candidates)?;
            let mut empty: Vec<GroupId> = candidates.difference(&alive).copied().collect();
            empty.sort();
            let removed = if prune && !empty.is_empty() {
                tx.group_delete_implicit(collection_id, &empty)?
            } else {
                0
            };
            Ok((alive.len(), empty, removed))
        });

        match result {
            Ok((retained, empty, removed)) => {
                if prune {
                    self.live.remove_implicit_groups(&empty);
                } else if !empty.is_empty() {
                    tracing::info!(
                        count = empty.len(),
                        "Empty implicit groups kept, pruning disabled"
                    );
                }
                self.report.gc = GcSummary {
                    candidates: candidates.len(),
                    retained,
                    removed,
                    skipped: if prune { 0 } else { empty.len() },
                };
                tracing::debug!(
                    candidates = candidates.len(),
                    retained,
                    removed,
                    "Implicit group cleanup finished"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Implicit group cleanup failed, rolled back");
                self.report.gc.candidates = candidates.len();
                self.report
                    .record_session_error(format!("implicit group cleanup: {e}"));
            }
        }
    }
}

/// Delete an individual with its edges. Returns the implicit groups it
/// belonged to.
fn remove_individual_rows<S: ContactStore + ?Sized>(
    store: &S,
    individual_id: IndividualId,
    implicit_groups: &HashSet<GroupId>,
) -> MirrorResult<Vec<GroupId>> {
    let former_groups = store.membership_groups_of(individual_id, implicit_groups)?;
    store.membership_delete_for_individual(individual_id)?;
    store.individual_delete(individual_id)?;
    Ok(former_groups)
}

/// Delete an explicit group with its edges.
fn remove_explicit_group_rows<S: ContactStore + ?Sized>(
    store: &S,
    group_id: GroupId,
) -> MirrorResult<()> {
    store.membership_delete_for_group(group_id)?;
    store.group_delete(group_id)?;
    Ok(())
}
