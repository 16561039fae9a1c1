//! Change discovery seam and session driver.
//!
//! A [`ChangeSource`] pushes notifications into a [`ChangeSink`]: every
//! delete first, then every change. [`run_session`] wires a source to a
//! fresh [`Reconciler`] and returns the finalized report.

use crate::fallback::{FallbackEnumerator, TagDiff};
use crate::reconciler::Reconciler;
use crate::report::ReconcileReport;
use cardmirror_core::{ContactRecord, MirrorResult, RecordCodec, SyncConfig};
use cardmirror_storage::ContactStore;
use std::collections::BTreeMap;

/// Receiver of change notifications.
pub trait ChangeSink {
    /// Object added or modified; `None` when the payload did not parse.
    fn on_changed(&mut self, uri: &str, version_tag: &str, record: Option<ContactRecord>);

    /// Object added or modified, still encoded.
    fn on_payload(&mut self, uri: &str, version_tag: &str, raw: &[u8]);

    fn on_deleted(&mut self, uri: &str);
}

impl<S: ContactStore + ?Sized, C: RecordCodec + ?Sized> ChangeSink for Reconciler<'_, S, C> {
    fn on_changed(&mut self, uri: &str, version_tag: &str, record: Option<ContactRecord>) {
        Reconciler::on_changed(self, uri, version_tag, record);
    }

    fn on_payload(&mut self, uri: &str, version_tag: &str, raw: &[u8]) {
        Reconciler::on_payload(self, uri, version_tag, raw);
    }

    fn on_deleted(&mut self, uri: &str) {
        Reconciler::on_deleted(self, uri);
    }
}

/// How a source discovers what changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryMode {
    /// The source knows the changes since the last session.
    #[default]
    Incremental,
    /// The source lists the whole remote collection and compares it with
    /// the local tags.
    FullScan,
}

/// Change-discovery collaborator.
pub trait ChangeSource {
    fn mode(&self) -> DiscoveryMode;

    /// Push every notification of this session into `sink`, deletes first.
    ///
    /// `existing` carries the local tags when [`ChangeSource::mode`] is
    /// [`DiscoveryMode::FullScan`].
    fn deliver(
        &mut self,
        existing: Option<&BTreeMap<String, String>>,
        sink: &mut dyn ChangeSink,
    ) -> MirrorResult<()>;
}

/// One remote object as seen by a [`ChangeBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub uri: String,
    pub version_tag: String,
    pub payload: Vec<u8>,
}

/// In-memory [`ChangeSource`].
///
/// In incremental mode the recorded deletes and changes are delivered as
/// given. In full-scan mode the changes are the complete remote listing;
/// deletes are derived from the local tags and unchanged objects are
/// skipped.
#[derive(Debug, Clone, Default)]
pub struct ChangeBatch {
    mode: DiscoveryMode,
    changes: Vec<PendingChange>,
    deletes: Vec<String>,
}

impl ChangeBatch {
    pub fn incremental() -> Self {
        Self::default()
    }

    pub fn full_scan() -> Self {
        Self {
            mode: DiscoveryMode::FullScan,
            ..Self::default()
        }
    }

    pub fn changed(
        mut self,
        uri: impl Into<String>,
        version_tag: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        self.changes.push(PendingChange {
            uri: uri.into(),
            version_tag: version_tag.into(),
            payload: payload.into(),
        });
        self
    }

    /// Ignored in full-scan mode.
    pub fn deleted(mut self, uri: impl Into<String>) -> Self {
        self.deletes.push(uri.into());
        self
    }

    pub fn len(&self) -> usize {
        self.changes.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remote_tags(&self) -> BTreeMap<String, String> {
        self.changes
            .iter()
            .map(|c| (c.uri.clone(), c.version_tag.clone()))
            .collect()
    }
}

impl ChangeSource for ChangeBatch {
    fn mode(&self) -> DiscoveryMode {
        self.mode
    }

    fn deliver(
        &mut self,
        existing: Option<&BTreeMap<String, String>>,
        sink: &mut dyn ChangeSink,
    ) -> MirrorResult<()> {
        match (self.mode, existing) {
            (DiscoveryMode::FullScan, Some(existing)) => {
                let diff = TagDiff::compute(existing, &self.remote_tags());
                tracing::debug!(
                    changed = diff.changed.len(),
                    deleted = diff.deleted.len(),
                    unchanged = diff.unchanged,
                    "Full scan compared"
                );
                for uri in &diff.deleted {
                    sink.on_deleted(uri);
                }
                for change in self
                    .changes
                    .iter()
                    .filter(|c| diff.changed.binary_search(&c.uri).is_ok())
                {
                    sink.on_payload(&change.uri, &change.version_tag, &change.payload);
                }
            }
            _ => {
                for uri in &self.deletes {
                    sink.on_deleted(uri);
                }
                for change in &self.changes {
                    sink.on_payload(&change.uri, &change.version_tag, &change.payload);
                }
            }
        }
        Ok(())
    }
}

impl<'s, S: ContactStore + ?Sized, C: RecordCodec + ?Sized> Reconciler<'s, S, C> {
    /// Drive this session from `source` and finalize it.
    ///
    /// A source failure marks the session degraded; whatever was delivered
    /// before it is still finalized.
    pub fn run(mut self, source: &mut dyn ChangeSource) -> ReconcileReport {
        let existing = match source.mode() {
            DiscoveryMode::FullScan => Some(FallbackEnumerator::existing_tags(&self)),
            DiscoveryMode::Incremental => None,
        };

        if let Err(e) = source.deliver(existing.as_ref(), &mut self) {
            tracing::error!(error = %e, "Change source failed");
            self.record_session_error(format!("change source: {e}"));
        }

        self.finalize()
    }
}

/// Run one complete session for `config.collection_id`.
pub fn run_session<S, C>(
    store: &S,
    codec: &C,
    config: SyncConfig,
    source: &mut dyn ChangeSource,
) -> MirrorResult<ReconcileReport>
where
    S: ContactStore + ?Sized,
    C: RecordCodec + ?Sized,
{
    let span = tracing::info_span!("reconcile", collection_id = %config.collection_id);
    let _enter = span.enter();

    let reconciler = Reconciler::begin(store, codec, config)?;
    Ok(reconciler.run(source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardmirror_core::{MirrorError, StorageError};
    use cardmirror_storage::MockStore;
    use cardmirror_test_utils::fixtures::{individual_record, payload, test_config};
    use cardmirror_test_utils::MockCodec;

    /// Records notifications in arrival order.
    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl ChangeSink for Recorder {
        fn on_changed(&mut self, uri: &str, _: &str, _: Option<ContactRecord>) {
            self.0.push(format!("changed {uri}"));
        }

        fn on_payload(&mut self, uri: &str, _: &str, _: &[u8]) {
            self.0.push(format!("changed {uri}"));
        }

        fn on_deleted(&mut self, uri: &str) {
            self.0.push(format!("deleted {uri}"));
        }
    }

    struct BrokenSource;

    impl ChangeSource for BrokenSource {
        fn mode(&self) -> DiscoveryMode {
            DiscoveryMode::Incremental
        }

        fn deliver(
            &mut self,
            _: Option<&BTreeMap<String, String>>,
            sink: &mut dyn ChangeSink,
        ) -> MirrorResult<()> {
            sink.on_payload("/u1", "\"1\"", &payload(&individual_record("u1", "Ada", &[])));
            Err(MirrorError::Storage(StorageError::TransactionFailed {
                reason: "connection reset".to_string(),
            }))
        }
    }

    #[test]
    fn test_incremental_batch_delivers_deletes_first() {
        let mut batch = ChangeBatch::incremental()
            .changed("/a", "1", b"x".to_vec())
            .deleted("/b");
        let mut recorder = Recorder::default();

        batch.deliver(None, &mut recorder).unwrap();
        assert_eq!(recorder.0, vec!["deleted /b", "changed /a"]);
    }

    #[test]
    fn test_full_scan_batch_diffs_against_local_tags() {
        let mut batch = ChangeBatch::full_scan()
            .changed("/same", "1", b"x".to_vec())
            .changed("/new", "1", b"x".to_vec());
        let existing: BTreeMap<String, String> = [
            ("/same".to_string(), "1".to_string()),
            ("/gone".to_string(), "1".to_string()),
        ]
        .into();
        let mut recorder = Recorder::default();

        batch.deliver(Some(&existing), &mut recorder).unwrap();
        assert_eq!(recorder.0, vec!["deleted /gone", "changed /new"]);
    }

    #[test]
    fn test_source_failure_still_finalizes() {
        let store = MockStore::new();
        let codec = MockCodec::new();

        let report = run_session(&store, &codec, test_config(), &mut BrokenSource).unwrap();
        assert!(report.degraded);
        assert_eq!(report.session_errors.len(), 1);
        assert!(report.finished_at.is_some());
        assert_eq!(store.individual_count(), 1);
    }
}
