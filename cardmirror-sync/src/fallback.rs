//! Full-scan support.
//!
//! When incremental discovery is unavailable the discovery collaborator
//! lists the whole remote collection and compares it against the local
//! URI → version tag map exposed here.

use crate::reconciler::Reconciler;
use crate::snapshot::LocalSnapshot;
use cardmirror_core::RecordCodec;
use cardmirror_storage::ContactStore;
use std::collections::BTreeMap;

/// Source of the pre-session URI → version tag map.
pub trait FallbackEnumerator {
    /// Tags of every individual and explicit group known before the session
    /// started. Implicit groups have no URI and are never listed.
    fn existing_tags(&self) -> BTreeMap<String, String>;
}

impl FallbackEnumerator for LocalSnapshot {
    fn existing_tags(&self) -> BTreeMap<String, String> {
        LocalSnapshot::existing_tags(self)
    }
}

impl<S: ContactStore + ?Sized, C: RecordCodec + ?Sized> FallbackEnumerator
    for Reconciler<'_, S, C>
{
    fn existing_tags(&self) -> BTreeMap<String, String> {
        Reconciler::existing_tags(self)
    }
}

/// Comparison of local tags against a full remote listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
    /// New remotely, or tag differs
    pub changed: Vec<String>,
    /// Known locally, absent remotely
    pub deleted: Vec<String>,
    pub unchanged: usize,
}

impl TagDiff {
    pub fn compute(local: &BTreeMap<String, String>, remote: &BTreeMap<String, String>) -> Self {
        let mut diff = TagDiff::default();
        for (uri, tag) in remote {
            match local.get(uri) {
                Some(local_tag) if local_tag == tag => diff.unchanged += 1,
                _ => diff.changed.push(uri.clone()),
            }
        }
        diff.deleted = local
            .keys()
            .filter(|uri| !remote.contains_key(*uri))
            .cloned()
            .collect();
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}
