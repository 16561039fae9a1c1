//! Session outcome accumulator.
//!
//! Every notification produces one [`ObjectOutcome`]; failures are recorded
//! here instead of propagating, and any failure marks the session degraded.

use cardmirror_core::{EntityType, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// What happened to one notified object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectAction {
    Created,
    Updated,
    Deleted,
    /// Group object queued for finalize
    Deferred,
    /// Delete of a URI that is not mirrored locally
    Ignored,
    /// Unparseable payload
    Skipped,
    /// Row written but membership update rolled back
    PartiallyApplied,
    Failed,
}

impl ObjectAction {
    /// Whether this action degrades the session.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ObjectAction::Skipped | ObjectAction::PartiallyApplied | ObjectAction::Failed
        )
    }
}

/// Result of processing one notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectOutcome {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityType>,
    pub action: ObjectAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Garbage collection of empty implicit groups at finalize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcSummary {
    pub candidates: usize,
    pub retained: usize,
    pub removed: usize,
    /// Confirmed empty but kept because pruning is disabled
    pub skipped: usize,
}

/// Member reference resolution across all group objects of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberStats {
    pub resolved: usize,
    pub unresolved: usize,
    pub malformed: usize,
}

/// Everything a caller needs to decide whether to advance sync state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub started_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    pub degraded: bool,
    pub outcomes: Vec<ObjectOutcome>,
    pub members: MemberStats,
    pub gc: GcSummary,
    /// Errors not tied to one object (finalize phases, change source)
    pub session_errors: Vec<String>,
}

impl Default for ReconcileReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconcileReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            degraded: false,
            outcomes: Vec::new(),
            members: MemberStats::default(),
            gc: GcSummary::default(),
            session_errors: Vec::new(),
        }
    }

    pub fn record(
        &mut self,
        uri: &str,
        entity_type: Option<EntityType>,
        action: ObjectAction,
        error: Option<String>,
    ) {
        if action.is_error() {
            self.degraded = true;
        }
        self.outcomes.push(ObjectOutcome {
            uri: uri.to_string(),
            entity_type,
            action,
            error,
        });
    }

    /// Record a failure not attributable to a single object.
    pub fn record_session_error(&mut self, error: impl Into<String>) {
        self.degraded = true;
        self.session_errors.push(error.into());
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Number of outcomes with the given action.
    pub fn count(&self, action: ObjectAction) -> usize {
        self.outcomes.iter().filter(|o| o.action == action).count()
    }

    /// Outcomes for one URI, in processing order.
    pub fn outcomes_for<'a>(
        &'a self,
        uri: &'a str,
    ) -> impl Iterator<Item = &'a ObjectOutcome> + 'a {
        self.outcomes.iter().filter(move |o| o.uri == uri)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_marks_degraded_only_on_errors() {
        let mut report = ReconcileReport::new();
        report.record("/a", Some(EntityType::Individual), ObjectAction::Created, None);
        report.record("/b", None, ObjectAction::Ignored, None);
        assert!(!report.degraded);

        report.record("/c", None, ObjectAction::Skipped, Some("unparseable".into()));
        assert!(report.degraded);
        assert_eq!(report.count(ObjectAction::Created), 1);
        assert_eq!(report.outcomes_for("/c").count(), 1);
    }

    #[test]
    fn test_session_error_marks_degraded() {
        let mut report = ReconcileReport::new();
        report.record_session_error("gc failed");
        assert!(report.degraded);
        assert_eq!(report.session_errors, vec!["gc failed".to_string()]);
    }

    #[test]
    fn test_json_shape() {
        let mut report = ReconcileReport::new();
        report.record("/a", Some(EntityType::Group), ObjectAction::Deferred, None);
        report.finish();

        let json = report.to_json();
        assert_eq!(json["degraded"], serde_json::json!(false));
        assert_eq!(json["outcomes"][0]["action"], serde_json::json!("Deferred"));
        assert!(json["outcomes"][0].get("error").is_none());
        assert!(json["finished_at"].is_string());
    }
}
