//! Shared data model for persona-engine.
//!
//! Catalog records (`BuyerPersona`, `JobKeyword`) are owned by the admin
//! CRUD layer and read-only here. `Contact` is the subset of the CRM
//! contact record this service owns. Job and snapshot types are the
//! durable artifacts of the reclassification and metrics subsystems.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// CATALOG TYPES
// =============================================================================

/// A named category contacts are classified into based on job title.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyerPersona {
    pub id: Uuid,
    pub name: String,
    /// Lower priority is evaluated first; ties are impossible because
    /// classification walks personas in a total order.
    pub priority: i32,
    /// The designated fallback for titles no keyword matches.
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A keyword owned by a persona. Mutations to this collection are the
/// trigger that makes the classifier cache stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobKeyword {
    pub id: Uuid,
    pub keyword: String,
    /// Pre-normalized form; matching compares this against normalized titles.
    pub keyword_normalized: String,
    pub buyer_persona_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// One consistent read of the whole catalog, used to build a cache snapshot.
#[derive(Debug, Clone)]
pub struct Catalog {
    /// Personas in ascending priority order.
    pub personas: Vec<BuyerPersona>,
    pub keywords: Vec<JobKeyword>,
}

// =============================================================================
// CONTACT
// =============================================================================

/// Subset of the contact record owned by this service.
///
/// Upstream import flows create contacts with no persona set; only the
/// reclassification worker (or the manual-edit API, which must set
/// `buyer_persona_locked`) writes `buyer_persona`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub job_title: Option<String>,
    /// Derived form cached on the record, refreshed when an assignment
    /// is applied.
    pub job_title_normalized: Option<String>,
    pub buyer_persona: Option<Uuid>,
    /// Manual-override protection: when set, the worker never touches
    /// the persona fields.
    pub buyer_persona_locked: bool,
    /// Provenance flag: the current assignment came from a human.
    pub buyer_persona_assigned_manually: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// Full classification result with the explanation fields used by the
/// diagnose endpoint and the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub persona_id: Uuid,
    pub persona_name: String,
    /// The normalized keyword(s) that matched. Exact-match classification
    /// means this is either empty (fallback) or the normalized title itself.
    pub matched_keywords: Vec<String>,
    /// Priority of the winning persona.
    pub priority_used: i32,
    pub normalized_title: String,
    /// True when no keyword matched and the fallback persona was used.
    pub is_default: bool,
}

// =============================================================================
// RECLASSIFICATION JOBS
// =============================================================================

/// Status of a reclassification job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// Which contacts a job re-examines. Stored as JSONB on the job row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobFilter {
    /// Every contact.
    All,
    /// Contacts whose normalized title equals one registered keyword.
    ByKeyword { keyword_id: Uuid },
    /// Contacts currently assigned to one persona.
    ByPersona { buyer_persona_id: Uuid },
    /// Contacts whose normalized title equals any of these keyword
    /// strings. Used when several keywords change at once.
    AffectedKeywords { keywords: Vec<String> },
}

/// Resolved form of a [`JobFilter`]: the concrete contact predicate the
/// store paginates over. Filter resolution happens once per execution
/// (keyword ids are looked up, keyword strings normalized).
#[derive(Debug, Clone, PartialEq)]
pub enum ContactQuery {
    All,
    NormalizedTitleIn(Vec<String>),
    AssignedTo(Uuid),
}

/// Progress counters persisted on the job row at every checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    /// Contacts examined.
    pub scanned: i64,
    /// Contacts whose persona changed (or would change under dry-run).
    pub changed: i64,
    /// Contacts skipped because of a manual-override lock.
    pub skipped_locked: i64,
    /// Contacts whose individual update failed and was skipped.
    pub errors: i64,
}

/// A reclassification job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReclassificationJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub filter: JobFilter,
    /// Compute and record changes without committing them. Defaults to
    /// true at creation for safety.
    pub dry_run: bool,
    pub counters: JobCounters,
    pub attempts: i32,
    pub max_attempts: i32,
    pub error_message: Option<String>,
    /// Identifier of the worker currently (or last) owning the job.
    pub worker_id: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Request to create a reclassification job.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub filter: JobFilter,
    pub dry_run: bool,
}

/// One before/after entry appended to a job's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub contact_id: Uuid,
    pub persona_before: Option<Uuid>,
    pub persona_after: Uuid,
    /// False for dry-run entries: computed but not committed.
    pub applied: bool,
}

/// A persisted audit-trail row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: Uuid,
    pub job_id: Uuid,
    pub contact_id: Uuid,
    pub persona_before: Option<Uuid>,
    pub persona_after: Uuid,
    pub applied: bool,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// METRICS
// =============================================================================

/// Contact count for one persona.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaCount {
    pub persona_id: Uuid,
    pub name: String,
    pub contacts: i64,
}

/// Contact count for one keyword (contacts whose normalized title equals it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordUsage {
    pub keyword: String,
    pub buyer_persona_id: Uuid,
    pub contacts: i64,
}

/// Raw aggregates collected in one read-only pass over the contact and
/// keyword collections.
#[derive(Debug, Clone, Default)]
pub struct MetricsRollup {
    pub total_contacts: i64,
    pub classified_contacts: i64,
    pub locked_contacts: i64,
    pub manually_assigned_contacts: i64,
    pub with_title: i64,
    pub with_normalized_title: i64,
    pub persona_counts: Vec<PersonaCount>,
    /// Usage per keyword, descending by contact count.
    pub keyword_usage: Vec<KeywordUsage>,
}

/// Growth deltas against the previous snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDeltas {
    pub total_contacts: i64,
    pub classified_contacts: i64,
    pub locked_contacts: i64,
    pub manually_assigned_contacts: i64,
    /// Percentage-point movement of classification coverage.
    pub classification_coverage_pct: f64,
}

/// One immutable coverage snapshot. Append-only; pruned after the
/// retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub id: Uuid,
    pub taken_at: DateTime<Utc>,
    pub total_contacts: i64,
    pub classified_contacts: i64,
    pub locked_contacts: i64,
    pub manually_assigned_contacts: i64,
    pub with_title: i64,
    pub with_normalized_title: i64,
    /// classified / total, in percent.
    pub classification_coverage_pct: f64,
    /// normalized-title coverage among contacts that have a title, in percent.
    pub normalization_coverage_pct: f64,
    pub persona_counts: Vec<PersonaCount>,
    pub keyword_usage: Vec<KeywordUsage>,
    pub top_keywords: Vec<KeywordUsage>,
    pub unused_keywords: Vec<String>,
    /// None for the first snapshot.
    pub deltas: Option<SnapshotDeltas>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_serde_lowercase() {
        assert_eq!(serde_json::to_string(&JobStatus::Pending).unwrap(), "\"pending\"");
        assert_eq!(serde_json::to_string(&JobStatus::Processing).unwrap(), "\"processing\"");
        assert_eq!(
            serde_json::from_str::<JobStatus>("\"cancelled\"").unwrap(),
            JobStatus::Cancelled
        );
    }

    #[test]
    fn test_job_filter_serde_all() {
        let json = serde_json::to_value(&JobFilter::All).unwrap();
        assert_eq!(json["kind"], "all");
        let back: JobFilter = serde_json::from_value(json).unwrap();
        assert_eq!(back, JobFilter::All);
    }

    #[test]
    fn test_job_filter_serde_by_keyword() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(&JobFilter::ByKeyword { keyword_id: id }).unwrap();
        assert_eq!(json["kind"], "by_keyword");
        assert_eq!(json["keyword_id"], id.to_string());
        let back: JobFilter = serde_json::from_value(json).unwrap();
        assert_eq!(back, JobFilter::ByKeyword { keyword_id: id });
    }

    #[test]
    fn test_job_filter_serde_affected_keywords() {
        let filter = JobFilter::AffectedKeywords {
            keywords: vec!["ceo".to_string(), "director de marketing".to_string()],
        };
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(json["kind"], "affected_keywords");
        let back: JobFilter = serde_json::from_value(json).unwrap();
        assert_eq!(back, filter);
    }

    #[test]
    fn test_job_counters_default_zeroed() {
        let c = JobCounters::default();
        assert_eq!(c.scanned, 0);
        assert_eq!(c.changed, 0);
        assert_eq!(c.skipped_locked, 0);
        assert_eq!(c.errors, 0);
    }

    #[test]
    fn test_classification_serde_round_trip() {
        let c = Classification {
            persona_id: Uuid::new_v4(),
            persona_name: "DC Marketing".to_string(),
            matched_keywords: vec!["director de marketing".to_string()],
            priority_used: 2,
            normalized_title: "director de marketing".to_string(),
            is_default: false,
        };
        let json = serde_json::to_string(&c).unwrap();
        let back: Classification = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
