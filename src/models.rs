//! Core data models used throughout kbsync.
//!
//! These are the canonical shapes the gateway normalizes upstream responses
//! into, plus the request/outcome types of the reconciliation engine and the
//! caller-owned [`UserKbState`] snapshot.

use serde::{Deserialize, Serialize};

/// A knowledge base on the remote platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBase {
    pub id: String,
    pub name: String,
    pub project_id: Option<String>,
    pub database_id: Option<String>,
    pub embedding_model_id: Option<String>,
    pub region: Option<String>,
    #[serde(default)]
    pub data_sources: Vec<DataSourceRef>,
    pub total_tokens: Option<u64>,
}

/// A pointer from a knowledge base to an object-storage path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceRef {
    pub id: String,
    pub bucket_name: String,
    pub item_path: String,
    pub region: Option<String>,
}

/// Canonical indexing job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// `PENDING` or `RUNNING`.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Map any of the platform's status spellings onto the canonical four.
    ///
    /// Prefixes such as `INDEX_JOB_STATUS_` are stripped first. Anything not
    /// recognized is treated as `Pending` so monitoring keeps going instead of
    /// stopping on a status it cannot interpret.
    pub fn parse_upstream(raw: &str) -> Self {
        let upper = raw.trim().to_ascii_uppercase();
        let bare = upper
            .strip_prefix("INDEX_JOB_STATUS_")
            .or_else(|| upper.strip_prefix("BATCH_JOB_PHASE_"))
            .unwrap_or(&upper);
        match bare {
            "RUNNING" | "IN_PROGRESS" | "PARTIAL" => JobStatus::Running,
            "COMPLETED" | "SUCCEEDED" | "SUCCESS" => JobStatus::Completed,
            "FAILED" | "ERROR" | "CANCELLED" => JobStatus::Failed,
            _ => JobStatus::Pending,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An asynchronous indexing job. Only ever re-fetched, never edited locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingJob {
    pub id: String,
    pub knowledge_base_id: Option<String>,
    #[serde(default)]
    pub data_source_ids: Vec<String>,
    pub status: JobStatus,
    /// Fraction complete in `[0.0, 1.0]`, when the platform reports one.
    pub progress: Option<f64>,
    pub error: Option<String>,
    /// RFC 3339 creation time as reported upstream; used to pick the most
    /// recent job during conflict recovery.
    pub created_at: Option<String>,
}

/// An agent on the platform. Read for fallback identifiers only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub project_id: Option<String>,
    pub embedding_model_id: Option<String>,
    pub database_id: Option<String>,
    #[serde(default)]
    pub knowledge_base_ids: Vec<String>,
}

/// Body of a data source creation.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSourceSpec {
    pub bucket_name: String,
    pub item_path: String,
    pub region: Option<String>,
}

/// Body of a knowledge base creation.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeBaseSpec {
    pub name: String,
    pub description: String,
    pub project_id: String,
    pub database_id: String,
    pub embedding_model_id: String,
    pub region: Option<String>,
    pub tags: Vec<String>,
    pub initial_data_source: DataSourceSpec,
}

/// Partial update of a knowledge base. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnowledgeBasePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Input of one reconciliation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileRequest {
    pub user_id: String,
    pub kb_name: String,
    pub desired_item_path: String,
    pub bucket_name: String,
    #[serde(default)]
    pub resume_job_id: Option<String>,
}

/// Successful result of one reconciliation call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub kb_id: String,
    pub data_source_id: String,
    pub job_id: String,
    /// Detail of the KB as last observed during the call.
    pub kb_detail: KnowledgeBase,
    /// True when an already-active job was adopted instead of starting one.
    pub resumed: bool,
}

/// Caller-facing success payload: `{ kbId, dataSourceId, jobId, resumed }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    pub kb_id: String,
    pub data_source_id: String,
    pub job_id: String,
    pub resumed: bool,
}

impl From<&ReconcileOutcome> for ReconcileSummary {
    fn from(outcome: &ReconcileOutcome) -> Self {
        Self {
            kb_id: outcome.kb_id.clone(),
            data_source_id: outcome.data_source_id.clone(),
            job_id: outcome.job_id.clone(),
            resumed: outcome.resumed,
        }
    }
}

/// Caller-owned record of a user's knowledge base. The engine reads it and
/// hands back an updated copy; it never stores it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserKbState {
    pub user_id: String,
    pub kb_name: String,
    pub kb_id: Option<String>,
    pub last_indexing_job_id: Option<String>,
    #[serde(default)]
    pub pending_files: Vec<String>,
    #[serde(default)]
    pub indexed_files: Vec<String>,
}

impl UserKbState {
    pub fn new(user_id: impl Into<String>, kb_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            kb_name: kb_name.into(),
            ..Default::default()
        }
    }

    /// Snapshot after a successful reconciliation.
    pub fn after_reconcile(&self, outcome: &ReconcileOutcome) -> Self {
        Self {
            kb_id: Some(outcome.kb_id.clone()),
            last_indexing_job_id: Some(outcome.job_id.clone()),
            ..self.clone()
        }
    }

    /// Snapshot after the indexing job completed: every pending file is now
    /// indexed.
    pub fn after_indexing_completed(&self) -> Self {
        let mut indexed = self.indexed_files.clone();
        for file in &self.pending_files {
            if !indexed.contains(file) {
                indexed.push(file.clone());
            }
        }
        Self {
            pending_files: Vec::new(),
            indexed_files: indexed,
            ..self.clone()
        }
    }
}
