//! Response-envelope normalization.
//!
//! The platform is not consistent about where it puts things. A list of
//! knowledge bases may arrive as a bare array, as `{"knowledge_bases": [...]}`,
//! as `{"data": [...]}`, or wrapped once more under `data`. Identifiers are
//! sometimes `uuid`, sometimes `id`. This module turns any of those into the
//! canonical types in [`crate::models`].
//!
//! Every extractor is an ordered list of shape checks. The first shape that
//! matches wins; when none does, the result is an empty `Vec` or `None`,
//! never an error. That keeps absence checks in the engine uniform.
//!
//! | Family | List keys | Object keys |
//! |--------|-----------|-------------|
//! | KnowledgeBase | `knowledge_bases` | `knowledge_base` |
//! | DataSource | `knowledge_base_data_sources`, `datasources`, `data_sources` | `knowledge_base_data_source`, `data_source` |
//! | IndexingJob | `jobs`, `indexing_jobs` | `job`, `indexing_job` |
//! | Agent | `agents` | `agent` |

use serde_json::Value;

use crate::models::{Agent, DataSourceRef, IndexingJob, JobStatus, KnowledgeBase};

pub const KB_LIST_KEYS: &[&str] = &["knowledge_bases"];
pub const KB_OBJECT_KEYS: &[&str] = &["knowledge_base"];
pub const DS_LIST_KEYS: &[&str] = &["knowledge_base_data_sources", "datasources", "data_sources"];
pub const DS_OBJECT_KEYS: &[&str] = &["knowledge_base_data_source", "data_source"];
pub const JOB_LIST_KEYS: &[&str] = &["jobs", "indexing_jobs"];
pub const JOB_OBJECT_KEYS: &[&str] = &["job", "indexing_job"];
pub const AGENT_LIST_KEYS: &[&str] = &["agents"];
pub const AGENT_OBJECT_KEYS: &[&str] = &["agent"];

/// Generic containers tried after the family-specific keys.
const GENERIC_LIST_KEYS: &[&str] = &["data", "items", "results"];

// ============ Shape extraction ============

/// Pull an array of records out of a list response.
///
/// Shapes, in order: bare array; `{<key>: [..]}` for each family key;
/// `{data|items|results: [..]}`; and the same again one level under `data`.
pub fn extract_list(body: &Value, keys: &[&str]) -> Vec<Value> {
    if let Some(found) = list_at(body, keys) {
        return found;
    }
    if let Some(inner) = body.get("data").filter(|d| d.is_object()) {
        if let Some(found) = list_at(inner, keys) {
            return found;
        }
    }
    Vec::new()
}

fn list_at(body: &Value, keys: &[&str]) -> Option<Vec<Value>> {
    if let Some(arr) = body.as_array() {
        return Some(arr.clone());
    }
    keys.iter()
        .chain(GENERIC_LIST_KEYS.iter())
        .find_map(|key| body.get(*key).and_then(|v| v.as_array()).cloned())
}

/// Pull a single record out of an object response.
///
/// Shapes, in order: `{<key>: {..}}` for each family key; `{data: {..}}`
/// (itself unwrapped once more by family key); the body itself when it
/// carries an identifier.
pub fn extract_object(body: &Value, keys: &[&str]) -> Option<Value> {
    if let Some(found) = keys
        .iter()
        .find_map(|key| body.get(*key).filter(|v| v.is_object()))
    {
        return Some(found.clone());
    }
    if let Some(inner) = body.get("data").filter(|d| d.is_object()) {
        if let Some(found) = keys
            .iter()
            .find_map(|key| inner.get(*key).filter(|v| v.is_object()))
        {
            return Some(found.clone());
        }
        if id_of(inner).is_some() {
            return Some(inner.clone());
        }
    }
    if body.is_object() && id_of(body).is_some() {
        return Some(body.clone());
    }
    None
}

// ============ Field helpers ============

/// Remote identifier: `uuid` first, then `id` (string or number).
pub fn id_of(v: &Value) -> Option<String> {
    ["uuid", "id"].iter().find_map(|key| match v.get(*key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn str_field(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        v.get(*key)
            .and_then(|f| f.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

fn str_list(v: &Value, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .find_map(|key| v.get(*key).and_then(|f| f.as_array()))
        .map(|arr| {
            arr.iter()
                .filter_map(|item| item.as_str().map(str::to_string).or_else(|| id_of(item)))
                .collect()
        })
        .unwrap_or_default()
}

/// Free-form error text: a string, or an object with a `message`.
fn error_text(v: &Value) -> Option<String> {
    ["error", "error_message", "last_error", "failure_reason"]
        .iter()
        .find_map(|key| match v.get(*key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(obj @ Value::Object(_)) => str_field(obj, &["message", "detail"]),
            _ => None,
        })
}

// ============ Canonical records ============

pub fn parse_data_source(v: &Value) -> Option<DataSourceRef> {
    let id = id_of(v)?;
    let nested = v
        .get("spaces_data_source")
        .or_else(|| v.get("bucket_data_source"))
        .filter(|n| n.is_object());
    let pick = |keys: &[&str]| {
        nested
            .and_then(|n| str_field(n, keys))
            .or_else(|| str_field(v, keys))
    };
    Some(DataSourceRef {
        id,
        bucket_name: pick(&["bucket_name", "bucket"]).unwrap_or_default(),
        item_path: pick(&["item_path", "path"]).unwrap_or_default(),
        region: pick(&["region"]),
    })
}

/// Parse a KB record. Data sources are read from the record itself, or from
/// `envelope` (the full response body) when the platform puts them beside the
/// record rather than inside it.
///
/// The second element reports whether any data-source field was present at
/// all, so the gateway can tell "no data sources" from "not included".
pub fn parse_knowledge_base(v: &Value, envelope: Option<&Value>) -> Option<(KnowledgeBase, bool)> {
    let id = id_of(v)?;
    let ds_source = DS_LIST_KEYS
        .iter()
        .find_map(|key| v.get(*key).filter(|f| f.is_array()))
        .or_else(|| {
            envelope.and_then(|env| {
                DS_LIST_KEYS
                    .iter()
                    .find_map(|key| env.get(*key).filter(|f| f.is_array()))
            })
        });
    let data_sources = ds_source
        .and_then(|arr| arr.as_array())
        .map(|arr| arr.iter().filter_map(parse_data_source).collect())
        .unwrap_or_default();

    let total_tokens = v
        .get("total_tokens")
        .and_then(|t| t.as_u64().or_else(|| t.as_str().and_then(|s| s.parse().ok())))
        .or_else(|| {
            v.get("last_indexing_job")
                .and_then(|j| j.get("tokens"))
                .and_then(|t| t.as_u64())
        });

    Some((
        KnowledgeBase {
            id,
            name: str_field(v, &["name"]).unwrap_or_default(),
            project_id: str_field(v, &["project_id", "project_uuid"]),
            database_id: str_field(v, &["database_id", "database_uuid"]),
            embedding_model_id: str_field(v, &["embedding_model_uuid", "embedding_model_id"]),
            region: str_field(v, &["region"]),
            data_sources,
            total_tokens,
        },
        ds_source.is_some(),
    ))
}

pub fn parse_indexing_job(v: &Value) -> Option<IndexingJob> {
    let id = id_of(v)?;
    let status = str_field(v, &["status", "phase", "state"])
        .map(|s| JobStatus::parse_upstream(&s))
        .unwrap_or(JobStatus::Pending);
    Some(IndexingJob {
        id,
        knowledge_base_id: str_field(v, &["knowledge_base_uuid", "knowledge_base_id"]),
        data_source_ids: str_list(v, &["data_source_uuids", "data_source_ids"]),
        status,
        progress: progress_of(v),
        error: error_text(v),
        created_at: str_field(v, &["created_at", "createdAt", "started_at"]),
    })
}

/// `progress` as a fraction or percentage, else completed/total data sources.
fn progress_of(v: &Value) -> Option<f64> {
    if let Some(p) = v.get("progress").and_then(|p| p.as_f64()) {
        let fraction = if p > 1.0 { p / 100.0 } else { p };
        return Some(fraction.clamp(0.0, 1.0));
    }
    let done = v.get("completed_datasources").and_then(|d| d.as_f64())?;
    let total = v.get("total_datasources").and_then(|t| t.as_f64())?;
    if total <= 0.0 {
        return None;
    }
    Some((done / total).clamp(0.0, 1.0))
}

pub fn parse_agent(v: &Value) -> Option<Agent> {
    let id = id_of(v)?;
    let attached: Vec<&Value> = v
        .get("knowledge_bases")
        .and_then(|k| k.as_array())
        .map(|arr| arr.iter().collect())
        .unwrap_or_default();
    let mut knowledge_base_ids = str_list(v, &["knowledge_base_uuids", "knowledge_base_ids"]);
    if knowledge_base_ids.is_empty() {
        knowledge_base_ids = attached.iter().filter_map(|kb| id_of(kb)).collect();
    }
    let from_attached = |keys: &[&str]| attached.iter().find_map(|kb| str_field(kb, keys));
    Some(Agent {
        id,
        name: str_field(v, &["name"]).unwrap_or_default(),
        project_id: str_field(v, &["project_id"]).or_else(|| from_attached(&["project_id"])),
        embedding_model_id: str_field(v, &["embedding_model_uuid"])
            .or_else(|| from_attached(&["embedding_model_uuid", "embedding_model_id"])),
        database_id: from_attached(&["database_id"]),
        knowledge_base_ids,
    })
}
