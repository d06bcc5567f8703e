//! Resource gateway: the engine's only view of the remote platform.
//!
//! [`ResourceGateway`] covers the four resource families the engine touches
//! (knowledge bases, data sources, indexing jobs, agents). Reads return
//! canonical [`crate::models`] types no matter which envelope the platform
//! chose (see [`crate::envelope`]); an unrecognized body reads as empty or
//! absent rather than as an error. Mutations propagate upstream failures
//! unchanged as [`GatewayError::Status`], and the caller decides what a
//! status code means.
//!
//! [`HttpGateway`] is the production implementation over JSON/HTTPS with a
//! bearer token. It never retries: the reconciliation engine is re-entrant,
//! and blind retries of mutations would risk duplicates.
//!
//! # Endpoints
//!
//! | Method | Path |
//! |--------|------|
//! | `GET` | `/knowledge_bases` |
//! | `GET` `PUT` `DELETE` | `/knowledge_bases/{id}` |
//! | `POST` | `/knowledge_bases` |
//! | `GET` `POST` | `/knowledge_bases/{id}/data_sources` |
//! | `DELETE` | `/knowledge_bases/{id}/data_sources/{ds}` |
//! | `GET` | `/knowledge_bases/{id}/indexing_jobs` |
//! | `POST` | `/indexing_jobs` |
//! | `GET` | `/indexing_jobs/{id}` |
//! | `GET` | `/agents`, `/agents/{id}` |
//! | `POST` | `/agents/{id}/knowledge_bases/{kb}` |
//!
//! Indexing jobs are always started through `POST /indexing_jobs`. The
//! per-KB start endpoint answers with a method-not-allowed class error and
//! is never called.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

use crate::config::PlatformConfig;
use crate::envelope::{self, extract_list, extract_object};
use crate::error::{GatewayError, GatewayResult};
use crate::models::{
    Agent, DataSourceRef, DataSourceSpec, IndexingJob, KnowledgeBase, KnowledgeBasePatch,
    KnowledgeBaseSpec,
};

/// Normalized access to the remote platform.
///
/// Implementations must be shareable across concurrent reconciliations;
/// all per-call state lives in the caller.
#[async_trait]
pub trait ResourceGateway: Send + Sync {
    // ---- KnowledgeBase ----

    async fn list_knowledge_bases(&self) -> GatewayResult<Vec<KnowledgeBase>>;

    /// Full detail, including attached data sources.
    async fn get_knowledge_base(&self, id: &str) -> GatewayResult<Option<KnowledgeBase>>;

    /// Create a knowledge base with its initial data source. The response may
    /// or may not identify the new record.
    async fn create_knowledge_base(
        &self,
        spec: &KnowledgeBaseSpec,
    ) -> GatewayResult<Option<KnowledgeBase>>;

    async fn update_knowledge_base(
        &self,
        id: &str,
        patch: &KnowledgeBasePatch,
    ) -> GatewayResult<Option<KnowledgeBase>>;

    async fn delete_knowledge_base(&self, id: &str) -> GatewayResult<()>;

    // ---- DataSource ----

    async fn list_data_sources(&self, kb_id: &str) -> GatewayResult<Vec<DataSourceRef>>;

    /// Returns the created DataSource's id if present in the immediate
    /// response; otherwise returns `None` and the caller must re-fetch.
    async fn add_data_source(
        &self,
        kb_id: &str,
        spec: &DataSourceSpec,
    ) -> GatewayResult<Option<String>>;

    async fn delete_data_source(&self, kb_id: &str, data_source_id: &str) -> GatewayResult<()>;

    // ---- IndexingJob ----

    async fn start_indexing_job(
        &self,
        kb_id: &str,
        data_source_ids: &[String],
    ) -> GatewayResult<Option<IndexingJob>>;

    async fn get_indexing_job(&self, id: &str) -> GatewayResult<Option<IndexingJob>>;

    async fn list_indexing_jobs(&self, kb_id: &str) -> GatewayResult<Vec<IndexingJob>>;

    // ---- Agent ----

    async fn list_agents(&self) -> GatewayResult<Vec<Agent>>;

    async fn get_agent(&self, id: &str) -> GatewayResult<Option<Agent>>;

    async fn attach_knowledge_base(&self, agent_id: &str, kb_id: &str) -> GatewayResult<()>;
}

// ============ HTTP implementation ============

/// [`ResourceGateway`] over the platform's REST API.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl HttpGateway {
    /// Build a gateway from configuration, reading the bearer token from the
    /// environment variable named by `platform.token_env`.
    pub fn from_config(config: &PlatformConfig) -> anyhow::Result<Self> {
        let token = std::env::var(&config.token_env).map_err(|_| {
            anyhow::anyhow!("{} environment variable not set", config.token_env)
        })?;
        Self::new(&config.base_url, token, config.timeout())
    }

    pub fn new(
        base_url: &str,
        token: impl Into<String>,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send one request and return the JSON body (`Null` for empty bodies).
    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> GatewayResult<Value> {
        tracing::debug!(%method, path, "platform request");

        let mut req = self
            .client
            .request(method.clone(), self.url(path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/json");
        if let Some(body) = body {
            req = req.json(body);
        }

        let response = req.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            tracing::debug!(%method, path, status = status.as_u16(), "platform error");
            return Err(GatewayError::Status {
                status: status.as_u16(),
                message: error_message(status, &text),
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn get_json(&self, path: &str) -> GatewayResult<Value> {
        self.send(Method::GET, path, None).await
    }
}

/// Best-effort human message from an error body: `message`, `error`,
/// `error.message`, `detail`, else the raw text, else the status reason.
fn error_message(status: StatusCode, text: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(text) {
        let found = ["message", "error", "detail"].iter().find_map(|key| {
            match json.get(*key) {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(obj @ Value::Object(_)) => obj
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string),
                _ => None,
            }
        });
        if let Some(msg) = found {
            return msg;
        }
    }
    if text.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        text.trim().to_string()
    }
}

fn data_source_body(kb_id: Option<&str>, spec: &DataSourceSpec) -> Value {
    let mut spaces = json!({
        "bucket_name": spec.bucket_name,
        "item_path": spec.item_path,
    });
    if let Some(region) = &spec.region {
        spaces["region"] = json!(region);
    }
    let mut body = json!({ "spaces_data_source": spaces });
    if let Some(kb_id) = kb_id {
        body["knowledge_base_uuid"] = json!(kb_id);
    }
    body
}

fn parse_kb_list(body: &Value) -> Vec<KnowledgeBase> {
    extract_list(body, envelope::KB_LIST_KEYS)
        .iter()
        .filter_map(|v| envelope::parse_knowledge_base(v, None).map(|(kb, _)| kb))
        .collect()
}

fn parse_kb_object(body: &Value) -> Option<(KnowledgeBase, bool)> {
    let obj = extract_object(body, envelope::KB_OBJECT_KEYS)?;
    envelope::parse_knowledge_base(&obj, Some(body))
}

#[async_trait]
impl ResourceGateway for HttpGateway {
    async fn list_knowledge_bases(&self) -> GatewayResult<Vec<KnowledgeBase>> {
        let body = self.get_json("/knowledge_bases").await?;
        Ok(parse_kb_list(&body))
    }

    async fn get_knowledge_base(&self, id: &str) -> GatewayResult<Option<KnowledgeBase>> {
        let body = self.get_json(&format!("/knowledge_bases/{}", id)).await?;
        let Some((mut kb, had_sources)) = parse_kb_object(&body) else {
            return Ok(None);
        };
        // Some detail responses leave data sources out entirely.
        if !had_sources {
            kb.data_sources = self.list_data_sources(&kb.id).await?;
        }
        Ok(Some(kb))
    }

    async fn create_knowledge_base(
        &self,
        spec: &KnowledgeBaseSpec,
    ) -> GatewayResult<Option<KnowledgeBase>> {
        let mut body = json!({
            "name": spec.name,
            "description": spec.description,
            "project_id": spec.project_id,
            "database_id": spec.database_id,
            "embedding_model_uuid": spec.embedding_model_id,
            "tags": spec.tags,
            "datasources": [data_source_body(None, &spec.initial_data_source)],
        });
        if let Some(region) = &spec.region {
            body["region"] = json!(region);
        }
        tracing::info!(name = %spec.name, "creating knowledge base");
        let resp = self
            .send(Method::POST, "/knowledge_bases", Some(&body))
            .await?;
        Ok(parse_kb_object(&resp).map(|(kb, _)| kb))
    }

    async fn update_knowledge_base(
        &self,
        id: &str,
        patch: &KnowledgeBasePatch,
    ) -> GatewayResult<Option<KnowledgeBase>> {
        let mut body = json!({ "uuid": id });
        if let Some(name) = &patch.name {
            body["name"] = json!(name);
        }
        if let Some(description) = &patch.description {
            body["description"] = json!(description);
        }
        if let Some(tags) = &patch.tags {
            body["tags"] = json!(tags);
        }
        let resp = self
            .send(Method::PUT, &format!("/knowledge_bases/{}", id), Some(&body))
            .await?;
        Ok(parse_kb_object(&resp).map(|(kb, _)| kb))
    }

    async fn delete_knowledge_base(&self, id: &str) -> GatewayResult<()> {
        tracing::info!(kb_id = id, "deleting knowledge base");
        self.send(Method::DELETE, &format!("/knowledge_bases/{}", id), None)
            .await?;
        Ok(())
    }

    async fn list_data_sources(&self, kb_id: &str) -> GatewayResult<Vec<DataSourceRef>> {
        let body = self
            .get_json(&format!("/knowledge_bases/{}/data_sources", kb_id))
            .await?;
        Ok(extract_list(&body, envelope::DS_LIST_KEYS)
            .iter()
            .filter_map(envelope::parse_data_source)
            .collect())
    }

    async fn add_data_source(
        &self,
        kb_id: &str,
        spec: &DataSourceSpec,
    ) -> GatewayResult<Option<String>> {
        let body = data_source_body(Some(kb_id), spec);
        tracing::info!(kb_id, item_path = %spec.item_path, "adding data source");
        let resp = self
            .send(
                Method::POST,
                &format!("/knowledge_bases/{}/data_sources", kb_id),
                Some(&body),
            )
            .await?;
        Ok(extract_object(&resp, envelope::DS_OBJECT_KEYS).and_then(|v| envelope::id_of(&v)))
    }

    async fn delete_data_source(&self, kb_id: &str, data_source_id: &str) -> GatewayResult<()> {
        tracing::info!(kb_id, data_source_id, "deleting data source");
        self.send(
            Method::DELETE,
            &format!("/knowledge_bases/{}/data_sources/{}", kb_id, data_source_id),
            None,
        )
        .await?;
        Ok(())
    }

    async fn start_indexing_job(
        &self,
        kb_id: &str,
        data_source_ids: &[String],
    ) -> GatewayResult<Option<IndexingJob>> {
        // `*_uuid(s)` are the platform's aliases for the same fields.
        let body = json!({
            "knowledge_base_id": kb_id,
            "data_source_ids": data_source_ids,
            "knowledge_base_uuid": kb_id,
            "data_source_uuids": data_source_ids,
        });
        tracing::info!(kb_id, ?data_source_ids, "starting indexing job");
        let resp = self
            .send(Method::POST, "/indexing_jobs", Some(&body))
            .await?;
        Ok(extract_object(&resp, envelope::JOB_OBJECT_KEYS)
            .and_then(|v| envelope::parse_indexing_job(&v)))
    }

    async fn get_indexing_job(&self, id: &str) -> GatewayResult<Option<IndexingJob>> {
        let body = self.get_json(&format!("/indexing_jobs/{}", id)).await?;
        Ok(extract_object(&body, envelope::JOB_OBJECT_KEYS)
            .and_then(|v| envelope::parse_indexing_job(&v)))
    }

    async fn list_indexing_jobs(&self, kb_id: &str) -> GatewayResult<Vec<IndexingJob>> {
        let body = self
            .get_json(&format!("/knowledge_bases/{}/indexing_jobs", kb_id))
            .await?;
        Ok(extract_list(&body, envelope::JOB_LIST_KEYS)
            .iter()
            .filter_map(envelope::parse_indexing_job)
            .collect())
    }

    async fn list_agents(&self) -> GatewayResult<Vec<Agent>> {
        let body = self.get_json("/agents").await?;
        Ok(extract_list(&body, envelope::AGENT_LIST_KEYS)
            .iter()
            .filter_map(envelope::parse_agent)
            .collect())
    }

    async fn get_agent(&self, id: &str) -> GatewayResult<Option<Agent>> {
        let body = self.get_json(&format!("/agents/{}", id)).await?;
        Ok(extract_object(&body, envelope::AGENT_OBJECT_KEYS).and_then(|v| envelope::parse_agent(&v)))
    }

    async fn attach_knowledge_base(&self, agent_id: &str, kb_id: &str) -> GatewayResult<()> {
        tracing::info!(agent_id, kb_id, "attaching knowledge base to agent");
        self.send(
            Method::POST,
            &format!("/agents/{}/knowledge_bases/{}", agent_id, kb_id),
            Some(&json!({})),
        )
        .await?;
        Ok(())
    }
}
