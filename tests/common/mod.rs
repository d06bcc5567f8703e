//! In-memory platform used by the integration tests.
//!
//! Behaves like the remote API closely enough to exercise the engine:
//! ids are assigned sequentially, a second indexing start on a KB with an
//! active job is rejected with 409, and deleting an unknown data source is a
//! 404. Individual calls can be made to fail once with [`FakeGateway::fail_next`].

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use kbsync::config::ProvisioningConfig;
use kbsync::error::{GatewayError, GatewayResult};
use kbsync::gateway::ResourceGateway;
use kbsync::models::{
    Agent, DataSourceRef, DataSourceSpec, IndexingJob, JobStatus, KnowledgeBase,
    KnowledgeBasePatch, KnowledgeBaseSpec,
};

const MUTATING_OPS: &[&str] = &[
    "create_knowledge_base",
    "update_knowledge_base",
    "delete_knowledge_base",
    "add_data_source",
    "delete_data_source",
    "start_indexing_job",
    "attach_knowledge_base",
];

#[derive(Default)]
pub struct Platform {
    pub kbs: Vec<KnowledgeBase>,
    pub jobs: Vec<IndexingJob>,
    pub agents: Vec<Agent>,
    next_id: u32,
    calls: HashMap<&'static str, u32>,
    /// Every call in arrival order, failed ones included.
    log: Vec<&'static str>,
    failures: HashMap<&'static str, VecDeque<(u16, String)>>,
    /// Statuses handed out by successive `get_indexing_job` calls.
    scripts: HashMap<String, VecDeque<(JobStatus, Option<String>)>>,
    pub hide_created_kb_id: bool,
    pub hide_added_data_source_id: bool,
    pub hide_started_job: bool,
}

impl Platform {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn enter(&mut self, op: &'static str) -> GatewayResult<()> {
        *self.calls.entry(op).or_default() += 1;
        self.log.push(op);
        match self.failures.get_mut(op).and_then(|q| q.pop_front()) {
            Some((status, message)) => Err(GatewayError::Status { status, message }),
            None => Ok(()),
        }
    }

    fn kb_mut(&mut self, id: &str) -> GatewayResult<&mut KnowledgeBase> {
        self.kbs
            .iter_mut()
            .find(|kb| kb.id == id)
            .ok_or_else(|| not_found(format!("knowledge base not found: {}", id)))
    }

    fn timestamp(&self) -> String {
        format!("2026-10-18T12:00:{:02}Z", self.next_id % 60)
    }
}

fn not_found(message: String) -> GatewayError {
    GatewayError::Status {
        status: 404,
        message,
    }
}

#[derive(Default)]
pub struct FakeGateway {
    pub state: Mutex<Platform>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `op` was called.
    pub fn calls(&self, op: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(op)
            .copied()
            .unwrap_or(0)
    }

    /// Calls that change platform state, in the order they were made.
    pub fn mutations(&self) -> Vec<&'static str> {
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .copied()
            .filter(|op| MUTATING_OPS.contains(op))
            .collect()
    }

    /// Make the next call of `op` fail with an upstream status.
    pub fn fail_next(&self, op: &'static str, status: u16, message: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(op)
            .or_default()
            .push_back((status, message.to_string()));
    }

    pub fn seed_kb(&self, name: &str, paths: &[&str]) -> KnowledgeBase {
        let mut state = self.state.lock().unwrap();
        let id = state.next("kb");
        let data_sources = paths
            .iter()
            .map(|path| DataSourceRef {
                id: state.next("ds"),
                bucket_name: "user-docs".into(),
                item_path: path.to_string(),
                region: Some("tor1".into()),
            })
            .collect();
        let kb = KnowledgeBase {
            id,
            name: name.to_string(),
            project_id: Some("proj-1".into()),
            database_id: Some("db-1".into()),
            embedding_model_id: Some("emb-1".into()),
            region: Some("tor1".into()),
            data_sources,
            total_tokens: None,
        };
        state.kbs.push(kb.clone());
        kb
    }

    pub fn seed_job(&self, kb_id: &str, status: JobStatus) -> IndexingJob {
        let mut state = self.state.lock().unwrap();
        let job = IndexingJob {
            id: state.next("job"),
            knowledge_base_id: Some(kb_id.to_string()),
            data_source_ids: vec![],
            status,
            progress: None,
            error: None,
            created_at: Some(state.timestamp()),
        };
        state.jobs.push(job.clone());
        job
    }

    pub fn seed_agent(&self, project: &str, database: &str, model: &str) {
        let mut state = self.state.lock().unwrap();
        let id = state.next("agent");
        state.agents.push(Agent {
            id,
            name: "support-bot".into(),
            project_id: Some(project.into()),
            embedding_model_id: Some(model.into()),
            database_id: Some(database.into()),
            knowledge_base_ids: vec![],
        });
    }

    /// Successive status fetches of `job_id` return these statuses in order;
    /// the last one sticks.
    pub fn script_job(&self, job_id: &str, steps: &[(JobStatus, Option<&str>)]) {
        self.state.lock().unwrap().scripts.insert(
            job_id.to_string(),
            steps
                .iter()
                .map(|(s, e)| (*s, e.map(str::to_string)))
                .collect(),
        );
    }

    pub fn set_job_status(&self, job_id: &str, status: JobStatus) {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = status;
        }
    }

    pub fn kbs_named(&self, name: &str) -> Vec<KnowledgeBase> {
        self.state
            .lock()
            .unwrap()
            .kbs
            .iter()
            .filter(|kb| kb.name == name)
            .cloned()
            .collect()
    }

    pub fn configure(&self, f: impl FnOnce(&mut Platform)) {
        f(&mut self.state.lock().unwrap());
    }
}

#[async_trait]
impl ResourceGateway for FakeGateway {
    async fn list_knowledge_bases(&self) -> GatewayResult<Vec<KnowledgeBase>> {
        let mut state = self.state.lock().unwrap();
        state.enter("list_knowledge_bases")?;
        Ok(state.kbs.clone())
    }

    async fn get_knowledge_base(&self, id: &str) -> GatewayResult<Option<KnowledgeBase>> {
        let mut state = self.state.lock().unwrap();
        state.enter("get_knowledge_base")?;
        Ok(state.kbs.iter().find(|kb| kb.id == id).cloned())
    }

    async fn create_knowledge_base(
        &self,
        spec: &KnowledgeBaseSpec,
    ) -> GatewayResult<Option<KnowledgeBase>> {
        let mut state = self.state.lock().unwrap();
        state.enter("create_knowledge_base")?;
        let id = state.next("kb");
        let ds_id = state.next("ds");
        let kb = KnowledgeBase {
            id,
            name: spec.name.clone(),
            project_id: Some(spec.project_id.clone()),
            database_id: Some(spec.database_id.clone()),
            embedding_model_id: Some(spec.embedding_model_id.clone()),
            region: spec.region.clone(),
            data_sources: vec![DataSourceRef {
                id: ds_id,
                bucket_name: spec.initial_data_source.bucket_name.clone(),
                item_path: spec.initial_data_source.item_path.clone(),
                region: spec.initial_data_source.region.clone(),
            }],
            total_tokens: None,
        };
        state.kbs.push(kb.clone());
        if state.hide_created_kb_id {
            return Ok(None);
        }
        // Creation responses carry no data sources.
        Ok(Some(KnowledgeBase {
            data_sources: vec![],
            ..kb
        }))
    }

    async fn update_knowledge_base(
        &self,
        id: &str,
        patch: &KnowledgeBasePatch,
    ) -> GatewayResult<Option<KnowledgeBase>> {
        let mut state = self.state.lock().unwrap();
        state.enter("update_knowledge_base")?;
        let kb = state.kb_mut(id)?;
        if let Some(name) = &patch.name {
            kb.name = name.clone();
        }
        Ok(Some(kb.clone()))
    }

    async fn delete_knowledge_base(&self, id: &str) -> GatewayResult<()> {
        let mut state = self.state.lock().unwrap();
        state.enter("delete_knowledge_base")?;
        state.kbs.retain(|kb| kb.id != id);
        Ok(())
    }

    async fn list_data_sources(&self, kb_id: &str) -> GatewayResult<Vec<DataSourceRef>> {
        let mut state = self.state.lock().unwrap();
        state.enter("list_data_sources")?;
        Ok(state.kb_mut(kb_id)?.data_sources.clone())
    }

    async fn add_data_source(
        &self,
        kb_id: &str,
        spec: &DataSourceSpec,
    ) -> GatewayResult<Option<String>> {
        let mut state = self.state.lock().unwrap();
        state.enter("add_data_source")?;
        let id = state.next("ds");
        let hide = state.hide_added_data_source_id;
        state.kb_mut(kb_id)?.data_sources.push(DataSourceRef {
            id: id.clone(),
            bucket_name: spec.bucket_name.clone(),
            item_path: spec.item_path.clone(),
            region: spec.region.clone(),
        });
        Ok(if hide { None } else { Some(id) })
    }

    async fn delete_data_source(&self, kb_id: &str, data_source_id: &str) -> GatewayResult<()> {
        let mut state = self.state.lock().unwrap();
        state.enter("delete_data_source")?;
        let kb = state.kb_mut(kb_id)?;
        let before = kb.data_sources.len();
        kb.data_sources.retain(|ds| ds.id != data_source_id);
        if kb.data_sources.len() == before {
            return Err(not_found(format!(
                "data source not found: {}",
                data_source_id
            )));
        }
        Ok(())
    }

    async fn start_indexing_job(
        &self,
        kb_id: &str,
        data_source_ids: &[String],
    ) -> GatewayResult<Option<IndexingJob>> {
        let mut state = self.state.lock().unwrap();
        state.enter("start_indexing_job")?;
        let busy = state
            .jobs
            .iter()
            .any(|j| j.knowledge_base_id.as_deref() == Some(kb_id) && j.status.is_active());
        if busy {
            return Err(GatewayError::Status {
                status: 409,
                message: "indexing job already running for this knowledge base".into(),
            });
        }
        let job = IndexingJob {
            id: state.next("job"),
            knowledge_base_id: Some(kb_id.to_string()),
            data_source_ids: data_source_ids.to_vec(),
            status: JobStatus::Pending,
            progress: None,
            error: None,
            created_at: Some(state.timestamp()),
        };
        state.jobs.push(job.clone());
        Ok(if state.hide_started_job {
            None
        } else {
            Some(job)
        })
    }

    async fn get_indexing_job(&self, id: &str) -> GatewayResult<Option<IndexingJob>> {
        let mut state = self.state.lock().unwrap();
        state.enter("get_indexing_job")?;
        let step = match state.scripts.get_mut(id) {
            Some(steps) if steps.len() > 1 => steps.pop_front(),
            Some(steps) => steps.front().cloned(),
            None => None,
        };
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| not_found(format!("indexing job not found: {}", id)))?;
        if let Some((status, error)) = step {
            job.status = status;
            job.error = error;
        }
        Ok(Some(job.clone()))
    }

    async fn list_indexing_jobs(&self, kb_id: &str) -> GatewayResult<Vec<IndexingJob>> {
        let mut state = self.state.lock().unwrap();
        state.enter("list_indexing_jobs")?;
        Ok(state
            .jobs
            .iter()
            .filter(|j| j.knowledge_base_id.as_deref() == Some(kb_id))
            .cloned()
            .collect())
    }

    async fn list_agents(&self) -> GatewayResult<Vec<Agent>> {
        let mut state = self.state.lock().unwrap();
        state.enter("list_agents")?;
        Ok(state.agents.clone())
    }

    async fn get_agent(&self, id: &str) -> GatewayResult<Option<Agent>> {
        let mut state = self.state.lock().unwrap();
        state.enter("get_agent")?;
        Ok(state.agents.iter().find(|a| a.id == id).cloned())
    }

    async fn attach_knowledge_base(&self, agent_id: &str, kb_id: &str) -> GatewayResult<()> {
        let mut state = self.state.lock().unwrap();
        state.enter("attach_knowledge_base")?;
        let agent = state
            .agents
            .iter_mut()
            .find(|a| a.id == agent_id)
            .ok_or_else(|| not_found(format!("agent not found: {}", agent_id)))?;
        if !agent.knowledge_base_ids.iter().any(|id| id == kb_id) {
            agent.knowledge_base_ids.push(kb_id.to_string());
        }
        Ok(())
    }
}

pub fn provisioning() -> ProvisioningConfig {
    ProvisioningConfig {
        project_id: Some("proj-1".into()),
        database_id: Some("db-1".into()),
        embedding_model_id: Some("emb-1".into()),
        region: Some("tor1".into()),
        ..Default::default()
    }
}
