//! Knowledge base reconciliation.
//!
//! [`Reconciler::reconcile`] brings a user's knowledge base on the platform
//! into the requested shape and makes sure an indexing job is running for
//! it. Every step reads current state before mutating, so the whole call is
//! safe to repeat: after a partial failure, running it again with the same
//! inputs converges on the same result instead of duplicating resources.
//!
//! # Steps
//!
//! 1. **Find or create the KB** by exact name. Creation carries the initial
//!    data source and is followed by a detail re-fetch.
//! 2. **Reconcile the data source.** The KB ends with exactly one data source
//!    at the desired path. Stale ones are deleted before the new one is added.
//! 3. **Start or resume indexing.** An active job named by the resume hint
//!    is adopted. Otherwise a job is started; if the platform says one is
//!    already running, the KB's job listing is searched for it.
//!
//! Any failure returns immediately as a [`ReconcileError`]. There are no
//! automatic retries of platform calls; re-invoking the whole reconciliation
//! is the retry mechanism.
//!
//! # Concurrency
//!
//! Calls for different users share nothing but the gateway. Two calls for
//! the same KB are not serialized here; the platform rejects a second
//! concurrent indexing start and step 3 recovers from that.

use chrono::{DateTime, FixedOffset};

use crate::cache::StateCache;
use crate::config::ProvisioningConfig;
use crate::error::{ErrorKind, GatewayError, ReconcileError};
use crate::gateway::ResourceGateway;
use crate::models::{
    DataSourceRef, DataSourceSpec, IndexingJob, KnowledgeBase, KnowledgeBaseSpec,
    ReconcileOutcome, ReconcileRequest, UserKbState,
};

/// Identifiers a new knowledge base needs.
#[derive(Debug, Clone, PartialEq)]
struct Identifiers {
    project_id: String,
    database_id: String,
    embedding_model_id: String,
}

pub struct Reconciler<'a> {
    gateway: &'a dyn ResourceGateway,
    provisioning: &'a ProvisioningConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(gateway: &'a dyn ResourceGateway, provisioning: &'a ProvisioningConfig) -> Self {
        Self {
            gateway,
            provisioning,
        }
    }

    /// Run one reconciliation. See the module docs for the algorithm.
    pub async fn reconcile(
        &self,
        req: &ReconcileRequest,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        tracing::info!(
            user_id = %req.user_id,
            kb_name = %req.kb_name,
            item_path = %req.desired_item_path,
            "reconciling knowledge base"
        );
        let mut cache = StateCache::new(self.gateway);

        let kb = self.find_or_create_kb(&mut cache, req).await?;
        let (kb_detail, data_source_id) = self.reconcile_data_source(&mut cache, kb, req).await?;
        let (job_id, resumed) = self
            .start_or_resume_indexing(
                &kb_detail.id,
                &data_source_id,
                req.resume_job_id.as_deref(),
            )
            .await?;

        tracing::info!(
            kb_id = %kb_detail.id,
            data_source_id = %data_source_id,
            job_id = %job_id,
            resumed,
            "reconciliation finished"
        );
        Ok(ReconcileOutcome {
            kb_id: kb_detail.id.clone(),
            data_source_id,
            job_id,
            kb_detail,
            resumed,
        })
    }

    /// Reconcile from a caller-held snapshot: the resume hint comes from
    /// `state.last_indexing_job_id`, and the updated snapshot is returned
    /// alongside the outcome. Nothing is persisted here.
    pub async fn reconcile_state(
        &self,
        state: &UserKbState,
        desired_item_path: &str,
        bucket_name: &str,
    ) -> Result<(ReconcileOutcome, UserKbState), ReconcileError> {
        let req = ReconcileRequest {
            user_id: state.user_id.clone(),
            kb_name: state.kb_name.clone(),
            desired_item_path: desired_item_path.to_string(),
            bucket_name: bucket_name.to_string(),
            resume_job_id: state.last_indexing_job_id.clone(),
        };
        let outcome = self.reconcile(&req).await?;
        let next = state.after_reconcile(&outcome);
        Ok((outcome, next))
    }

    // ============ Step 1: knowledge base ============

    async fn find_or_create_kb(
        &self,
        cache: &mut StateCache<'_>,
        req: &ReconcileRequest,
    ) -> Result<KnowledgeBase, ReconcileError> {
        let (first_match, duplicates) = {
            let all = cache.all_kbs().await.map_err(upstream)?;
            let mut matches = all.iter().filter(|kb| kb.name == req.kb_name);
            let first = matches.next().map(|kb| kb.id.clone());
            (first, matches.count())
        };

        if let Some(kb_id) = first_match {
            if duplicates > 0 {
                // Kept as-is: the first match wins.
                tracing::warn!(
                    kb_name = %req.kb_name,
                    kb_id = %kb_id,
                    duplicates,
                    "several knowledge bases share this name; using the first"
                );
            }
            tracing::debug!(kb_id = %kb_id, "found existing knowledge base");
            return self.detail(cache, &kb_id).await;
        }

        let ids = self.resolve_identifiers(cache).await?;
        let spec = KnowledgeBaseSpec {
            name: req.kb_name.clone(),
            description: self
                .provisioning
                .description
                .clone()
                .unwrap_or_else(|| format!("Knowledge base for {}", req.user_id)),
            project_id: ids.project_id,
            database_id: ids.database_id,
            embedding_model_id: ids.embedding_model_id,
            region: self.provisioning.region.clone(),
            tags: self.provisioning.tags.clone(),
            initial_data_source: self.data_source_spec(req),
        };

        let created = self
            .gateway
            .create_knowledge_base(&spec)
            .await
            .map_err(|e| ReconcileError::upstream(ErrorKind::KbCreateFailed, &e))?;

        let kb_id = match created {
            Some(kb) => kb.id,
            None => {
                // The response did not say which record was created.
                let all = cache.refresh_all().await.map_err(upstream)?;
                all.iter()
                    .find(|kb| kb.name == req.kb_name)
                    .map(|kb| kb.id.clone())
                    .ok_or_else(|| {
                        ReconcileError::new(
                            ErrorKind::KbCreateFailed,
                            format!(
                                "knowledge base '{}' was created but could not be located",
                                req.kb_name
                            ),
                        )
                    })?
            }
        };
        tracing::info!(kb_id = %kb_id, kb_name = %req.kb_name, "created knowledge base");

        // Creation responses do not reliably include the data source id.
        cache.invalidate_kb(&kb_id);
        let detail = self.detail(cache, &kb_id).await?;
        cache.record_created_kb(detail.clone());
        Ok(detail)
    }

    async fn detail(
        &self,
        cache: &mut StateCache<'_>,
        kb_id: &str,
    ) -> Result<KnowledgeBase, ReconcileError> {
        cache.kb_detail(kb_id).await.map_err(upstream)?.ok_or_else(|| {
            ReconcileError::new(
                ErrorKind::UpstreamError,
                format!("knowledge base detail unavailable: {}", kb_id),
            )
        })
    }

    /// Configuration first, then existing knowledge bases, then agents.
    /// Whatever configuration leaves unset is taken from one platform
    /// resource that carries all of it. Read-only.
    async fn resolve_identifiers(
        &self,
        cache: &mut StateCache<'_>,
    ) -> Result<Identifiers, ReconcileError> {
        let mut ids = [
            self.provisioning.project_id.clone(),
            self.provisioning.database_id.clone(),
            self.provisioning.embedding_model_id.clone(),
        ];

        if ids.iter().any(Option::is_none) {
            let all = cache.all_kbs().await.map_err(upstream)?;
            let candidates = all
                .iter()
                .map(|kb| [&kb.project_id, &kb.database_id, &kb.embedding_model_id]);
            if fill_from_single_source(&mut ids, candidates) {
                tracing::debug!("missing identifiers taken from an existing knowledge base");
            }
        }

        if ids.iter().any(Option::is_none) {
            let agents = self.gateway.list_agents().await.map_err(upstream)?;
            let candidates = agents
                .iter()
                .map(|agent| [&agent.project_id, &agent.database_id, &agent.embedding_model_id]);
            if fill_from_single_source(&mut ids, candidates) {
                tracing::debug!("missing identifiers taken from an agent");
            }
        }

        let [project_id, database_id, embedding_model_id] = ids;
        match (project_id, database_id, embedding_model_id) {
            (Some(project_id), Some(database_id), Some(embedding_model_id)) => Ok(Identifiers {
                project_id,
                database_id,
                embedding_model_id,
            }),
            (p, d, e) => {
                let missing: Vec<&str> = [
                    ("project_id", p.is_none()),
                    ("database_id", d.is_none()),
                    ("embedding_model_id", e.is_none()),
                ]
                .iter()
                .filter(|(_, absent)| *absent)
                .map(|(name, _)| *name)
                .collect();
                Err(ReconcileError::new(
                    ErrorKind::ConfigMissing,
                    format!(
                        "cannot create knowledge base: unresolved {} (set them under [provisioning])",
                        missing.join(", ")
                    ),
                ))
            }
        }
    }

    // ============ Step 2: data source ============

    fn data_source_spec(&self, req: &ReconcileRequest) -> DataSourceSpec {
        DataSourceSpec {
            bucket_name: req.bucket_name.clone(),
            item_path: req.desired_item_path.clone(),
            region: self.provisioning.region.clone(),
        }
    }

    async fn reconcile_data_source(
        &self,
        cache: &mut StateCache<'_>,
        kb: KnowledgeBase,
        req: &ReconcileRequest,
    ) -> Result<(KnowledgeBase, String), ReconcileError> {
        let desired = req.desired_item_path.as_str();

        if let [only] = kb.data_sources.as_slice() {
            if only.item_path == desired {
                tracing::debug!(data_source_id = %only.id, "data source already up to date");
                let id = only.id.clone();
                return Ok((kb, id));
            }
        }

        // Zero, one stale, or several: remove everything, then add one.
        for stale in &kb.data_sources {
            tracing::info!(
                kb_id = %kb.id,
                data_source_id = %stale.id,
                item_path = %stale.item_path,
                "removing data source"
            );
            match self.gateway.delete_data_source(&kb.id, &stale.id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    tracing::debug!(data_source_id = %stale.id, "data source already gone");
                }
                Err(e) => {
                    return Err(ReconcileError::upstream(
                        ErrorKind::DatasourceDeleteFailed,
                        &e,
                    ))
                }
            }
            cache.record_data_source_deleted(&kb.id, &stale.id);
        }

        let spec = self.data_source_spec(req);
        tracing::info!(kb_id = %kb.id, item_path = desired, "adding data source");
        let added = self
            .gateway
            .add_data_source(&kb.id, &spec)
            .await
            .map_err(|e| ReconcileError::upstream(ErrorKind::DatasourceAddFailed, &e))?;

        match &added {
            Some(id) => cache.record_data_source_added(
                &kb.id,
                DataSourceRef {
                    id: id.clone(),
                    bucket_name: spec.bucket_name.clone(),
                    item_path: spec.item_path.clone(),
                    region: spec.region.clone(),
                },
            ),
            None => cache.invalidate_kb(&kb.id),
        }

        let detail = self.detail(cache, &kb.id).await?;
        let data_source_id = match added {
            Some(id) => id,
            None => detail
                .data_sources
                .iter()
                .find(|ds| ds.item_path == desired)
                .map(|ds| ds.id.clone())
                .ok_or_else(|| {
                    ReconcileError::new(
                        ErrorKind::DatasourceAddFailed,
                        format!("data source for '{}' not found after adding it", desired),
                    )
                })?,
        };
        Ok((detail, data_source_id))
    }

    // ============ Step 3: indexing ============

    async fn start_or_resume_indexing(
        &self,
        kb_id: &str,
        data_source_id: &str,
        resume_job_id: Option<&str>,
    ) -> Result<(String, bool), ReconcileError> {
        if let Some(hint) = resume_job_id {
            if let Some(job) = self.usable_resume_hint(kb_id, hint).await? {
                tracing::info!(job_id = %job.id, status = %job.status, "resuming active indexing job");
                return Ok((job.id, true));
            }
        }

        let started = self
            .gateway
            .start_indexing_job(kb_id, &[data_source_id.to_string()])
            .await;

        match started {
            Ok(Some(job)) => {
                tracing::info!(job_id = %job.id, "indexing job started");
                Ok((job.id, false))
            }
            Ok(None) => {
                // Started, but the response did not identify the job.
                let job = self
                    .discover_active_job(kb_id, ErrorKind::IndexingStartFailed)
                    .await?
                    .ok_or_else(|| {
                        ReconcileError::new(
                            ErrorKind::IndexingStartFailed,
                            "indexing job start returned no job id and no active job is listed",
                        )
                    })?;
                Ok((job.id, false))
            }
            Err(e) if e.is_already_running() => {
                tracing::warn!(kb_id, error = %e, "indexing already running; looking for the active job");
                match self
                    .discover_active_job(kb_id, ErrorKind::IndexingConflictUnresolved)
                    .await?
                {
                    Some(job) => {
                        tracing::info!(job_id = %job.id, "adopted already-running indexing job");
                        Ok((job.id, true))
                    }
                    None => Err(ReconcileError::new(
                        ErrorKind::IndexingConflictUnresolved,
                        format!(
                            "indexing is already running for knowledge base {} but no active job was found: {}",
                            kb_id,
                            e.upstream_message()
                        ),
                    )),
                }
            }
            Err(e) => Err(ReconcileError::upstream(ErrorKind::IndexingStartFailed, &e)),
        }
    }

    /// The hinted job, if it is still active and belongs to this KB.
    async fn usable_resume_hint(
        &self,
        kb_id: &str,
        hint: &str,
    ) -> Result<Option<IndexingJob>, ReconcileError> {
        let job = match self.gateway.get_indexing_job(hint).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::debug!(job_id = hint, "resume hint not recognized");
                return Ok(None);
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(job_id = hint, "resume hint not found");
                return Ok(None);
            }
            Err(e) => return Err(upstream(e)),
        };

        if job.knowledge_base_id.as_deref().is_some_and(|id| id != kb_id) {
            tracing::debug!(job_id = hint, "resume hint belongs to another knowledge base");
            return Ok(None);
        }
        if !job.status.is_active() {
            tracing::debug!(job_id = hint, status = %job.status, "resume hint already finished");
            return Ok(None);
        }
        Ok(Some(job))
    }

    /// Most recent `PENDING`/`RUNNING` job listed for the KB. A listing
    /// failure is reported as `failure_kind`, the kind the caller would
    /// report had the listing come back empty.
    async fn discover_active_job(
        &self,
        kb_id: &str,
        failure_kind: ErrorKind,
    ) -> Result<Option<IndexingJob>, ReconcileError> {
        let jobs = self.gateway.list_indexing_jobs(kb_id).await.map_err(|e| {
            ReconcileError::new(
                failure_kind,
                format!("could not list indexing jobs for {}: {}", kb_id, e.upstream_message()),
            )
        })?;
        Ok(most_recent_active(jobs))
    }
}

/// Fills every missing identifier from the first candidate that supplies
/// all of them. Returns false, leaving `ids` untouched, when none does.
fn fill_from_single_source<'a>(
    ids: &mut [Option<String>; 3],
    candidates: impl IntoIterator<Item = [&'a Option<String>; 3]>,
) -> bool {
    for candidate in candidates {
        let covers = ids
            .iter()
            .zip(candidate.iter())
            .all(|(have, offered)| have.is_some() || offered.is_some());
        if covers {
            for (have, offered) in ids.iter_mut().zip(candidate) {
                if have.is_none() {
                    *have = offered.clone();
                }
            }
            return true;
        }
    }
    false
}

fn upstream(err: GatewayError) -> ReconcileError {
    ReconcileError::upstream(ErrorKind::UpstreamError, &err)
}

/// Latest active job by `created_at`; listing order breaks ties and covers
/// jobs without a parseable timestamp.
fn most_recent_active(jobs: Vec<IndexingJob>) -> Option<IndexingJob> {
    let created = |job: &IndexingJob| -> Option<DateTime<FixedOffset>> {
        job.created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    };

    let mut best: Option<IndexingJob> = None;
    for job in jobs.into_iter().filter(|j| j.status.is_active()) {
        best = match best {
            None => Some(job),
            Some(current) => match (created(&current), created(&job)) {
                (Some(a), Some(b)) if b > a => Some(job),
                (None, Some(_)) => Some(job),
                _ => Some(current),
            },
        };
    }
    best
}
