//! Request-scoped memoization of knowledge base lookups.
//!
//! One [`StateCache`] lives exactly as long as one reconciliation call. It
//! remembers the KB list and each KB detail it has fetched so the engine can
//! ask freely without paying extra round trips. There is no TTL and nothing
//! survives the call: remote state may change between independent calls.
//!
//! When the engine mutates something and already knows the result, it
//! records it here (`record_*`) instead of forcing a re-fetch. When it does
//! not know the result, it calls [`StateCache::invalidate_kb`].

use std::collections::HashMap;

use crate::error::GatewayResult;
use crate::gateway::ResourceGateway;
use crate::models::{DataSourceRef, KnowledgeBase};

pub struct StateCache<'a> {
    gateway: &'a dyn ResourceGateway,
    all: Option<Vec<KnowledgeBase>>,
    details: HashMap<String, KnowledgeBase>,
}

impl<'a> StateCache<'a> {
    pub fn new(gateway: &'a dyn ResourceGateway) -> Self {
        Self {
            gateway,
            all: None,
            details: HashMap::new(),
        }
    }

    /// All knowledge bases, fetched at most once per call.
    pub async fn all_kbs(&mut self) -> GatewayResult<&[KnowledgeBase]> {
        if self.all.is_none() {
            let list = self.gateway.list_knowledge_bases().await?;
            self.all = Some(list);
        }
        Ok(self.all.as_deref().unwrap_or_default())
    }

    /// Detail of one knowledge base, fetched at most once per id unless
    /// invalidated. `None` when the platform returns nothing recognizable.
    pub async fn kb_detail(&mut self, id: &str) -> GatewayResult<Option<KnowledgeBase>> {
        if let Some(kb) = self.details.get(id) {
            return Ok(Some(kb.clone()));
        }
        let fetched = self.gateway.get_knowledge_base(id).await?;
        if let Some(kb) = &fetched {
            self.details.insert(id.to_string(), kb.clone());
        }
        Ok(fetched)
    }

    /// Bypass the memoized list and fetch it again.
    pub async fn refresh_all(&mut self) -> GatewayResult<&[KnowledgeBase]> {
        self.all = None;
        self.all_kbs().await
    }

    pub fn record_created_kb(&mut self, kb: KnowledgeBase) {
        if let Some(all) = self.all.as_mut() {
            all.retain(|existing| existing.id != kb.id);
            all.push(kb.clone());
        }
        self.details.insert(kb.id.clone(), kb);
    }

    pub fn record_data_source_added(&mut self, kb_id: &str, ds: DataSourceRef) {
        if let Some(kb) = self.details.get_mut(kb_id) {
            kb.data_sources.retain(|existing| existing.id != ds.id);
            kb.data_sources.push(ds);
        }
    }

    pub fn record_data_source_deleted(&mut self, kb_id: &str, ds_id: &str) {
        if let Some(kb) = self.details.get_mut(kb_id) {
            kb.data_sources.retain(|existing| existing.id != ds_id);
        }
    }

    pub fn invalidate_kb(&mut self, kb_id: &str) {
        self.details.remove(kb_id);
    }
}
