//! Versioned flow store.
//!
//! Published versions are immutable: editing a flow publishes a new
//! version and sessions already running keep the version they pinned at
//! start. Definitions are cached as `Arc`s after first read, which is safe
//! because a stored version never changes.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use switchboard_types::error::{FlowError, RepositoryError};
use switchboard_types::flow::FlowDefinition;

use crate::flow::document::FlowDocument;
use crate::flow::validate::validate_flow;
use crate::repository::flow::FlowRepository;

/// Publishes, caches and resolves flow definitions.
pub struct FlowDefinitionStore<R: FlowRepository> {
    repo: R,
    cache: DashMap<(String, u32), Arc<FlowDefinition>>,
    default_flow_id: Option<String>,
}

impl<R: FlowRepository> FlowDefinitionStore<R> {
    pub fn new(repo: R, default_flow_id: Option<String>) -> Self {
        Self {
            repo,
            cache: DashMap::new(),
            default_flow_id,
        }
    }

    pub fn default_flow_id(&self) -> Option<&str> {
        self.default_flow_id.as_deref()
    }

    /// Validate `flow` and store it as the next version of its id.
    ///
    /// The incoming `version` and `published_at` are ignored. Unreachable
    /// steps are logged but do not block publishing.
    pub async fn publish(&self, mut flow: FlowDefinition) -> Result<Arc<FlowDefinition>, FlowError> {
        let report = validate_flow(&flow)?;
        if !report.unreachable.is_empty() {
            tracing::warn!(
                flow_id = %flow.id,
                unreachable = ?report.unreachable,
                "flow has steps unreachable from the initial step"
            );
        }

        let latest = self
            .repo
            .get_latest(&flow.id)
            .await
            .map_err(storage)?
            .map(|f| f.version)
            .unwrap_or(0);
        flow.version = latest + 1;
        flow.published_at = Some(Utc::now());

        match self.repo.save_version(&flow).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => {
                return Err(FlowError::VersionConflict {
                    flow_id: flow.id,
                    version: flow.version,
                });
            }
            Err(e) => return Err(storage(e)),
        }

        tracing::info!(flow_id = %flow.id, version = flow.version, steps = flow.steps.len(), "published flow");

        let flow = Arc::new(flow);
        self.cache
            .insert((flow.id.clone(), flow.version), Arc::clone(&flow));
        Ok(flow)
    }

    /// Parse an authored document and publish it under `flow_id`.
    pub async fn publish_document(
        &self,
        flow_id: &str,
        text: &str,
    ) -> Result<Arc<FlowDefinition>, FlowError> {
        let definition = FlowDocument::parse(text)?.into_definition(flow_id)?;
        self.publish(definition).await
    }

    /// Exact version lookup, used for sessions pinned to a version.
    pub async fn get_version(
        &self,
        flow_id: &str,
        version: u32,
    ) -> Result<Option<Arc<FlowDefinition>>, FlowError> {
        let key = (flow_id.to_string(), version);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(Some(Arc::clone(cached.value())));
        }

        let Some(flow) = self
            .repo
            .get_version(flow_id, version)
            .await
            .map_err(storage)?
        else {
            return Ok(None);
        };
        let flow = Arc::new(flow);
        self.cache.insert(key, Arc::clone(&flow));
        Ok(Some(flow))
    }

    /// Latest published version of a flow.
    pub async fn get_latest(&self, flow_id: &str) -> Result<Option<Arc<FlowDefinition>>, FlowError> {
        let Some(flow) = self.repo.get_latest(flow_id).await.map_err(storage)? else {
            return Ok(None);
        };
        // Go through the cache so every caller shares one Arc per version.
        let key = (flow.id.clone(), flow.version);
        let entry = self.cache.entry(key).or_insert_with(|| Arc::new(flow));
        Ok(Some(Arc::clone(entry.value())))
    }

    /// The flow a new session should run: the requested id when it exists,
    /// otherwise the configured default. `None` when neither resolves.
    pub async fn resolve_for_new_session(
        &self,
        requested: Option<&str>,
    ) -> Result<Option<Arc<FlowDefinition>>, FlowError> {
        if let Some(flow_id) = requested {
            if let Some(flow) = self.get_latest(flow_id).await? {
                return Ok(Some(flow));
            }
            tracing::debug!(flow_id, "requested flow not found, using default");
        }
        match self.default_flow_id.as_deref() {
            Some(default_id) => self.get_latest(default_id).await,
            None => Ok(None),
        }
    }

    pub async fn list_versions(&self, flow_id: &str) -> Result<Vec<u32>, FlowError> {
        self.repo.list_versions(flow_id).await.map_err(storage)
    }

    pub async fn list_flows(&self) -> Result<Vec<String>, FlowError> {
        self.repo.list_flows().await.map_err(storage)
    }
}

fn storage(e: RepositoryError) -> FlowError {
    FlowError::Storage(e.to_string())
}
