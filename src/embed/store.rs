//! Artifact Store
//!
//! Process-lifetime home of rendered chart markup. Entries are appended
//! once and never evicted; the host resolves them by id when the
//! transcript is displayed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::html::host_listener;

/// Opaque handle returned to the caller for a rendered chart
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRef {
    pub artifact_id: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Artifact {
    pub id: String,
    /// Iframe markup without the host listener
    pub markup: String,
    pub default_height: u32,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(id: impl Into<String>, markup: String, default_height: u32) -> Self {
        Self {
            id: id.into(),
            markup,
            default_height,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ArtifactStore {
    artifacts: RwLock<HashMap<String, Artifact>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh artifact id; embedded in the markup before the artifact is stored.
    pub fn next_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub async fn insert(&self, artifact: Artifact) -> String {
        let id = artifact.id.clone();
        let bytes = artifact.markup.len();
        self.artifacts.write().await.insert(id.clone(), artifact);
        info!(artifact_id = %id, bytes, "Chart artifact stored");
        id
    }

    /// Embeddable markup for `id`: the iframe plus the host resize listener.
    pub async fn resolve(&self, id: &str) -> Option<String> {
        let artifacts = self.artifacts.read().await;
        let artifact = artifacts.get(id);
        debug!(artifact_id = %id, found = artifact.is_some(), "Resolving chart artifact");
        artifact.map(|a| format!("{}{}", a.markup, host_listener()))
    }

    pub async fn get(&self, id: &str) -> Option<Artifact> {
        self.artifacts.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.artifacts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.artifacts.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_then_resolve() {
        let store = ArtifactStore::new();
        let id = ArtifactStore::next_id();
        store
            .insert(Artifact::new(id.clone(), "<iframe></iframe>".to_string(), 420))
            .await;

        let markup = store.resolve(&id).await.unwrap();
        assert!(markup.starts_with("<iframe></iframe>"));
        assert!(markup.contains("chart:resize"));
        assert_eq!(store.get(&id).await.unwrap().default_height, 420);
        assert_eq!(store.len().await, 1);
    }

    #[test]
    fn test_unknown_id_resolves_to_none() {
        let store = ArtifactStore::new();
        assert!(tokio_test::block_on(store.resolve("missing")).is_none());
        assert!(tokio_test::block_on(store.is_empty()));
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(ArtifactStore::next_id(), ArtifactStore::next_id());
    }
}
