use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::activity::ActivityRecorder;
use crate::catalog::DocumentCatalog;
use crate::error::Result;
use crate::events::EventBus;
use crate::permissions::PermissionMatrix;
use crate::search::SearchIndex;
use crate::storage::Store;
use crate::versions::VersionStore;
use crate::workflow::WorkflowEngine;

#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    /// Directory holding the table file; volatile when unset.
    pub data_dir: Option<PathBuf>,
    /// Directory for the search index; in RAM when unset.
    pub index_dir: Option<PathBuf>,
}

/// Every component wired over one store and one event bus.
pub struct Engine {
    pub store: Arc<Store>,
    pub events: EventBus,
    pub catalog: DocumentCatalog,
    pub permissions: PermissionMatrix,
    pub versions: VersionStore,
    pub workflow: WorkflowEngine,
    pub activity: ActivityRecorder,
}

impl Engine {
    pub async fn open(config: &EngineConfig) -> Result<Self> {
        let store = match &config.data_dir {
            Some(dir) => Store::open(dir).await?,
            None => Store::in_memory(),
        };
        let index = match &config.index_dir {
            Some(dir) => SearchIndex::open(dir)?,
            None => SearchIndex::in_memory()?,
        };
        let store = Arc::new(store);
        let documents = store
            .read(|t| t.documents.values().cloned().collect::<Vec<_>>())
            .await;
        index.rebuild(&documents)?;
        info!(documents = documents.len(), "search index rebuilt");
        Ok(Self::assemble(store, index))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::assemble(
            Arc::new(Store::in_memory()),
            SearchIndex::in_memory()?,
        ))
    }

    fn assemble(store: Arc<Store>, index: SearchIndex) -> Self {
        let events = EventBus::new();
        let activity = ActivityRecorder::new(store.clone());
        Self {
            catalog: DocumentCatalog::new(
                store.clone(),
                Arc::new(index),
                events.clone(),
                activity.clone(),
            ),
            permissions: PermissionMatrix::new(store.clone(), events.clone()),
            versions: VersionStore::new(store.clone()),
            workflow: WorkflowEngine::new(store.clone(), events.clone(), activity.clone()),
            activity,
            events,
            store,
        }
    }
}
