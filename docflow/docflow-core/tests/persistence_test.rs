//! Reopening an engine over the same directories

use anyhow::Result;
use docflow_core::{
    catalog::{Category, Content, ListFilters, NewDocument, Pager, Sort},
    role::{Caller, Role},
    versions::Consistency,
    workflow::{NewRequest, RequestCategory, WorkflowStatus},
    Engine, EngineConfig,
};
use tempfile::TempDir;

#[tokio::test]
async fn test_state_survives_restart() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = EngineConfig {
        data_dir: Some(temp_dir.path().join("data")),
        index_dir: Some(temp_dir.path().join("index")),
    };
    let admin = Caller::new("admin-1", Role::Admin);

    let (doc_id, request_id) = {
        let engine = Engine::open(&config).await?;
        let doc = engine
            .catalog
            .create(
                NewDocument {
                    title: "Onboarding checklist".into(),
                    description: Some("first week".into()),
                    content: Content::Blob {
                        blob_key: "blobs/onboarding.pdf".into(),
                        name: "onboarding.pdf".into(),
                    },
                    category: Category::Business,
                    labels: vec![],
                    read_time: Some(12),
                },
                &admin,
            )
            .await?;
        let request = engine
            .workflow
            .create_request(
                NewRequest {
                    client_id: "client-1".into(),
                    expert_id: None,
                    category: RequestCategory::DocumentAdministratif,
                    description: None,
                    documents: vec![doc.document.id],
                    template: Some(WorkflowStatus::FinalReport),
                    steps: vec![],
                },
                &admin,
            )
            .await?;
        (doc.document.id, request.request.id)
    };

    let engine = Engine::open(&config).await?;
    let doc = engine.catalog.get(doc_id, &admin).await?;
    assert_eq!(doc.document.read_time, 12);
    assert_eq!(engine.versions.verify(doc_id).await?, Consistency::Consistent);

    let request = engine.workflow.get(request_id, &admin).await?;
    assert_eq!(request.request.steps.len(), 4);
    assert_eq!(request.progress, 0);

    let filters = ListFilters {
        search: Some("week".into()),
        ..Default::default()
    };
    let page = engine
        .catalog
        .list(&admin, &filters, Pager::default(), Sort::default())
        .await?;
    assert_eq!(page.total, 1);
    Ok(())
}

#[tokio::test]
async fn test_in_memory_engine_has_no_file() -> Result<()> {
    let engine = Engine::open(&EngineConfig::default()).await?;
    assert!(engine.store.path().is_none());
    Ok(())
}
