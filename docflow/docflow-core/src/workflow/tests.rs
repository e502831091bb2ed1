use super::*;
use crate::activity::ActivityRecorder;
use crate::catalog::{Category, Content, Document};
use crate::error::Error;
use crate::events::{Event, EventBus};
use crate::permissions;
use crate::storage::Store;
use chrono::Duration;
use std::sync::Arc;

struct Fixture {
    engine: WorkflowEngine,
    store: Arc<Store>,
    events: EventBus,
    admin: Caller,
    internal: Caller,
    client: Caller,
    expert: Caller,
}

fn fixture() -> Fixture {
    let store = Arc::new(Store::in_memory());
    let events = EventBus::new();
    let activity = ActivityRecorder::new(store.clone());
    Fixture {
        engine: WorkflowEngine::new(store.clone(), events.clone(), activity),
        store,
        events,
        admin: Caller::new("admin-1", Role::Admin),
        internal: Caller::new("internal-1", Role::Internal),
        client: Caller::new("client-1", Role::Client),
        expert: Caller::new("expert-1", Role::Expert),
    }
}

fn request(stage: WorkflowStatus) -> NewRequest {
    NewRequest {
        client_id: "client-1".into(),
        expert_id: Some("expert-1".into()),
        category: RequestCategory::Facture,
        description: Some("Q1 invoices".into()),
        documents: vec![],
        template: Some(stage),
        steps: vec![],
    }
}

async fn seed_document(store: &Store, category: Category) -> Uuid {
    store
        .transaction(|t| {
            let now = Utc::now();
            let id = Uuid::new_v4();
            t.documents.insert(
                id,
                Document {
                    id,
                    title: "Attachment".into(),
                    description: None,
                    content: Content::Text("scan".into()),
                    category,
                    read_time: 5,
                    created_at: now,
                    last_modified: now,
                    created_by: "admin-1".into(),
                    is_active: true,
                    version: 1,
                },
            );
            permissions::seed(t, id, category);
            Ok(id)
        })
        .await
        .unwrap()
}

#[test]
fn status_table() {
    assert_eq!(WorkflowStatus::Submitted.next(), Some(WorkflowStatus::InternalReview));
    assert_eq!(WorkflowStatus::FinalReport.next(), Some(WorkflowStatus::Completed));
    assert_eq!(WorkflowStatus::Completed.next(), None);
    assert_eq!(WorkflowStatus::Rejected.next(), None);
    assert!(WorkflowStatus::Rejected.is_terminal());
    assert!(!WorkflowStatus::Assigned.is_terminal());
}

#[test]
fn step_action_table() {
    assert_eq!(StepKind::Upload.actions(), &[Action::Upload]);
    assert_eq!(StepKind::Validate.actions(), &[Action::Validate, Action::Reject]);
    assert_eq!(template(WorkflowStatus::Assigned), None);
    assert_eq!(template(WorkflowStatus::FinalReport).map(<[_]>::len), Some(4));
}

#[test]
fn actionable_window_stops_at_first_required() {
    let now = Utc::now();
    let mut req = WorkflowRequest {
        id: Uuid::new_v4(),
        client_id: "c".into(),
        expert_id: None,
        category: RequestCategory::Autre,
        description: None,
        status: WorkflowStatus::Submitted,
        documents: vec![],
        steps: vec![],
        rejection_reason: None,
        created_at: now,
        updated_at: now,
    };
    let optional = StepSpec {
        required: false,
        ..StepSpec::from(StepKind::Upload)
    };
    req.append(vec![
        optional,
        StepKind::Review.into(),
        StepKind::Validate.into(),
    ]);
    let window: Vec<StepKind> = req.actionable_steps().iter().map(|s| s.kind).collect();
    assert_eq!(window, vec![StepKind::Upload, StepKind::Review]);
    assert_eq!(req.steps[0].assignee_id.as_deref(), Some("c"));
    assert_eq!(req.steps[2].assignee_id, None);
}

#[test]
fn overdue_is_informational() {
    let mut step = WorkflowStep {
        id: Uuid::new_v4(),
        position: 0,
        kind: StepKind::Upload,
        assignee_role: Role::Client,
        assignee_id: None,
        required: true,
        deadline: Some(Utc::now() - Duration::hours(1)),
        completed: false,
        completed_at: None,
        completed_by: None,
        comment: None,
        outcome: None,
    };
    assert!(step.is_overdue(Utc::now()));
    step.completed = true;
    assert!(!step.is_overdue(Utc::now()));
}

#[tokio::test]
async fn actions_follow_step_order() {
    let f = fixture();
    let view = f
        .engine
        .create_request(request(WorkflowStatus::ExpertReview), &f.admin)
        .await
        .unwrap();
    assert_eq!(view.request.status, WorkflowStatus::Submitted);
    let id = view.request.id;

    assert_eq!(f.engine.available_actions(id, &f.client).await.unwrap(), vec![Action::Upload]);
    assert!(f.engine.available_actions(id, &f.internal).await.unwrap().is_empty());
    assert!(f.engine.available_actions(id, &f.expert).await.unwrap().is_empty());

    let upload = view.request.steps[0].id;
    f.engine
        .complete_step(id, upload, &f.client, None, StepOutcome::Approved)
        .await
        .unwrap();
    assert!(f.engine.available_actions(id, &f.client).await.unwrap().is_empty());
    assert_eq!(
        f.engine.available_actions(id, &f.internal).await.unwrap(),
        vec![Action::Review, Action::Reject]
    );
}

#[tokio::test]
async fn role_mismatch_changes_nothing() {
    let f = fixture();
    let view = f
        .engine
        .create_request(request(WorkflowStatus::InternalReview), &f.admin)
        .await
        .unwrap();
    let id = view.request.id;
    let upload = view.request.steps[0].id;

    let err = f
        .engine
        .complete_step(id, upload, &f.internal, None, StepOutcome::Approved)
        .await
        .unwrap_err();
    match err {
        Error::WorkflowState { available, .. } => assert!(available.is_empty()),
        other => panic!("unexpected {other:?}"),
    }
    let stored = f.store.read(|t| t.requests[&id].clone()).await;
    assert_eq!(stored, view.request);
}

#[tokio::test]
async fn other_client_cannot_complete_upload() {
    let f = fixture();
    let view = f
        .engine
        .create_request(request(WorkflowStatus::Submitted), &f.admin)
        .await
        .unwrap();
    let intruder = Caller::new("client-2", Role::Client);
    let err = f
        .engine
        .complete_step(view.request.id, view.request.steps[0].id, &intruder, None, StepOutcome::Approved)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));
}

#[tokio::test]
async fn role_mismatch_is_reported_before_conflict_and_visibility() {
    let f = fixture();
    let view = f
        .engine
        .create_request(request(WorkflowStatus::InternalReview), &f.admin)
        .await
        .unwrap();
    let id = view.request.id;
    let upload = view.request.steps[0].id;
    f.engine
        .complete_step(id, upload, &f.client, None, StepOutcome::Approved)
        .await
        .unwrap();

    let err = f
        .engine
        .complete_step(id, upload, &f.internal, None, StepOutcome::Approved)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WorkflowState { .. }), "{err:?}");

    let mut other = request(WorkflowStatus::Submitted);
    other.client_id = "client-2".into();
    other.expert_id = Some("expert-2".into());
    let hidden = f.engine.create_request(other, &f.admin).await.unwrap();
    let err = f
        .engine
        .complete_step(
            hidden.request.id,
            hidden.request.steps[0].id,
            &f.expert,
            None,
            StepOutcome::Approved,
        )
        .await
        .unwrap_err();
    match err {
        Error::WorkflowState { available, .. } => assert!(available.is_empty()),
        other => panic!("unexpected {other:?}"),
    }
    let stored = f.store.read(|t| t.requests[&hidden.request.id].clone()).await;
    assert_eq!(stored, hidden.request);
}

#[tokio::test]
async fn out_of_order_fails_and_in_order_advances_once() {
    let f = fixture();
    let view = f
        .engine
        .create_request(request(WorkflowStatus::ExpertReview), &f.admin)
        .await
        .unwrap();
    let id = view.request.id;
    let steps: Vec<Uuid> = view.request.steps.iter().map(|s| s.id).collect();

    let err = f
        .engine
        .complete_step(id, steps[2], &f.expert, None, StepOutcome::Approved)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WorkflowState { .. }));

    let mut rx = f.events.subscribe();
    let mut progress = vec![];
    for (step, who) in steps.iter().zip([&f.client, &f.internal, &f.expert]) {
        let view = f
            .engine
            .complete_step(id, *step, who, Some("ok".into()), StepOutcome::Approved)
            .await
            .unwrap();
        progress.push(view.progress);
    }
    assert_eq!(progress, vec![33, 67, 100]);

    let view = f.engine.get(id, &f.admin).await.unwrap();
    assert_eq!(view.request.status, WorkflowStatus::InternalReview);

    let mut status_changes = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, Event::StatusChanged { .. }) {
            status_changes += 1;
        }
    }
    assert_eq!(status_changes, 1);
}

#[tokio::test]
async fn second_completion_conflicts() {
    let f = fixture();
    let view = f
        .engine
        .create_request(request(WorkflowStatus::InternalReview), &f.admin)
        .await
        .unwrap();
    let id = view.request.id;
    let upload = view.request.steps[0].id;
    let (a, b) = tokio::join!(
        f.engine.complete_step(id, upload, &f.client, None, StepOutcome::Approved),
        f.engine.complete_step(id, upload, &f.client, None, StepOutcome::Approved),
    );
    let results = [a.is_ok(), b.is_ok()];
    assert_eq!(results.iter().filter(|ok| **ok).count(), 1);
    let err = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
    assert!(err.is_retryable());
}

#[tokio::test]
async fn rejection_terminates() {
    let f = fixture();
    let view = f
        .engine
        .create_request(request(WorkflowStatus::InternalReview), &f.admin)
        .await
        .unwrap();
    let id = view.request.id;
    let (upload, review) = (view.request.steps[0].id, view.request.steps[1].id);

    let err = f
        .engine
        .complete_step(id, upload, &f.client, None, StepOutcome::Rejected)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { field: "outcome", .. }));

    f.engine
        .complete_step(id, upload, &f.client, None, StepOutcome::Approved)
        .await
        .unwrap();
    let view = f
        .engine
        .complete_step(id, review, &f.internal, Some("ineligible".into()), StepOutcome::Rejected)
        .await
        .unwrap();
    assert_eq!(view.request.status, WorkflowStatus::Rejected);
    assert_eq!(view.request.rejection_reason.as_deref(), Some("ineligible"));
    assert!(view.available_actions.is_empty());

    let err = f
        .engine
        .add_steps(id, vec![StepKind::Validate.into()], &f.admin)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WorkflowState { .. }));
}

#[tokio::test]
async fn add_steps_continues_the_request() {
    let f = fixture();
    let view = f
        .engine
        .create_request(request(WorkflowStatus::Submitted), &f.internal)
        .await
        .unwrap();
    let id = view.request.id;
    let view = f
        .engine
        .complete_step(id, view.request.steps[0].id, &f.client, None, StepOutcome::Approved)
        .await
        .unwrap();
    assert_eq!(view.request.status, WorkflowStatus::InternalReview);
    assert_eq!(view.progress, 100);

    let err = f
        .engine
        .add_steps(id, vec![StepKind::Review.into()], &f.client)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));

    let view = f
        .engine
        .add_steps(id, vec![StepKind::Review.into()], &f.admin)
        .await
        .unwrap();
    assert_eq!(view.progress, 50);
    assert_eq!(view.request.steps[1].position, 1);

    let pending = f.engine.pending_steps(&f.internal).await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].step.kind, StepKind::Review);
    assert!(f.engine.pending_steps(&f.client).await.is_empty());
}

#[tokio::test]
async fn read_only_actions_follow_document_permissions() {
    let f = fixture();
    let business = seed_document(&f.store, Category::Business).await;
    let technical = seed_document(&f.store, Category::Technical).await;

    let mut payload = request(WorkflowStatus::Submitted);
    payload.documents = vec![technical];
    let view = f.engine.create_request(payload, &f.admin).await.unwrap();
    let id = view.request.id;
    assert_eq!(view.available_actions, vec![Action::View, Action::Share]);
    assert_eq!(f.engine.available_actions(id, &f.client).await.unwrap(), vec![Action::Upload]);

    let err = f
        .engine
        .attach_document(id, technical, &f.client)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));
    f.engine.attach_document(id, business, &f.client).await.unwrap();
    assert_eq!(
        f.engine.available_actions(id, &f.client).await.unwrap(),
        vec![Action::Upload, Action::View, Action::Share]
    );
    // Internal reads business documents without holding share.
    assert_eq!(
        f.engine.available_actions(id, &f.internal).await.unwrap(),
        vec![Action::View, Action::Share]
    );

    let view = f.engine.reject(id, &f.admin, None).await.unwrap();
    assert_eq!(view.request.status, WorkflowStatus::Rejected);
    assert_eq!(
        f.engine.available_actions(id, &f.client).await.unwrap(),
        vec![Action::View, Action::Share]
    );
}

#[tokio::test]
async fn visibility_by_role() {
    let f = fixture();
    let mut unassigned = request(WorkflowStatus::Submitted);
    unassigned.expert_id = None;
    f.engine.create_request(unassigned, &f.admin).await.unwrap();
    let mut other = request(WorkflowStatus::Submitted);
    other.client_id = "client-2".into();
    other.expert_id = Some("expert-2".into());
    let hidden = f.engine.create_request(other, &f.admin).await.unwrap();

    assert_eq!(f.engine.list(&f.admin).await.len(), 2);
    assert_eq!(f.engine.list(&f.client).await.len(), 1);
    assert_eq!(f.engine.list(&f.expert).await.len(), 1);
    let err = f.engine.get(hidden.request.id, &f.expert).await.unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));
}

#[tokio::test]
async fn explicit_steps_and_templates() {
    let f = fixture();
    let mut payload = request(WorkflowStatus::Assigned);
    let err = f.engine.create_request(payload.clone(), &f.admin).await.unwrap_err();
    assert!(matches!(err, Error::Validation { field: "template", .. }));

    payload.steps = vec![StepSpec {
        kind: StepKind::Report,
        assignee_role: Some(Role::Internal),
        assignee_id: None,
        required: true,
        deadline: Some(Utc::now() - Duration::days(1)),
    }];
    let view = f.engine.create_request(payload, &f.admin).await.unwrap();
    assert_eq!(view.request.steps.len(), 1);
    assert_eq!(view.overdue_steps, vec![view.request.steps[0].id]);
    assert_eq!(view.available_actions, Vec::<Action>::new());

    let err = f
        .engine
        .create_request(request(WorkflowStatus::Submitted), &f.expert)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));
}
