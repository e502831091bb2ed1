use chrono::Utc;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    template, Action, NewRequest, PendingStep, RequestView, StepOutcome, StepSpec,
    WorkflowRequest, WorkflowStatus,
};
use crate::activity::{ActivityAction, ActivityRecorder};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::permissions::{self, Capability};
use crate::role::Caller;
use crate::storage::{Store, Tables};

/// Actions `caller` may take on `req` right now.
fn actions_in(t: &Tables, req: &WorkflowRequest, caller: &Caller) -> Vec<Action> {
    let mut actions = BTreeSet::new();
    if !req.status.is_terminal() {
        for step in req.actionable_steps() {
            if step.is_assigned_to(caller) {
                actions.extend(step.kind.actions().iter().copied());
            }
        }
    }
    let live: Vec<Uuid> = req
        .documents
        .iter()
        .copied()
        .filter(|id| t.documents.get(id).is_some_and(|d| d.is_active))
        .collect();
    if live
        .iter()
        .any(|id| permissions::allows(t, *id, caller.role, Capability::Read))
    {
        actions.insert(Action::View);
        actions.insert(Action::Share);
    }
    actions.into_iter().collect()
}

fn view_of(t: &Tables, req: &WorkflowRequest, caller: &Caller) -> RequestView {
    let now = Utc::now();
    RequestView {
        progress: req.progress(),
        available_actions: actions_in(t, req, caller),
        overdue_steps: req
            .steps
            .iter()
            .filter(|s| s.is_overdue(now))
            .map(|s| s.id)
            .collect(),
        request: req.clone(),
    }
}

fn load<'a>(t: &'a Tables, request_id: Uuid, caller: &Caller) -> Result<&'a WorkflowRequest> {
    let req = t
        .requests
        .get(&request_id)
        .ok_or_else(|| Error::not_found("request", request_id))?;
    if !req.visible_to(caller) {
        return Err(Error::denied(format!(
            "request {request_id} is not visible to {}",
            caller.user_id
        )));
    }
    Ok(req)
}

fn require_open(t: &Tables, req: &WorkflowRequest, caller: &Caller) -> Result<()> {
    if req.status.is_terminal() {
        return Err(Error::workflow(
            format!("request {} is {:?}", req.id, req.status),
            actions_in(t, req, caller),
        ));
    }
    Ok(())
}

fn require_staff(caller: &Caller, what: &str) -> Result<()> {
    if caller.role.is_staff() {
        Ok(())
    } else {
        Err(Error::denied(format!("role {} may not {what}", caller.role)))
    }
}

fn check_documents(t: &Tables, documents: &[Uuid], caller: &Caller) -> Result<()> {
    for id in documents {
        if !t.documents.get(id).is_some_and(|d| d.is_active) {
            return Err(Error::not_found("document", id));
        }
        permissions::require(t, *id, caller, Capability::Read)?;
    }
    Ok(())
}

pub struct WorkflowEngine {
    store: Arc<Store>,
    events: EventBus,
    activity: ActivityRecorder,
}

impl WorkflowEngine {
    pub fn new(store: Arc<Store>, events: EventBus, activity: ActivityRecorder) -> Self {
        Self {
            store,
            events,
            activity,
        }
    }

    /// Open a request at `submitted`, with explicit steps or the template of a stage.
    pub async fn create_request(&self, payload: NewRequest, caller: &Caller) -> Result<RequestView> {
        require_staff(caller, "create requests")?;
        let client_id = payload.client_id.trim().to_string();
        if client_id.is_empty() {
            return Err(Error::validation("client_id", "must not be empty"));
        }
        let specs: Vec<StepSpec> = if payload.steps.is_empty() {
            let stage = payload.template.unwrap_or(WorkflowStatus::Submitted);
            template(stage)
                .ok_or_else(|| {
                    Error::validation("template", format!("no step template for {stage:?}"))
                })?
                .iter()
                .map(|kind| StepSpec::from(*kind))
                .collect()
        } else {
            payload.steps
        };
        let mut seen = HashSet::new();
        let mut documents = payload.documents;
        documents.retain(|id| seen.insert(*id));

        let now = Utc::now();
        let mut req = WorkflowRequest {
            id: Uuid::new_v4(),
            client_id,
            expert_id: payload.expert_id.filter(|id| !id.trim().is_empty()),
            category: payload.category,
            description: payload.description,
            status: WorkflowStatus::Submitted,
            documents,
            steps: Vec::new(),
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        };
        req.append(specs);

        let view = self
            .store
            .transaction(|t| {
                check_documents(t, &req.documents, caller)?;
                t.requests.insert(req.id, req.clone());
                Ok(view_of(t, &req, caller))
            })
            .await?;
        info!(request = %req.id, client = %req.client_id, steps = req.steps.len(), "created request");
        self.events.send(Event::RequestCreated {
            request_id: req.id,
            client_id: req.client_id.clone(),
        });
        Ok(view)
    }

    pub async fn get(&self, request_id: Uuid, caller: &Caller) -> Result<RequestView> {
        self.store
            .read(|t| load(t, request_id, caller).map(|req| view_of(t, req, caller)))
            .await
    }

    /// Requests visible to the caller, newest first.
    pub async fn list(&self, caller: &Caller) -> Vec<RequestView> {
        self.store
            .read(|t| {
                let mut views: Vec<RequestView> = t
                    .requests
                    .values()
                    .filter(|r| r.visible_to(caller))
                    .map(|r| view_of(t, r, caller))
                    .collect();
                views.sort_by(|a, b| b.request.created_at.cmp(&a.request.created_at));
                views
            })
            .await
    }

    pub async fn available_actions(&self, request_id: Uuid, caller: &Caller) -> Result<Vec<Action>> {
        self.store
            .read(|t| load(t, request_id, caller).map(|req| actions_in(t, req, caller)))
            .await
    }

    /// Mark a step done. The write lock serializes completers, so the second
    /// one to reach an already completed step gets `Conflict`. A caller whose
    /// role differs from the step's assignee role always gets `WorkflowState`.
    pub async fn complete_step(
        &self,
        request_id: Uuid,
        step_id: Uuid,
        caller: &Caller,
        comment: Option<String>,
        outcome: StepOutcome,
    ) -> Result<RequestView> {
        let (view, from, documents) = self
            .store
            .transaction(|t| {
                let req = t
                    .requests
                    .get(&request_id)
                    .ok_or_else(|| Error::not_found("request", request_id))?;
                let step = req
                    .step(step_id)
                    .ok_or_else(|| Error::not_found("step", step_id))?;
                // A role mismatch is a workflow error whatever else holds.
                if step.assignee_role != caller.role {
                    let available = if req.visible_to(caller) {
                        actions_in(t, req, caller)
                    } else {
                        Vec::new()
                    };
                    return Err(Error::workflow(
                        format!("step {step_id} is assigned to {}", step.assignee_role),
                        available,
                    ));
                }
                let req = load(t, request_id, caller)?;
                require_open(t, req, caller)?;
                if step.completed {
                    return Err(Error::Conflict(format!("step {step_id} is already completed")));
                }
                if !step.is_assigned_to(caller) {
                    return Err(Error::workflow(
                        format!("step {step_id} is assigned to another {}", step.assignee_role),
                        actions_in(t, req, caller),
                    ));
                }
                if !req.actionable_steps().iter().any(|s| s.id == step_id) {
                    return Err(Error::workflow(
                        "an earlier required step is still open",
                        actions_in(t, req, caller),
                    ));
                }
                if outcome == StepOutcome::Rejected && !step.kind.actions().contains(&Action::Reject) {
                    return Err(Error::validation(
                        "outcome",
                        format!("{:?} steps cannot reject", step.kind),
                    ));
                }

                let from = req.status;
                let now = Utc::now();
                let req = t
                    .requests
                    .get_mut(&request_id)
                    .ok_or_else(|| Error::not_found("request", request_id))?;
                if let Some(step) = req.steps.iter_mut().find(|s| s.id == step_id) {
                    step.completed = true;
                    step.completed_at = Some(now);
                    step.completed_by = Some(caller.user_id.clone());
                    step.comment = comment.clone();
                    step.outcome = Some(outcome);
                }
                if outcome == StepOutcome::Rejected {
                    req.status = WorkflowStatus::Rejected;
                    req.rejection_reason = comment;
                } else if req.is_complete() {
                    req.status = from.next().unwrap_or(from);
                }
                req.updated_at = now;
                let req = req.clone();
                Ok((view_of(t, &req, caller), from, req.documents.clone()))
            })
            .await?;

        let to = view.request.status;
        info!(request = %request_id, step = %step_id, by = %caller.user_id, ?from, ?to, "completed step");
        self.events.send(Event::StepCompleted {
            request_id,
            step_id,
            role: caller.role,
        });
        if from != to {
            self.events.send(Event::StatusChanged {
                request_id,
                from,
                to,
            });
        }
        for document_id in documents {
            self.activity
                .record(&caller.user_id, document_id, ActivityAction::Edit, None)
                .await;
        }
        Ok(view)
    }

    /// Append the next stage's steps to an open request.
    pub async fn add_steps(
        &self,
        request_id: Uuid,
        specs: Vec<StepSpec>,
        caller: &Caller,
    ) -> Result<RequestView> {
        require_staff(caller, "add steps")?;
        if specs.is_empty() {
            return Err(Error::validation("steps", "at least one step is required"));
        }
        let view = self
            .store
            .transaction(|t| {
                let req = load(t, request_id, caller)?;
                require_open(t, req, caller)?;
                let req = t
                    .requests
                    .get_mut(&request_id)
                    .ok_or_else(|| Error::not_found("request", request_id))?;
                req.append(specs);
                req.updated_at = Utc::now();
                let req = req.clone();
                Ok(view_of(t, &req, caller))
            })
            .await?;
        debug!(request = %request_id, steps = view.request.steps.len(), "appended steps");
        Ok(view)
    }

    pub async fn attach_document(
        &self,
        request_id: Uuid,
        document_id: Uuid,
        caller: &Caller,
    ) -> Result<RequestView> {
        self.store
            .transaction(|t| {
                let req = load(t, request_id, caller)?;
                require_open(t, req, caller)?;
                check_documents(t, &[document_id], caller)?;
                let req = t
                    .requests
                    .get_mut(&request_id)
                    .ok_or_else(|| Error::not_found("request", request_id))?;
                if !req.documents.contains(&document_id) {
                    req.documents.push(document_id);
                    req.updated_at = Utc::now();
                }
                let req = req.clone();
                Ok(view_of(t, &req, caller))
            })
            .await
    }

    /// Actionable steps assigned to the caller across open requests, earliest deadline first.
    pub async fn pending_steps(&self, caller: &Caller) -> Vec<PendingStep> {
        let mut pending: Vec<PendingStep> = self
            .store
            .read(|t| {
                t.requests
                    .values()
                    .filter(|r| !r.status.is_terminal() && r.visible_to(caller))
                    .flat_map(|r| {
                        r.actionable_steps()
                            .into_iter()
                            .filter(|s| s.is_assigned_to(caller))
                            .map(|s| PendingStep {
                                request_id: r.id,
                                category: r.category,
                                status: r.status,
                                step: s.clone(),
                            })
                            .collect::<Vec<_>>()
                    })
                    .collect()
            })
            .await;
        pending.sort_by_key(|p| (p.step.deadline.is_none(), p.step.deadline, p.request_id));
        pending
    }

    /// Terminate an open request regardless of step state.
    pub async fn reject(
        &self,
        request_id: Uuid,
        caller: &Caller,
        comment: Option<String>,
    ) -> Result<RequestView> {
        require_staff(caller, "reject requests")?;
        let (view, from) = self
            .store
            .transaction(|t| {
                let req = load(t, request_id, caller)?;
                require_open(t, req, caller)?;
                let from = req.status;
                let req = t
                    .requests
                    .get_mut(&request_id)
                    .ok_or_else(|| Error::not_found("request", request_id))?;
                req.status = WorkflowStatus::Rejected;
                req.rejection_reason = comment;
                req.updated_at = Utc::now();
                let req = req.clone();
                Ok((view_of(t, &req, caller), from))
            })
            .await?;
        info!(request = %request_id, by = %caller.user_id, "rejected request");
        self.events.send(Event::StatusChanged {
            request_id,
            from,
            to: WorkflowStatus::Rejected,
        });
        Ok(view)
    }
}
