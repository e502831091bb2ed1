//! Multi-party request workflow: ordered role-assigned steps under a coarse status.
//!
//! Transitions, step actions and stage templates are tables; the engine only
//! walks them.

mod engine;
#[cfg(test)]
mod tests;

pub use engine::WorkflowEngine;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::role::{Caller, Role};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Submitted,
    InternalReview,
    EligibilityConfirmed,
    Assigned,
    ExpertReview,
    FinalReport,
    Completed,
    Rejected,
}

const TRANSITIONS: &[(WorkflowStatus, WorkflowStatus)] = &[
    (WorkflowStatus::Submitted, WorkflowStatus::InternalReview),
    (WorkflowStatus::InternalReview, WorkflowStatus::EligibilityConfirmed),
    (WorkflowStatus::EligibilityConfirmed, WorkflowStatus::Assigned),
    (WorkflowStatus::Assigned, WorkflowStatus::ExpertReview),
    (WorkflowStatus::ExpertReview, WorkflowStatus::FinalReport),
    (WorkflowStatus::FinalReport, WorkflowStatus::Completed),
];

const TERMINAL: &[WorkflowStatus] = &[WorkflowStatus::Completed, WorkflowStatus::Rejected];

impl WorkflowStatus {
    pub fn next(self) -> Option<WorkflowStatus> {
        TRANSITIONS
            .iter()
            .find(|(from, _)| *from == self)
            .map(|(_, to)| *to)
    }

    pub fn is_terminal(self) -> bool {
        TERMINAL.contains(&self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Upload,
    Review,
    Validate,
    Report,
}

impl StepKind {
    pub fn default_assignee(self) -> Role {
        match self {
            StepKind::Upload => Role::Client,
            StepKind::Review => Role::Internal,
            StepKind::Validate | StepKind::Report => Role::Expert,
        }
    }

    pub fn actions(self) -> &'static [Action] {
        STEP_ACTIONS
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, actions)| *actions)
            .unwrap_or(&[])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Upload,
    Review,
    Validate,
    Report,
    Reject,
    View,
    Share,
}

/// Actions surfaced to the assignee of a step, by step kind.
pub const STEP_ACTIONS: &[(StepKind, &[Action])] = &[
    (StepKind::Upload, &[Action::Upload]),
    (StepKind::Review, &[Action::Review, Action::Reject]),
    (StepKind::Validate, &[Action::Validate, Action::Reject]),
    (StepKind::Report, &[Action::Report]),
];

/// Steps seeded for a request created at a given stage.
pub const TEMPLATES: &[(WorkflowStatus, &[StepKind])] = &[
    (WorkflowStatus::Submitted, &[StepKind::Upload]),
    (
        WorkflowStatus::InternalReview,
        &[StepKind::Upload, StepKind::Review],
    ),
    (
        WorkflowStatus::ExpertReview,
        &[StepKind::Upload, StepKind::Review, StepKind::Validate],
    ),
    (
        WorkflowStatus::FinalReport,
        &[
            StepKind::Upload,
            StepKind::Review,
            StepKind::Validate,
            StepKind::Report,
        ],
    ),
];

pub fn template(stage: WorkflowStatus) -> Option<&'static [StepKind]> {
    TEMPLATES
        .iter()
        .find(|(s, _)| *s == stage)
        .map(|(_, kinds)| *kinds)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    #[default]
    Approved,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: Uuid,
    pub position: u32,
    pub kind: StepKind,
    pub assignee_role: Role,
    pub assignee_id: Option<String>,
    pub required: bool,
    pub deadline: Option<DateTime<Utc>>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
    pub comment: Option<String>,
    pub outcome: Option<StepOutcome>,
}

impl WorkflowStep {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.deadline.is_some_and(|d| d < now)
    }

    pub fn is_assigned_to(&self, caller: &Caller) -> bool {
        self.assignee_role == caller.role
            && self
                .assignee_id
                .as_deref()
                .map_or(true, |id| id == caller.user_id)
    }
}

/// Kind of document a client is asked to provide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestCategory {
    CharteProfitum,
    CharteProduit,
    Facture,
    DocumentAdministratif,
    DocumentEligibilite,
    RapportAudit,
    RapportSimulation,
    DocumentComptable,
    DocumentFiscal,
    DocumentLegal,
    Autre,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub id: Uuid,
    pub client_id: String,
    pub expert_id: Option<String>,
    pub category: RequestCategory,
    pub description: Option<String>,
    pub status: WorkflowStatus,
    pub documents: Vec<Uuid>,
    pub steps: Vec<WorkflowStep>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRequest {
    /// Completed share of steps, rounded to the nearest percent.
    pub fn progress(&self) -> u8 {
        if self.steps.is_empty() {
            return 0;
        }
        let done = self.steps.iter().filter(|s| s.completed).count();
        (done as f64 / self.steps.len() as f64 * 100.0).round() as u8
    }

    /// Incomplete steps from the first open one up to and including the first
    /// open required one.
    pub fn actionable_steps(&self) -> Vec<&WorkflowStep> {
        let mut out = Vec::new();
        for step in self.steps.iter().filter(|s| !s.completed) {
            out.push(step);
            if step.required {
                break;
            }
        }
        out
    }

    pub fn step(&self, step_id: Uuid) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn is_complete(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|s| s.completed)
    }

    /// Staff see everything; clients their own requests; experts those
    /// assigned to them or not yet assigned.
    pub fn visible_to(&self, caller: &Caller) -> bool {
        match caller.role {
            Role::Admin | Role::Internal => true,
            Role::Client => self.client_id == caller.user_id,
            Role::Expert => self
                .expert_id
                .as_deref()
                .map_or(true, |id| id == caller.user_id),
        }
    }

    fn append(&mut self, specs: Vec<StepSpec>) {
        let start = self.steps.len() as u32;
        for (offset, spec) in specs.into_iter().enumerate() {
            let assignee_role = spec.assignee_role.unwrap_or(spec.kind.default_assignee());
            let assignee_id = spec.assignee_id.or_else(|| match assignee_role {
                Role::Client => Some(self.client_id.clone()),
                Role::Expert => self.expert_id.clone(),
                _ => None,
            });
            self.steps.push(WorkflowStep {
                id: Uuid::new_v4(),
                position: start + offset as u32,
                kind: spec.kind,
                assignee_role,
                assignee_id,
                required: spec.required,
                deadline: spec.deadline,
                completed: false,
                completed_at: None,
                completed_by: None,
                comment: None,
                outcome: None,
            });
        }
    }
}

fn default_required() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepSpec {
    pub kind: StepKind,
    /// Falls back to the kind's usual assignee.
    pub assignee_role: Option<Role>,
    pub assignee_id: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
    pub deadline: Option<DateTime<Utc>>,
}

impl From<StepKind> for StepSpec {
    fn from(kind: StepKind) -> Self {
        Self {
            kind,
            assignee_role: None,
            assignee_id: None,
            required: true,
            deadline: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewRequest {
    pub client_id: String,
    pub expert_id: Option<String>,
    pub category: RequestCategory,
    pub description: Option<String>,
    #[serde(default)]
    pub documents: Vec<Uuid>,
    /// Stage whose template seeds the steps when `steps` is empty.
    pub template: Option<WorkflowStatus>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RequestView {
    #[serde(flatten)]
    pub request: WorkflowRequest,
    pub progress: u8,
    pub available_actions: Vec<Action>,
    pub overdue_steps: Vec<Uuid>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PendingStep {
    pub request_id: Uuid,
    pub category: RequestCategory,
    pub status: WorkflowStatus,
    pub step: WorkflowStep,
}
