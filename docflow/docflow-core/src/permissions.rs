//! Per-document, per-role capability rows.
//!
//! Every document carries exactly one row per role it grants anything to. A
//! missing row grants nothing, so a role added later sees no documents until
//! rows are written for it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::catalog::Category;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::role::{Caller, Role};
use crate::storage::{Store, Tables};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Read,
    Write,
    Delete,
    Share,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_read: bool,
    pub can_write: bool,
    pub can_delete: bool,
    pub can_share: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities::new(false, false, false, false);
    pub const FULL: Capabilities = Capabilities::new(true, true, true, true);

    pub const fn new(read: bool, write: bool, delete: bool, share: bool) -> Self {
        Self {
            can_read: read,
            can_write: write,
            can_delete: delete,
            can_share: share,
        }
    }

    pub fn allows(&self, cap: Capability) -> bool {
        match cap {
            Capability::Read => self.can_read,
            Capability::Write => self.can_write,
            Capability::Delete => self.can_delete,
            Capability::Share => self.can_share,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::NONE
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRow {
    pub role: Role,
    #[serde(flatten)]
    pub capabilities: Capabilities,
}

/// Capabilities granted to each role when a document of a given category is created.
pub const DEFAULT_POLICY: &[(Category, &[(Role, Capabilities)])] = &[
    (
        Category::Business,
        &[
            (Role::Admin, Capabilities::FULL),
            (Role::Expert, Capabilities::new(true, true, false, true)),
            (Role::Internal, Capabilities::new(true, false, false, false)),
            (Role::Client, Capabilities::new(true, false, false, false)),
        ],
    ),
    (
        Category::Technical,
        &[
            (Role::Admin, Capabilities::FULL),
            (Role::Expert, Capabilities::new(true, false, false, false)),
            (Role::Internal, Capabilities::new(true, true, false, false)),
        ],
    ),
];

/// Roles allowed to create documents at all.
pub const AUTHORING_ROLES: &[Role] = &[Role::Admin, Role::Expert];

/// Roles confined to a subset of categories when creating or recategorising.
pub const CATEGORY_RESTRICTIONS: &[(Role, &[Category])] = &[(Role::Expert, &[Category::Business])];

pub fn default_rows(category: Category) -> Vec<PermissionRow> {
    DEFAULT_POLICY
        .iter()
        .filter(|(c, _)| *c == category)
        .flat_map(|(_, grants)| grants.iter())
        .filter(|(_, caps)| !caps.is_empty())
        .map(|(role, caps)| PermissionRow {
            role: *role,
            capabilities: *caps,
        })
        .collect()
}

pub fn may_author(role: Role) -> bool {
    AUTHORING_ROLES.contains(&role)
}

pub fn category_allowed(role: Role, category: Category) -> bool {
    CATEGORY_RESTRICTIONS
        .iter()
        .find(|(r, _)| *r == role)
        .map_or(true, |(_, allowed)| allowed.contains(&category))
}

pub(crate) fn allows(t: &Tables, document_id: Uuid, role: Role, cap: Capability) -> bool {
    t.permissions
        .get(&document_id)
        .and_then(|rows| rows.iter().find(|row| row.role == role))
        .is_some_and(|row| row.capabilities.allows(cap))
}

pub(crate) fn seed(t: &mut Tables, document_id: Uuid, category: Category) {
    t.permissions.insert(document_id, default_rows(category));
}

pub(crate) fn require(t: &Tables, document_id: Uuid, caller: &Caller, cap: Capability) -> Result<()> {
    if allows(t, document_id, caller.role, cap) {
        Ok(())
    } else {
        Err(Error::denied(format!(
            "role {} lacks {cap:?} on document {document_id}",
            caller.role
        )))
    }
}

pub struct PermissionMatrix {
    store: Arc<Store>,
    events: EventBus,
}

impl PermissionMatrix {
    pub fn new(store: Arc<Store>, events: EventBus) -> Self {
        Self { store, events }
    }

    pub async fn can(&self, document_id: Uuid, role: Role, cap: Capability) -> bool {
        self.store
            .read(|t| allows(t, document_id, role, cap))
            .await
    }

    pub async fn permissions(&self, document_id: Uuid, caller: &Caller) -> Result<Vec<PermissionRow>> {
        self.store
            .read(|t| {
                if !t.documents.contains_key(&document_id) {
                    return Err(Error::not_found("document", document_id));
                }
                if !caller.role.is_admin() {
                    require(t, document_id, caller, Capability::Share)?;
                }
                let mut rows = t.permissions.get(&document_id).cloned().unwrap_or_default();
                rows.sort_by_key(|row| row.role);
                Ok(rows)
            })
            .await
    }

    /// Replace every row of `document_id` with `rows`.
    pub async fn set_permissions(
        &self,
        document_id: Uuid,
        rows: Vec<PermissionRow>,
        caller: &Caller,
    ) -> Result<()> {
        if !caller.role.is_admin() {
            return Err(Error::denied("only admins may change permissions"));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = rows.iter().find(|row| !seen.insert(row.role)) {
            return Err(Error::validation(
                "permissions",
                format!("role {} listed more than once", dup.role),
            ));
        }
        self.store
            .transaction(|t| {
                if !t.documents.contains_key(&document_id) {
                    return Err(Error::not_found("document", document_id));
                }
                t.permissions.insert(document_id, rows);
                Ok(())
            })
            .await?;
        info!(document = %document_id, by = %caller.user_id, "replaced permissions");
        self.events.send(Event::PermissionsReplaced { id: document_id });
        Ok(())
    }
}
