//! Caller identity and the role/capability policy.
//!
//! Credentials are verified by the gateway in front of this service, which
//! forwards the verified identity as `x-user-id`, `x-user-role` and, for
//! facilitators, `x-facilitator-id`.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use http::request::Parts;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::Role;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ROLE_HEADER: &str = "x-user-role";
pub const FACILITATOR_ID_HEADER: &str = "x-facilitator-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
    pub facilitator_id: Option<Uuid>,
}

impl Actor {
    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Manager)
    }

    /// Facilitator id of the caller, or 403 for any other role.
    pub fn require_facilitator(&self) -> Result<Uuid> {
        match (self.role, self.facilitator_id) {
            (Role::Facilitator, Some(id)) => Ok(id),
            _ => Err(Error::Forbidden("Only facilitators can perform this action".into())),
        }
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let user_id = header(parts, USER_ID_HEADER)
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or(Error::Unauthenticated)?;
        let role = header(parts, ROLE_HEADER)
            .and_then(|v| v.parse::<Role>().ok())
            .ok_or(Error::Unauthenticated)?;
        let facilitator_id = match header(parts, FACILITATOR_ID_HEADER) {
            Some(raw) => Some(Uuid::parse_str(raw).map_err(|_| Error::Unauthenticated)?),
            None => None,
        };
        if role == Role::Facilitator && facilitator_id.is_none() {
            return Err(Error::Unauthenticated);
        }
        Ok(Actor {
            user_id,
            role,
            facilitator_id,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateLog,
    ReadLog,
    UpdateLog,
    DeleteLog,
    ListLogs,
    ViewSummary,
    ManageOfferings,
    ViewOfferings,
    ViewOwnCourses,
    ViewFacilitators,
}

/// How far a grant reaches: any resource, or only those the actor owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Any,
    Own,
}

type Grants = &'static [(Action, Scope)];

const STAFF: Grants = &[
    (Action::ReadLog, Scope::Any),
    (Action::UpdateLog, Scope::Any),
    (Action::DeleteLog, Scope::Any),
    (Action::ListLogs, Scope::Any),
    (Action::ViewSummary, Scope::Any),
    (Action::ManageOfferings, Scope::Any),
    (Action::ViewOfferings, Scope::Any),
    (Action::ViewFacilitators, Scope::Any),
];

const FACILITATOR: Grants = &[
    (Action::CreateLog, Scope::Own),
    (Action::ReadLog, Scope::Own),
    (Action::UpdateLog, Scope::Own),
    (Action::ListLogs, Scope::Own),
    (Action::ViewOfferings, Scope::Any),
    (Action::ViewOwnCourses, Scope::Own),
];

const STUDENT: Grants = &[(Action::ViewOfferings, Scope::Any)];

pub fn grants(role: Role) -> Grants {
    match role {
        Role::Admin | Role::Manager => STAFF,
        Role::Facilitator => FACILITATOR,
        Role::Student => STUDENT,
    }
}

/// Single decision point for every protected operation.
///
/// `owner` is the facilitator owning the target resource, when the action
/// targets one; `Own` grants pass only when it is the actor's own id.
pub fn authorize(actor: &Actor, action: Action, owner: Option<Uuid>) -> Result<()> {
    let scope = grants(actor.role)
        .iter()
        .find(|(a, _)| *a == action)
        .map(|(_, scope)| *scope);
    match scope {
        Some(Scope::Any) => Ok(()),
        Some(Scope::Own) => match (actor.facilitator_id, owner) {
            (Some(mine), Some(theirs)) if mine == theirs => Ok(()),
            _ => {
                tracing::warn!(user_id = %actor.user_id, ?action, "ownership check failed");
                Err(Error::OwnershipViolation)
            }
        },
        None => {
            tracing::warn!(user_id = %actor.user_id, role = %actor.role, ?action, "access denied");
            Err(Error::Forbidden(format!(
                "Role '{}' may not perform this action",
                actor.role
            )))
        }
    }
}

/// Resolves the facilitator that owns a resource.
#[async_trait]
pub trait OwnerResolver: Send + Sync {
    /// `Ok(None)` when the resource does not exist; `Ok(Some(None))` when it
    /// exists but nobody owns it.
    async fn resolve_owner(&self, resource_id: Uuid) -> Result<Option<Option<Uuid>>>;
}

/// Resolves the owner and authorizes in one step; a missing resource is a 404.
pub async fn authorize_resource<R: OwnerResolver + ?Sized>(
    resolver: &R,
    actor: &Actor,
    action: Action,
    resource_id: Uuid,
    entity: &'static str,
) -> Result<()> {
    let owner = resolver
        .resolve_owner(resource_id)
        .await?
        .ok_or(Error::NotFound(entity))?;
    authorize(actor, action, owner)
}
