use axum::http::HeaderMap;
use serde::Serialize;

use super::domain::{AccountRole, ActorId, TenantId};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_NAME_HEADER: &str = "x-actor-name";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const TENANT_ID_HEADER: &str = "x-tenant-id";

/// Authenticated caller. The tenant id here scopes every lookup and mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorContext {
    pub actor_id: ActorId,
    pub name: String,
    pub role: AccountRole,
    pub tenant_id: TenantId,
}

impl ActorContext {
    pub fn new(
        actor_id: impl Into<String>,
        name: impl Into<String>,
        role: AccountRole,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            actor_id: ActorId(actor_id.into()),
            name: name.into(),
            role,
            tenant_id: TenantId(tenant_id.into()),
        }
    }

    pub fn require_admin(&self) -> Result<(), AccessError> {
        if self.role.is_admin_or_above() {
            Ok(())
        } else {
            Err(AccessError::Forbidden { role: self.role })
        }
    }

    pub fn require_super_admin(&self) -> Result<(), AccessError> {
        if self.role == AccountRole::SuperAdmin {
            Ok(())
        } else {
            Err(AccessError::Forbidden { role: self.role })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("no authenticated session")]
    Unauthenticated,
    #[error("role {} may not perform this action", .role.label())]
    Forbidden { role: AccountRole },
}

/// Resolve the caller from identity headers set by the upstream session layer.
///
/// Any missing or unparseable header is treated as an absent session.
pub fn authenticate(headers: &HeaderMap) -> Result<ActorContext, AccessError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let actor_id = header(ACTOR_ID_HEADER).ok_or(AccessError::Unauthenticated)?;
    let tenant_id = header(TENANT_ID_HEADER).ok_or(AccessError::Unauthenticated)?;
    let role = header(ACTOR_ROLE_HEADER)
        .and_then(AccountRole::parse)
        .ok_or(AccessError::Unauthenticated)?;
    let name = header(ACTOR_NAME_HEADER).unwrap_or(actor_id);

    Ok(ActorContext::new(actor_id, name, role, tenant_id))
}
