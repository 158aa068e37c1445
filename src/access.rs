//! Authorization boundary.
//!
//! Credential verification lives outside the crate. What reaches the core is a
//! [`Principal`]: an id, a role and an active flag.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FlexageError, Result};
use crate::model::{Role, User, UserId};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: UserId,
    pub role: Role,
    pub active: bool,
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            role: user.role,
            active: user.active,
        }
    }
}

/// Maps a credential to the principal it identifies.
pub trait PrincipalResolver: Send + Sync {
    fn resolve(&self, credential: &str) -> Result<Principal>;
}

/// Resolves an already-verified user id through the store.
pub struct StoreResolver {
    store: Arc<dyn Store>,
}

impl StoreResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

impl PrincipalResolver for StoreResolver {
    fn resolve(&self, credential: &str) -> Result<Principal> {
        let id = Uuid::parse_str(credential.trim())
            .map_err(|_| FlexageError::Forbidden("could not validate credentials".into()))?;
        let user = self
            .store
            .get_user(id)?
            .ok_or_else(|| FlexageError::Forbidden("could not validate credentials".into()))?;
        Ok(Principal::from(&user))
    }
}

/// Fails with `Forbidden` unless the principal is active and holds one of `roles`.
pub fn require_role(principal: &Principal, roles: &[Role]) -> Result<()> {
    if !principal.active {
        return Err(FlexageError::Forbidden("inactive user".into()));
    }
    if !roles.contains(&principal.role) {
        return Err(FlexageError::Forbidden(format!(
            "operation not permitted for role {}",
            principal.role
        )));
    }
    Ok(())
}

pub const STAFF: &[Role] = &[Role::Configurator, Role::Admin];
pub const ADMIN_ONLY: &[Role] = &[Role::Admin];
