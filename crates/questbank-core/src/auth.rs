use crate::error::CoreError;
use crate::types::{Principal, Role};
use chrono::Utc;
use std::collections::HashMap;

/// Directory of known principals.
///
/// Lives inside the engine's guarded state so every mutating operation
/// resolves the actor's role at call time, inside its own critical section.
/// A role downgrade is therefore visible to the very next operation; there is
/// no window where a cached elevated role can still be exercised.
#[derive(Debug, Default, Clone)]
pub struct PrincipalDirectory {
    principals: HashMap<String, Principal>,
}

impl PrincipalDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a principal. Replacing is how role changes
    /// (including downgrades) take effect.
    pub fn upsert(
        &mut self,
        user_id: impl Into<String>,
        role: Role,
        org_id: Option<String>,
    ) -> Result<Principal, CoreError> {
        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "principal user id must not be empty".to_string(),
            ));
        }
        if matches!(role, Role::OrgAdmin | Role::Staff) && org_id.is_none() {
            return Err(CoreError::InvalidInput(format!(
                "role '{}' requires an organization",
                role.name()
            )));
        }

        let principal = Principal {
            user_id: user_id.clone(),
            role,
            org_id,
            registered_at: Utc::now(),
        };
        self.principals.insert(user_id, principal.clone());
        Ok(principal)
    }

    /// Resolve an actor's current identity. Unknown actors are rejected at
    /// the gate rather than reported as missing entities.
    pub fn resolve(&self, user_id: &str) -> Result<Principal, CoreError> {
        self.principals
            .get(user_id)
            .cloned()
            .ok_or_else(|| CoreError::forbidden(format!("unknown actor '{user_id}'")))
    }

    pub fn get(&self, user_id: &str) -> Option<&Principal> {
        self.principals.get(user_id)
    }
}

/// Role check invoked inside every mutating operation, immediately before
/// the first state change.
pub fn require_role(principal: &Principal, allowed: &[Role]) -> Result<(), CoreError> {
    if allowed.contains(&principal.role) {
        return Ok(());
    }
    Err(CoreError::forbidden(format!(
        "actor '{}' with role '{}' may not perform this operation",
        principal.user_id,
        principal.role.name()
    )))
}

/// Org-scoped check: master admins pass, org roles must match the target org.
pub fn require_org_access(principal: &Principal, org_id: &str) -> Result<(), CoreError> {
    if principal.role == Role::MasterAdmin {
        return Ok(());
    }
    match principal.org_id.as_deref() {
        Some(own) if own == org_id => Ok(()),
        _ => Err(CoreError::forbidden(format!(
            "actor '{}' is not scoped to organization '{org_id}'",
            principal.user_id
        ))),
    }
}
