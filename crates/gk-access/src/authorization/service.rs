//! Authorization Service
//!
//! Answers "does principal X hold permission Y". Every check fails closed:
//! an unknown, inactive or deleted principal and any lookup error all deny.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use super::resolver;
use crate::principal::{Associations, Principal, PrincipalLoader};
use crate::shared::error::{AccessError, Result};

pub struct AuthorizationService {
    loader: Arc<PrincipalLoader>,
}

impl AuthorizationService {
    pub fn new(loader: Arc<PrincipalLoader>) -> Self {
        Self { loader }
    }

    async fn active_principal(&self, principal_id: &str) -> Result<Option<Principal>> {
        Ok(self
            .loader
            .get(principal_id, Associations::Include)
            .await?
            .filter(Principal::is_active))
    }

    pub async fn has_permission(&self, principal_id: &str, permission: &str) -> bool {
        match self.active_principal(principal_id).await {
            Ok(Some(principal)) => {
                let allowed = resolver::has_permission(&principal, permission);
                debug!(principal_id, permission, allowed, "Permission check");
                allowed
            }
            Ok(None) => {
                warn!(principal_id, permission, "Permission denied: principal missing or inactive");
                false
            }
            Err(e) => {
                warn!(principal_id, permission, error = %e, "Permission denied: lookup failed");
                false
            }
        }
    }

    pub async fn has_all_permissions(&self, principal_id: &str, permissions: &[&str]) -> bool {
        match self.active_principal(principal_id).await {
            Ok(Some(principal)) => permissions
                .iter()
                .all(|p| resolver::has_permission(&principal, p)),
            Ok(None) => false,
            Err(e) => {
                warn!(principal_id, error = %e, "Permission denied: lookup failed");
                false
            }
        }
    }

    /// `Forbidden` unless the permission is held.
    pub async fn require_permission(&self, principal_id: &str, permission: &str) -> Result<()> {
        if self.has_permission(principal_id, permission).await {
            Ok(())
        } else {
            Err(AccessError::forbidden(format!("Missing permission: {}", permission)))
        }
    }

    /// Empty for inactive principals.
    pub async fn effective_permissions(&self, principal_id: &str) -> Result<BTreeSet<String>> {
        let principal = self
            .loader
            .get(principal_id, Associations::Include)
            .await?
            .ok_or_else(|| AccessError::not_found("Principal", principal_id))?;
        if !principal.is_active() {
            return Ok(BTreeSet::new());
        }
        Ok(resolver::get_all_permissions(&principal))
    }

    pub async fn effective_roles(&self, principal_id: &str) -> Result<BTreeSet<String>> {
        let principal = self
            .loader
            .get(principal_id, Associations::Include)
            .await?
            .ok_or_else(|| AccessError::not_found("Principal", principal_id))?;
        if !principal.is_active() {
            return Ok(BTreeSet::new());
        }
        Ok(resolver::get_all_roles(&principal))
    }
}
