//! Principal administration: registration and account lifecycle.

use std::sync::Arc;

use tracing::info;

use super::entity::Principal;
use super::loader::{Associations, PrincipalLoader};
use super::repository::PrincipalRepository;
use crate::auth::{PasswordService, SessionService};
use crate::shared::entity::Entity;
use crate::shared::error::{AccessError, Result};
use crate::usecase::domain_event::RevocationReason;
use crate::usecase::execution_context::ExecutionContext;
use crate::usecase::unit_of_work::UnitOfWork;

#[derive(Debug, Clone)]
pub struct RegisterPrincipalCommand {
    pub email: String,
    pub username: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone)]
pub struct ChangePasswordCommand {
    pub principal_id: String,
    pub current_password: String,
    pub new_password: String,
}

pub struct PrincipalService {
    principals: Arc<dyn PrincipalRepository>,
    loader: Arc<PrincipalLoader>,
    passwords: Arc<PasswordService>,
    sessions: Arc<SessionService>,
    uow: Arc<dyn UnitOfWork>,
}

impl PrincipalService {
    pub fn new(
        loader: Arc<PrincipalLoader>,
        passwords: Arc<PasswordService>,
        sessions: Arc<SessionService>,
        uow: Arc<dyn UnitOfWork>,
    ) -> Self {
        Self {
            principals: loader.principals().clone(),
            loader,
            passwords,
            sessions,
            uow,
        }
    }

    pub async fn register(&self, command: RegisterPrincipalCommand, ctx: &ExecutionContext) -> Result<Principal> {
        let email = Principal::normalize_email(&command.email)?;
        if self.principals.exists_by_email(&email).await? {
            return Err(AccessError::conflict(
                "EMAIL_EXISTS",
                format!("A principal with email '{}' already exists", email),
            ));
        }
        if self.principals.exists_by_username(&command.username).await? {
            return Err(AccessError::conflict(
                "USERNAME_EXISTS",
                format!("Username '{}' is taken", command.username.trim()),
            ));
        }

        let credential = self.passwords.hash_password(&command.password)?;
        let mut principal = Principal::new(
            &email,
            &command.username,
            credential,
            &command.first_name,
            &command.last_name,
        )?;

        let mut changes = self.uow.begin(ctx.clone());
        self.principals.insert(&principal, &mut changes).await?;
        changes.record_all(principal.take_events());
        self.uow.save_changes(changes).await?;

        info!(principal_id = %principal.id(), email = %principal.email(), "Principal registered");
        Ok(principal)
    }

    pub async fn get(&self, id: &str, associations: Associations) -> Result<Principal> {
        self.loader
            .get(id, associations)
            .await?
            .ok_or_else(|| AccessError::not_found("Principal", id))
    }

    async fn load_for_update(&self, id: &str) -> Result<Principal> {
        self.loader
            .get_for_update(id)
            .await?
            .ok_or_else(|| AccessError::not_found("Principal", id))
    }

    async fn save(&self, mut principal: Principal, ctx: &ExecutionContext) -> Result<Principal> {
        let mut changes = self.uow.begin(ctx.clone());
        self.principals.update(&principal, &mut changes).await?;
        changes.record_all(principal.take_events());
        self.uow.save_changes(changes).await?;
        Ok(principal)
    }

    pub async fn activate(&self, id: &str, ctx: &ExecutionContext) -> Result<Principal> {
        let mut principal = self.load_for_update(id).await?;
        if !principal.activate() {
            return Ok(principal);
        }
        let principal = self.save(principal, ctx).await?;
        info!(principal_id = id, "Principal activated");
        Ok(principal)
    }

    /// Deactivate and end every session.
    pub async fn deactivate(&self, id: &str, ctx: &ExecutionContext) -> Result<Principal> {
        let mut principal = self.load_for_update(id).await?;
        if !principal.deactivate() {
            return Ok(principal);
        }
        let principal = self.save(principal, ctx).await?;
        self.sessions
            .revoke_all_for_principal(id, RevocationReason::AccountDeactivated, ctx)
            .await?;
        info!(principal_id = id, "Principal deactivated");
        Ok(principal)
    }

    /// Soft delete. Assignment rows go with the principal; roles and
    /// permissions stay. Every session ends.
    pub async fn delete(&self, id: &str, ctx: &ExecutionContext) -> Result<()> {
        let mut principal = self.load_for_update(id).await?;
        if !principal.mark_deleted() {
            return Ok(());
        }

        let mut changes = self.uow.begin(ctx.clone());
        self.principals.delete(&principal, &mut changes).await?;
        changes.record_all(principal.take_events());
        self.uow.save_changes(changes).await?;

        self.sessions
            .revoke_all_for_principal(id, RevocationReason::AccountDeleted, ctx)
            .await?;
        info!(principal_id = id, "Principal deleted");
        Ok(())
    }

    /// Verify the current password, store the new hash and end every session.
    pub async fn change_password(&self, command: ChangePasswordCommand, ctx: &ExecutionContext) -> Result<()> {
        let mut principal = self.load_for_update(&command.principal_id).await?;
        if !self
            .passwords
            .verify_password(&command.current_password, principal.password())?
        {
            return Err(AccessError::InvalidCredentials);
        }

        let credential = self.passwords.hash_password(&command.new_password)?;
        principal.change_password(credential);
        self.save(principal, ctx).await?;

        self.sessions
            .revoke_all_for_principal(&command.principal_id, RevocationReason::PasswordChanged, ctx)
            .await?;
        info!(principal_id = %command.principal_id, "Password changed");
        Ok(())
    }

    pub async fn confirm_email(&self, id: &str, ctx: &ExecutionContext) -> Result<Principal> {
        let mut principal = self.load_for_update(id).await?;
        if !principal.confirm_email() {
            return Ok(principal);
        }
        self.save(principal, ctx).await
    }
}
