//! Session Service
//!
//! Refresh-token lifecycle:
//!
//! ```text
//! ISSUED --rotate--> ROTATED (revoked, replacement issued)
//! ISSUED --time----> EXPIRED (implicit)
//! ISSUED --logout--> REVOKED
//! ROTATED | REVOKED --presented again--> reuse detected: revoke every token
//!                                        of the principal
//! ```
//!
//! Token writes commit under [`ConflictPolicy::Reject`]: of two concurrent
//! rotations of one token only the first commits, and the loser is
//! re-evaluated against the now-revoked row, which lands on reuse detection.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use gk_config::SessionConfig;

use super::password_service::PasswordService;
use super::refresh_token::RefreshToken;
use super::refresh_token_repository::RefreshTokenRepository;
use super::token_signer::AccessTokenSigner;
use crate::principal::{Associations, Principal, PrincipalLoader, PrincipalView};
use crate::shared::entity::Entity;
use crate::shared::error::{AccessError, Result};
use crate::usecase::domain_event::{AccessEvent, RevocationReason};
use crate::usecase::execution_context::ExecutionContext;
use crate::usecase::unit_of_work::{ChangeSet, ConflictPolicy, UnitOfWork};

/// Attempts for a bulk revocation racing concurrent rotations.
const REVOKE_ALL_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct LoginCommand {
    /// Email or username
    pub login: String,
    pub password: String,
}

/// Always issued as a pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResult {
    #[serde(flatten)]
    pub tokens: SessionTokens,
    pub principal: PrincipalView,
}

pub struct SessionService {
    loader: Arc<PrincipalLoader>,
    tokens: Arc<dyn RefreshTokenRepository>,
    uow: Arc<dyn UnitOfWork>,
    passwords: Arc<PasswordService>,
    signer: Arc<dyn AccessTokenSigner>,
    refresh_lifetime: Duration,
    purge_retention: Duration,
}

impl SessionService {
    pub fn new(
        loader: Arc<PrincipalLoader>,
        tokens: Arc<dyn RefreshTokenRepository>,
        uow: Arc<dyn UnitOfWork>,
        passwords: Arc<PasswordService>,
        signer: Arc<dyn AccessTokenSigner>,
        config: &SessionConfig,
    ) -> Result<Self> {
        config
            .check_lifetimes()
            .map_err(|e| AccessError::configuration(e.to_string()))?;
        Ok(Self {
            loader,
            tokens,
            uow,
            passwords,
            signer,
            refresh_lifetime: Duration::days(config.refresh_token_expiry_days),
            purge_retention: Duration::days(config.purge_retention_days),
        })
    }

    /// Unknown login and wrong password return the same error after the same
    /// Argon2 work.
    pub async fn login(&self, command: LoginCommand, ctx: &ExecutionContext) -> Result<LoginResult> {
        let principal = self
            .loader
            .find_by_login(&command.login, Associations::Include)
            .await?;

        let Some(principal) = principal else {
            self.passwords.verify_unknown_principal(&command.password);
            warn!(login = %command.login, "Login failed: unknown principal");
            return Err(AccessError::InvalidCredentials);
        };
        if !self.passwords.verify_password(&command.password, principal.password())? {
            warn!(principal_id = %principal.id(), "Login failed: wrong password");
            return Err(AccessError::InvalidCredentials);
        }
        if !principal.is_active() {
            warn!(principal_id = %principal.id(), "Login refused: account deactivated");
            return Err(AccessError::AccountDeactivated);
        }

        let mut changes = self.uow.begin(ctx.clone());
        let (tokens, _) = self.stage_issue(&principal, None, &mut changes).await?;
        changes.record(AccessEvent::LoggedIn {
            principal_id: principal.id().to_string(),
        });
        self.uow.save_changes(changes).await?;

        info!(principal_id = %principal.id(), "Principal logged in");
        Ok(LoginResult {
            tokens,
            principal: PrincipalView::from(&principal),
        })
    }

    /// Issue an access token and a new refresh token for an active principal.
    /// The principal's associations must be loaded for the access token claims.
    pub async fn issue_access_and_refresh(
        &self,
        principal: &Principal,
        ctx: &ExecutionContext,
    ) -> Result<SessionTokens> {
        if !principal.is_active() {
            return Err(AccessError::AccountDeactivated);
        }
        let mut changes = self.uow.begin(ctx.clone());
        let (tokens, _) = self.stage_issue(principal, None, &mut changes).await?;
        self.uow.save_changes(changes).await?;
        Ok(tokens)
    }

    /// Exchange a refresh token for a new pair. Alias of [`rotate`](Self::rotate).
    pub async fn refresh(&self, refresh_token: &str, ctx: &ExecutionContext) -> Result<SessionTokens> {
        self.rotate(refresh_token, ctx).await
    }

    pub async fn rotate(&self, presented: &str, ctx: &ExecutionContext) -> Result<SessionTokens> {
        let token_hash = RefreshToken::hash_token(presented);

        match self.tokens.find_active_by_hash(&token_hash).await? {
            Some(current) => match self.rotate_active(current, ctx).await {
                Err(AccessError::Concurrency { .. }) => {
                    warn!("Refresh token changed during rotation, re-evaluating");
                    self.reject_inactive(&token_hash, ctx).await
                }
                result => result,
            },
            None => self.reject_inactive(&token_hash, ctx).await,
        }
    }

    async fn rotate_active(&self, mut current: RefreshToken, ctx: &ExecutionContext) -> Result<SessionTokens> {
        let principal = self
            .loader
            .get(&current.principal_id, Associations::Include)
            .await?
            .filter(Principal::is_active);
        let Some(principal) = principal else {
            warn!(principal_id = %current.principal_id, "Rotation refused: account deactivated");
            return Err(AccessError::AccountDeactivated);
        };

        let mut changes = self
            .uow
            .begin(ctx.clone())
            .with_conflict_policy(ConflictPolicy::Reject);
        let family = current.token_family.clone();
        let (tokens, replacement) = self.stage_issue(&principal, Some(&family), &mut changes).await?;

        if !current.mark_replaced(&replacement.token_hash) {
            return Err(AccessError::TokenRevoked);
        }
        self.tokens.update(&current, &mut changes).await?;
        changes.record(AccessEvent::RefreshTokenRotated {
            principal_id: principal.id().to_string(),
            token_id: current.id().to_string(),
            replacement_id: replacement.id().to_string(),
        });
        self.uow.save_changes(changes).await?;

        debug!(principal_id = %principal.id(), token_id = %current.id(), "Refresh token rotated");
        Ok(tokens)
    }

    /// The presented token is not active: classify why. Always an error.
    async fn reject_inactive(&self, token_hash: &str, ctx: &ExecutionContext) -> Result<SessionTokens> {
        let Some(token) = self.tokens.find_by_hash(token_hash).await? else {
            warn!("Unknown refresh token presented");
            return Err(AccessError::invalid_token("unknown refresh token"));
        };

        if token.is_revoked {
            error!(
                principal_id = %token.principal_id,
                token_id = %token.id(),
                family = %token.token_family,
                "Refresh token reuse detected, revoking all sessions"
            );
            self.cascade_after_reuse(&token, ctx).await;
            return Err(AccessError::TokenReused);
        }
        if token.is_expired() {
            return Err(AccessError::TokenExpired);
        }

        // Active in the store although the first lookup missed it
        self.rotate_active(token, ctx).await
    }

    /// Failures are logged; they never replace the reuse error.
    async fn cascade_after_reuse(&self, token: &RefreshToken, ctx: &ExecutionContext) {
        let detection = AccessEvent::RefreshTokenReuseDetected {
            principal_id: token.principal_id.clone(),
            token_id: token.id().to_string(),
        };
        let result = self
            .revoke_all_with(&token.principal_id, RevocationReason::ReuseDetected, Some(detection), ctx)
            .await;
        if let Err(e) = result {
            error!(
                principal_id = %token.principal_id,
                error = %e,
                "Cascade revocation after token reuse failed"
            );
        }
    }

    /// Revoke one token. A token that is already revoked yields `TokenRevoked`.
    pub async fn logout(&self, refresh_token: &str, ctx: &ExecutionContext) -> Result<()> {
        let token_hash = RefreshToken::hash_token(refresh_token);
        let Some(mut token) = self.tokens.find_by_hash(&token_hash).await? else {
            return Err(AccessError::invalid_token("unknown refresh token"));
        };
        if !token.revoke() {
            return Err(AccessError::TokenRevoked);
        }

        let mut changes = self
            .uow
            .begin(ctx.clone())
            .with_conflict_policy(ConflictPolicy::Reject);
        self.tokens.update(&token, &mut changes).await?;
        changes.record(AccessEvent::RefreshTokenRevoked {
            principal_id: token.principal_id.clone(),
            token_id: token.id().to_string(),
        });

        match self.uow.save_changes(changes).await {
            Ok(_) => {
                info!(principal_id = %token.principal_id, token_id = %token.id(), "Refresh token revoked");
                Ok(())
            }
            // Rotated or revoked concurrently
            Err(AccessError::Concurrency { .. }) => Err(AccessError::TokenRevoked),
            Err(e) => Err(e),
        }
    }

    /// Logout everywhere. Returns the number of tokens revoked.
    pub async fn revoke_all_for_principal(
        &self,
        principal_id: &str,
        reason: RevocationReason,
        ctx: &ExecutionContext,
    ) -> Result<usize> {
        self.revoke_all_with(principal_id, reason, None, ctx).await
    }

    async fn revoke_all_with(
        &self,
        principal_id: &str,
        reason: RevocationReason,
        event: Option<AccessEvent>,
        ctx: &ExecutionContext,
    ) -> Result<usize> {
        let mut attempt = 1;
        loop {
            let mut changes = self
                .uow
                .begin(ctx.clone())
                .with_conflict_policy(ConflictPolicy::Reject);
            if let Some(event) = &event {
                changes.record(event.clone());
            }
            let revoked = self.stage_revoke_all(principal_id, reason, &mut changes).await?;

            match self.uow.save_changes(changes).await {
                Ok(_) => {
                    info!(principal_id, count = revoked, ?reason, "Revoked all refresh tokens");
                    return Ok(revoked);
                }
                Err(AccessError::Concurrency { .. }) if attempt < REVOKE_ALL_ATTEMPTS => {
                    warn!(principal_id, attempt, "Token changed during bulk revocation, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn stage_revoke_all(
        &self,
        principal_id: &str,
        reason: RevocationReason,
        changes: &mut ChangeSet,
    ) -> Result<usize> {
        let mut count = 0;
        for mut token in self.tokens.find_active_by_principal(principal_id).await? {
            if token.revoke() {
                self.tokens.update(&token, changes).await?;
                count += 1;
            }
        }
        if count > 0 {
            changes.record(AccessEvent::RefreshTokensRevoked {
                principal_id: principal_id.to_string(),
                count,
                reason,
            });
        }
        Ok(count)
    }

    /// Hard-delete tokens that expired or were revoked before `older_than`.
    pub async fn purge_expired(&self, older_than: DateTime<Utc>, ctx: &ExecutionContext) -> Result<usize> {
        let purgeable = self.tokens.find_purgeable(older_than).await?;
        if purgeable.is_empty() {
            return Ok(0);
        }

        let mut changes = self.uow.begin(ctx.clone());
        for token in &purgeable {
            self.tokens.hard_delete(token, &mut changes).await?;
        }
        let purged = self.uow.save_changes(changes).await?;
        info!(purged, cutoff = %older_than, "Purged refresh tokens");
        Ok(purged)
    }

    /// Cutoff for [`purge_expired`](Self::purge_expired) from the configured retention.
    pub fn retention_cutoff(&self) -> DateTime<Utc> {
        Utc::now() - self.purge_retention
    }

    async fn stage_issue(
        &self,
        principal: &Principal,
        family: Option<&str>,
        changes: &mut ChangeSet,
    ) -> Result<(SessionTokens, RefreshToken)> {
        let access_token = self.signer.sign_access_token(principal)?;
        let (raw, mut token) = RefreshToken::generate_token_pair(principal.id(), self.refresh_lifetime);
        if let Some(family) = family {
            token = token.in_family(family);
        }

        self.tokens.insert(&token, changes).await?;
        changes.record(AccessEvent::RefreshTokenIssued {
            principal_id: principal.id().to_string(),
            token_id: token.id().to_string(),
        });

        let tokens = SessionTokens {
            access_token,
            refresh_token: raw,
            refresh_expires_at: token.expires_at,
        };
        Ok((tokens, token))
    }
}
