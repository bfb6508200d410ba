//! End-to-end tests over a fully wired [`AccessCore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gk_access::audit::AuditLog;
use gk_access::auth::{RefreshTokenRepository, SessionTokens};
use gk_access::cache::CacheStore;
use gk_access::permission::{CreatePermissionCommand, PermissionRepository};
use gk_access::principal::{ChangePasswordCommand, PrincipalRepository, RegisterPrincipalCommand};
use gk_access::role::{CreateRoleCommand, RoleRepository, UpdateRoleCommand};
use gk_access::seed::{DevSeeder, DEV_PASSWORD};
use gk_access::shared::Entity;
use gk_access::store::Repository;
use gk_access::usecase::RevocationReason;
use gk_access::{
    AccessCore, AccessError, Associations, ErrorKind, ExecutionContext, LoginCommand, Principal,
    RefreshToken, Result,
};
use gk_config::{AppConfig, ConflictPolicySetting, PasswordConfig};

const PASSWORD: &str = "correct horse battery";

fn test_config(policy: ConflictPolicySetting) -> AppConfig {
    let mut config = AppConfig::default();
    config.session.jwt_secret = "integration-test-secret-0123456789abcdef".to_string();
    config.password = PasswordConfig::testing();
    config.persistence.conflict_policy = policy;
    config
}

async fn build_core() -> AccessCore {
    AccessCore::builder(&test_config(ConflictPolicySetting::RefreshAndRetry))
        .build()
        .await
        .unwrap()
}

/// Order.Read, Order.Approve and Report.Export; a Manager role granting the
/// first two; alice holding Manager plus a direct Report.Export grant.
struct Fixture {
    core: AccessCore,
    ctx: ExecutionContext,
    alice: String,
    manager: String,
    order_read: String,
    order_approve: String,
    report_export: String,
}

async fn fixture_with(core: AccessCore) -> Fixture {
    let ctx = ExecutionContext::create("test-admin");

    let order_read = core
        .permission_admin
        .create(CreatePermissionCommand::new("Order", "Read"), &ctx)
        .await
        .unwrap();
    let order_approve = core
        .permission_admin
        .create(CreatePermissionCommand::new("Order", "Approve"), &ctx)
        .await
        .unwrap();
    let report_export = core
        .permission_admin
        .create(CreatePermissionCommand::new("Report", "Export"), &ctx)
        .await
        .unwrap();

    let mut command = CreateRoleCommand::custom("Manager");
    command.permission_ids = vec![order_read.id().to_string(), order_approve.id().to_string()];
    let manager = core.role_admin.create(command, &ctx).await.unwrap();

    let alice = register(&core, "alice@acme.com", "alice", &ctx).await;
    core.access.assign_role(alice.id(), manager.id(), &ctx).await.unwrap();
    core.access
        .assign_permission(alice.id(), report_export.id(), &ctx)
        .await
        .unwrap();

    Fixture {
        alice: alice.id().to_string(),
        manager: manager.id().to_string(),
        order_read: order_read.id().to_string(),
        order_approve: order_approve.id().to_string(),
        report_export: report_export.id().to_string(),
        core,
        ctx,
    }
}

async fn fixture() -> Fixture {
    fixture_with(build_core().await).await
}

async fn register(core: &AccessCore, email: &str, username: &str, ctx: &ExecutionContext) -> Principal {
    core.principal_admin
        .register(
            RegisterPrincipalCommand {
                email: email.to_string(),
                username: username.to_string(),
                password: PASSWORD.to_string(),
                first_name: "Test".to_string(),
                last_name: "User".to_string(),
            },
            ctx,
        )
        .await
        .unwrap()
}

async fn login(core: &AccessCore, login: &str, password: &str) -> Result<SessionTokens> {
    core.sessions
        .login(
            LoginCommand {
                login: login.to_string(),
                password: password.to_string(),
            },
            &ExecutionContext::create("anonymous"),
        )
        .await
        .map(|result| result.tokens)
}

async fn active_tokens(core: &AccessCore, principal_id: &str) -> usize {
    core.refresh_tokens
        .find_active_by_principal(principal_id)
        .await
        .unwrap()
        .len()
}

/// Every cache operation fails, as with an unreachable Redis.
struct BrokenStore;

#[async_trait]
impl CacheStore for BrokenStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(AccessError::cache("connection refused"))
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<()> {
        Err(AccessError::cache("connection refused"))
    }

    async fn remove(&self, _key: &str) -> Result<()> {
        Err(AccessError::cache("connection refused"))
    }
}

// ── Permission resolution ───────────────────────────────────────────────

#[tokio::test]
async fn test_manager_with_direct_grant_resolves_union() {
    let f = fixture().await;

    let effective = f.core.authorization.effective_permissions(&f.alice).await.unwrap();
    let effective: Vec<&str> = effective.iter().map(String::as_str).collect();
    assert_eq!(effective, vec!["Order.Approve", "Order.Read", "Report.Export"]);

    assert!(f.core.authorization.has_permission(&f.alice, "Order.Approve").await);
    assert!(f.core.authorization.has_permission(&f.alice, "order.read").await);
    assert!(f.core.authorization.has_permission(&f.alice, "Report.Export").await);
    assert!(!f.core.authorization.has_permission(&f.alice, "Order.Delete").await);
    assert!(
        f.core
            .authorization
            .has_all_permissions(&f.alice, &["Order.Read", "Report.Export"])
            .await
    );
    assert!(
        !f.core
            .authorization
            .has_all_permissions(&f.alice, &["Order.Read", "Order.Delete"])
            .await
    );

    let roles = f.core.authorization.effective_roles(&f.alice).await.unwrap();
    assert!(roles.contains("Manager"));
}

#[tokio::test]
async fn test_direct_grant_overlapping_role_is_not_duplicated() {
    let f = fixture().await;
    f.core
        .access
        .assign_permission(&f.alice, &f.order_read, &f.ctx)
        .await
        .unwrap();

    let effective = f.core.authorization.effective_permissions(&f.alice).await.unwrap();
    assert_eq!(effective.len(), 3);

    // Dropping the direct grant keeps the role-derived permission
    f.core
        .access
        .remove_permission(&f.alice, &f.order_read, &f.ctx)
        .await
        .unwrap();
    assert!(f.core.authorization.has_permission(&f.alice, "Order.Read").await);
}

#[tokio::test]
async fn test_authorization_fails_closed() {
    let f = fixture().await;

    assert!(!f.core.authorization.has_permission("no-such-principal", "Order.Read").await);
    assert!(!f.core.authorization.has_all_permissions("no-such-principal", &[]).await);

    let err = f
        .core
        .authorization
        .require_permission(&f.alice, "Order.Delete")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = f
        .core
        .authorization
        .effective_permissions("no-such-principal")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    f.core.principal_admin.deactivate(&f.alice, &f.ctx).await.unwrap();
    assert!(!f.core.authorization.has_permission(&f.alice, "Order.Read").await);
    assert!(f.core.authorization.effective_permissions(&f.alice).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_role_permission_change_is_visible_to_checks() {
    let f = fixture().await;
    assert!(f.core.authorization.has_permission(&f.alice, "Order.Approve").await);

    let removed = f
        .core
        .role_admin
        .remove_permission(&f.manager, &f.order_approve, &f.ctx)
        .await
        .unwrap();
    assert!(removed);

    assert!(!f.core.authorization.has_permission(&f.alice, "Order.Approve").await);
    assert!(f.core.authorization.has_permission(&f.alice, "Order.Read").await);
}

#[tokio::test]
async fn test_set_roles_reports_diff() {
    let f = fixture().await;
    let clerk = f
        .core
        .role_admin
        .create(CreateRoleCommand::custom("Clerk"), &f.ctx)
        .await
        .unwrap();

    let diff = f
        .core
        .access
        .set_roles(&f.alice, &[clerk.id().to_string()], &f.ctx)
        .await
        .unwrap();
    assert_eq!(diff.added, vec![clerk.id().to_string()]);
    assert_eq!(diff.removed, vec![f.manager.clone()]);

    let again = f
        .core
        .access
        .set_roles(&f.alice, &[clerk.id().to_string()], &f.ctx)
        .await
        .unwrap();
    assert!(again.is_empty());

    assert!(!f.core.authorization.has_permission(&f.alice, "Order.Approve").await);

    let err = f
        .core
        .access
        .set_roles(&f.alice, &["no-such-role".to_string()], &f.ctx)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ── Session protocol ────────────────────────────────────────────────────

#[tokio::test]
async fn test_rotation_reuse_revokes_every_session() {
    let f = fixture().await;
    let ctx = ExecutionContext::create(&f.alice);

    let first = login(&f.core, "alice@acme.com", PASSWORD).await.unwrap();
    let second = f.core.sessions.rotate(&first.refresh_token, &ctx).await.unwrap();
    assert_ne!(second.refresh_token, first.refresh_token);
    assert_ne!(second.access_token, first.access_token);

    let err = f.core.sessions.rotate(&first.refresh_token, &ctx).await.unwrap_err();
    assert!(matches!(err, AccessError::TokenReused));
    assert_eq!(active_tokens(&f.core, &f.alice).await, 0);

    // The replacement was cascade-revoked, so presenting it is reuse too
    let err = f.core.sessions.refresh(&second.refresh_token, &ctx).await.unwrap_err();
    assert!(matches!(err, AccessError::TokenReused));
}

#[tokio::test]
async fn test_rotation_keeps_token_family() {
    let f = fixture().await;
    let ctx = ExecutionContext::create(&f.alice);

    let first = login(&f.core, "alice", PASSWORD).await.unwrap();
    let second = f.core.sessions.rotate(&first.refresh_token, &ctx).await.unwrap();

    let old = f
        .core
        .refresh_tokens
        .find_by_hash(&RefreshToken::hash_token(&first.refresh_token))
        .await
        .unwrap()
        .unwrap();
    let new = f
        .core
        .refresh_tokens
        .find_by_hash(&RefreshToken::hash_token(&second.refresh_token))
        .await
        .unwrap()
        .unwrap();

    assert!(old.is_revoked);
    assert_eq!(old.replaced_by.as_deref(), Some(new.token_hash.as_str()));
    assert_eq!(old.token_family, new.token_family);
    assert!(new.is_active());
}

#[tokio::test]
async fn test_concurrent_rotation_has_single_winner() {
    let f = fixture().await;
    let ctx = ExecutionContext::create(&f.alice);
    let tokens = login(&f.core, "alice@acme.com", PASSWORD).await.unwrap();

    let (a, b) = tokio::join!(
        f.core.sessions.rotate(&tokens.refresh_token, &ctx),
        f.core.sessions.rotate(&tokens.refresh_token, &ctx),
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(AccessError::TokenReused))));
}

#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let f = fixture().await;

    let wrong = login(&f.core, "alice@acme.com", "not the password").await.unwrap_err();
    let unknown = login(&f.core, "nobody@acme.com", PASSWORD).await.unwrap_err();
    assert!(matches!(wrong, AccessError::InvalidCredentials));
    assert!(matches!(unknown, AccessError::InvalidCredentials));
    assert_eq!(wrong.to_string(), unknown.to_string());

    assert!(login(&f.core, "ALICE@acme.com", PASSWORD).await.is_ok());
    assert!(login(&f.core, "alice", PASSWORD).await.is_ok());
}

#[tokio::test]
async fn test_login_result_carries_view_and_verifiable_token() {
    let f = fixture().await;
    let result = f
        .core
        .sessions
        .login(
            LoginCommand {
                login: "alice@acme.com".to_string(),
                password: PASSWORD.to_string(),
            },
            &f.ctx,
        )
        .await
        .unwrap();

    assert_eq!(result.principal.email, "alice@acme.com");
    assert_eq!(result.principal.roles, vec!["Manager".to_string()]);
    assert!(result.principal.permissions.contains(&"Report.Export".to_string()));

    let json = serde_json::to_value(&result).unwrap();
    assert!(json.get("accessToken").is_some());
    assert!(json.get("refreshToken").is_some());
    assert!(json["principal"].get("password").is_none());
}

#[tokio::test]
async fn test_logout_twice_reports_revoked() {
    let f = fixture().await;
    let ctx = ExecutionContext::create(&f.alice);
    let tokens = login(&f.core, "alice@acme.com", PASSWORD).await.unwrap();

    f.core.sessions.logout(&tokens.refresh_token, &ctx).await.unwrap();
    let err = f.core.sessions.logout(&tokens.refresh_token, &ctx).await.unwrap_err();
    assert!(matches!(err, AccessError::TokenRevoked));

    let err = f.core.sessions.logout("never-issued", &ctx).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_TOKEN");
}

#[tokio::test]
async fn test_unknown_and_expired_tokens() {
    let f = fixture().await;

    let err = f.core.sessions.rotate("never-issued", &f.ctx).await.unwrap_err();
    assert!(matches!(err, AccessError::InvalidToken { .. }));
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    let (raw, expired) = RefreshToken::generate_token_pair(&f.alice, chrono::Duration::seconds(-1));
    let mut changes = f.core.uow.begin(f.ctx.clone());
    f.core.refresh_tokens.insert(&expired, &mut changes).await.unwrap();
    f.core.uow.save_changes(changes).await.unwrap();

    let err = f.core.sessions.rotate(&raw, &f.ctx).await.unwrap_err();
    assert!(matches!(err, AccessError::TokenExpired));
    // An expired token never triggers the cascade
    let live = login(&f.core, "alice", PASSWORD).await.unwrap();
    assert!(f.core.sessions.rotate(&live.refresh_token, &f.ctx).await.is_ok());
}

#[tokio::test]
async fn test_deactivated_account_cannot_login_or_rotate() {
    let f = fixture().await;
    let tokens = login(&f.core, "alice@acme.com", PASSWORD).await.unwrap();

    // Deactivated by a write that leaves the sessions in place
    let mut principal = f.core.loader.get_for_update(&f.alice).await.unwrap().unwrap();
    assert!(principal.deactivate());
    let mut changes = f.core.uow.begin(f.ctx.clone());
    f.core.principals.update(&principal, &mut changes).await.unwrap();
    changes.record_all(principal.take_events());
    f.core.uow.save_changes(changes).await.unwrap();

    let err = f.core.sessions.rotate(&tokens.refresh_token, &f.ctx).await.unwrap_err();
    assert!(matches!(err, AccessError::AccountDeactivated));
    // Still valid, just refused
    assert_eq!(active_tokens(&f.core, &f.alice).await, 1);

    let err = login(&f.core, "alice@acme.com", PASSWORD).await.unwrap_err();
    assert!(matches!(err, AccessError::AccountDeactivated));

    let principal = f.core.principal_admin.get(&f.alice, Associations::Include).await.unwrap();
    let err = f
        .core
        .sessions
        .issue_access_and_refresh(&principal, &f.ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::AccountDeactivated));
}

#[tokio::test]
async fn test_deactivate_revokes_sessions_and_activate_restores_login() {
    let f = fixture().await;
    login(&f.core, "alice@acme.com", PASSWORD).await.unwrap();
    login(&f.core, "alice@acme.com", PASSWORD).await.unwrap();
    assert_eq!(active_tokens(&f.core, &f.alice).await, 2);

    f.core.principal_admin.deactivate(&f.alice, &f.ctx).await.unwrap();
    assert_eq!(active_tokens(&f.core, &f.alice).await, 0);

    f.core.principal_admin.activate(&f.alice, &f.ctx).await.unwrap();
    assert!(login(&f.core, "alice@acme.com", PASSWORD).await.is_ok());
}

#[tokio::test]
async fn test_change_password_revokes_sessions() {
    let f = fixture().await;
    let tokens = login(&f.core, "alice@acme.com", PASSWORD).await.unwrap();

    let err = f
        .core
        .principal_admin
        .change_password(
            ChangePasswordCommand {
                principal_id: f.alice.clone(),
                current_password: "guess".to_string(),
                new_password: "a brand new passphrase".to_string(),
            },
            &f.ctx,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::InvalidCredentials));

    f.core
        .principal_admin
        .change_password(
            ChangePasswordCommand {
                principal_id: f.alice.clone(),
                current_password: PASSWORD.to_string(),
                new_password: "a brand new passphrase".to_string(),
            },
            &f.ctx,
        )
        .await
        .unwrap();

    assert_eq!(active_tokens(&f.core, &f.alice).await, 0);
    assert!(f.core.sessions.rotate(&tokens.refresh_token, &f.ctx).await.is_err());
    assert!(login(&f.core, "alice@acme.com", PASSWORD).await.is_err());
    assert!(login(&f.core, "alice@acme.com", "a brand new passphrase").await.is_ok());
}

#[tokio::test]
async fn test_revoke_all_counts_active_tokens() {
    let f = fixture().await;
    let first = login(&f.core, "alice@acme.com", PASSWORD).await.unwrap();
    login(&f.core, "alice@acme.com", PASSWORD).await.unwrap();
    f.core.sessions.logout(&first.refresh_token, &f.ctx).await.unwrap();

    let revoked = f
        .core
        .sessions
        .revoke_all_for_principal(&f.alice, RevocationReason::LogoutEverywhere, &f.ctx)
        .await
        .unwrap();
    assert_eq!(revoked, 1);

    let again = f
        .core
        .sessions
        .revoke_all_for_principal(&f.alice, RevocationReason::LogoutEverywhere, &f.ctx)
        .await
        .unwrap();
    assert_eq!(again, 0);
}

#[tokio::test]
async fn test_purge_removes_only_old_tokens() {
    let f = fixture().await;
    let live = login(&f.core, "alice@acme.com", PASSWORD).await.unwrap();

    let (_, stale) = RefreshToken::generate_token_pair(&f.alice, chrono::Duration::days(-30));
    let mut changes = f.core.uow.begin(f.ctx.clone());
    f.core.refresh_tokens.insert(&stale, &mut changes).await.unwrap();
    f.core.uow.save_changes(changes).await.unwrap();

    let purged = f
        .core
        .sessions
        .purge_expired(f.core.sessions.retention_cutoff(), &f.ctx)
        .await
        .unwrap();
    assert_eq!(purged, 1);
    assert!(f.core.refresh_tokens.get(stale.id(), true).await.unwrap().is_none());
    assert!(f.core.sessions.rotate(&live.refresh_token, &f.ctx).await.is_ok());
}

// ── Cache consistency ───────────────────────────────────────────────────

#[tokio::test]
async fn test_role_rename_invalidates_name_and_id_entries() {
    let f = fixture().await;

    // Warm the name, id and principal entries
    assert!(f.core.roles.find_by_name("Manager").await.unwrap().is_some());
    f.core.authorization.effective_roles(&f.alice).await.unwrap();

    f.core
        .role_admin
        .update(
            UpdateRoleCommand {
                role_id: f.manager.clone(),
                name: Some("Supervisor".to_string()),
                ..Default::default()
            },
            &f.ctx,
        )
        .await
        .unwrap();

    assert!(f.core.roles.find_by_name("Manager").await.unwrap().is_none());
    let renamed = f.core.roles.find_by_name("supervisor").await.unwrap().unwrap();
    assert_eq!(renamed.id(), f.manager);

    let roles = f.core.authorization.effective_roles(&f.alice).await.unwrap();
    assert!(roles.contains("Supervisor"));
    assert!(!roles.contains("Manager"));
}

#[tokio::test]
async fn test_principal_email_lookup_follows_deletion() {
    let f = fixture().await;
    assert!(f.core.principals.find_by_email("alice@acme.com").await.unwrap().is_some());

    f.core.principal_admin.delete(&f.alice, &f.ctx).await.unwrap();

    assert!(f.core.principals.find_by_email("alice@acme.com").await.unwrap().is_none());
    let err = login(&f.core, "alice@acme.com", PASSWORD).await.unwrap_err();
    assert!(matches!(err, AccessError::InvalidCredentials));
    // Soft-deleted: still readable for audit
    assert!(f.core.principals.get(&f.alice, true).await.unwrap().is_some());
}

#[tokio::test]
async fn test_principal_username_lookup_follows_deletion() {
    let f = fixture().await;
    let warmed = f.core.principals.find_by_username("Alice").await.unwrap().unwrap();
    assert_eq!(warmed.id(), f.alice);

    f.core.principal_admin.delete(&f.alice, &f.ctx).await.unwrap();

    assert!(f.core.principals.find_by_username("alice").await.unwrap().is_none());
    assert!(f.core.principals.find_by_username("ALICE").await.unwrap().is_none());
    let err = login(&f.core, "alice", PASSWORD).await.unwrap_err();
    assert!(matches!(err, AccessError::InvalidCredentials));
}

#[tokio::test]
async fn test_permission_resource_list_follows_create_and_delete() {
    let f = fixture().await;
    let names = |list: Vec<gk_access::Permission>| {
        let mut names: Vec<String> = list.iter().map(|p| p.name().to_string()).collect();
        names.sort();
        names
    };

    // Warm the resource list key
    let before = f.core.permissions.find_by_resource("Order").await.unwrap();
    assert_eq!(names(before), vec!["Order.Approve", "Order.Read"]);

    let cancel = f
        .core
        .permission_admin
        .create(CreatePermissionCommand::new("Order", "Cancel"), &f.ctx)
        .await
        .unwrap();
    let after_create = f.core.permissions.find_by_resource("order").await.unwrap();
    assert_eq!(names(after_create), vec!["Order.Approve", "Order.Cancel", "Order.Read"]);

    // Warm the name key, then delete
    let by_name = f.core.permissions.find_by_name("order.cancel").await.unwrap().unwrap();
    assert_eq!(by_name.id(), cancel.id());
    f.core.permission_admin.delete(cancel.id(), &f.ctx).await.unwrap();

    assert!(f.core.permissions.find_by_name("Order.Cancel").await.unwrap().is_none());
    assert!(!f.core.permissions.exists_by_name("order.cancel").await.unwrap());
    let after_delete = f.core.permissions.find_by_resource("Order").await.unwrap();
    assert_eq!(names(after_delete), vec!["Order.Approve", "Order.Read"]);
}

#[tokio::test]
async fn test_permission_resource_lookup_folds_case_like_its_key() {
    let f = fixture().await;
    let anger = f
        .core
        .permission_admin
        .create(CreatePermissionCommand::new("Ärger", "Read"), &f.ctx)
        .await
        .unwrap();

    // Both spellings share one cache key, so both must match in the store
    let lower = f.core.permissions.find_by_resource("ärger").await.unwrap();
    let upper = f.core.permissions.find_by_resource("ÄRGER").await.unwrap();
    assert_eq!(lower.len(), 1);
    assert_eq!(upper.len(), 1);
    assert_eq!(lower[0].id(), anger.id());
    assert_eq!(upper[0].id(), anger.id());
}

#[tokio::test]
async fn test_broken_cache_degrades_to_pass_through() {
    let core = AccessCore::builder(&test_config(ConflictPolicySetting::RefreshAndRetry))
        .with_cache_store(Arc::new(BrokenStore))
        .build()
        .await
        .unwrap();
    let f = fixture_with(core).await;

    assert!(f.core.authorization.has_permission(&f.alice, "Order.Approve").await);

    let first = login(&f.core, "alice@acme.com", PASSWORD).await.unwrap();
    let second = f.core.sessions.rotate(&first.refresh_token, &f.ctx).await.unwrap();

    let err = f.core.sessions.rotate(&first.refresh_token, &f.ctx).await.unwrap_err();
    assert!(matches!(err, AccessError::TokenReused));
    let err = f.core.sessions.rotate(&second.refresh_token, &f.ctx).await.unwrap_err();
    assert!(matches!(err, AccessError::TokenReused));
}

#[tokio::test]
async fn test_build_rejects_out_of_range_session_lifetimes() {
    let mut config = test_config(ConflictPolicySetting::RefreshAndRetry);
    config.session.refresh_token_expiry_days = i64::MAX;
    let err = AccessCore::builder(&config).build().await.err().unwrap();
    assert_eq!(err.code(), "CONFIGURATION_ERROR");

    let mut config = test_config(ConflictPolicySetting::RefreshAndRetry);
    config.session.purge_retention_days = -1;
    let err = AccessCore::builder(&config).build().await.err().unwrap();
    assert_eq!(err.code(), "CONFIGURATION_ERROR");
}

// ── Unit of work ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_reject_policy_fails_stale_update() {
    let core = AccessCore::builder(&test_config(ConflictPolicySetting::Reject))
        .build()
        .await
        .unwrap();
    let f = fixture_with(core).await;

    let mut first = f.core.roles.get_for_update(&f.manager).await.unwrap().unwrap();
    let mut second = f.core.roles.get_for_update(&f.manager).await.unwrap().unwrap();

    first.describe("first writer");
    let mut changes = f.core.uow.begin(f.ctx.clone());
    f.core.roles.update(&first, &mut changes).await.unwrap();
    f.core.uow.save_changes(changes).await.unwrap();

    second.describe("second writer");
    let mut changes = f.core.uow.begin(f.ctx.clone());
    f.core.roles.update(&second, &mut changes).await.unwrap();
    let err = f.core.uow.save_changes(changes).await.unwrap_err();
    assert!(matches!(err, AccessError::Concurrency { .. }));

    let stored = f.core.role_admin.get(&f.manager).await.unwrap();
    assert_eq!(stored.description(), Some("first writer"));
}

#[tokio::test]
async fn test_refresh_and_retry_policy_last_writer_wins() {
    let f = fixture().await;

    let mut first = f.core.roles.get_for_update(&f.manager).await.unwrap().unwrap();
    let mut second = f.core.roles.get_for_update(&f.manager).await.unwrap().unwrap();

    first.describe("first writer");
    let mut changes = f.core.uow.begin(f.ctx.clone());
    f.core.roles.update(&first, &mut changes).await.unwrap();
    f.core.uow.save_changes(changes).await.unwrap();

    second.describe("second writer");
    let mut changes = f.core.uow.begin(f.ctx.clone());
    f.core.roles.update(&second, &mut changes).await.unwrap();
    f.core.uow.save_changes(changes).await.unwrap();

    let stored = f.core.role_admin.get(&f.manager).await.unwrap();
    assert_eq!(stored.description(), Some("second writer"));
}

#[tokio::test]
async fn test_duplicate_email_is_rejected_at_commit() {
    let f = fixture().await;

    let err = f
        .core
        .principal_admin
        .register(
            RegisterPrincipalCommand {
                email: "Alice@Acme.com".to_string(),
                username: "alice2".to_string(),
                password: PASSWORD.to_string(),
                first_name: "Other".to_string(),
                last_name: "Alice".to_string(),
            },
            &f.ctx,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "EMAIL_EXISTS");

    // Bypassing the service check still hits the unique index
    let credential = f.core.passwords.hash_password(PASSWORD).unwrap();
    let duplicate = Principal::new("alice@acme.com", "alice3", credential, "Dup", "Licate").unwrap();
    let mut changes = f.core.uow.begin(f.ctx.clone());
    f.core.principals.insert(&duplicate, &mut changes).await.unwrap();
    let err = f.core.uow.save_changes(changes).await.unwrap_err();
    assert_eq!(err.code(), "UNIQUE_VIOLATION");
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn test_read_only_database_fails_commit_without_side_effects() {
    let f = fixture().await;
    f.core.database.set_read_only(true);

    let err = login(&f.core, "alice@acme.com", PASSWORD).await.unwrap_err();
    assert_eq!(err.code(), "PERSISTENCE_ERROR");

    f.core.database.set_read_only(false);
    assert_eq!(active_tokens(&f.core, &f.alice).await, 0);
}

#[tokio::test]
async fn test_every_event_writes_an_audit_row() {
    let f = fixture().await;
    let tokens = login(&f.core, "alice@acme.com", PASSWORD).await.unwrap();
    f.core.sessions.rotate(&tokens.refresh_token, &f.ctx).await.unwrap();

    let rows = f
        .core
        .database
        .scan::<AuditLog>(&|_: &AuditLog| true, false)
        .unwrap();
    let types: Vec<&str> = rows.iter().map(|r| r.event_type.as_str()).collect();

    assert!(types.contains(&"gatekeeper:principal:registered"));
    assert!(types.contains(&"gatekeeper:role:created"));
    assert!(types.contains(&"gatekeeper:principal:role-assigned"));
    assert!(types.contains(&"gatekeeper:session:logged-in"));
    assert!(types.contains(&"gatekeeper:session:token-rotated"));

    let registered = rows
        .iter()
        .find(|r| r.event_type == "gatekeeper:principal:registered")
        .unwrap();
    assert_eq!(registered.entity_id, f.alice);
    assert_eq!(registered.principal_id, "test-admin");
}

// ── Policy administration ───────────────────────────────────────────────

#[tokio::test]
async fn test_in_use_role_and_permission_cannot_be_deleted() {
    let f = fixture().await;

    let err = f.core.role_admin.delete(&f.manager, &f.ctx).await.unwrap_err();
    assert_eq!(err.code(), "ROLE_IN_USE");

    let err = f
        .core
        .permission_admin
        .delete(&f.order_read, &f.ctx)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PERMISSION_IN_USE");

    let err = f
        .core
        .permission_admin
        .delete(&f.report_export, &f.ctx)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PERMISSION_IN_USE");

    f.core.access.remove_role(&f.alice, &f.manager, &f.ctx).await.unwrap();
    f.core.role_admin.delete(&f.manager, &f.ctx).await.unwrap();
    assert!(f.core.roles.find_by_name("Manager").await.unwrap().is_none());

    // The deleted role no longer holds Order.Read
    f.core.permission_admin.delete(&f.order_read, &f.ctx).await.unwrap();
    assert!(f.core.permissions.find_by_name("Order.Read").await.unwrap().is_none());
}

#[tokio::test]
async fn test_duplicate_names_conflict() {
    let f = fixture().await;

    let err = f
        .core
        .role_admin
        .create(CreateRoleCommand::custom("manager"), &f.ctx)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ROLE_EXISTS");

    let err = f
        .core
        .permission_admin
        .create(CreatePermissionCommand::new("order", "read"), &f.ctx)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PERMISSION_EXISTS");
}

#[tokio::test]
async fn test_dev_seeder_is_idempotent() {
    let core = build_core().await;
    DevSeeder::new(&core).seed().await.unwrap();
    DevSeeder::new(&core).seed().await.unwrap();

    assert_eq!(
        core.permissions.find_by_resource("Order").await.unwrap().len(),
        3
    );

    let tokens = login(&core, "alice@acme.com", DEV_PASSWORD).await.unwrap();
    assert!(!tokens.access_token.is_empty());

    let alice = core
        .principals
        .find_by_email("alice@acme.com")
        .await
        .unwrap()
        .unwrap();
    assert!(core.authorization.has_permission(alice.id(), "Order.Approve").await);
    assert!(core.authorization.has_permission(alice.id(), "Report.Export").await);
    assert!(!core.authorization.has_permission(alice.id(), "Principal.Manage").await);
}
