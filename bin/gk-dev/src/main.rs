//! Gatekeeper Development Runner
//!
//! Builds the access core over the in-memory store, seeds development data
//! and optionally walks through a login / rotate / replay session so the
//! reuse cascade shows up in the logs.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use clap::Parser;
use rand::Rng;
use tokio::signal;
use tracing::{error, info, warn};

use gk_access::seed::{DevSeeder, DEV_PASSWORD};
use gk_access::{AccessCore, AccessError, ExecutionContext, LoginCommand};
use gk_common::LogFormat;
use gk_config::{AppConfig, ConfigLoader};

#[derive(Parser, Debug)]
#[command(name = "gk-dev", about = "Gatekeeper development runner")]
struct Args {
    /// Config file; the standard search paths are used when unset
    #[arg(long, env = "GATEKEEPER_CONFIG")]
    config: Option<PathBuf>,

    /// Log format override: text or json
    #[arg(long, env = "GK_LOG_FORMAT")]
    log_format: Option<String>,

    /// Skip seeding development data
    #[arg(long)]
    no_seed: bool,

    /// Run the session walkthrough after seeding
    #[arg(long)]
    demo: bool,

    /// Keep running and purge stale refresh tokens periodically until Ctrl-C
    #[arg(long)]
    keep_running: bool,

    /// Purge interval in seconds
    #[arg(long, env = "GK_PURGE_INTERVAL_SECS", default_value = "3600")]
    purge_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let loader = match &args.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load().context("failed to load configuration")?;
    if let Some(format) = &args.log_format {
        config.logging.format = format.clone();
    }

    let format: LogFormat = config.logging.format.parse()?;
    gk_common::init_logging("gk-dev", format, &config.logging.level)?;

    info!("Starting Gatekeeper dev runner");
    ensure_signing_key(&mut config);
    config.validate().context("invalid configuration")?;
    info!(
        cache = ?config.cache.backend,
        conflict_policy = ?config.persistence.conflict_policy,
        "Configuration loaded"
    );

    let core = AccessCore::builder(&config).build().await?;

    if !args.no_seed {
        DevSeeder::new(&core).seed().await?;
    }

    if args.demo {
        run_demo(&core).await?;
    }

    if args.keep_running {
        run_purge_loop(&core, Duration::from_secs(args.purge_interval_secs.max(1))).await;
    }

    info!("Gatekeeper dev runner finished");
    Ok(())
}

/// Dev convenience: an ephemeral HS256 secret when none is configured.
/// Tokens signed with it do not survive a restart.
fn ensure_signing_key(config: &mut AppConfig) {
    if config.session.uses_rsa() || !config.session.jwt_secret.is_empty() {
        return;
    }
    let mut secret = [0u8; 48];
    rand::rng().fill(&mut secret);
    config.session.jwt_secret = URL_SAFE_NO_PAD.encode(secret);
    warn!("No JWT signing key configured, generated an ephemeral secret");
}

async fn run_demo(core: &AccessCore) -> Result<()> {
    let ctx = ExecutionContext::create("gk-dev");
    info!("=== SESSION WALKTHROUGH ===");

    let login = core
        .sessions
        .login(
            LoginCommand {
                login: "alice@acme.com".to_string(),
                password: DEV_PASSWORD.to_string(),
            },
            &ctx,
        )
        .await?;
    info!(
        principal = %login.principal.username,
        roles = ?login.principal.roles,
        permissions = ?login.principal.permissions,
        "Logged in"
    );

    let rotated = core.sessions.refresh(&login.tokens.refresh_token, &ctx).await?;
    info!(expires_at = %rotated.refresh_expires_at, "Refresh token rotated");

    match core.sessions.refresh(&login.tokens.refresh_token, &ctx).await {
        Err(AccessError::TokenReused) => info!("Replayed refresh token detected, all sessions revoked"),
        Err(e) => bail!("expected reuse detection, got {}", e),
        Ok(_) => bail!("replayed refresh token was accepted"),
    }
    match core.sessions.refresh(&rotated.refresh_token, &ctx).await {
        Err(e) => info!(code = e.code(), "Replacement token refused after cascade"),
        Ok(_) => bail!("replacement token survived the reuse cascade"),
    }

    for permission in ["Order.Approve", "Report.Export", "Principal.Manage"] {
        let allowed = core
            .authorization
            .has_permission(&login.principal.id, permission)
            .await;
        info!(permission, allowed, "Permission check");
    }

    println!("{}", serde_json::to_string_pretty(&login.principal)?);
    info!("===========================");
    Ok(())
}

async fn run_purge_loop(core: &AccessCore, every: Duration) {
    info!(interval_secs = every.as_secs(), "Refresh token purge running, press Ctrl-C to stop");
    let ctx = ExecutionContext::system();
    let mut ticker = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let cutoff = core.sessions.retention_cutoff();
                if let Err(e) = core.sessions.purge_expired(cutoff, &ctx).await {
                    error!(error = %e, "Refresh token purge failed");
                }
            }
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }
}
