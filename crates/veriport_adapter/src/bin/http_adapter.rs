#![forbid(unsafe_code)]

use std::{env, fs, net::SocketAddr, sync::Arc, time::Duration};

use tracing_subscriber::EnvFilter;
use veriport_adapter::{router, unix_now, AppState};
use veriport_contracts::Lei;
use veriport_core::authorizing::{run_authorization_sweep, AuthorizerConfig, ConfigError};
use veriport_core::keystate::KeyStateDirectory;
use veriport_core::verifying::run_verification_sweep;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let bind = env::var("VERIPORT_HTTP_BIND").unwrap_or_else(|_| "127.0.0.1:7676".to_string());
    let addr: SocketAddr = bind.parse()?;

    let config = authorizer_config_from_env()?;
    let keys = keystate_directory_from_env()?;
    let auth_interval_ms = parse_interval_ms_from_env("VERIPORT_AUTH_SWEEP_INTERVAL_MS");
    let verify_interval_ms = parse_interval_ms_from_env("VERIPORT_VERIFY_SWEEP_INTERVAL_MS");

    let state = Arc::new(AppState::new(config, keys));

    let auth_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(auth_interval_ms));
        loop {
            ticker.tick().await;
            match run_authorization_sweep(
                &auth_state.db,
                &auth_state.creds,
                &auth_state.keys,
                &auth_state.config,
                unix_now(),
            ) {
                Ok(metrics) => {
                    if metrics != Default::default() {
                        tracing::debug!(?metrics, "authorization sweep pass");
                    }
                }
                Err(e) => tracing::warn!(error = ?e, "authorization sweep pass failed"),
            }
        }
    });

    let verify_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(verify_interval_ms));
        loop {
            ticker.tick().await;
            match run_verification_sweep(&verify_state.db, &verify_state.keys) {
                Ok(metrics) => {
                    if metrics.processed > 0 {
                        tracing::debug!(?metrics, "verification sweep pass");
                    }
                }
                Err(e) => tracing::warn!(error = ?e, "verification sweep pass failed"),
            }
        }
    });

    let app = router(state);
    tracing::info!(
        %addr,
        auth_interval_ms,
        verify_interval_ms,
        "veriport_http listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Allow-list and role from the environment. A missing or empty allow-list
/// stops boot.
fn authorizer_config_from_env() -> Result<AuthorizerConfig, ConfigError> {
    let raw = env::var("VERIPORT_LEIS").map_err(|_| {
        ConfigError("invalid configuration, no LEIs available to accept".to_string())
    })?;
    let mut leis = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let lei = Lei::new(part).map_err(|_| {
            ConfigError(format!("invalid configuration, invalid LEI '{part}'"))
        })?;
        leis.push(lei);
    }
    let mut config = AuthorizerConfig::new(leis)?;
    if let Ok(role) = env::var("VERIPORT_SUBMITTER_ROLE") {
        let role = role.trim().to_string();
        if !role.is_empty() {
            config.submitter_role = role;
        }
    }
    Ok(config)
}

fn keystate_directory_from_env() -> Result<KeyStateDirectory, Box<dyn std::error::Error>> {
    match env::var("VERIPORT_KEYSTATE_SEED") {
        Ok(path) => {
            let bytes = fs::read(path.trim())?;
            Ok(KeyStateDirectory::from_seed_json(&bytes)?)
        }
        Err(_) => Ok(KeyStateDirectory::new()),
    }
}

fn parse_interval_ms_from_env(name: &str) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| (100..=60_000).contains(v))
        .unwrap_or(1_000)
}
