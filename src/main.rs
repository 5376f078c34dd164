use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use roomkeep::auth::StaffDirectory;
use roomkeep::config::Config;
use roomkeep::engine::Engine;
use roomkeep::repository::Repository;
use roomkeep::session::SessionStore;
use roomkeep::web::{self, AppState};
use roomkeep::workflow::ReservationWorkflow;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    roomkeep::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let engine = Arc::new(Engine::new(config.wal_path())?);
    if engine.list_rooms().await.is_empty() {
        for name in &config.seed_rooms {
            let room = engine.create_room(name.clone()).await?;
            info!("seeded room {} ({})", room.id, room.name);
        }
    }

    let staff = StaffDirectory::new();
    match (&config.admin_email, &config.admin_password_hash) {
        (Some(email), Some(hash)) => {
            staff.add(email, hash.clone());
        }
        (Some(_), None) | (None, Some(_)) => {
            warn!("ROOMKEEP_ADMIN_EMAIL and ROOMKEEP_ADMIN_PASSWORD_HASH must be set together; staff login disabled");
        }
        (None, None) => {}
    }

    let repo = Repository::new(engine.clone(), config.store_timeout);
    let sessions = Arc::new(SessionStore::new(config.session_lifetime));
    let workflow = ReservationWorkflow::new(repo, sessions.clone());
    let state = AppState::new(workflow, Arc::new(staff));

    tokio::spawn(roomkeep::reaper::run_session_reaper(
        sessions,
        Duration::from_secs(60),
    ));
    tokio::spawn(roomkeep::reaper::run_compactor(
        engine.clone(),
        config.compact_threshold,
        Duration::from_secs(30),
    ));

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("roomkeep listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  store timeout: {:?}", config.store_timeout);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, let in-flight requests finish
    axum::serve(listener, web::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("roomkeep stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received");
}
