use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::engine::Engine;
use crate::observability::{SESSIONS_ACTIVE, SESSIONS_EXPIRED_TOTAL, WAL_COMPACTIONS_TOTAL};
use crate::session::SessionStore;

/// Background task that drops idle sessions. An abandoned flow goes with them.
pub async fn run_session_reaper(sessions: Arc<SessionStore>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let reaped = sessions.reap_expired();
        if reaped > 0 {
            debug!("reaped {reaped} idle sessions");
            metrics::counter!(SESSIONS_EXPIRED_TOTAL).increment(reaped as u64);
        }
        metrics::gauge!(SESSIONS_ACTIVE).set(sessions.len() as f64);
    }
}

/// Compact the log once `threshold` appends have accumulated since the last
/// compaction. Returns whether it compacted.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            metrics::counter!(WAL_COMPACTIONS_TOTAL, "status" => "ok").increment(1);
            true
        }
        Err(e) => {
            error!("WAL compaction failed: {e}");
            metrics::counter!(WAL_COMPACTIONS_TOTAL, "status" => "error").increment(1);
            false
        }
    }
}

/// Background task that periodically checks whether the log needs compacting.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Stay;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomkeep_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("compact_threshold.wal");
        let engine = Engine::new(path.clone()).unwrap();
        let room = engine.create_room("Suite".into()).await.unwrap();
        let day = |d| NaiveDate::from_ymd_opt(2025, 6, d).unwrap();
        for d in 1..=5 {
            let id = engine.block_room(room.id, Stay::new(day(d), day(d + 1))).await.unwrap();
            engine.remove_block(id).await.unwrap();
        }

        assert!(!compact_if_due(&engine, 100).await);
        assert_eq!(engine.wal_appends_since_compact().await, 11);

        assert!(compact_if_due(&engine, 10).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        drop(engine);
        let engine = Engine::new(path).unwrap();
        assert_eq!(engine.list_rooms().await.len(), 1);
    }

    #[tokio::test]
    async fn session_reaper_runs_in_background() {
        let sessions = Arc::new(SessionStore::new(Duration::from_millis(10)));
        sessions.resume_or_create(None);
        sessions.resume_or_create(None);

        let handle = tokio::spawn(run_session_reaper(
            sessions.clone(),
            Duration::from_millis(20),
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(sessions.is_empty());
    }
}
