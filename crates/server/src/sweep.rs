//! Background sweep of abandoned sessions.
//!
//! Abandoned uploads leave a session row and an accumulating artifact with
//! nothing to clean them up; the sweep reaps everything past its expiry:
//! expired sessions (row and artifact), orphaned artifacts with no row,
//! stale scratch and ready files, expired form tokens, and idle lock
//! registry entries.

use crate::metrics::SESSIONS_EXPIRED;
use crate::state::AppState;
use std::time::{Duration, SystemTime};
use time::OffsetDateTime;
use tokio::task::JoinHandle;

/// Outcome of one sweep run.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    /// Expired session rows removed.
    pub sessions_removed: u64,
    /// Session artifacts removed (expired plus orphaned).
    pub artifacts_removed: u64,
    /// Scratch parts and ready files removed.
    pub scratch_removed: u64,
    /// Expired form tokens purged.
    pub tokens_purged: u64,
    /// Lock registry entries pruned.
    pub locks_pruned: u64,
    /// Errors encountered (sweep continues past individual failures).
    pub errors: u64,
}

/// Spawn the periodic sweep task.
pub fn spawn_sweep(state: AppState, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so startup isn't
        // serialized behind a sweep.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let stats = run_sweep(&state).await;
            if stats.errors > 0 {
                tracing::warn!(?stats, "sweep finished with errors");
            } else {
                tracing::debug!(?stats, "sweep finished");
            }
        }
    })
}

/// Run one sweep pass.
pub async fn run_sweep(state: &AppState) -> SweepStats {
    let mut stats = SweepStats::default();
    let now = OffsetDateTime::now_utc();

    // Expired sessions: remove artifact first, then the row. A session whose
    // lock is held is skipped; it is live traffic and the next pass gets it.
    match state.sessions.expired_sessions(now).await {
        Ok(rows) => {
            for row in rows {
                let Ok(key) = hopper_core::SessionKey::from_hex(&row.session_key) else {
                    tracing::warn!(session = %row.session_key, "skipping malformed session key");
                    stats.errors += 1;
                    continue;
                };
                let Some(_guard) = state.locks.try_acquire(&row.session_key) else {
                    continue;
                };

                match state.spool.remove_artifact(&key.to_spool_key()).await {
                    Ok(()) => stats.artifacts_removed += 1,
                    Err(hopper_storage::StorageError::NotFound(_)) => {}
                    Err(e) => {
                        tracing::warn!(session = %row.session_key, error = %e, "failed to remove expired artifact");
                        stats.errors += 1;
                        continue;
                    }
                }

                match state.sessions.delete_session(&row.session_key).await {
                    Ok(()) => {
                        stats.sessions_removed += 1;
                        SESSIONS_EXPIRED.inc();
                    }
                    Err(e) => {
                        tracing::warn!(session = %row.session_key, error = %e, "failed to delete expired session");
                        stats.errors += 1;
                    }
                }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to list expired sessions");
            stats.errors += 1;
        }
    }

    // Orphaned artifacts: on-disk files past the session timeout with no
    // backing row (e.g. a crash between artifact and row writes).
    let timeout = Duration::from_secs(state.config.server.session_timeout_secs);
    let cutoff = SystemTime::now() - timeout;
    match state.spool.stale_session_keys(cutoff).await {
        Ok(keys) => {
            for spool_key in keys {
                let key_hex = spool_key.rsplit('/').next().unwrap_or(&spool_key);
                match state.sessions.get_session(key_hex).await {
                    Ok(Some(_)) => {} // Row exists; expiry handling owns it.
                    Ok(None) => {
                        let Some(_guard) = state.locks.try_acquire(key_hex) else {
                            continue;
                        };
                        match state.spool.remove_artifact(&spool_key).await {
                            Ok(()) => stats.artifacts_removed += 1,
                            Err(hopper_storage::StorageError::NotFound(_)) => {}
                            Err(e) => {
                                tracing::warn!(key = %spool_key, error = %e, "failed to remove orphaned artifact");
                                stats.errors += 1;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(key = %spool_key, error = %e, "failed to look up session for artifact");
                        stats.errors += 1;
                    }
                }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to list stale artifacts");
            stats.errors += 1;
        }
    }

    match state.spool.sweep_scratch(cutoff).await {
        Ok(removed) => stats.scratch_removed = removed,
        Err(e) => {
            tracing::warn!(error = %e, "failed to sweep scratch areas");
            stats.errors += 1;
        }
    }

    match state.sessions.purge_expired_form_tokens(now).await {
        Ok(purged) => stats.tokens_purged = purged,
        Err(e) => {
            tracing::warn!(error = %e, "failed to purge expired form tokens");
            stats.errors += 1;
        }
    }

    stats.locks_pruned = state.locks.prune() as u64;

    stats
}
