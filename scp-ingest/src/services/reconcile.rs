//! Stale parse-claim reconciliation
//!
//! Dispatch marks files `parsing` before the batch service has accepted the
//! job. When submission never happens (queue closed, batch service down)
//! the claim is stranded and every later dispatch gets 405. This sweep
//! returns such files to `uploaded`. Claims confirmed by an executor are
//! never touched.

use chrono::{Duration, Utc};
use scp_common::events::{EventBus, IngestEvent};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db;
use crate::error::Result;

/// Release unconfirmed claims older than `max_age`
///
/// Returns the ids of the released files.
pub async fn reconcile_stranded_claims(
    pool: &SqlitePool,
    event_bus: &EventBus,
    max_age: Duration,
    max_lock_wait_ms: u64,
) -> Result<Vec<Uuid>> {
    let cutoff = Utc::now() - max_age;
    let stale = db::files::list_unconfirmed_claims(pool, cutoff).await?;

    let mut released = Vec::new();
    for file in stale {
        let claimed_at = file.parse_claimed_at.unwrap_or(file.created_at);
        if !db::files::release_claim(pool, file.id, max_lock_wait_ms).await? {
            // Confirmed or released since the listing
            continue;
        }
        tracing::warn!(
            file_id = %file.id,
            file_name = %file.upload_file_name,
            claimed_at = %claimed_at,
            "Released stale parse claim"
        );
        event_bus.emit_lossy(IngestEvent::ParseClaimReleased {
            study_file_id: file.id,
            claimed_at,
            timestamp: Utc::now(),
        });
        released.push(file.id);
    }

    tracing::info!(released = released.len(), "Parse claim reconciliation complete");
    Ok(released)
}
