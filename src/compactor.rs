use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::observability;

/// How often the compactor checks the WAL.
const CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Background task that rewrites the WAL once more than `threshold` appends
/// have accumulated since the last compaction. A zero threshold disables it.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    if threshold == 0 {
        debug!("WAL compactor disabled");
        return;
    }
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if compact_if_due(&engine, threshold).await {
            info!("compacted WAL after {threshold}+ appends");
        }
    }
}

/// Compact when the append count exceeds `threshold`. Returns whether it did.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends <= threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
            true
        }
        Err(e) => {
            warn!(appends, "WAL compaction failed: {e}");
            false
        }
    }
}
