use std::sync::Arc;
use std::time::Duration;

use crate::engine::{Engine, EngineError};

const CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Compact the WAL if at least `threshold` appends have landed since the last
/// compaction. Returns whether it compacted.
pub async fn maybe_compact(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends == 0 || appends < threshold {
        return Ok(false);
    }
    tracing::debug!(appends, threshold, "compaction threshold reached");
    engine.compact_wal().await?;
    Ok(true)
}

/// Background task that periodically compacts the WAL.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = maybe_compact(&engine, threshold).await {
            tracing::error!(error = %e, "WAL compaction failed");
        }
    }
}
