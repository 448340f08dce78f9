use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::scheduler::Scheduler;

const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Compact the journal once it has grown by `threshold` events.
/// Returns whether a compaction ran.
pub async fn compact_if_due(scheduler: &Scheduler, threshold: u64) -> bool {
    let appends = scheduler.journal_appends_since_compact().await;
    if appends < threshold {
        debug!(appends, threshold, "compaction not due");
        return false;
    }
    match scheduler.compact().await {
        Ok(()) => {
            info!(appends, "journal compacted");
            true
        }
        Err(e) => {
            warn!("journal compaction failed: {e}");
            false
        }
    }
}

/// Background task: check every `every` whether compaction is due.
/// Periods under one second are raised to one second.
pub async fn run_compactor(scheduler: Arc<Scheduler>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every.max(MIN_PERIOD));
    loop {
        interval.tick().await;
        compact_if_due(&scheduler, threshold).await;
    }
}
