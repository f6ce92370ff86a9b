//! Background re-expansion of log patterns.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::registry::LogRegistry;

/// Default time between pattern refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Re-run `patterns` against the filesystem every `interval`.
///
/// The first refresh happens one interval after spawning; callers populate
/// the registry themselves at startup. Glob expansion does blocking I/O, so
/// each pass runs on the blocking pool.
pub fn spawn_refresh(
    registry: Arc<LogRegistry>,
    patterns: Vec<String>,
    interval: Duration,
) -> JoinHandle<()> {
    let patterns = Arc::new(patterns);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            tracing::debug!("reloading logs");

            let registry = Arc::clone(&registry);
            let patterns = Arc::clone(&patterns);
            let pass = tokio::task::spawn_blocking(move || registry.add_patterns(patterns.iter()));

            match pass.await {
                Ok(added) if added > 0 => tracing::info!(added, "log refresh found new files"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "log refresh task failed"),
            }
        }
    })
}
