use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use confcal::compactor;
use confcal::config::Config;
use confcal::Scheduler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    confcal::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let journal_path = config.journal_path();
    let scheduler = Arc::new(Scheduler::open(&journal_path)?);

    info!("confcal started");
    info!("  journal: {}", journal_path.display());
    info!("  compact: every {:?} past {} events", config.compact_interval, config.compact_threshold);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));
    for cal in scheduler.list_calendars() {
        info!(
            calendar = %cal.id,
            name = cal.name.as_deref().unwrap_or("-"),
            bookings = cal.bookings,
            "calendar loaded"
        );
    }

    let compactor_task = tokio::spawn(compactor::run_compactor(
        scheduler.clone(),
        config.compact_threshold,
        config.compact_interval,
    ));

    // Graceful shutdown on SIGTERM/ctrl-c: stop compacting, flush the journal.
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received");
    compactor_task.abort();
    scheduler.flush().await?;
    info!("confcal stopped");
    Ok(())
}
