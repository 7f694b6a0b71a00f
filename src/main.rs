use tokio_util::sync::CancellationToken;
use tracing::info;

use schedulr::compactor;
use schedulr::config::Config;
use schedulr::service::Scheduler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    schedulr::observability::init(config.metrics_port)?;

    let scheduler = Scheduler::open(&config).await?;
    info!("schedulr started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  compact_threshold: {}", config.compact_threshold);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let stop = CancellationToken::new();
    let compactor = tokio::spawn(compactor::run_compactor(
        scheduler.engine().clone(),
        config.compact_threshold,
        config.compact_interval,
        stop.clone(),
    ));

    // Graceful shutdown on SIGTERM/ctrl-c
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    info!("shutdown signal received");

    stop.cancel();
    if let Err(e) = compactor.await {
        tracing::warn!("compactor task failed: {e}");
    }
    scheduler.shutdown().await?;

    info!("schedulr stopped");
    Ok(())
}
