use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use tracing::info;
use tracing_subscriber::EnvFilter;

use gymbook::config::Config;
use gymbook::durable::DurableGateway;
use gymbook::engine::ReservationStore;
use gymbook::gateway::Gateway;
use gymbook::model::SETTING_GYM_NAME;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    gymbook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let catalog = config.catalog()?;
    let guard = config.enforce_capacity.then(|| catalog.clone());
    let durable = Arc::new(DurableGateway::open(&config.wal_path(), guard)?);
    let gateway: Arc<dyn Gateway> = durable.clone();

    let (store, sync_task) = ReservationStore::connect(gateway, catalog).await?;
    if store.setting(SETTING_GYM_NAME).is_none() {
        store.update_setting(SETTING_GYM_NAME, "Gymbook").await?;
    }

    info!("gymbook ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  capacity check at commit: {}", config.enforce_capacity);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let today = Local::now().date_naive();
    let overview = store.day_overview(today);
    info!(
        date = %today,
        booked = overview.total_booked,
        capacity = overview.total_capacity,
        members = store.active_member_count(),
        "today"
    );

    let compactor = tokio::spawn(gymbook::maintenance::run_compactor(
        durable.clone(),
        config.compact_threshold,
        Duration::from_secs(config.compact_interval_secs.max(1)),
    ));

    // Run until SIGTERM/ctrl-c
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
        ctrl_c.await.ok();
    }
    info!("shutdown signal received");

    compactor.abort();
    sync_task.abort();
    durable.compact().await?;

    info!(at = %Utc::now(), "gymbook stopped");
    Ok(())
}
