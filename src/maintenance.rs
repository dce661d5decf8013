use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::durable::DurableGateway;
use crate::observability;

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(gateway: Arc<DurableGateway>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        compact_if_due(&gateway, threshold).await;
    }
}

/// Returns true when a compaction ran and succeeded.
pub async fn compact_if_due(gateway: &DurableGateway, threshold: u64) -> bool {
    let appends = gateway.appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match gateway.compact().await {
        Ok(()) => {
            debug!(appends, "compaction done");
            metrics::counter!(observability::WAL_COMPACTIONS_TOTAL, "status" => "ok").increment(1);
            true
        }
        Err(e) => {
            // Retried next tick
            warn!(error = %e, "compaction failed");
            metrics::counter!(observability::WAL_COMPACTIONS_TOTAL, "status" => "error").increment(1);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Gateway;
    use crate::model::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("gymbook_test_maintenance");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("compact.wal");
        let gw = DurableGateway::open(&path, None).unwrap();

        for i in 0..3 {
            let setting = Setting {
                key: "slogan".into(),
                value: format!("v{i}"),
                updated_at: Utc::now(),
            };
            gw.upsert(Row::Setting(setting)).await.unwrap();
        }
        assert!(!compact_if_due(&gw, 10).await);
        assert_eq!(gw.appends_since_compact().await, 3);

        assert!(compact_if_due(&gw, 3).await);
        assert_eq!(gw.appends_since_compact().await, 0);
        drop(gw);

        let reopened = DurableGateway::open(&path, None).unwrap();
        let settings = reopened.load_settings().await.unwrap();
        assert_eq!(settings.len(), 1);
        assert_eq!(settings[0].value, "v2");
    }
}
