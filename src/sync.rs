//! Feeds gateway change events into a [`ReservationStore`].

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use crate::engine::ReservationStore;
use crate::gateway::Gateway;
use crate::model::*;
use crate::observability;

/// One receiver per shared table, taken before the initial load.
pub struct Subscriptions {
    members: broadcast::Receiver<ChangeEvent>,
    bookings: broadcast::Receiver<ChangeEvent>,
    settings: broadcast::Receiver<ChangeEvent>,
}

impl Subscriptions {
    pub fn new(gateway: &dyn Gateway) -> Self {
        Self {
            members: gateway.subscribe(EntityKind::Members),
            bookings: gateway.subscribe(EntityKind::Bookings),
            settings: gateway.subscribe(EntityKind::Settings),
        }
    }
}

/// Apply change events until every feed closes.
///
/// A lagging receiver has lost events, so the store reloads in full rather
/// than continue from a gap.
pub async fn run_sync(store: Arc<ReservationStore>, mut subs: Subscriptions) {
    loop {
        let (kind, received) = tokio::select! {
            r = subs.members.recv() => (EntityKind::Members, r),
            r = subs.bookings.recv() => (EntityKind::Bookings, r),
            r = subs.settings.recv() => (EntityKind::Settings, r),
        };
        match received {
            Ok(event) => {
                store.apply_remote_event(&event);
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(table = %kind, skipped, "change feed lagged, reloading");
                metrics::counter!(observability::RESYNCS_TOTAL, "table" => kind.table()).increment(1);
                if let Err(e) = store.reload().await {
                    warn!(error = %e, "resync failed");
                }
            }
            Err(RecvError::Closed) => {
                info!(table = %kind, "change feed closed, sync stopped");
                break;
            }
        }
    }
}
