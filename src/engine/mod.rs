//! Reservation store: the session's working set of members, bookings and
//! settings, the commands that change it, and the reconciler that merges
//! change events pushed by the gateway.

mod error;
mod mutations;
mod queries;
mod reconcile;

pub use error::EngineError;
pub use mutations::CancelReport;
pub use reconcile::RemoteOutcome;

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;
use ulid::Ulid;

use crate::catalog::SlotCatalog;
use crate::gateway::Gateway;
use crate::model::*;
use crate::sync::{self, Subscriptions};

/// Where a tracked booking is in its optimistic lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Inserted locally, durable write still in flight.
    Pending,
    /// Durably stored (confirmed by our own write or received from the gateway).
    Settled,
}

#[derive(Debug, Clone)]
pub(crate) struct TrackedBooking {
    pub booking: Booking,
    pub phase: Phase,
    /// Store generation of the last local write to this entry.
    pub generation: u64,
}

impl TrackedBooking {
    fn pending(booking: Booking, generation: u64) -> Self {
        Self { booking, phase: Phase::Pending, generation }
    }

    fn settled(booking: Booking, generation: u64) -> Self {
        Self { booking, phase: Phase::Settled, generation }
    }
}

/// A tracked row plus the store generation it was written in.
#[derive(Debug, Clone)]
pub(crate) struct Stamped<T> {
    pub item: T,
    pub generation: u64,
}

impl<T> Stamped<T> {
    fn new(item: T, generation: u64) -> Self {
        Self { item, generation }
    }
}

pub struct ReservationStore {
    gateway: Arc<dyn Gateway>,
    catalog: SlotCatalog,
    members: DashMap<Ulid, Stamped<Member>>,
    /// Ids of deleted members. Ids are never reused, so these stay gone.
    deleted_members: DashSet<Ulid>,
    /// Active working set: confirmed bookings only, pending ones included.
    bookings: DashMap<Ulid, TrackedBooking>,
    /// Ids known to be cancelled. Cancellation is terminal, so late inserts
    /// or updates for these ids are dropped.
    cancelled: DashSet<Ulid>,
    settings: DashMap<String, Stamped<Setting>>,
    /// Bumped when a reload starts. Entries stamped with a generation at or
    /// past a reload's start were written after its snapshot may have been
    /// taken, so that reload leaves them alone.
    generation: AtomicU64,
    /// Serializes the admission check with the optimistic insert, and with
    /// the apply phase of a reload.
    admission: Mutex<()>,
}

impl ReservationStore {
    /// An empty store. Call [`reload`](Self::reload) to fill it, or use
    /// [`connect`](Self::connect) to also start following the change feed.
    pub fn new(gateway: Arc<dyn Gateway>, catalog: SlotCatalog) -> Self {
        Self {
            gateway,
            catalog,
            members: DashMap::new(),
            deleted_members: DashSet::new(),
            bookings: DashMap::new(),
            cancelled: DashSet::new(),
            settings: DashMap::new(),
            generation: AtomicU64::new(0),
            admission: Mutex::new(()),
        }
    }

    /// Subscribe to every table, bulk-load, then spawn the sync loop.
    ///
    /// Subscribing first means no change committed during the load is missed;
    /// events that the load already reflected merge as no-ops.
    pub async fn connect(
        gateway: Arc<dyn Gateway>,
        catalog: SlotCatalog,
    ) -> Result<(Arc<Self>, JoinHandle<()>), EngineError> {
        let subscriptions = Subscriptions::new(gateway.as_ref());
        let store = Arc::new(Self::new(gateway, catalog));
        store.reload().await?;
        let handle = tokio::spawn(sync::run_sync(store.clone(), subscriptions));
        Ok((store, handle))
    }

    /// Bring the working set in line with the gateway's current rows.
    ///
    /// Rows are diffed in place, never cleared. Anything written locally
    /// after the reload started, and every pending booking, is kept as is.
    /// Tracked rows from before the reload that the snapshot no longer has
    /// are dropped.
    pub async fn reload(&self) -> Result<(), EngineError> {
        let epoch = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let members = self.gateway.load_members().await?;
        let bookings = self.gateway.load_bookings(None).await?;
        let settings = self.gateway.load_settings().await?;

        let _admission = self.admission.lock().await;

        let live: HashSet<Ulid> = members.iter().map(|m| m.id).collect();
        self.members
            .retain(|id, m| !self.deleted_members.contains(id) && (live.contains(id) || m.generation >= epoch));
        for m in members {
            if !self.deleted_members.contains(&m.id) {
                refresh(&self.members, m.id, m, epoch);
            }
        }

        let mut live = HashSet::new();
        for b in &bookings {
            if b.is_confirmed() {
                live.insert(b.id);
            } else {
                self.cancelled.insert(b.id);
            }
        }
        self.bookings.retain(|id, t| {
            !self.cancelled.contains(id)
                && (live.contains(id) || t.phase == Phase::Pending || t.generation >= epoch)
        });
        for b in bookings.into_iter().filter(|b| b.is_confirmed()) {
            let id = b.id;
            match self.bookings.entry(id) {
                Entry::Occupied(e) if e.get().phase == Phase::Pending || e.get().generation >= epoch => {}
                Entry::Occupied(mut e) => {
                    e.insert(TrackedBooking::settled(b, epoch));
                }
                Entry::Vacant(e) => {
                    if !self.cancelled.contains(&id) {
                        e.insert(TrackedBooking::settled(b, epoch));
                    }
                }
            }
            self.drop_if_cancelled(id);
        }

        let live: HashSet<&str> = settings.iter().map(|s| s.key.as_str()).collect();
        self.settings
            .retain(|key, s| live.contains(key.as_str()) || s.generation >= epoch);
        for s in settings {
            refresh(&self.settings, s.key.clone(), s, epoch);
        }

        info!(
            members = self.members.len(),
            bookings = self.bookings.len(),
            settings = self.settings.len(),
            epoch,
            "working set loaded"
        );
        Ok(())
    }

    /// Generation to stamp on a local write. Read it only after the write's
    /// durable commit, so any reload it predates loads a snapshot that
    /// already has the row.
    fn stamp(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Track a confirmed booking unless it is known cancelled. The tombstone
    /// is checked again after the insert, so a concurrent cancel always wins.
    fn track_settled(&self, booking: Booking) -> bool {
        let id = booking.id;
        if self.cancelled.contains(&id) {
            return false;
        }
        self.bookings
            .insert(id, TrackedBooking::settled(booking, self.stamp()));
        !self.drop_if_cancelled(id)
    }

    fn drop_if_cancelled(&self, id: Ulid) -> bool {
        self.cancelled.contains(&id) && self.bookings.remove(&id).is_some()
    }

    pub fn catalog(&self) -> &SlotCatalog {
        &self.catalog
    }

    /// Confirmed and pending bookings on `date`, cloned out of the map.
    fn bookings_for_day(&self, date: Day) -> Vec<Booking> {
        self.bookings
            .iter()
            .filter(|e| e.booking.date == date)
            .map(|e| e.booking.clone())
            .collect()
    }

    fn pending_count(&self) -> usize {
        self.bookings.iter().filter(|e| e.phase == Phase::Pending).count()
    }
}

/// Replace a stale entry with the snapshot row; keep entries written since
/// the reload began.
fn refresh<K, T>(map: &DashMap<K, Stamped<T>>, key: K, item: T, epoch: u64)
where
    K: Eq + Hash,
{
    match map.entry(key) {
        Entry::Occupied(e) if e.get().generation >= epoch => {}
        Entry::Occupied(mut e) => {
            e.insert(Stamped::new(item, epoch));
        }
        Entry::Vacant(e) => {
            e.insert(Stamped::new(item, epoch));
        }
    }
}
