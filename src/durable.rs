//! WAL-backed [`Gateway`] for sessions that share one process.
//!
//! Every write goes through a single lock: validate, append to the WAL, apply
//! to the in-memory tables, then broadcast the change. Because it is the only
//! writer, it can check slot capacity at commit time, which the per-session
//! admission check cannot do on its own.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};
use ulid::Ulid;

use crate::catalog::SlotCatalog;
use crate::gateway::{Gateway, GatewayError, GatewayResult};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::wal::{Wal, WalRecord};

#[derive(Default)]
struct Tables {
    members: HashMap<Ulid, Member>,
    bookings: HashMap<Ulid, Booking>,
    settings: BTreeMap<String, Setting>,
}

impl Tables {
    fn apply(&mut self, record: &WalRecord) {
        match record {
            WalRecord::Put(Row::Member(m)) => {
                self.members.insert(m.id, m.clone());
            }
            WalRecord::Put(Row::Booking(b)) => {
                self.bookings.insert(b.id, b.clone());
            }
            WalRecord::Put(Row::Setting(s)) => {
                self.settings.insert(s.key.clone(), s.clone());
            }
            WalRecord::Delete { kind, key } => match kind {
                EntityKind::Members => {
                    if let Ok(id) = key.parse::<Ulid>() {
                        self.members.remove(&id);
                    }
                }
                EntityKind::Bookings => {
                    if let Ok(id) = key.parse::<Ulid>() {
                        self.bookings.remove(&id);
                    }
                }
                EntityKind::Settings => {
                    self.settings.remove(key);
                }
            },
        }
    }

    fn contains(&self, kind: EntityKind, key: &str) -> bool {
        match kind {
            EntityKind::Members => key.parse::<Ulid>().is_ok_and(|id| self.members.contains_key(&id)),
            EntityKind::Bookings => key.parse::<Ulid>().is_ok_and(|id| self.bookings.contains_key(&id)),
            EntityKind::Settings => self.settings.contains_key(key),
        }
    }

    fn snapshot(&self) -> Vec<WalRecord> {
        let mut records = Vec::with_capacity(self.members.len() + self.bookings.len() + self.settings.len());
        records.extend(self.members.values().cloned().map(|m| WalRecord::Put(Row::Member(m))));
        records.extend(self.bookings.values().cloned().map(|b| WalRecord::Put(Row::Booking(b))));
        records.extend(self.settings.values().cloned().map(|s| WalRecord::Put(Row::Setting(s))));
        records
    }

    /// Unique email, case-insensitive.
    fn check_member(&self, member: &Member) -> GatewayResult<()> {
        let email = member.email.to_lowercase();
        if self
            .members
            .values()
            .any(|m| m.id != member.id && m.email.to_lowercase() == email)
        {
            return Err(GatewayError::Constraint(format!("email {} already registered", member.email)));
        }
        Ok(())
    }

    fn check_booking(&self, booking: &Booking, guard: Option<&SlotCatalog>) -> GatewayResult<()> {
        if let Some(existing) = self.bookings.get(&booking.id)
            && !existing.is_confirmed()
            && booking.is_confirmed()
        {
            return Err(GatewayError::Constraint("cancelled bookings cannot be reinstated".into()));
        }
        let Some(catalog) = guard else { return Ok(()) };
        if !booking.is_confirmed() {
            return Ok(());
        }

        let mut taken = 0u32;
        for other in self.bookings.values() {
            if other.id == booking.id || !other.occupies(booking.date, booking.area, &booking.time_slot) {
                continue;
            }
            if other.member_id == booking.member_id {
                return Err(GatewayError::Constraint(format!(
                    "member {} already holds {} {} on {}",
                    booking.member_id, booking.area, booking.time_slot, booking.date
                )));
            }
            taken += 1;
        }
        let capacity = catalog.capacity_for(booking.area);
        if taken >= capacity {
            return Err(GatewayError::Constraint(format!(
                "slot {} {} on {} is at capacity {capacity}",
                booking.area, booking.time_slot, booking.date
            )));
        }
        Ok(())
    }
}

struct Durable {
    wal: Wal,
    tables: Tables,
}

pub struct DurableGateway {
    inner: Mutex<Durable>,
    notify: NotifyHub,
    /// When set, booking writes are checked against slot capacity at commit.
    capacity_guard: Option<SlotCatalog>,
    read_only: AtomicBool,
}

impl DurableGateway {
    /// Replay the WAL at `path` (if any) and open it for appends.
    pub fn open(path: &Path, capacity_guard: Option<SlotCatalog>) -> std::io::Result<Self> {
        let records = Wal::replay(path)?;
        let mut tables = Tables::default();
        for record in &records {
            tables.apply(record);
        }
        let wal = Wal::open(path)?;
        info!(
            path = %path.display(),
            records = records.len(),
            members = tables.members.len(),
            bookings = tables.bookings.len(),
            "durable gateway opened"
        );
        Ok(Self {
            inner: Mutex::new(Durable { wal, tables }),
            notify: NotifyHub::new(),
            capacity_guard,
            read_only: AtomicBool::new(false),
        })
    }

    /// Reject every write with [`GatewayError::Unavailable`] while set.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
        info!(read_only, "durable gateway mode changed");
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.inner.lock().await.wal.appends_since_compact()
    }

    /// Rewrite the WAL with one `Put` per live row.
    pub async fn compact(&self) -> GatewayResult<()> {
        let mut inner = self.inner.lock().await;
        let records = inner.tables.snapshot();
        inner.wal.compact(&records)?;
        info!(rows = records.len(), "WAL compacted");
        Ok(())
    }

    fn ensure_writable(&self) -> GatewayResult<()> {
        if self.is_read_only() {
            return Err(GatewayError::Unavailable("gateway is read-only".into()));
        }
        Ok(())
    }

    fn check_row(&self, tables: &Tables, row: &Row) -> GatewayResult<()> {
        match row {
            Row::Member(m) => tables.check_member(m),
            Row::Booking(b) => tables.check_booking(b, self.capacity_guard.as_ref()),
            Row::Setting(_) => Ok(()),
        }
    }

    /// Validate, append, apply, broadcast.
    async fn write(&self, op: ChangeOp, row: Row) -> GatewayResult<()> {
        let start = Instant::now();
        let kind = row.kind();
        let result = self.write_inner(op, row).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::GATEWAY_WRITES_TOTAL,
            "table" => kind.table(), "op" => op.as_str(), "status" => status)
        .increment(1);
        metrics::histogram!(observability::GATEWAY_WRITE_DURATION_SECONDS, "table" => kind.table())
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn write_inner(&self, op: ChangeOp, row: Row) -> GatewayResult<()> {
        self.ensure_writable()?;
        let kind = row.kind();
        let key = row.key();
        let mut inner = self.inner.lock().await;

        let exists = inner.tables.contains(kind, &key);
        match op {
            ChangeOp::Insert if exists => {
                return Err(GatewayError::Constraint(format!("duplicate key {kind} {key}")));
            }
            ChangeOp::Update if !exists => return Err(GatewayError::NotFound { kind, key }),
            _ => {}
        }
        self.check_row(&inner.tables, &row)?;

        let event = ChangeEvent::for_row(op, &row);
        let record = WalRecord::Put(row);
        inner.wal.append(&record)?;
        inner.tables.apply(&record);
        // Published under the lock so subscribers see commit order.
        self.notify.send(event);
        drop(inner);

        debug!(table = %kind, %key, op = op.as_str(), "row committed");
        Ok(())
    }
}

#[async_trait]
impl Gateway for DurableGateway {
    async fn load_members(&self) -> GatewayResult<Vec<Member>> {
        let inner = self.inner.lock().await;
        let mut members: Vec<Member> = inner.tables.members.values().cloned().collect();
        members.sort_by_key(|m| (m.created_at, m.id));
        Ok(members)
    }

    async fn load_bookings(&self, status: Option<BookingStatus>) -> GatewayResult<Vec<Booking>> {
        let inner = self.inner.lock().await;
        let mut bookings: Vec<Booking> = inner
            .tables
            .bookings
            .values()
            .filter(|b| status.is_none_or(|s| b.status == s))
            .cloned()
            .collect();
        bookings.sort_by_key(|b| (b.created_at, b.id));
        Ok(bookings)
    }

    async fn load_settings(&self) -> GatewayResult<Vec<Setting>> {
        let inner = self.inner.lock().await;
        Ok(inner.tables.settings.values().cloned().collect())
    }

    async fn insert(&self, row: Row) -> GatewayResult<()> {
        self.write(ChangeOp::Insert, row).await
    }

    async fn update(&self, row: Row) -> GatewayResult<()> {
        self.write(ChangeOp::Update, row).await
    }

    async fn delete(&self, kind: EntityKind, key: &str) -> GatewayResult<()> {
        self.ensure_writable()?;
        let mut inner = self.inner.lock().await;
        if !inner.tables.contains(kind, key) {
            return Err(GatewayError::NotFound {
                kind,
                key: key.to_string(),
            });
        }
        let record = WalRecord::Delete {
            kind,
            key: key.to_string(),
        };
        inner.wal.append(&record)?;
        inner.tables.apply(&record);
        self.notify.send(ChangeEvent::deleted(kind, key));
        drop(inner);

        metrics::counter!(observability::GATEWAY_WRITES_TOTAL,
            "table" => kind.table(), "op" => "delete", "status" => "ok")
        .increment(1);
        debug!(table = %kind, %key, "row deleted");
        Ok(())
    }

    fn subscribe(&self, kind: EntityKind) -> broadcast::Receiver<ChangeEvent> {
        self.notify.subscribe(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("gymbook_test_durable");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn member(email: &str) -> Member {
        Member {
            id: Ulid::new(),
            name: "Ana".into(),
            email: email.into(),
            phone: String::new(),
            plan: Plan::Premium,
            status: MemberStatus::Active,
            created_at: Utc::now(),
        }
    }

    fn booking(m: &Member, slot: &str) -> Booking {
        Booking {
            id: Ulid::new(),
            member_id: m.id,
            member_name: m.name.clone(),
            member_email: m.email.clone(),
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            area: Area::Gym,
            time_slot: slot.into(),
            status: BookingStatus::Confirmed,
            created_at: Utc::now(),
        }
    }

    fn guard(capacity: u32) -> Option<SlotCatalog> {
        Some(
            SlotCatalog::builder()
                .area(Area::Gym, ["09:00-10:00"], capacity)
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn rows_survive_reopen() {
        let path = test_wal_path("reopen.wal");
        let m = member("ana@example.com");
        {
            let gw = DurableGateway::open(&path, None).unwrap();
            gw.insert(Row::Member(m.clone())).await.unwrap();
            gw.insert(Row::Booking(booking(&m, "09:00-10:00"))).await.unwrap();
        }
        let gw = DurableGateway::open(&path, None).unwrap();
        assert_eq!(gw.load_members().await.unwrap(), vec![m]);
        assert_eq!(gw.load_bookings(Some(BookingStatus::Confirmed)).await.unwrap().len(), 1);
        assert!(gw.load_bookings(Some(BookingStatus::Cancelled)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn email_must_be_unique() {
        let gw = DurableGateway::open(&test_wal_path("email.wal"), None).unwrap();
        gw.insert(Row::Member(member("ana@example.com"))).await.unwrap();
        let err = gw.insert(Row::Member(member("ANA@example.com"))).await.unwrap_err();
        assert!(matches!(err, GatewayError::Constraint(_)));
    }

    #[tokio::test]
    async fn capacity_guard_rejects_overbooking() {
        let gw = DurableGateway::open(&test_wal_path("guard.wal"), guard(1)).unwrap();
        let (a, b) = (member("a@example.com"), member("b@example.com"));
        gw.insert(Row::Booking(booking(&a, "09:00-10:00"))).await.unwrap();
        let err = gw.insert(Row::Booking(booking(&b, "09:00-10:00"))).await.unwrap_err();
        assert!(matches!(err, GatewayError::Constraint(ref msg) if msg.contains("capacity")));
    }

    #[tokio::test]
    async fn guard_rejects_duplicate_member_slot() {
        let gw = DurableGateway::open(&test_wal_path("guard_dup.wal"), guard(5)).unwrap();
        let a = member("a@example.com");
        gw.insert(Row::Booking(booking(&a, "09:00-10:00"))).await.unwrap();
        let err = gw.insert(Row::Booking(booking(&a, "09:00-10:00"))).await.unwrap_err();
        assert!(matches!(err, GatewayError::Constraint(_)));
    }

    #[tokio::test]
    async fn cancelled_booking_cannot_be_reinstated() {
        let gw = DurableGateway::open(&test_wal_path("reinstate.wal"), None).unwrap();
        let a = member("a@example.com");
        let mut b = booking(&a, "09:00-10:00");
        gw.insert(Row::Booking(b.clone())).await.unwrap();
        b.status = BookingStatus::Cancelled;
        gw.update(Row::Booking(b.clone())).await.unwrap();
        b.status = BookingStatus::Confirmed;
        assert!(matches!(
            gw.update(Row::Booking(b)).await,
            Err(GatewayError::Constraint(_))
        ));
    }

    #[tokio::test]
    async fn update_and_delete_missing_rows() {
        let gw = DurableGateway::open(&test_wal_path("missing.wal"), None).unwrap();
        let m = member("a@example.com");
        assert!(matches!(
            gw.update(Row::Member(m.clone())).await,
            Err(GatewayError::NotFound { .. })
        ));
        assert!(matches!(
            gw.delete(EntityKind::Members, &m.id.to_string()).await,
            Err(GatewayError::NotFound { .. })
        ));
        assert!(matches!(
            gw.delete(EntityKind::Bookings, "not-a-ulid").await,
            Err(GatewayError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn upsert_inserts_then_updates_settings() {
        let gw = DurableGateway::open(&test_wal_path("upsert.wal"), None).unwrap();
        let mut s = Setting {
            key: SETTING_SLOGAN.into(),
            value: "lift".into(),
            updated_at: Utc::now(),
        };
        gw.upsert(Row::Setting(s.clone())).await.unwrap();
        s.value = "lift heavy".into();
        gw.upsert(Row::Setting(s.clone())).await.unwrap();
        assert_eq!(gw.load_settings().await.unwrap(), vec![s]);
    }

    #[tokio::test]
    async fn writes_are_broadcast() {
        let gw = DurableGateway::open(&test_wal_path("broadcast.wal"), None).unwrap();
        let mut rx = gw.subscribe(EntityKind::Members);
        let m = member("a@example.com");
        gw.insert(Row::Member(m.clone())).await.unwrap();
        gw.delete(EntityKind::Members, &m.id.to_string()).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.op, ChangeOp::Insert);
        assert_eq!(first.payload["email"], "a@example.com");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.op, ChangeOp::Delete);
        assert_eq!(second.payload["id"], m.id.to_string());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn events_follow_commit_order() {
        let gw = std::sync::Arc::new(DurableGateway::open(&test_wal_path("event_order.wal"), None).unwrap());
        let mut rx = gw.subscribe(EntityKind::Settings);

        for round in 0..100 {
            let writers: Vec<_> = (0..4)
                .map(|w| {
                    let gw = gw.clone();
                    tokio::spawn(async move {
                        let s = Setting {
                            key: SETTING_SLOGAN.into(),
                            value: format!("r{round}-w{w}"),
                            updated_at: Utc::now(),
                        };
                        gw.upsert(Row::Setting(s)).await.unwrap();
                    })
                })
                .collect();
            for w in writers {
                w.await.unwrap();
            }

            let mut last = None;
            while let Ok(event) = rx.try_recv() {
                last = Some(event);
            }
            let stored = gw.load_settings().await.unwrap();
            let last = last.expect("writes must be broadcast");
            assert_eq!(last.payload["value"], stored[0].value.as_str(), "round {round}");
        }
    }

    #[tokio::test]
    async fn read_only_rejects_writes() {
        let gw = DurableGateway::open(&test_wal_path("read_only.wal"), None).unwrap();
        gw.set_read_only(true);
        assert!(matches!(
            gw.insert(Row::Member(member("a@example.com"))).await,
            Err(GatewayError::Unavailable(_))
        ));
        gw.set_read_only(false);
        gw.insert(Row::Member(member("a@example.com"))).await.unwrap();
    }

    #[tokio::test]
    async fn compact_keeps_live_rows() {
        let path = test_wal_path("compact.wal");
        let gw = DurableGateway::open(&path, None).unwrap();
        let m = member("a@example.com");
        gw.insert(Row::Member(m.clone())).await.unwrap();
        for i in 0..5 {
            let mut edited = m.clone();
            edited.phone = format!("555-000{i}");
            gw.update(Row::Member(edited)).await.unwrap();
        }
        assert_eq!(gw.appends_since_compact().await, 6);
        gw.compact().await.unwrap();
        assert_eq!(gw.appends_since_compact().await, 0);
        drop(gw);

        let records = Wal::replay(&path).unwrap();
        assert_eq!(records.len(), 1);
        let reopened = DurableGateway::open(&path, None).unwrap();
        assert_eq!(reopened.load_members().await.unwrap()[0].phone, "555-0004");
    }
}
