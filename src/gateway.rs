//! Persistence & sync boundary.
//!
//! The reservation store only talks to durable storage through [`Gateway`].
//! Any backend that can read rows in bulk, write single rows, and push row
//! changes to every subscriber can sit behind it.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("row not found: {kind} {key}")]
    NotFound { kind: EntityKind, key: String },
    /// A backend constraint rejected the write (unique email, slot capacity, ...).
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        GatewayError::Io(e.to_string())
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[async_trait]
pub trait Gateway: Send + Sync {
    async fn load_members(&self) -> GatewayResult<Vec<Member>>;

    /// All bookings, or only those with `status` when given.
    async fn load_bookings(&self, status: Option<BookingStatus>) -> GatewayResult<Vec<Booking>>;

    async fn load_settings(&self) -> GatewayResult<Vec<Setting>>;

    /// Insert a new row. Fails if a row with the same key exists.
    async fn insert(&self, row: Row) -> GatewayResult<()>;

    /// Replace an existing row, matched by kind and key.
    async fn update(&self, row: Row) -> GatewayResult<()>;

    /// Insert or replace. Used for settings, which are addressed by key.
    async fn upsert(&self, row: Row) -> GatewayResult<()> {
        match self.update(row.clone()).await {
            Err(GatewayError::NotFound { .. }) => self.insert(row).await,
            other => other,
        }
    }

    async fn delete(&self, kind: EntityKind, key: &str) -> GatewayResult<()>;

    /// Change feed for one table, delivered to every subscriber regardless of
    /// which session made the change.
    fn subscribe(&self, kind: EntityKind) -> broadcast::Receiver<ChangeEvent>;
}
