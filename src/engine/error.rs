use ulid::Ulid;

use crate::gateway::GatewayError;
use crate::policy::Denial;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("member not found: {0}")]
    MemberNotFound(Ulid),
    #[error("booking denied: {0}")]
    BookingDenied(Denial),
    #[error("booking not found: {0}")]
    NotFound(Ulid),
    /// The durable write failed. Any optimistic local change was rolled back.
    #[error("storage error: {0}")]
    Storage(#[from] GatewayError),
    /// Some, but not all, of a batch of cancellations went through.
    #[error("cancelled {} of {} bookings: {reason}", .cancelled.len(), .cancelled.len() + .failed.len())]
    PartialCancel {
        cancelled: Vec<Ulid>,
        failed: Vec<Ulid>,
        reason: String,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("member {0} still holds confirmed bookings")]
    MemberHasBookings(Ulid),
}

impl EngineError {
    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Storage(_) | EngineError::PartialCancel { .. })
    }

    /// Short label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::MemberNotFound(_) => "member_not_found",
            EngineError::BookingDenied(_) => "denied",
            EngineError::NotFound(_) => "not_found",
            EngineError::Storage(_) => "storage",
            EngineError::PartialCancel { .. } => "partial",
            EngineError::InvalidRequest(_) => "invalid",
            EngineError::MemberHasBookings(_) => "member_has_bookings",
        }
    }
}
