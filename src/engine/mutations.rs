use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::policy;

use super::{EngineError, Phase, ReservationStore, Stamped, TrackedBooking};

/// Result of a fully successful [`ReservationStore::cancel_all_for_member`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelReport {
    pub cancelled: Vec<Ulid>,
}

impl ReservationStore {
    /// Book `member_id` into (date, area, slot).
    ///
    /// The booking is visible locally as soon as it passes admission; if the
    /// durable write then fails it is removed again and the storage error is
    /// returned.
    pub async fn create_booking(
        &self,
        member_id: Ulid,
        date: Day,
        area: Area,
        slot: &str,
    ) -> Result<Booking, EngineError> {
        let booking = {
            let _admission = self.admission.lock().await;
            let member = self
                .members
                .get(&member_id)
                .map(|m| m.item.clone())
                .ok_or(EngineError::MemberNotFound(member_id))?;
            if !self.catalog.contains(area, slot) {
                metrics::counter!(observability::BOOKINGS_TOTAL, "outcome" => "invalid").increment(1);
                return Err(EngineError::InvalidRequest("unknown time slot for area"));
            }

            let current = self.bookings_for_day(date);
            let capacity = self.catalog.capacity_for(area);
            if let Err(denial) = policy::can_book(&member, date, area, slot, capacity, &current) {
                debug!(%member_id, %date, %area, slot, reason = denial.reason(), "booking denied");
                metrics::counter!(observability::BOOKINGS_TOTAL, "outcome" => "denied").increment(1);
                metrics::counter!(observability::BOOKING_DENIALS_TOTAL, "reason" => denial.label())
                    .increment(1);
                return Err(EngineError::BookingDenied(denial));
            }

            let booking = Booking {
                id: Ulid::new(),
                member_id,
                member_name: member.name.clone(),
                member_email: member.email.clone(),
                date,
                area,
                time_slot: slot.to_string(),
                status: BookingStatus::Confirmed,
                created_at: Utc::now(),
            };
            self.bookings
                .insert(booking.id, TrackedBooking::pending(booking.clone(), self.stamp()));
            booking
        };
        metrics::gauge!(observability::PENDING_BOOKINGS).set(self.pending_count() as f64);

        let result = self.gateway.insert(Row::Booking(booking.clone())).await;
        let outcome = match result {
            Ok(()) => {
                if let Some(mut tracked) = self.bookings.get_mut(&booking.id) {
                    tracked.phase = Phase::Settled;
                    tracked.generation = self.stamp();
                }
                info!(booking_id = %booking.id, %member_id, %date, %area, slot, "booking confirmed");
                metrics::counter!(observability::BOOKINGS_TOTAL, "outcome" => "created").increment(1);
                Ok(booking)
            }
            Err(e) => {
                self.bookings
                    .remove_if(&booking.id, |_, t| t.phase == Phase::Pending);
                warn!(booking_id = %booking.id, %member_id, error = %e, "booking write failed, rolled back");
                metrics::counter!(observability::BOOKINGS_TOTAL, "outcome" => "rolled_back").increment(1);
                Err(EngineError::Storage(e))
            }
        };
        metrics::gauge!(observability::PENDING_BOOKINGS).set(self.pending_count() as f64);
        outcome
    }

    /// Mark a tracked booking cancelled. The booking leaves the working set
    /// only once the durable update succeeds.
    pub async fn cancel_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let mut cancelled = self
            .bookings
            .get(&booking_id)
            .map(|t| t.booking.clone())
            .ok_or(EngineError::NotFound(booking_id))?;
        cancelled.status = BookingStatus::Cancelled;

        if let Err(e) = self.gateway.update(Row::Booking(cancelled.clone())).await {
            warn!(%booking_id, error = %e, "cancel write failed");
            metrics::counter!(observability::CANCELLATIONS_TOTAL, "status" => "error").increment(1);
            return Err(EngineError::Storage(e));
        }

        self.cancelled.insert(booking_id);
        self.bookings.remove(&booking_id);
        info!(%booking_id, member_id = %cancelled.member_id, "booking cancelled");
        metrics::counter!(observability::CANCELLATIONS_TOTAL, "status" => "ok").increment(1);
        Ok(cancelled)
    }

    /// Cancel every confirmed booking the member holds.
    ///
    /// Each booking is cancelled on its own. All succeeding gives a
    /// [`CancelReport`]; some failing gives [`EngineError::PartialCancel`]
    /// listing both sides; all failing gives the first storage error. Calling
    /// again only retries what is still confirmed.
    pub async fn cancel_all_for_member(&self, member_id: Ulid) -> Result<CancelReport, EngineError> {
        if !self.members.contains_key(&member_id) {
            return Err(EngineError::MemberNotFound(member_id));
        }
        let ids: Vec<Ulid> = self
            .bookings
            .iter()
            .filter(|t| t.booking.member_id == member_id)
            .map(|t| *t.key())
            .collect();

        let results = join_all(ids.iter().map(|id| self.cancel_booking(*id))).await;

        let mut cancelled = Vec::new();
        let mut failed = Vec::new();
        let mut first_error = None;
        for (id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(_) => cancelled.push(id),
                // Already gone, e.g. cancelled by another session meanwhile.
                Err(EngineError::NotFound(_)) => {}
                Err(e) => {
                    failed.push(id);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            None => Ok(CancelReport { cancelled }),
            Some(e) if cancelled.is_empty() => Err(e),
            Some(e) => {
                warn!(%member_id, cancelled = cancelled.len(), failed = failed.len(), "partial cancellation");
                Err(EngineError::PartialCancel {
                    cancelled,
                    failed,
                    reason: e.to_string(),
                })
            }
        }
    }

    // ── Members ──────────────────────────────────────────────

    /// Admin creation and self-registration. New members start active.
    pub async fn add_member(&self, new: NewMember) -> Result<Member, EngineError> {
        let member = Member {
            id: Ulid::new(),
            name: new.name.trim().to_string(),
            email: normalize_email(&new.email),
            phone: new.phone.trim().to_string(),
            plan: new.plan,
            status: MemberStatus::Active,
            created_at: Utc::now(),
        };
        validate_member(&member)?;
        self.gateway.insert(Row::Member(member.clone())).await?;
        self.members
            .insert(member.id, Stamped::new(member.clone(), self.stamp()));
        info!(member_id = %member.id, plan = %member.plan, "member added");
        Ok(member)
    }

    pub async fn update_member(&self, id: Ulid, update: MemberUpdate) -> Result<Member, EngineError> {
        let mut member = self
            .members
            .get(&id)
            .map(|m| m.item.clone())
            .ok_or(EngineError::MemberNotFound(id))?;
        if let Some(name) = update.name {
            member.name = name.trim().to_string();
        }
        if let Some(email) = update.email {
            member.email = normalize_email(&email);
        }
        if let Some(phone) = update.phone {
            member.phone = phone.trim().to_string();
        }
        if let Some(plan) = update.plan {
            member.plan = plan;
        }
        if let Some(status) = update.status {
            member.status = status;
        }
        validate_member(&member)?;

        self.gateway.update(Row::Member(member.clone())).await?;
        self.members.insert(id, Stamped::new(member.clone(), self.stamp()));
        info!(member_id = %id, "member updated");
        Ok(member)
    }

    pub async fn set_member_status(&self, id: Ulid, status: MemberStatus) -> Result<Member, EngineError> {
        self.update_member(
            id,
            MemberUpdate {
                status: Some(status),
                ..Default::default()
            },
        )
        .await
    }

    /// Refused while the member holds confirmed bookings. Cancelled history
    /// keeps its name/email snapshots after the member is gone.
    pub async fn delete_member(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.members.contains_key(&id) {
            return Err(EngineError::MemberNotFound(id));
        }
        if self.bookings.iter().any(|t| t.booking.member_id == id) {
            return Err(EngineError::MemberHasBookings(id));
        }
        self.gateway.delete(EntityKind::Members, &id.to_string()).await?;
        self.deleted_members.insert(id);
        self.members.remove(&id);
        info!(member_id = %id, "member deleted");
        Ok(())
    }

    // ── Settings ─────────────────────────────────────────────

    pub async fn update_setting(&self, key: &str, value: &str) -> Result<Setting, EngineError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(EngineError::InvalidRequest("setting key is empty"));
        }
        if key.len() > MAX_SETTING_KEY_LEN {
            return Err(EngineError::InvalidRequest("setting key too long"));
        }
        if value.len() > MAX_SETTING_VALUE_LEN {
            return Err(EngineError::InvalidRequest("setting value too long"));
        }
        let setting = Setting {
            key: key.to_string(),
            value: value.to_string(),
            updated_at: Utc::now(),
        };
        self.gateway.upsert(Row::Setting(setting.clone())).await?;
        self.settings
            .insert(setting.key.clone(), Stamped::new(setting.clone(), self.stamp()));
        info!(key, "setting updated");
        Ok(setting)
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_member(member: &Member) -> Result<(), EngineError> {
    if member.name.is_empty() {
        return Err(EngineError::InvalidRequest("name is empty"));
    }
    if member.name.len() > MAX_NAME_LEN {
        return Err(EngineError::InvalidRequest("name too long"));
    }
    if member.email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::InvalidRequest("email too long"));
    }
    match member.email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.contains('@') => {}
        _ => return Err(EngineError::InvalidRequest("malformed email")),
    }
    if member.phone.len() > MAX_PHONE_LEN {
        return Err(EngineError::InvalidRequest("phone too long"));
    }
    Ok(())
}
