use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::{ReservationStore, Stamped, TrackedBooking};

/// What a change event did to the working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    Inserted,
    Merged,
    Removed,
    /// Already reflected locally (echo of our own write, repeat delivery,
    /// delete of an absent row).
    Unchanged,
    /// Unknown table or a payload that could not be decoded.
    Ignored,
}

impl RemoteOutcome {
    fn label(&self) -> &'static str {
        match self {
            RemoteOutcome::Inserted => "inserted",
            RemoteOutcome::Merged => "merged",
            RemoteOutcome::Removed => "removed",
            RemoteOutcome::Unchanged => "unchanged",
            RemoteOutcome::Ignored => "ignored",
        }
    }
}

impl ReservationStore {
    /// Merge one pushed change into the working set. Idempotent: delivering
    /// the same event again leaves the state as the first delivery did.
    pub fn apply_remote_event(&self, event: &ChangeEvent) -> RemoteOutcome {
        let Some(kind) = event.kind() else {
            debug!(table = %event.table, "ignoring change for unknown table");
            metrics::counter!(observability::REMOTE_EVENTS_TOTAL,
                "table" => "unknown", "op" => event.op.as_str(), "outcome" => "ignored")
            .increment(1);
            return RemoteOutcome::Ignored;
        };

        let payload = normalize_payload(kind, &event.payload);
        let outcome = match kind {
            EntityKind::Members => self.reconcile_member(event.op, &payload),
            EntityKind::Bookings => self.reconcile_booking(event.op, &payload),
            EntityKind::Settings => self.reconcile_setting(event.op, &payload),
        };

        if outcome == RemoteOutcome::Ignored {
            warn!(table = %kind, op = event.op.as_str(), "undecodable change payload");
        } else {
            debug!(table = %kind, op = event.op.as_str(), outcome = outcome.label(), "remote change applied");
        }
        metrics::counter!(observability::REMOTE_EVENTS_TOTAL,
            "table" => kind.table(), "op" => event.op.as_str(), "outcome" => outcome.label())
        .increment(1);
        outcome
    }

    fn reconcile_member(&self, op: ChangeOp, payload: &Value) -> RemoteOutcome {
        let Some(id) = payload_id(payload) else {
            return RemoteOutcome::Ignored;
        };
        if op == ChangeOp::Delete {
            self.deleted_members.insert(id);
            return removed_or_unchanged(self.members.remove(&id).is_some());
        }
        if self.deleted_members.contains(&id) {
            return RemoteOutcome::Unchanged;
        }
        let current = self.members.get(&id).map(|m| m.item.clone());
        let next = match (&current, op) {
            (Some(_), ChangeOp::Insert) => return RemoteOutcome::Unchanged,
            (Some(current), _) => merge_fields(current, payload),
            (None, _) => decode::<Member>(payload),
        };
        match next {
            None => RemoteOutcome::Ignored,
            Some(next) if current.as_ref() == Some(&next) => RemoteOutcome::Unchanged,
            Some(next) => {
                self.members.insert(id, Stamped::new(next, self.stamp()));
                if current.is_some() {
                    RemoteOutcome::Merged
                } else {
                    RemoteOutcome::Inserted
                }
            }
        }
    }

    fn reconcile_booking(&self, op: ChangeOp, payload: &Value) -> RemoteOutcome {
        let Some(id) = payload_id(payload) else {
            return RemoteOutcome::Ignored;
        };
        match op {
            ChangeOp::Insert => {
                if self.bookings.contains_key(&id) || self.cancelled.contains(&id) {
                    return RemoteOutcome::Unchanged;
                }
                match decode::<Booking>(payload) {
                    Some(b) if b.is_confirmed() => inserted_or_unchanged(self.track_settled(b)),
                    Some(_) => {
                        self.cancelled.insert(id);
                        RemoteOutcome::Unchanged
                    }
                    None => RemoteOutcome::Ignored,
                }
            }
            ChangeOp::Update => {
                if payload.get("status").and_then(Value::as_str) == Some("cancelled") {
                    self.cancelled.insert(id);
                    return removed_or_unchanged(self.bookings.remove(&id).is_some());
                }
                if self.cancelled.contains(&id) {
                    return RemoteOutcome::Unchanged;
                }
                let current = self.bookings.get(&id).map(|t| t.value().clone());
                match current {
                    Some(tracked) => match merge_fields(&tracked.booking, payload) {
                        Some(merged) if merged == tracked.booking => RemoteOutcome::Unchanged,
                        Some(merged) => {
                            self.bookings.insert(
                                id,
                                TrackedBooking {
                                    booking: merged,
                                    phase: tracked.phase,
                                    generation: self.stamp(),
                                },
                            );
                            RemoteOutcome::Merged
                        }
                        None => RemoteOutcome::Ignored,
                    },
                    None => match decode::<Booking>(payload) {
                        Some(b) if b.is_confirmed() => inserted_or_unchanged(self.track_settled(b)),
                        Some(_) => RemoteOutcome::Unchanged,
                        None => RemoteOutcome::Ignored,
                    },
                }
            }
            ChangeOp::Delete => removed_or_unchanged(self.bookings.remove(&id).is_some()),
        }
    }

    fn reconcile_setting(&self, op: ChangeOp, payload: &Value) -> RemoteOutcome {
        let Some(key) = payload.get("key").and_then(Value::as_str).map(str::to_string) else {
            return RemoteOutcome::Ignored;
        };
        if op == ChangeOp::Delete {
            return removed_or_unchanged(self.settings.remove(&key).is_some());
        }
        let current = self.settings.get(&key).map(|s| s.item.clone());
        let next = match (&current, op) {
            (Some(_), ChangeOp::Insert) => return RemoteOutcome::Unchanged,
            (Some(current), _) => merge_fields(current, payload),
            (None, _) => decode::<Setting>(payload),
        };
        match next {
            None => RemoteOutcome::Ignored,
            Some(next) if current.as_ref() == Some(&next) => RemoteOutcome::Unchanged,
            Some(next) => {
                self.settings.insert(key, Stamped::new(next, self.stamp()));
                if current.is_some() {
                    RemoteOutcome::Merged
                } else {
                    RemoteOutcome::Inserted
                }
            }
        }
    }
}

fn inserted_or_unchanged(inserted: bool) -> RemoteOutcome {
    if inserted {
        RemoteOutcome::Inserted
    } else {
        RemoteOutcome::Unchanged
    }
}

fn removed_or_unchanged(removed: bool) -> RemoteOutcome {
    if removed {
        RemoteOutcome::Removed
    } else {
        RemoteOutcome::Unchanged
    }
}

fn payload_id(payload: &Value) -> Option<Ulid> {
    payload.get("id")?.as_str()?.parse().ok()
}

fn decode<T: DeserializeOwned>(payload: &Value) -> Option<T> {
    serde_json::from_value(payload.clone()).ok()
}

/// Overlay the fields present in `patch` onto `current` (last write wins per field).
fn merge_fields<T>(current: &T, patch: &Value) -> Option<T>
where
    T: Serialize + DeserializeOwned,
{
    let mut base = serde_json::to_value(current).ok()?;
    let (Value::Object(fields), Value::Object(patch)) = (&mut base, patch) else {
        return None;
    };
    for (k, v) in patch {
        fields.insert(k.clone(), v.clone());
    }
    serde_json::from_value(base).ok()
}

/// Rewrite payload keys to the canonical snake_case names so a patch never
/// carries two spellings of one field.
fn normalize_payload(kind: EntityKind, payload: &Value) -> Value {
    let Value::Object(fields) = payload else {
        return payload.clone();
    };
    let mut out = Map::with_capacity(fields.len());
    for (k, v) in fields {
        out.insert(canonical_field(kind, &snake_case(k)).to_string(), v.clone());
    }
    Value::Object(out)
}

fn canonical_field(kind: EntityKind, field: &str) -> &str {
    match (kind, field) {
        (EntityKind::Bookings, "user_id") => "member_id",
        (EntityKind::Bookings, "user_name") => "member_name",
        (EntityKind::Bookings, "user_email") => "member_email",
        (EntityKind::Bookings, "slot") => "time_slot",
        (EntityKind::Members, "join_date") => "created_at",
        _ => field,
    }
}

fn snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            if !out.is_empty() {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
