use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Calendar day of a booking; never carries a time component.
pub type Day = NaiveDate;

/// Physical training zone with its own slot catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Area {
    Gym,
    Cognitive,
}

impl Area {
    pub const ALL: [Area; 2] = [Area::Gym, Area::Cognitive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Area::Gym => "gym",
            Area::Cognitive => "cognitive",
        }
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription tier. Three-tier deployments use `GymOnly`/`CognitiveOnly`/`Premium`,
/// legacy two-tier deployments use `Plus`/`Basic`.
///
/// Decoding is lenient: an unrecognized tag becomes [`Plan::default`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Plan {
    #[default]
    GymOnly,
    CognitiveOnly,
    Premium,
    Plus,
    Basic,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::GymOnly => "gym_only",
            Plan::CognitiveOnly => "cognitive_only",
            Plan::Premium => "premium",
            Plan::Plus => "plus",
            Plan::Basic => "basic",
        }
    }

    /// Accepts snake_case, camelCase and a few spellings seen in older rows.
    pub fn parse_lenient(tag: &str) -> Plan {
        match tag.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "gym_only" | "gymonly" | "gym" => Plan::GymOnly,
            "cognitive_only" | "cognitiveonly" | "cognitive" => Plan::CognitiveOnly,
            "premium" => Plan::Premium,
            "plus" => Plan::Plus,
            "basic" => Plan::Basic,
            _ => Plan::default(),
        }
    }
}

impl From<String> for Plan {
    fn from(tag: String) -> Self {
        Plan::parse_lenient(&tag)
    }
}

impl From<Plan> for String {
    fn from(plan: Plan) -> Self {
        plan.as_str().to_string()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    #[default]
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub plan: Plan,
    #[serde(default)]
    pub status: MemberStatus,
    #[serde(alias = "createdAt", alias = "join_date", alias = "joinDate")]
    pub created_at: DateTime<Utc>,
}

impl Member {
    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }
}

/// Payload for admin creation and self-registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMember {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub plan: Plan,
}

/// Partial member edit; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub plan: Option<Plan>,
    pub status: Option<MemberStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

/// One member in one (date, area, slot). Name and email are snapshots taken
/// at creation so history does not change when the member is edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    #[serde(alias = "memberId", alias = "user_id", alias = "userId")]
    pub member_id: Ulid,
    #[serde(alias = "memberName", alias = "user_name", alias = "userName")]
    pub member_name: String,
    #[serde(alias = "memberEmail", alias = "user_email", alias = "userEmail")]
    pub member_email: String,
    pub date: Day,
    pub area: Area,
    #[serde(alias = "timeSlot", alias = "slot")]
    pub time_slot: String,
    pub status: BookingStatus,
    #[serde(alias = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }

    pub fn occupies(&self, date: Day, area: Area, slot: &str) -> bool {
        self.is_confirmed() && self.date == date && self.area == area && self.time_slot == slot
    }
}

/// Known setting keys. Any other key is stored as-is.
pub const SETTING_GYM_NAME: &str = "gym_name";
pub const SETTING_SLOGAN: &str = "slogan";
pub const SETTING_LOGO_URL: &str = "logo_url";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
    #[serde(alias = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Derived view, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotAvailability {
    pub slot: String,
    pub capacity: u32,
    pub booked: u32,
    pub available: u32,
}

impl SlotAvailability {
    pub fn new(slot: String, capacity: u32, booked: u32) -> Self {
        Self {
            slot,
            capacity,
            booked,
            available: capacity.saturating_sub(booked),
        }
    }

    pub fn is_full(&self) -> bool {
        self.available == 0
    }
}

/// Dashboard summary of one day across both areas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayOverview {
    pub date: Day,
    pub gym: Vec<SlotAvailability>,
    pub cognitive: Vec<SlotAvailability>,
    pub total_booked: u32,
    pub total_capacity: u32,
}

// ── Rows and change events ───────────────────────────────────────

/// Logical tables shared with the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Members,
    Bookings,
    Settings,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Members, EntityKind::Bookings, EntityKind::Settings];

    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Members => "members",
            EntityKind::Bookings => "bookings",
            EntityKind::Settings => "settings",
        }
    }

    pub fn from_table(table: &str) -> Option<Self> {
        match table {
            "members" => Some(EntityKind::Members),
            "bookings" => Some(EntityKind::Bookings),
            "settings" => Some(EntityKind::Settings),
            _ => None,
        }
    }

    /// Name of the field that keys rows of this table.
    pub fn key_field(&self) -> &'static str {
        match self {
            EntityKind::Members | EntityKind::Bookings => "id",
            EntityKind::Settings => "key",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// A full row of one of the shared tables. This is also the WAL record body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Row {
    Member(Member),
    Booking(Booking),
    Setting(Setting),
}

impl Row {
    pub fn kind(&self) -> EntityKind {
        match self {
            Row::Member(_) => EntityKind::Members,
            Row::Booking(_) => EntityKind::Bookings,
            Row::Setting(_) => EntityKind::Settings,
        }
    }

    /// Stable opaque key: the ULID string for members and bookings, the key for settings.
    pub fn key(&self) -> String {
        match self {
            Row::Member(m) => m.id.to_string(),
            Row::Booking(b) => b.id.to_string(),
            Row::Setting(s) => s.key.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let value = match self {
            Row::Member(m) => serde_json::to_value(m),
            Row::Booking(b) => serde_json::to_value(b),
            Row::Setting(s) => serde_json::to_value(s),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Insert => "insert",
            ChangeOp::Update => "update",
            ChangeOp::Delete => "delete",
        }
    }
}

/// A pushed row change. `table` is kept as a string so events for tables this
/// crate does not know about can be received and ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    #[serde(alias = "eventType")]
    pub op: ChangeOp,
    pub payload: serde_json::Value,
}

impl ChangeEvent {
    pub fn new(kind: EntityKind, op: ChangeOp, payload: serde_json::Value) -> Self {
        Self {
            table: kind.table().to_string(),
            op,
            payload,
        }
    }

    pub fn for_row(op: ChangeOp, row: &Row) -> Self {
        Self::new(row.kind(), op, row.to_json())
    }

    /// Delete events only carry the key field.
    pub fn deleted(kind: EntityKind, key: &str) -> Self {
        let mut payload = serde_json::Map::new();
        payload.insert(kind.key_field().to_string(), serde_json::Value::String(key.to_string()));
        Self::new(kind, ChangeOp::Delete, serde_json::Value::Object(payload))
    }

    pub fn kind(&self) -> Option<EntityKind> {
        EntityKind::from_table(&self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_booking() -> Booking {
        Booking {
            id: Ulid::new(),
            member_id: Ulid::new(),
            member_name: "Ana".into(),
            member_email: "ana@example.com".into(),
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            area: Area::Gym,
            time_slot: "09:00-10:00".into(),
            status: BookingStatus::Confirmed,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn plan_lenient_decoding() {
        assert_eq!(Plan::parse_lenient("premium"), Plan::Premium);
        assert_eq!(Plan::parse_lenient("Gym-Only"), Plan::GymOnly);
        assert_eq!(Plan::parse_lenient("cognitiveOnly"), Plan::CognitiveOnly);
        assert_eq!(Plan::parse_lenient("gold"), Plan::GymOnly);
        assert_eq!(Plan::parse_lenient(""), Plan::default());
    }

    #[test]
    fn member_missing_plan_gets_default() {
        let m: Member = serde_json::from_value(json!({
            "id": Ulid::new().to_string(),
            "name": "Ana",
            "email": "ana@example.com",
            "created_at": "2024-06-01T08:00:00Z",
        }))
        .unwrap();
        assert_eq!(m.plan, Plan::GymOnly);
        assert_eq!(m.status, MemberStatus::Active);
        assert_eq!(m.phone, "");
    }

    #[test]
    fn booking_accepts_legacy_field_names() {
        let member = Ulid::new();
        let b: Booking = serde_json::from_value(json!({
            "id": Ulid::new().to_string(),
            "userId": member.to_string(),
            "userName": "Ana",
            "userEmail": "ana@example.com",
            "date": "2024-06-01",
            "area": "cognitive",
            "timeSlot": "09:00-09:30",
            "status": "confirmed",
            "createdAt": "2024-05-30T10:00:00Z",
        }))
        .unwrap();
        assert_eq!(b.member_id, member);
        assert_eq!(b.area, Area::Cognitive);
        assert_eq!(b.time_slot, "09:00-09:30");
    }

    #[test]
    fn booking_occupies_only_when_confirmed() {
        let mut b = sample_booking();
        let day = b.date;
        assert!(b.occupies(day, Area::Gym, "09:00-10:00"));
        assert!(!b.occupies(day, Area::Cognitive, "09:00-10:00"));
        b.status = BookingStatus::Cancelled;
        assert!(!b.occupies(day, Area::Gym, "09:00-10:00"));
    }

    #[test]
    fn availability_floors_at_zero() {
        let a = SlotAvailability::new("09:00-10:00".into(), 2, 3);
        assert_eq!(a.available, 0);
        assert!(a.is_full());
    }

    #[test]
    fn delete_event_carries_key_only() {
        let ev = ChangeEvent::deleted(EntityKind::Settings, "slogan");
        assert_eq!(ev.table, "settings");
        assert_eq!(ev.payload, json!({ "key": "slogan" }));
        assert_eq!(ev.kind(), Some(EntityKind::Settings));
    }

    #[test]
    fn row_bincode_roundtrip() {
        let row = Row::Booking(sample_booking());
        let bytes = bincode::serialize(&row).unwrap();
        let decoded: Row = bincode::deserialize(&bytes).unwrap();
        assert_eq!(row, decoded);
    }
}
