use std::collections::{BTreeMap, HashMap};

use ulid::Ulid;

use crate::model::*;

use super::{Phase, ReservationStore};

impl ReservationStore {
    pub fn member(&self, id: Ulid) -> Option<Member> {
        self.members.get(&id).map(|m| m.item.clone())
    }

    /// All tracked members, oldest first.
    pub fn members(&self) -> Vec<Member> {
        let mut members: Vec<Member> = self.members.iter().map(|m| m.item.clone()).collect();
        members.sort_by_key(|m| (m.created_at, m.id));
        members
    }

    pub fn active_member_count(&self) -> usize {
        self.members.iter().filter(|m| m.item.is_active()).count()
    }

    /// One record per catalog slot of `area`, in catalog order.
    pub fn available_slots(&self, date: Day, area: Area) -> Vec<SlotAvailability> {
        let day = self.bookings_for_day(date);
        let mut booked: HashMap<&str, u32> = HashMap::new();
        for b in day.iter().filter(|b| b.area == area && b.is_confirmed()) {
            *booked.entry(b.time_slot.as_str()).or_default() += 1;
        }
        let capacity = self.catalog.capacity_for(area);
        self.catalog
            .slots_for(area)
            .iter()
            .map(|slot| {
                SlotAvailability::new(slot.clone(), capacity, booked.get(slot.as_str()).copied().unwrap_or(0))
            })
            .collect()
    }

    /// The member's confirmed bookings, in creation order.
    pub fn member_bookings(&self, member_id: Ulid) -> Vec<Booking> {
        let mut bookings: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|t| t.booking.member_id == member_id)
            .map(|t| t.booking.clone())
            .collect();
        bookings.sort_by_key(|b| (b.created_at, b.id));
        bookings
    }

    /// Confirmed bookings for one day, optionally one area, ordered by slot
    /// position in the catalog and then creation time.
    pub fn bookings_on(&self, date: Day, area: Option<Area>) -> Vec<Booking> {
        let mut bookings: Vec<Booking> = self
            .bookings_for_day(date)
            .into_iter()
            .filter(|b| area.is_none_or(|a| b.area == a))
            .collect();
        bookings.sort_by_key(|b| {
            let position = self
                .catalog
                .slots_for(b.area)
                .iter()
                .position(|s| *s == b.time_slot)
                .unwrap_or(usize::MAX);
            (b.area, position, b.created_at, b.id)
        });
        bookings
    }

    /// Both areas' availability plus totals, for the admin dashboard.
    pub fn day_overview(&self, date: Day) -> DayOverview {
        let gym = self.available_slots(date, Area::Gym);
        let cognitive = self.available_slots(date, Area::Cognitive);
        let total_booked = gym.iter().chain(&cognitive).map(|s| s.booked).sum();
        let total_capacity = gym.iter().chain(&cognitive).map(|s| s.capacity).sum();
        DayOverview {
            date,
            gym,
            cognitive,
            total_booked,
            total_capacity,
        }
    }

    /// True while the booking's durable write is still in flight.
    pub fn is_pending(&self, booking_id: Ulid) -> bool {
        self.bookings
            .get(&booking_id)
            .is_some_and(|t| t.phase == Phase::Pending)
    }

    pub fn is_tracked(&self, booking_id: Ulid) -> bool {
        self.bookings.contains_key(&booking_id)
    }

    pub fn settings(&self) -> BTreeMap<String, String> {
        self.settings
            .iter()
            .map(|s| (s.key().clone(), s.item.value.clone()))
            .collect()
    }

    pub fn setting(&self, key: &str) -> Option<String> {
        self.settings.get(key).map(|s| s.item.value.clone())
    }
}
