//! Booking admission rules.
//!
//! Pure functions over the caller's current booking snapshot. Plan behavior is
//! a lookup into [`PlanRules`], so adding a tier means adding a table row.

use std::fmt;

use crate::model::*;

/// What a plan allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanRules {
    pub areas: &'static [Area],
    /// Member may hold confirmed bookings in only one area on a given day.
    pub one_area_per_day: bool,
}

const BOTH: &[Area] = &[Area::Gym, Area::Cognitive];

impl PlanRules {
    pub fn for_plan(plan: Plan) -> PlanRules {
        match plan {
            Plan::GymOnly => PlanRules { areas: &[Area::Gym], one_area_per_day: true },
            Plan::CognitiveOnly => PlanRules { areas: &[Area::Cognitive], one_area_per_day: true },
            Plan::Premium => PlanRules { areas: BOTH, one_area_per_day: false },
            Plan::Plus => PlanRules { areas: BOTH, one_area_per_day: false },
            Plan::Basic => PlanRules { areas: BOTH, one_area_per_day: true },
        }
    }

    pub fn permits(&self, area: Area) -> bool {
        self.areas.contains(&area)
    }
}

/// Reason a booking request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    MemberInactive,
    AreaNotPermitted,
    OneAreaPerDay,
    AlreadyBooked,
    SlotFull,
}

impl Denial {
    pub fn reason(&self) -> &'static str {
        match self {
            Denial::MemberInactive => "member is not active",
            Denial::AreaNotPermitted => "plan does not permit this area",
            Denial::OneAreaPerDay => "plan permits only one area per day",
            Denial::AlreadyBooked => "already booked this slot",
            Denial::SlotFull => "slot full",
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Denial::MemberInactive => "member_inactive",
            Denial::AreaNotPermitted => "area_not_permitted",
            Denial::OneAreaPerDay => "one_area_per_day",
            Denial::AlreadyBooked => "already_booked",
            Denial::SlotFull => "slot_full",
        }
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Decide whether `member` may take a seat in (date, area, slot).
///
/// Checks run in a fixed order and the first failure wins: member status,
/// plan area, one area per day, duplicate slot, capacity. Only confirmed
/// bookings in `current` are considered.
pub fn can_book<'a, I>(
    member: &Member,
    date: Day,
    area: Area,
    slot: &str,
    capacity: u32,
    current: I,
) -> Result<(), Denial>
where
    I: IntoIterator<Item = &'a Booking>,
{
    if !member.is_active() {
        return Err(Denial::MemberInactive);
    }
    let rules = PlanRules::for_plan(member.plan);
    if !rules.permits(area) {
        return Err(Denial::AreaNotPermitted);
    }

    let mut other_area_same_day = false;
    let mut duplicate = false;
    let mut booked: u32 = 0;

    for b in current.into_iter().filter(|b| b.is_confirmed() && b.date == date) {
        if b.member_id == member.id {
            if b.area != area {
                other_area_same_day = true;
            } else if b.time_slot == slot {
                duplicate = true;
            }
        }
        if b.area == area && b.time_slot == slot {
            booked += 1;
        }
    }

    if rules.one_area_per_day && other_area_same_day {
        return Err(Denial::OneAreaPerDay);
    }
    if duplicate {
        return Err(Denial::AlreadyBooked);
    }
    if booked >= capacity {
        return Err(Denial::SlotFull);
    }
    Ok(())
}
