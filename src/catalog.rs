use std::collections::HashMap;

use crate::model::Area;

/// Seats per slot when nothing is configured.
pub const DEFAULT_CAPACITY: u32 = 12;

pub const DEFAULT_GYM_SLOTS: &[&str] = &[
    "06:00-07:00",
    "07:00-08:00",
    "08:00-09:00",
    "09:00-10:00",
    "10:00-11:00",
    "11:00-12:00",
    "12:00-13:00",
    "13:00-14:00",
    "14:00-15:00",
    "15:00-16:00",
    "16:00-17:00",
    "17:00-18:00",
    "18:00-19:00",
    "19:00-20:00",
    "20:00-21:00",
];

pub const DEFAULT_COGNITIVE_SLOTS: &[&str] = &[
    "09:00-09:30",
    "10:00-10:30",
    "11:00-11:30",
    "12:00-12:30",
    "13:00-13:30",
    "14:00-14:30",
    "15:00-15:30",
    "16:00-16:30",
    "17:00-17:30",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("no slots defined for area {0}")]
    Empty(Area),
    #[error("capacity for area {0} must be positive")]
    ZeroCapacity(Area),
    #[error("duplicate slot {slot:?} in area {area}")]
    Duplicate { area: Area, slot: String },
}

#[derive(Debug, Clone)]
struct AreaSlots {
    labels: Vec<String>,
    capacity: u32,
}

/// Fixed, per-deployment list of bookable windows per area. Every slot in an
/// area shares the area's capacity.
#[derive(Debug, Clone)]
pub struct SlotCatalog {
    areas: HashMap<Area, AreaSlots>,
}

impl Default for SlotCatalog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl SlotCatalog {
    /// Default slot lists with the same capacity in both areas.
    pub fn with_capacity(capacity: u32) -> Self {
        let mut areas = HashMap::new();
        areas.insert(
            Area::Gym,
            AreaSlots {
                labels: DEFAULT_GYM_SLOTS.iter().map(|s| s.to_string()).collect(),
                capacity: capacity.max(1),
            },
        );
        areas.insert(
            Area::Cognitive,
            AreaSlots {
                labels: DEFAULT_COGNITIVE_SLOTS.iter().map(|s| s.to_string()).collect(),
                capacity: capacity.max(1),
            },
        );
        Self { areas }
    }

    pub fn builder() -> SlotCatalogBuilder {
        SlotCatalogBuilder::default()
    }

    /// Ordered slot labels for `area`. Never empty.
    pub fn slots_for(&self, area: Area) -> &[String] {
        &self.entry(area).labels
    }

    pub fn capacity_for(&self, area: Area) -> u32 {
        self.entry(area).capacity
    }

    pub fn contains(&self, area: Area, slot: &str) -> bool {
        self.entry(area).labels.iter().any(|s| s == slot)
    }

    pub fn total_capacity(&self, area: Area) -> u32 {
        let e = self.entry(area);
        e.capacity * e.labels.len() as u32
    }

    fn entry(&self, area: Area) -> &AreaSlots {
        // Construction guarantees every Area has an entry.
        &self.areas[&area]
    }
}

#[derive(Debug, Default)]
pub struct SlotCatalogBuilder {
    areas: HashMap<Area, (Vec<String>, u32)>,
}

impl SlotCatalogBuilder {
    pub fn area<I, S>(mut self, area: Area, slots: I, capacity: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.areas
            .insert(area, (slots.into_iter().map(Into::into).collect(), capacity));
        self
    }

    /// Areas left unset fall back to the default slot list with [`DEFAULT_CAPACITY`].
    pub fn build(self) -> Result<SlotCatalog, CatalogError> {
        let mut catalog = SlotCatalog::default();
        for (area, (labels, capacity)) in self.areas {
            if labels.is_empty() {
                return Err(CatalogError::Empty(area));
            }
            if capacity == 0 {
                return Err(CatalogError::ZeroCapacity(area));
            }
            for (i, slot) in labels.iter().enumerate() {
                if labels[..i].contains(slot) {
                    return Err(CatalogError::Duplicate {
                        area,
                        slot: slot.clone(),
                    });
                }
            }
            catalog.areas.insert(area, AreaSlots { labels, capacity });
        }
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_covers_every_area() {
        let c = SlotCatalog::default();
        for area in Area::ALL {
            assert!(!c.slots_for(area).is_empty());
            assert_eq!(c.capacity_for(area), DEFAULT_CAPACITY);
        }
        assert_eq!(c.slots_for(Area::Gym)[0], "06:00-07:00");
        assert!(c.contains(Area::Cognitive, "09:00-09:30"));
        assert!(!c.contains(Area::Gym, "09:00-09:30"));
    }

    #[test]
    fn builder_overrides_single_area() {
        let c = SlotCatalog::builder()
            .area(Area::Gym, ["09:00-10:00", "10:00-11:00"], 2)
            .build()
            .unwrap();
        assert_eq!(c.slots_for(Area::Gym), ["09:00-10:00", "10:00-11:00"]);
        assert_eq!(c.capacity_for(Area::Gym), 2);
        assert_eq!(c.total_capacity(Area::Gym), 4);
        // untouched area keeps defaults
        assert_eq!(c.capacity_for(Area::Cognitive), DEFAULT_CAPACITY);
    }

    #[test]
    fn builder_rejects_bad_definitions() {
        let empty: [&str; 0] = [];
        assert_eq!(
            SlotCatalog::builder().area(Area::Gym, empty, 2).build().unwrap_err(),
            CatalogError::Empty(Area::Gym)
        );
        assert_eq!(
            SlotCatalog::builder().area(Area::Cognitive, ["a"], 0).build().unwrap_err(),
            CatalogError::ZeroCapacity(Area::Cognitive)
        );
        assert!(matches!(
            SlotCatalog::builder().area(Area::Gym, ["a", "a"], 1).build(),
            Err(CatalogError::Duplicate { .. })
        ));
    }

    #[test]
    fn zero_capacity_default_is_clamped() {
        let c = SlotCatalog::with_capacity(0);
        assert_eq!(c.capacity_for(Area::Gym), 1);
    }
}
