//! Process configuration, read from `GYMBOOK_*` environment variables.
//!
//! A `.env` file in the working directory is honored outside of tests.

use std::path::PathBuf;

use crate::catalog::{CatalogError, SlotCatalog, DEFAULT_CAPACITY};
use crate::model::Area;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },
    #[error("invalid slot catalog: {0}")]
    Catalog(#[from] CatalogError),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub gym_capacity: u32,
    pub cognitive_capacity: u32,
    /// Comma-separated slot labels; `None` keeps the built-in list.
    pub gym_slots: Option<Vec<String>>,
    pub cognitive_slots: Option<Vec<String>>,
    /// Check slot capacity inside the durable gateway at commit time.
    pub enforce_capacity: bool,
    /// Compact the WAL once this many appends accumulate.
    pub compact_threshold: u64,
    pub compact_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            gym_capacity: DEFAULT_CAPACITY,
            cognitive_capacity: DEFAULT_CAPACITY,
            gym_slots: None,
            cognitive_slots: None,
            enforce_capacity: true,
            compact_threshold: 1000,
            compact_interval_secs: 60,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; missing variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        Ok(Self {
            data_dir: lookup("GYMBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: parse_opt(&lookup, "GYMBOOK_METRICS_PORT")?,
            gym_capacity: parse_opt(&lookup, "GYMBOOK_GYM_CAPACITY")?.unwrap_or(defaults.gym_capacity),
            cognitive_capacity: parse_opt(&lookup, "GYMBOOK_COGNITIVE_CAPACITY")?
                .unwrap_or(defaults.cognitive_capacity),
            gym_slots: lookup("GYMBOOK_GYM_SLOTS").map(|s| split_list(&s)),
            cognitive_slots: lookup("GYMBOOK_COGNITIVE_SLOTS").map(|s| split_list(&s)),
            enforce_capacity: parse_opt(&lookup, "GYMBOOK_ENFORCE_CAPACITY")?
                .unwrap_or(defaults.enforce_capacity),
            compact_threshold: parse_opt(&lookup, "GYMBOOK_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            compact_interval_secs: parse_opt(&lookup, "GYMBOOK_COMPACT_INTERVAL_SECS")?
                .unwrap_or(defaults.compact_interval_secs),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("gymbook.wal")
    }

    pub fn catalog(&self) -> Result<SlotCatalog, ConfigError> {
        let defaults = SlotCatalog::default();
        let gym = self
            .gym_slots
            .clone()
            .unwrap_or_else(|| defaults.slots_for(Area::Gym).to_vec());
        let cognitive = self
            .cognitive_slots
            .clone()
            .unwrap_or_else(|| defaults.slots_for(Area::Cognitive).to_vec());
        Ok(SlotCatalog::builder()
            .area(Area::Gym, gym, self.gym_capacity)
            .area(Area::Cognitive, cognitive, self.cognitive_capacity)
            .build()?)
    }
}

fn parse_opt<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                var,
                reason: format!("{raw:?}: {e}"),
            }),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.gym_capacity, DEFAULT_CAPACITY);
        assert!(cfg.enforce_capacity);
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/gymbook.wal"));
    }

    #[test]
    fn reads_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("GYMBOOK_DATA_DIR", "/var/lib/gymbook"),
            ("GYMBOOK_GYM_CAPACITY", "20"),
            ("GYMBOOK_GYM_SLOTS", "08:00-09:00, 09:00-10:00"),
            ("GYMBOOK_ENFORCE_CAPACITY", "false"),
            ("GYMBOOK_METRICS_PORT", "9100"),
        ]))
        .unwrap();
        assert_eq!(cfg.metrics_port, Some(9100));
        assert!(!cfg.enforce_capacity);
        let catalog = cfg.catalog().unwrap();
        assert_eq!(catalog.capacity_for(Area::Gym), 20);
        assert_eq!(catalog.slots_for(Area::Gym), ["08:00-09:00", "09:00-10:00"]);
        assert_eq!(catalog.capacity_for(Area::Cognitive), DEFAULT_CAPACITY);
    }

    #[test]
    fn rejects_garbage() {
        let err = Config::from_lookup(lookup(&[("GYMBOOK_GYM_CAPACITY", "many")])).unwrap_err();
        assert!(err.to_string().contains("GYMBOOK_GYM_CAPACITY"));
    }

    #[test]
    fn zero_capacity_is_a_catalog_error() {
        let cfg = Config::from_lookup(lookup(&[("GYMBOOK_COGNITIVE_CAPACITY", "0")])).unwrap();
        assert!(matches!(cfg.catalog(), Err(ConfigError::Catalog(CatalogError::ZeroCapacity(Area::Cognitive)))));
    }
}
