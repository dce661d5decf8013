pub mod catalog;
pub mod config;
pub mod durable;
pub mod engine;
pub mod gateway;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod notify;
pub mod observability;
pub mod policy;
pub mod sync;
pub mod wal;
