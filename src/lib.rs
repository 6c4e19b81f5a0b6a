//! Patient vitals semaphore: classifies the latest bracelet readings as
//! critical, stable or warning and aggregates them into dashboard counts,
//! a daily trend and an at-risk list per access scope.

pub mod aggregate;
pub mod board;
pub mod classify;
pub mod config;
pub mod db;
pub mod memory;
pub mod models;
pub mod report;
pub mod store;

pub use aggregate::{aggregate, load_aggregate, AggregateOptions};
pub use classify::classify;
pub use models::{AccessScope, Aggregate, Role, StatusTag, VitalsSample};
pub use store::{ReadingStore, StoreError};
