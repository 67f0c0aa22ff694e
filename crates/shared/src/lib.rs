//! Motorlot Shared Types and Utilities
//!
//! This crate contains types, errors, configuration, and the record-store
//! interface shared across the Motorlot platform.

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::*;
pub use error::*;
pub use store::{collections, decode, timestamp_value, Filter, FilterOp, MemoryStore, Order, RecordStore};
pub use types::*;
