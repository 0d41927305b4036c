//! SQLite backend for the papertrend stores.
//!
//! One database file holds the raw feed, the canonical store, and the trend
//! cache as independent table groups. Wraps [`tokio_rusqlite`] so all
//! database access runs on a dedicated thread without blocking the async
//! runtime.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
