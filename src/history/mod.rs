//! Per-user prediction history
//!
//! [`ResultCache`] answers history reads from memory, [`ResultStore`]
//! implementations hold the durable copy, and [`PersistenceFanout`] writes
//! new results to both without holding up the response.

pub mod cache;
pub mod fanout;
pub mod postgres;
pub mod store;

pub use cache::{ResultCache, ResultCacheStats};
pub use fanout::PersistenceFanout;
pub use postgres::{PgResultStore, PgSettings};
pub use store::{InMemoryResultStore, ResultStore};
