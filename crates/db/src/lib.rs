//! `db` crate: pure persistence layer.
//!
//! Provides typed row structs, the [`Store`] abstraction, an in-memory store,
//! and a Postgres store backed by repository functions for every table in
//! the flowforge schema. No business logic lives here.

pub mod error;
pub mod memory;
pub mod models;
pub mod pg;
pub mod pool;
pub mod repository;
pub mod store;

pub use error::DbError;
pub use memory::MemoryStore;
pub use pg::PgStore;
pub use pool::DbPool;
pub use store::Store;
