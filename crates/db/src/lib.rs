//! `db` crate — pure persistence layer.
//!
//! Defines the [`Repository`] contract the engine talks to, the typed record
//! structs it moves around, and two backends: an in-memory store used by
//! tests and the CLI, and a Postgres store.  No business logic lives here.

pub mod error;
pub mod memory;
pub mod models;
pub mod pool;
pub mod postgres;
pub mod repository;

pub use error::DbError;
pub use memory::MemoryRepository;
pub use pool::DbPool;
pub use postgres::PgRepository;
pub use repository::Repository;
