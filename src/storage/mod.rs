//! Manager implementations for the supported backends
//!
//! The in-memory manager is always available. The relational and
//! wide-column managers sit behind the `postgres` and `scylladb` features;
//! their statement renderers (`sql`, `cql`) are plain functions and are
//! compiled unconditionally.

pub mod cql;
pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "scylladb")]
pub mod scylladb;
pub mod sql;

pub use in_memory::{MemoryManager, MemoryRelation};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresManager, PostgresRelation};
#[cfg(feature = "scylladb")]
pub use scylladb::{ScyllaManager, ScyllaRelation};
