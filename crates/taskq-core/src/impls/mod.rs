//! Implementations of ports (stores).

pub mod memory_store;
mod schema;
pub mod sqlite_store;

pub use self::memory_store::InMemoryTaskStore;
pub use self::sqlite_store::SqliteTaskStore;
