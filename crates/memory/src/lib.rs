//! Tool-call log backends for toolchat.
//!
//! - [`NoopToolCallLog`] records nothing (logging disabled)
//! - [`InMemoryToolCallLog`] keeps calls in a Vec (tests, ephemeral sessions)
//! - `SqliteToolCallLog` persists to a SQLite file (feature `sqlite`, default)

pub mod in_memory;
pub mod noop;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryToolCallLog;
pub use noop::NoopToolCallLog;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteToolCallLog;
