//! 记忆层：目标执行归档与语义召回

pub mod in_memory;
pub mod sqlite;
pub mod store;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use store::{MemoryRecord, MemoryStore};
