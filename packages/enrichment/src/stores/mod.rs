//! Record store implementations.
//!
//! Available backends:
//! - `MemoryRecordStore` - In-memory storage (always available)
//! - `SqliteRecordStore` - SQLite file-based storage (requires `sqlite` feature)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryRecordStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRecordStore;
