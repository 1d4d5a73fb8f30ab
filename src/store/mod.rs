//! Persistence for commands, messages, fragments, users and tokens.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStorage;
pub use memory::MemoryStorage;
pub use traits::Storage;
