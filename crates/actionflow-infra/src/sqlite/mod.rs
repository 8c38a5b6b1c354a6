//! SQLite-backed durable stream.

pub mod pool;
pub mod stream;

pub use pool::DatabasePool;
pub use stream::{SqliteConsumer, SqliteStream};
