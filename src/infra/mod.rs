//! Infrastructure: SQLite connection, migration lock, revision files.

pub mod db;
pub mod lock;
pub mod store;

pub use db::{open_db, open_in_memory, Db, DbLocation};
pub use lock::MigrationLock;
pub use store::RevisionStore;
