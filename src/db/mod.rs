// Re-export all public items from the db modules
pub use changelog::{ChangeLog, ChangeRecord};
pub use self::core::Db;
pub use transaction::DbTransaction;
pub use types::*;
pub use rusqlite_migration::*;

pub mod changelog;
pub mod core;
pub mod transaction;
pub mod types;
