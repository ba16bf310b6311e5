pub mod db;
pub mod history;

pub use db::Db;
pub use history::VersionHistory;
pub use rusqlite;
pub use rusqlite_migration;
pub use serde_rusqlite;
