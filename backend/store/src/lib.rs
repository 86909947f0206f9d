//! SQLite adapters for the engine's external collaborators.

pub mod db;
pub mod leads;
pub mod sheet;
pub mod write_queue;

pub use db::Database;
pub use leads::SqliteLeadStore;
pub use sheet::SqliteSheet;
pub use write_queue::SqliteWriteQueue;

use leadflow_core::LeadflowError;

pub(crate) fn store_err(e: impl std::fmt::Display) -> LeadflowError {
    LeadflowError::Store(e.to_string())
}
