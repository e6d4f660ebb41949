//! Ferry metadata ledger
//!
//! The ledger is the single source of truth for which remote files have been
//! admitted and which have been transferred. The pipeline talks to it only
//! through the [`Ledger`] trait; [`FileRecordRepository`] is the PostgreSQL
//! implementation.

pub mod error;
pub mod file_record;
pub mod ledger;
pub mod pool;
pub mod schema;

#[cfg(any(test, feature = "test-helpers"))]
pub mod memory;

pub use error::{LedgerError, LedgerResult};
pub use file_record::{FileRecordRepository, FileRecordRow};
pub use ledger::Ledger;
pub use pool::connect;

#[cfg(any(test, feature = "test-helpers"))]
pub use memory::MemoryLedger;
