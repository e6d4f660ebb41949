//! Ferry pipeline
//!
//! - [`discovery`]: lists the watched location, splits off duplicates and
//!   documents, registers the rest in the ledger and moves it aside.
//! - [`transfer`]: claims eligible ledger records and streams each file into
//!   the blob store in bounded chunks, marking it transferred only after the
//!   store acknowledges the write.
//! - [`driver`]: sequences both stages for a finite run, or runs them as
//!   independent polling loops until cancelled.

pub mod backoff;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod transfer;

pub use discovery::{plan_entries, DiscoveryPlan, DiscoveryStage};
pub use driver::{DriverSettings, PipelineDriver};
pub use error::MigrationError;
pub use transfer::{Rechunker, TransferRunState, TransferSettings, TransferStage};
