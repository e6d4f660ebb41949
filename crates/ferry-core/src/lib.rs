//! Ferry Core Library
//!
//! This crate provides the domain models, error classification and configuration
//! shared by every ferry component: the ledger, the blob store, the remote
//! directory client and the pipeline worker.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::{
    DatabaseConfig, DriveConfig, MigrationConfig, PipelineConfig, StorageConfig,
};
pub use error::{ErrorClass, LogLevel};
pub use models::{
    Area, Classifier, DedupKey, DiscoveryReport, FileCategory, FileRecord, LedgerStats,
    NewFileRecord, PassReport, RemoteEntry, TransferReport,
};
pub use storage_types::StorageBackend;
