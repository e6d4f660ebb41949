pub mod area;
pub mod classification;
pub mod file_record;
pub mod remote_entry;
pub mod report;

pub use area::Area;
pub use classification::{extension_of, Classifier, FileCategory};
pub use file_record::{FileRecord, LedgerStats, NewFileRecord};
pub use remote_entry::{DedupKey, RemoteEntry};
pub use report::{DiscoveryReport, PassReport, TransferReport};
