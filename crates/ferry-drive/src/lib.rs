//! Ferry remote directory
//!
//! The pipeline consumes the remote side through [`RemoteDirectory`]: list a
//! location, relocate an entry into an [`Area`](ferry_core::Area), and open a
//! streamed read of an entry's bytes. [`GoogleDriveClient`] implements it over
//! the Drive v3 REST API.

pub mod auth;
pub mod directory;
pub mod error;
pub mod google;
#[cfg(any(test, feature = "test-helpers"))]
pub mod memory;

pub use auth::{StaticTokenProvider, TokenProvider};
pub use directory::{Relocation, RemoteDirectory, RemoteStream};
pub use error::{RemoteError, RemoteResult};
pub use google::GoogleDriveClient;
#[cfg(any(test, feature = "test-helpers"))]
pub use memory::MemoryDirectory;
