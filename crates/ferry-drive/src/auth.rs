//! Credential plumbing for the Drive client.

use async_trait::async_trait;
use std::fmt::{Debug, Formatter, Result as FmtResult};

use crate::error::{RemoteError, RemoteResult};

/// Supplies bearer tokens for remote calls. Called once per request so
/// implementations may refresh.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> RemoteResult<String>;
}

/// A fixed token handed in by the operator.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> RemoteResult<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(RemoteError::Credential("access token is empty".to_string()));
        }
        Ok(Self { token })
    }
}

impl Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("StaticTokenProvider").finish()
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> RemoteResult<String> {
        Ok(self.token.clone())
    }
}
