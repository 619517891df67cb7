//! Credential resolution.
//!
//! - [`env`]: folding standard environment variables into configuration
//! - [`token_cache`]: AWS DSQL auth tokens behind a memory/env/file cache
//! - [`sigv4`]: the default SigV4 presigner used to mint tokens

use std::fmt;

use async_trait::async_trait;

use crate::Result;

pub mod env;
pub mod sigv4;
pub mod token_cache;

pub use env::{merge_aws_env, merge_postgres_env};
pub use sigv4::SigV4DsqlSigner;
pub use token_cache::{
    cache_key, clear_aws_dsql_token, CachedToken, DsqlTokenCache, DEFAULT_TOKEN_TTL_SECS,
};

/// Static AWS credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Everything a signer needs to mint one DSQL auth token.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub hostname: String,
    pub region: String,
    pub credentials: AwsCredentials,
    /// Token lifetime in seconds
    pub expires_in: u64,
    /// Mint a `DbConnectAdmin` token instead of `DbConnect`
    pub admin: bool,
}

/// Produces DSQL auth tokens.
#[async_trait]
pub trait TokenSigner: Send + Sync {
    async fn generate_token(&self, request: &TokenRequest) -> Result<String>;
}
