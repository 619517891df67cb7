//! Three-tier cache for AWS DSQL auth tokens.
//!
//! Lookup order is memory, process environment (`DSQL_TOKEN_<key>`), then a
//! JSON file under `<temp>/.dsql_/`. A hit in a slower tier is promoted to the
//! faster ones. Tokens are only returned while `expires_at > now`.
//!
//! The memory tier belongs to one cache instance (one per client); the
//! environment tier is shared by the process and the file tier by every
//! process of the same user. Live caches are tracked so that
//! [`clear_aws_dsql_token`] reaches their private tiers too.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use chrono::Utc;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::{AwsCredentials, SigV4DsqlSigner, TokenRequest, TokenSigner};
use crate::config::AwsDsqlConfig;
use crate::environment::{EnvSource, ProcessEnv};
use crate::{PgKitError, Result};

/// Token lifetime when none is configured (7 days).
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 604_800;

/// Cached tokens expire this long before the signer's expiry.
const EXPIRY_SKEW_SECS: u64 = 30;

const ENV_PREFIX: &str = "DSQL_TOKEN_";
const CACHE_DIR_NAME: &str = ".dsql_";

/// Private tiers of every live cache.
static LIVE_CACHES: Lazy<Mutex<Vec<Weak<LocalTiers>>>> = Lazy::new(|| Mutex::new(Vec::new()));

fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join(CACHE_DIR_NAME)
}

/// A token with its expiry in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedToken {
    pub token: String,
    pub expires_at: i64,
}

impl CachedToken {
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        self.expires_at > now_ms
    }
}

/// Cache key: md5 hex of `{secret}-{accessKeyId}-{region}-{hostname}`.
pub fn cache_key(config: &AwsDsqlConfig) -> String {
    let material = format!(
        "{}-{}-{}-{}",
        config.secret_access_key.as_deref().unwrap_or(""),
        config.access_key_id.as_deref().unwrap_or(""),
        config.region.as_deref().unwrap_or(""),
        config.hostname.as_deref().unwrap_or(""),
    );
    format!("{:x}", md5::compute(material.as_bytes()))
}

/// Memory tier plus the file-tier directory of one cache.
#[derive(Debug)]
struct LocalTiers {
    memory: Mutex<HashMap<String, CachedToken>>,
    dir: PathBuf,
}

impl LocalTiers {
    fn register(dir: PathBuf) -> Arc<Self> {
        let tiers = Arc::new(Self {
            memory: Mutex::new(HashMap::new()),
            dir,
        });
        let mut live = LIVE_CACHES.lock();
        live.retain(|weak| weak.strong_count() > 0);
        live.push(Arc::downgrade(&tiers));
        tiers
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

pub struct DsqlTokenCache {
    local: Arc<LocalTiers>,
    signer: Arc<dyn TokenSigner>,
    env: Arc<dyn EnvSource>,
    env_tier: bool,
}

impl std::fmt::Debug for DsqlTokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DsqlTokenCache")
            .field("dir", &self.local.dir)
            .field("memory_entries", &self.local.memory.lock().len())
            .field("env_tier", &self.env_tier)
            .finish()
    }
}

impl Default for DsqlTokenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DsqlTokenCache {
    /// Cache using the system temp directory and the SigV4 signer.
    pub fn new() -> Self {
        Self {
            local: LocalTiers::register(default_cache_dir()),
            signer: Arc::new(SigV4DsqlSigner),
            env: Arc::new(ProcessEnv),
            env_tier: true,
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn TokenSigner>) -> Self {
        self.signer = signer;
        self
    }

    /// Store token files under `dir` instead of `<temp>/.dsql_`.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local = LocalTiers::register(dir.into());
        self
    }

    /// Source for default credentials (`use_default_credentials`).
    pub fn with_env_source(mut self, env: Arc<dyn EnvSource>) -> Self {
        self.env = env;
        self
    }

    /// Enable or disable the process-environment tier.
    pub fn with_env_tier(mut self, enabled: bool) -> Self {
        self.env_tier = enabled;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.local.dir
    }

    /// Return a valid token for `config`, minting one on a miss.
    ///
    /// # Errors
    ///
    /// Configuration errors when hostname/region or credentials are missing;
    /// signer errors are passed through. File-tier I/O failures are ignored.
    pub async fn get_token(&self, config: &AwsDsqlConfig) -> Result<String> {
        Ok(self.get_cached_token(config).await?.token)
    }

    /// Like [`get_token`](Self::get_token) but also returns the expiry.
    #[instrument(skip(self, config), fields(hostname = ?config.hostname))]
    pub async fn get_cached_token(&self, config: &AwsDsqlConfig) -> Result<CachedToken> {
        let hostname = config.hostname.clone().ok_or_else(|| {
            PgKitError::Configuration("AWS DSQL hostname is required".to_string())
        })?;
        let region = config.region.clone().ok_or_else(|| {
            PgKitError::Configuration("AWS DSQL region is required".to_string())
        })?;

        let key = cache_key(config);
        let now = Utc::now().timestamp_millis();

        if let Some(cached) = self.lookup(&key, now).await {
            return Ok(cached);
        }

        let credentials = self.resolve_credentials(config)?;
        let ttl = config.token_expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        let request = TokenRequest {
            hostname,
            region,
            credentials,
            expires_in: ttl,
            admin: config.user_or_default() == "admin",
        };

        let token = self.signer.generate_token(&request).await?;
        let lifetime_ms = ttl.saturating_sub(EXPIRY_SKEW_SECS).saturating_mul(1000);
        let cached = CachedToken {
            token,
            expires_at: now.saturating_add(i64::try_from(lifetime_ms).unwrap_or(i64::MAX)),
        };

        debug!(expires_at = cached.expires_at, "Minted DSQL auth token");
        self.store_memory(&key, &cached);
        self.store_env(&key, &cached);
        self.store_file(&key, &cached).await;

        Ok(cached)
    }

    /// Remove the token for `config` from every tier.
    pub async fn clear_token(&self, config: &AwsDsqlConfig) {
        let key = cache_key(config);
        self.local.memory.lock().remove(&key);
        if self.env_tier {
            std::env::remove_var(env_var_name(&key));
        }
        let _ = tokio::fs::remove_file(self.local.file_path(&key)).await;
    }

    async fn lookup(&self, key: &str, now: i64) -> Option<CachedToken> {
        if let Some(hit) = self.local.memory.lock().get(key).filter(|t| t.is_valid_at(now)) {
            return Some(hit.clone());
        }

        if let Some(hit) = self.read_env(key).filter(|t| t.is_valid_at(now)) {
            debug!("DSQL token found in environment tier");
            self.store_memory(key, &hit);
            return Some(hit);
        }

        if let Some(hit) = self.read_file(key).await.filter(|t| t.is_valid_at(now)) {
            debug!("DSQL token found in file tier");
            self.store_memory(key, &hit);
            self.store_env(key, &hit);
            return Some(hit);
        }

        None
    }

    fn resolve_credentials(&self, config: &AwsDsqlConfig) -> Result<AwsCredentials> {
        if let (Some(access_key_id), Some(secret_access_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            return Ok(AwsCredentials {
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
                session_token: config.session_token.clone(),
            });
        }

        if config.use_default_credentials {
            let access_key_id = self.env.var("AWS_ACCESS_KEY_ID");
            let secret_access_key = self.env.var("AWS_SECRET_ACCESS_KEY");
            if let (Some(access_key_id), Some(secret_access_key)) = (access_key_id, secret_access_key) {
                return Ok(AwsCredentials {
                    access_key_id,
                    secret_access_key,
                    session_token: self.env.var("AWS_SESSION_TOKEN"),
                });
            }
            return Err(PgKitError::Configuration(
                "Default AWS credentials requested but AWS_ACCESS_KEY_ID / \
                 AWS_SECRET_ACCESS_KEY are not set"
                    .to_string(),
            ));
        }

        Err(PgKitError::Configuration(
            "AWS credentials are required: set access_key_id and secret_access_key, \
             or enable use_default_credentials"
                .to_string(),
        ))
    }

    // ========================================================================
    // Tiers
    // ========================================================================

    fn store_memory(&self, key: &str, token: &CachedToken) {
        self.local.memory.lock().insert(key.to_string(), token.clone());
    }

    fn read_env(&self, key: &str) -> Option<CachedToken> {
        if !self.env_tier {
            return None;
        }
        let raw = std::env::var(env_var_name(key)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    fn store_env(&self, key: &str, token: &CachedToken) {
        if !self.env_tier {
            return;
        }
        match serde_json::to_string(token) {
            Ok(json) => std::env::set_var(env_var_name(key), json),
            Err(e) => warn!(error = %e, "Failed to serialize DSQL token for environment tier"),
        }
    }

    async fn read_file(&self, key: &str) -> Option<CachedToken> {
        let bytes = tokio::fs::read(self.local.file_path(key)).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    async fn store_file(&self, key: &str, token: &CachedToken) {
        let Ok(json) = serde_json::to_vec(token) else {
            return;
        };
        if let Err(e) = tokio::fs::create_dir_all(&self.local.dir).await {
            debug!(error = %e, "Token cache directory unavailable");
            return;
        }
        if let Err(e) = tokio::fs::write(self.local.file_path(key), json).await {
            debug!(error = %e, "Failed to write token cache file");
        }
    }
}

/// Remove the cached token for `config` from every tier of every live cache.
///
/// The next `get_token` on any client mints a fresh token.
pub async fn clear_aws_dsql_token(config: &AwsDsqlConfig) {
    let key = cache_key(config);
    std::env::remove_var(env_var_name(&key));

    let live: Vec<Arc<LocalTiers>> = {
        let mut caches = LIVE_CACHES.lock();
        caches.retain(|weak| weak.strong_count() > 0);
        caches.iter().filter_map(Weak::upgrade).collect()
    };

    let mut dirs = BTreeSet::from([default_cache_dir()]);
    for tiers in &live {
        tiers.memory.lock().remove(&key);
        dirs.insert(tiers.dir.clone());
    }
    for dir in dirs {
        let _ = tokio::fs::remove_file(dir.join(format!("{}.json", key))).await;
    }
    debug!(caches = live.len(), "Cleared DSQL token");
}

fn env_var_name(key: &str) -> String {
    format!("{}{}", ENV_PREFIX, key)
}
