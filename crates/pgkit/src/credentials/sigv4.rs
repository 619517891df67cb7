//! AWS Signature Version 4 query presigning for DSQL auth tokens.
//!
//! A DSQL token is a presigned `DbConnect` (or `DbConnectAdmin`) request
//! against the cluster endpoint with the `https://` scheme removed.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use super::{AwsCredentials, TokenRequest, TokenSigner};
use crate::{PgKitError, Result};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "dsql";
/// Longest lifetime SigV4 allows for a presigned request.
pub const MAX_EXPIRES_SECS: u64 = 604_800;

/// Default signer: SigV4 presigning with locally held credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct SigV4DsqlSigner;

#[async_trait]
impl TokenSigner for SigV4DsqlSigner {
    async fn generate_token(&self, request: &TokenRequest) -> Result<String> {
        let action = if request.admin {
            "DbConnectAdmin"
        } else {
            "DbConnect"
        };
        presign_dsql_url(
            &request.hostname,
            &request.region,
            &request.credentials,
            action,
            request.expires_in,
            Utc::now(),
        )
    }
}

/// Build a presigned DSQL connect URL (without scheme) signed at `now`.
pub fn presign_dsql_url(
    hostname: &str,
    region: &str,
    credentials: &AwsCredentials,
    action: &str,
    expires_in: u64,
    now: DateTime<Utc>,
) -> Result<String> {
    if expires_in == 0 || expires_in > MAX_EXPIRES_SECS {
        return Err(PgKitError::Configuration(format!(
            "Token lifetime must be between 1 and {} seconds, got {}",
            MAX_EXPIRES_SECS, expires_in
        )));
    }

    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();
    let scope = format!("{}/{}/{}/aws4_request", date_stamp, region, SERVICE);

    let mut params: BTreeMap<&str, String> = BTreeMap::new();
    params.insert("Action", action.to_string());
    params.insert("X-Amz-Algorithm", ALGORITHM.to_string());
    params.insert(
        "X-Amz-Credential",
        format!("{}/{}", credentials.access_key_id, scope),
    );
    params.insert("X-Amz-Date", amz_date.clone());
    params.insert("X-Amz-Expires", expires_in.to_string());
    if let Some(token) = &credentials.session_token {
        params.insert("X-Amz-Security-Token", token.clone());
    }
    params.insert("X-Amz-SignedHeaders", "host".to_string());

    let canonical_query = params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let canonical_request = format!(
        "GET\n/\n{}\nhost:{}\n\nhost\n{}",
        canonical_query,
        hostname,
        hex_sha256(b"")
    );

    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = signing_key(&credentials.secret_access_key, &date_stamp, region)?;
    let signature = to_hex(&hmac(&signing_key, string_to_sign.as_bytes())?);

    Ok(format!(
        "{}/?{}&X-Amz-Signature={}",
        hostname, canonical_query, signature
    ))
}

fn signing_key(secret: &str, date_stamp: &str, region: &str) -> Result<Vec<u8>> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, SERVICE.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| PgKitError::Internal(format!("HMAC key rejected: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    to_hex(&hasher.finalize())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
