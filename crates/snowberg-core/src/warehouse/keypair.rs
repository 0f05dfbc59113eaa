//! Key-pair JWTs for the Snowflake SQL API
//!
//! The token is an RS256 JWT whose issuer is
//! `ACCOUNT.USER.SHA256:<fingerprint>`, the fingerprint being the base64
//! SHA-256 of the registered public key's DER encoding. Snowflake rejects
//! tokens living longer than an hour.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use sha2::{Digest, Sha256};
use snowberg_config::SnowflakeConnection;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::WarehouseError;

pub const TOKEN_LIFETIME: Duration = Duration::from_secs(59 * 60);

#[derive(Debug, Serialize)]
struct Claims {
    iss: String,
    sub: String,
    iat: u64,
    exp: u64,
}

/// Mint a JWT for `connection`, which must carry `user` and
/// `private_key_file` plus either `public_key_file` or `public_key_fp`
pub fn mint_for(connection: &SnowflakeConnection) -> Result<String, WarehouseError> {
    let key_file = connection
        .private_key_file
        .as_deref()
        .ok_or_else(|| auth("no private_key_file configured".into()))?;
    let user = connection
        .user
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| auth("key-pair authentication needs `user` on the connection".into()))?;

    let fingerprint = match (&connection.public_key_fp, &connection.public_key_file) {
        (Some(fp), _) => fp.trim().to_string(),
        (None, Some(path)) => public_key_fingerprint(&read(path)?)?,
        (None, None) => {
            return Err(auth(
                "key-pair authentication needs `public_key_file` or `public_key_fp` \
                 (the RSA_PUBLIC_KEY_FP shown by DESC USER)"
                    .into(),
            ))
        }
    };

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| auth(format!("system clock before epoch: {}", e)))?;
    let private_pem = read(key_file)?;
    mint(&connection.account, user, &fingerprint, private_pem.as_bytes(), now)
}

/// `SHA256:<base64>` of the DER inside a `PUBLIC KEY` PEM block
pub fn public_key_fingerprint(pem: &str) -> Result<String, WarehouseError> {
    let body: String = pem
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("-----"))
        .collect();
    let der = STANDARD
        .decode(body)
        .map_err(|e| auth(format!("public key is not valid PEM: {}", e)))?;
    Ok(format!("SHA256:{}", STANDARD.encode(Sha256::digest(&der))))
}

/// `account` as it appears in the issuer: upper-cased, region suffix dropped
pub fn account_identifier(account: &str) -> String {
    let account = account.trim();
    let locator = account.split_once('.').map_or(account, |(head, _)| head);
    locator.to_uppercase()
}

fn mint(
    account: &str,
    user: &str,
    fingerprint: &str,
    private_pem: &[u8],
    now: Duration,
) -> Result<String, WarehouseError> {
    let subject = format!("{}.{}", account_identifier(account), user.trim().to_uppercase());
    let claims = Claims {
        iss: format!("{}.{}", subject, fingerprint),
        sub: subject,
        iat: now.as_secs(),
        exp: (now + TOKEN_LIFETIME).as_secs(),
    };
    let key = EncodingKey::from_rsa_pem(private_pem)
        .map_err(|e| auth(format!("private key is not an unencrypted RSA PEM: {}", e)))?;
    encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| auth(format!("failed to sign key-pair JWT: {}", e)))
}

fn read(path: &Path) -> Result<String, WarehouseError> {
    fs::read_to_string(path).map_err(|e| auth(format!("cannot read {}: {}", path.display(), e)))
}

fn auth(message: String) -> WarehouseError {
    WarehouseError::Authentication(message)
}
