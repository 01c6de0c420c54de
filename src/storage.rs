//! S3-compatible object storage client for paper images.
//!
//! Uploads use a single `PUT` per object signed with
//! [AWS Signature Version 4](https://docs.aws.amazon.com/AmazonS3/latest/API/sigv4-auth-using-authorization-header.html),
//! built from `hmac` + `sha2` so no C crypto library is linked.
//!
//! # Addressing
//!
//! | `endpoint_url` | URL form |
//! |----------------|----------|
//! | unset | `https://<bucket>.s3.<region>.amazonaws.com/<key>` |
//! | set (MinIO, R2, LocalStack) | `<endpoint>/<bucket>/<key>` (path style) |
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`: required
//! - `AWS_SESSION_TOKEN`: optional
//!
//! # Retry
//!
//! A failed upload is retried up to `max_attempts` times in total with a
//! fixed `retry_delay_secs` pause between attempts.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::StorageConfig;

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

pub struct ObjectStore {
    config: StorageConfig,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl ObjectStore {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        Self::with_credentials(config, AwsCredentials::from_env()?)
    }

    pub fn with_credentials(config: &StorageConfig, creds: AwsCredentials) -> Result<Self> {
        if config.bucket.is_empty() {
            bail!("storage.bucket must be set");
        }
        Ok(Self {
            config: config.clone(),
            creds,
            client: reqwest::Client::new(),
        })
    }

    /// Scheme, host, and the path prefix objects live under.
    fn location(&self) -> (String, String, String) {
        match &self.config.endpoint_url {
            Some(endpoint) => {
                let (scheme, rest) = match endpoint.split_once("://") {
                    Some((scheme, rest)) => (scheme.to_string(), rest),
                    None => ("https".to_string(), endpoint.as_str()),
                };
                let host = rest.trim_end_matches('/').to_string();
                (scheme, host, format!("/{}", uri_encode(&self.config.bucket)))
            }
            None => (
                "https".to_string(),
                format!(
                    "{}.s3.{}.amazonaws.com",
                    self.config.bucket, self.config.region
                ),
                String::new(),
            ),
        }
    }

    fn canonical_uri(&self, key: &str) -> String {
        let (_, _, base) = self.location();
        format!("{}/{}", base, encode_key(key))
    }

    /// Direct storage URL for an object.
    pub fn storage_url(&self, key: &str) -> String {
        let (scheme, host, _) = self.location();
        format!("{}://{}{}", scheme, host, self.canonical_uri(key))
    }

    /// Public URL for an object: `public_base_url/<key>` when configured.
    pub fn object_url(&self, key: &str) -> String {
        match &self.config.public_base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), encode_key(key)),
            None => self.storage_url(key),
        }
    }

    /// Upload with the configured fixed-delay retry.
    pub async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let attempts = self.config.max_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(Duration::from_secs(self.config.retry_delay_secs)).await;
            }
            match self.put_once(key, &body, content_type).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(key, attempt, attempts, "upload attempt failed: {:#}", e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| anyhow::anyhow!("upload failed"))
            .context(format!("giving up on {} after {} attempt(s)", key, attempts)))
    }

    async fn put_once(&self, key: &str, body: &[u8], content_type: &str) -> Result<()> {
        let (_, host, _) = self.location();
        let canonical_uri = self.canonical_uri(key);
        let url = self.storage_url(key);
        let payload_hash = hex_sha256(body);

        let signed = sign_request(
            &SigningInput {
                method: "PUT",
                host: &host,
                canonical_uri: &canonical_uri,
                payload_hash: &payload_hash,
                content_type: Some(content_type),
                region: &self.config.region,
            },
            &self.creds,
            Utc::now(),
        );

        let mut req = self
            .client
            .put(&url)
            .header("Authorization", &signed.authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &signed.amz_date)
            .header("Content-Type", content_type)
            .body(body.to_vec());

        if let Some(ref token) = self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("PUT {} failed: {}", url, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!(
                "S3 PutObject failed (HTTP {}): {}",
                status,
                text.chars().take(300).collect::<String>()
            );
        }
        Ok(())
    }
}

// ============ AWS SigV4 ============

struct SigningInput<'a> {
    method: &'a str,
    host: &'a str,
    canonical_uri: &'a str,
    payload_hash: &'a str,
    content_type: Option<&'a str>,
    region: &'a str,
}

struct SignedHeaders {
    authorization: String,
    amz_date: String,
}

fn sign_request(input: &SigningInput, creds: &AwsCredentials, now: DateTime<Utc>) -> SignedHeaders {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    let mut headers = vec![
        ("host".to_string(), input.host.to_string()),
        (
            "x-amz-content-sha256".to_string(),
            input.payload_hash.to_string(),
        ),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(ct) = input.content_type {
        headers.push(("content-type".to_string(), ct.to_string()));
    }
    if let Some(ref token) = creds.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        input.method, input.canonical_uri, canonical_headers, signed_headers, input.payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, input.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date_stamp, input.region, "s3");
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    SignedHeaders {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            creds.access_key_id, credential_scope, signed_headers, signature
        ),
        amz_date,
    }
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding of everything except `A-Z a-z 0-9 - _ . ~`.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

/// Encode each path segment of an object key, keeping `/` separators.
fn encode_key(key: &str) -> String {
    key.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}

/// MIME type for an image file name.
pub fn detect_content_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}
