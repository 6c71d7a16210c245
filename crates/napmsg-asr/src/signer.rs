//! TC3-HMAC-SHA256 request signing
//!
//! Builds the canonical request, the string-to-sign and the derived key chain
//! used by Tencent Cloud APIs, and emits the headers that authenticate one
//! POST to the sentence recognition endpoint.

use std::collections::BTreeMap;

use chrono::DateTime;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::Credentials;

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "TC3-HMAC-SHA256";
pub const HOST: &str = "asr.tencentcloudapi.com";
pub const SERVICE: &str = "asr";
pub const ACTION: &str = "SentenceRecognition";
pub const VERSION: &str = "2019-06-14";
pub const CONTENT_TYPE: &str = "application/json; charset=utf-8";

const SIGNED_HEADERS: &str = "content-type;host";
const REQUEST_CLIENT: &str = "nap-msg";
const TERMINATOR: &str = "tc3_request";

/// A signed request body together with the headers that authenticate it.
///
/// The body is owned so the bytes that were hashed are exactly the bytes
/// that get sent.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

impl SignedRequest {
    /// Sign `body` for the given second-resolution `timestamp`.
    pub fn new(
        body: Vec<u8>,
        timestamp: i64,
        credentials: &Credentials,
        region: Option<&str>,
    ) -> Self {
        let headers = sign(&body, timestamp, credentials, region);
        Self { headers, body }
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_parts(self) -> (BTreeMap<String, String>, Vec<u8>) {
        (self.headers, self.body)
    }
}

/// Compute the authentication headers for `body`.
///
/// Pure function of its inputs: identical arguments always produce
/// identical headers.
pub fn sign(
    body: &[u8],
    timestamp: i64,
    credentials: &Credentials,
    region: Option<&str>,
) -> BTreeMap<String, String> {
    let date = utc_date(timestamp);
    let payload_hash = sha256_hex(body);

    let canonical_request = canonical_request(&payload_hash);
    let credential_scope = format!("{date}/{SERVICE}/{TERMINATOR}");
    let string_to_sign = [
        ALGORITHM,
        &timestamp.to_string(),
        &credential_scope,
        &sha256_hex(canonical_request.as_bytes()),
    ]
    .join("\n");

    let secret_date = hmac_sha256(
        format!("TC3{}", credentials.secret_key()).as_bytes(),
        date.as_bytes(),
    );
    let secret_service = hmac_sha256(&secret_date, SERVICE.as_bytes());
    let secret_signing = hmac_sha256(&secret_service, TERMINATOR.as_bytes());
    let signature = bytes_to_hex(&hmac_sha256(&secret_signing, string_to_sign.as_bytes()));

    let authorization = format!(
        "{ALGORITHM} Credential={}/{credential_scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
        credentials.secret_id()
    );

    let mut headers = BTreeMap::new();
    headers.insert("Authorization".to_string(), authorization);
    headers.insert("Content-Type".to_string(), CONTENT_TYPE.to_string());
    headers.insert("Host".to_string(), HOST.to_string());
    headers.insert("X-TC-Action".to_string(), ACTION.to_string());
    headers.insert("X-TC-Version".to_string(), VERSION.to_string());
    headers.insert("X-TC-Timestamp".to_string(), timestamp.to_string());
    headers.insert("X-TC-RequestClient".to_string(), REQUEST_CLIENT.to_string());
    if let Some(region) = region {
        headers.insert("X-TC-Region".to_string(), region.to_string());
    }
    headers
}

/// Canonical request for a POST to `/` with the two signed headers.
fn canonical_request(payload_hash: &str) -> String {
    [
        "POST",
        "/",
        "",
        &format!("content-type:{CONTENT_TYPE}"),
        &format!("host:{HOST}"),
        "",
        SIGNED_HEADERS,
        payload_hash,
    ]
    .join("\n")
}

fn utc_date(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .unwrap_or_default()
        .format("%Y-%m-%d")
        .to_string()
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    bytes_to_hex(&hasher.finalize())
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
