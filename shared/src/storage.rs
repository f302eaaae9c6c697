//! S3-compatible object store client.
//!
//! Talks to the store over the S3 REST API with AWS Signature V4
//! authentication (`hmac` + `sha2`), so it works against MinIO and other
//! S3-compatible endpoints as well as AWS itself. Listing uses
//! `ListObjectsV2` with continuation-token pagination; existence checks are
//! HEAD requests; upload/download URLs are presigned with query-string
//! signatures.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Seam between the services and the object store. The storing service uses
/// the presigned URLs and existence checks; the analysis service uses key
/// listing and object fetches.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// All object keys currently present in the bucket.
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Raw bytes of one object. Missing keys surface as `NotFound`.
    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;

    /// Whether the object exists. A missing key is `Ok(false)`; any other
    /// failure propagates.
    async fn object_exists(&self, key: &str) -> Result<bool>;

    /// Presigned PUT URL the client uploads through, valid for `expires`.
    fn presigned_put_url(&self, key: &str, expires: Duration) -> Result<String>;

    /// Presigned GET URL for downloading the object, valid for `expires`.
    fn presigned_get_url(&self, key: &str, expires: Duration) -> Result<String>;
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: reqwest::Client,
    scheme: String,
    host: String,
    bucket: String,
    region: String,
    access_key: String,
    secret_key: String,
}

impl S3ObjectStore {
    pub fn new(
        endpoint: &str,
        access_key: String,
        secret_key: String,
        bucket: String,
        region: String,
    ) -> Self {
        let (scheme, host) = split_endpoint(endpoint);
        Self {
            client: reqwest::Client::new(),
            scheme,
            host,
            bucket,
            region,
            access_key,
            secret_key,
        }
    }

    /// Builds a signed GET/HEAD request for `canonical_uri` (path-style, so
    /// the bucket is part of the path) and executes it.
    async fn signed_request(
        &self,
        method: &str,
        canonical_uri: &str,
        query: &[(String, String)],
    ) -> Result<reqwest::Response> {
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(b"");

        let mut sorted = query.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical_query: String = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let headers = [
            ("host".to_string(), self.host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        let signed_headers = "host;x-amz-content-sha256;x-amz-date";
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, canonical_uri, canonical_query, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(&self.secret_key, &date_stamp, &self.region);
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.access_key, credential_scope, signed_headers, signature
        );

        let mut url = format!("{}://{}{}", self.scheme, self.host, canonical_uri);
        if !canonical_query.is_empty() {
            url.push('?');
            url.push_str(&canonical_query);
        }

        let request = match method {
            "HEAD" => self.client.head(&url),
            _ => self.client.get(&url),
        };

        request
            .header("Authorization", authorization)
            .header("x-amz-content-sha256", payload_hash)
            .header("x-amz-date", amz_date)
            .send()
            .await
            .map_err(|e| AppError::Unavailable(format!("object store request failed: {e}")))
    }

    fn object_uri(&self, key: &str) -> String {
        let encoded_key = key
            .split('/')
            .map(uri_encode)
            .collect::<Vec<_>>()
            .join("/");
        format!("/{}/{}", self.bucket, encoded_key)
    }

    /// Query-string presigning per SigV4: the signature covers the method,
    /// path and the `X-Amz-*` parameters; the payload stays unsigned.
    fn presign(&self, method: &str, key: &str, expires: Duration) -> Result<String> {
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let canonical_uri = self.object_uri(key);

        let params = [
            ("X-Amz-Algorithm".to_string(), "AWS4-HMAC-SHA256".to_string()),
            (
                "X-Amz-Credential".to_string(),
                format!("{}/{}", self.access_key, credential_scope),
            ),
            ("X-Amz-Date".to_string(), amz_date.clone()),
            ("X-Amz-Expires".to_string(), expires.as_secs().to_string()),
            ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
        ];
        let canonical_query: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let canonical_request = format!(
            "{}\n{}\n{}\nhost:{}\n\nhost\n{}",
            method, canonical_uri, canonical_query, self.host, UNSIGNED_PAYLOAD
        );
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key = derive_signing_key(&self.secret_key, &date_stamp, &self.region);
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        Ok(format!(
            "{}://{}{}?{}&X-Amz-Signature={}",
            self.scheme, self.host, canonical_uri, canonical_query, signature
        ))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if let Some(token) = &continuation_token {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            let uri = format!("/{}", self.bucket);
            let resp = self.signed_request("GET", &uri, &query).await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(classify_status(status, &self.bucket));
            }

            let body = resp
                .text()
                .await
                .map_err(|e| AppError::Unavailable(format!("reading listing failed: {e}")))?;
            keys.extend(extract_contents_keys(&body));

            let truncated = extract_xml_value(&body, "IsTruncated")
                .map(|v| v == "true")
                .unwrap_or(false);
            if truncated {
                continuation_token = extract_xml_value(&body, "NextContinuationToken");
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        debug!(bucket = %self.bucket, key_count = keys.len(), "listed object keys");
        Ok(keys)
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let resp = self
            .signed_request("GET", &self.object_uri(key), &[])
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status, key));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| AppError::Unavailable(format!("reading object {key} failed: {e}")))?;
        Ok(bytes.to_vec())
    }

    async fn object_exists(&self, key: &str) -> Result<bool> {
        let resp = self
            .signed_request("HEAD", &self.object_uri(key), &[])
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(true);
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Err(classify_status(status, key))
    }

    fn presigned_put_url(&self, key: &str, expires: Duration) -> Result<String> {
        self.presign("PUT", key, expires)
    }

    fn presigned_get_url(&self, key: &str, expires: Duration) -> Result<String> {
        self.presign("GET", key, expires)
    }
}

fn split_endpoint(endpoint: &str) -> (String, String) {
    let trimmed = endpoint.trim_end_matches('/');
    if let Some(host) = trimmed.strip_prefix("https://") {
        ("https".to_string(), host.to_string())
    } else if let Some(host) = trimmed.strip_prefix("http://") {
        ("http".to_string(), host.to_string())
    } else {
        ("http".to_string(), trimmed.to_string())
    }
}

fn classify_status(status: StatusCode, subject: &str) -> AppError {
    match status {
        StatusCode::NOT_FOUND => AppError::NotFound(format!("object {subject} not found")),
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
            AppError::Unavailable(format!("object store rejected credentials ({status})"))
        }
        StatusCode::BAD_REQUEST => {
            AppError::InvalidArgument(format!("object store rejected {subject} ({status})"))
        }
        _ => AppError::Unavailable(format!("object store returned {status} for {subject}")),
    }
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// kDate = HMAC("AWS4" + secret, date); kRegion = HMAC(kDate, region);
/// kService = HMAC(kRegion, "s3"); kSigning = HMAC(kService, "aws4_request").
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{secret_key}").as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding as SigV4 requires: everything except unreserved
/// characters is percent-encoded.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{byte:02X}")),
        }
    }
    result
}

/// Minimal `ListObjectsV2` XML extraction: every `<Key>` inside the
/// response body. Keys are XML-unescaped.
fn extract_contents_keys(xml: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<Key>") {
        let after = &rest[start + 5..];
        match after.find("</Key>") {
            Some(end) => {
                keys.push(xml_unescape(&after[..end]));
                rest = &after[end + 6..];
            }
            None => break,
        }
    }
    keys
}

fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml_unescape(&xml[start..end]))
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
