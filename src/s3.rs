//! Amazon S3 backend for [`ObjectStore`].
//!
//! Talks to the S3 REST API directly with AWS Signature V4 authentication:
//! paginated `ListObjectsV2`, `HeadObject`, streamed `GetObject`, `PutObject`,
//! presigned GET URLs, and the bucket bootstrap calls. Custom endpoints for
//! S3-compatible services (MinIO, LocalStack) are addressed path-style.
//!
//! Uses only pure-Rust dependencies (`hmac`, `sha2`) for AWS signing, no
//! C library dependencies like `aws-lc-sys`.
//!
//! # Environment Variables
//!
//! Credentials are read from environment variables:
//! - `AWS_ACCESS_KEY_ID` (required)
//! - `AWS_SECRET_ACCESS_KEY` (required)
//! - `AWS_SESSION_TOKEN` (optional, for temporary credentials / IAM roles)
//!
//! # Authentication
//!
//! Requests are signed with
//! [AWS Signature Version 4](https://docs.aws.amazon.com/AmazonS3/latest/API/sigv4-auth-using-authorization-header.html)
//! in the `Authorization` header. Presigned URLs carry the same signature
//! in the query string with an `UNSIGNED-PAYLOAD` body hash.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use reqwest::{Method, StatusCode};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::BucketConfig;
use crate::object_store::{ListPage, ListedObject, ObjectMeta, ObjectStore, StoreError};

type HmacSha256 = Hmac<Sha256>;

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

// ============ AWS Credentials ============

/// AWS credentials used to sign requests.
#[derive(Clone)]
pub struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    pub fn new(access_key_id: &str, secret_access_key: &str, session_token: Option<&str>) -> Self {
        Self {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            session_token: session_token.map(str::to_string),
        }
    }

    /// Load credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
    /// and optionally `AWS_SESSION_TOKEN`.
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

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

// ============ Client ============

/// Custom endpoint, split into scheme and host.
#[derive(Debug, Clone)]
struct Endpoint {
    scheme: String,
    host: String,
}

impl Endpoint {
    fn parse(url: &str) -> Self {
        let (scheme, rest) = match url.split_once("://") {
            Some((scheme, rest)) => (scheme.to_string(), rest),
            None => ("https".to_string(), url),
        };
        Self {
            scheme,
            host: rest.trim_end_matches('/').to_string(),
        }
    }
}

/// S3 client for one region (or one S3-compatible endpoint).
pub struct S3Store {
    client: reqwest::Client,
    creds: AwsCredentials,
    region: String,
    endpoint: Option<Endpoint>,
}

impl S3Store {
    pub fn new(region: &str, endpoint_url: Option<&str>, creds: AwsCredentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            creds,
            region: region.to_string(),
            endpoint: endpoint_url.map(Endpoint::parse),
        }
    }

    /// Build a store for one configured bucket using environment credentials.
    pub fn from_config(bucket: &BucketConfig) -> Result<Self> {
        let creds = AwsCredentials::from_env()?;
        Ok(Self::new(
            &bucket.region,
            bucket.endpoint_url.as_deref(),
            creds,
        ))
    }

    /// Hostname a request for `bucket` is sent to.
    ///
    /// A custom endpoint (MinIO, LocalStack) is used as-is with path-style
    /// addressing; otherwise `<bucket>.s3.<region>.amazonaws.com`.
    fn host(&self, bucket: &str) -> String {
        match self.endpoint {
            Some(ref endpoint) => endpoint.host.clone(),
            None => format!("{}.s3.{}.amazonaws.com", bucket, self.region),
        }
    }

    fn scheme(&self) -> &str {
        self.endpoint
            .as_ref()
            .map(|e| e.scheme.as_str())
            .unwrap_or("https")
    }

    fn bucket_path(&self, bucket: &str) -> String {
        if self.endpoint.is_some() {
            format!("/{}", uri_encode(bucket))
        } else {
            "/".to_string()
        }
    }

    fn object_path(&self, bucket: &str, key: &str) -> String {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        if self.endpoint.is_some() {
            format!("/{}/{}", uri_encode(bucket), encoded_key)
        } else {
            format!("/{}", encoded_key)
        }
    }

    /// Sign and send one request, returning the raw response.
    #[allow(clippy::too_many_arguments)]
    async fn send(
        &self,
        operation: &'static str,
        method: Method,
        bucket: &str,
        canonical_uri: &str,
        query: &[(String, String)],
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<reqwest::Response, StoreError> {
        let host = self.host(bucket);
        let payload_hash = hex_sha256(&body);
        let signed = sign_request(
            &self.creds,
            &self.region,
            method.as_str(),
            &host,
            canonical_uri,
            query,
            &payload_hash,
            Utc::now(),
        );

        let mut url = format!("{}://{}{}", self.scheme(), host, canonical_uri);
        if !signed.canonical_querystring.is_empty() {
            url.push('?');
            url.push_str(&signed.canonical_querystring);
        }

        let mut req_builder = self
            .client
            .request(method, &url)
            .header("Authorization", &signed.authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &signed.amz_date);

        if let Some(ref token) = self.creds.session_token {
            req_builder = req_builder.header("x-amz-security-token", token);
        }
        if let Some(content_type) = content_type {
            req_builder = req_builder.header("Content-Type", content_type);
        }
        if !body.is_empty() || operation == "PutObject" {
            req_builder = req_builder.body(body);
        }

        debug!(operation, %url, "sending S3 request");
        req_builder
            .send()
            .await
            .map_err(|source| StoreError::Transport { operation, source })
    }

    /// Build a query-string-signed GET URL valid for `expires_in`.
    fn presign_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
        now: DateTime<Utc>,
    ) -> String {
        let host = self.host(bucket);
        let canonical_uri = self.object_path(bucket, key);

        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);

        let mut params = vec![
            (
                "X-Amz-Algorithm".to_string(),
                "AWS4-HMAC-SHA256".to_string(),
            ),
            (
                "X-Amz-Credential".to_string(),
                format!("{}/{}", self.creds.access_key_id, credential_scope),
            ),
            ("X-Amz-Date".to_string(), amz_date.clone()),
            (
                "X-Amz-Expires".to_string(),
                expires_in.as_secs().to_string(),
            ),
            ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
        ];
        if let Some(ref token) = self.creds.session_token {
            params.push(("X-Amz-Security-Token".to_string(), token.clone()));
        }
        let canonical_querystring = canonical_query(&params);

        let canonical_request = format!(
            "GET\n{}\n{}\nhost:{}\n\nhost\n{}",
            canonical_uri, canonical_querystring, host, UNSIGNED_PAYLOAD
        );
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key =
            derive_signing_key(&self.creds.secret_access_key, &date_stamp, &self.region, "s3");
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        format!(
            "{}://{}{}?{}&X-Amz-Signature={}",
            self.scheme(),
            host,
            canonical_uri,
            canonical_querystring,
            signature
        )
    }
}

/// Turn a non-success response into a [`StoreError::Http`].
async fn http_error(operation: &'static str, resp: reqwest::Response) -> StoreError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    StoreError::Http {
        operation,
        status,
        body: body.chars().take(500).collect(),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        max_keys: u32,
        continuation: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let mut query_params = vec![
            ("list-type".to_string(), "2".to_string()),
            ("max-keys".to_string(), max_keys.to_string()),
        ];
        if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
            query_params.push(("prefix".to_string(), prefix.to_string()));
        }
        if let Some(token) = continuation {
            query_params.push(("continuation-token".to_string(), token.to_string()));
        }

        let uri = self.bucket_path(bucket);
        let resp = self
            .send("ListObjectsV2", Method::GET, bucket, &uri, &query_params, Vec::new(), None)
            .await?;
        if !resp.status().is_success() {
            return Err(http_error("ListObjectsV2", resp).await);
        }

        let xml_body = resp
            .text()
            .await
            .map_err(|source| StoreError::Transport {
                operation: "ListObjectsV2",
                source,
            })?;
        parse_list_objects_response(&xml_body)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectMeta>, StoreError> {
        let uri = self.object_path(bucket, key);
        let resp = self
            .send("HeadObject", Method::HEAD, bucket, &uri, &[], Vec::new(), None)
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let headers = resp.headers();
                let size = headers
                    .get(reqwest::header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(0);
                let content_type = headers
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(Some(ObjectMeta { size, content_type }))
            }
            _ => Err(http_error("HeadObject", resp).await),
        }
    }

    async fn download_to_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> Result<(), StoreError> {
        let uri = self.object_path(bucket, key);
        let mut resp = self
            .send("GetObject", Method::GET, bucket, &uri, &[], Vec::new(), None)
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        if !resp.status().is_success() {
            return Err(http_error("GetObject", resp).await);
        }

        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::create(path).await.map_err(io_err)?;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|source| StoreError::Transport {
                operation: "GetObject",
                source,
            })?
        {
            file.write_all(&chunk).await.map_err(io_err)?;
        }
        file.flush().await.map_err(io_err)?;
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StoreError> {
        let uri = self.object_path(bucket, key);
        let resp = self
            .send("PutObject", Method::PUT, bucket, &uri, &[], body, content_type)
            .await?;
        if !resp.status().is_success() {
            return Err(http_error("PutObject", resp).await);
        }
        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StoreError> {
        Ok(self.presign_url(bucket, key, expires_in, Utc::now()))
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        let uri = self.bucket_path(bucket);
        let resp = self
            .send("HeadBucket", Method::HEAD, bucket, &uri, &[], Vec::new(), None)
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(http_error("HeadBucket", resp).await),
        }
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let uri = self.bucket_path(bucket);
        // us-east-1 rejects an explicit LocationConstraint.
        let body = if self.region == "us-east-1" {
            Vec::new()
        } else {
            format!(
                "<CreateBucketConfiguration xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
                 <LocationConstraint>{}</LocationConstraint></CreateBucketConfiguration>",
                self.region
            )
            .into_bytes()
        };
        let resp = self
            .send("CreateBucket", Method::PUT, bucket, &uri, &[], body, None)
            .await?;
        if !resp.status().is_success() {
            return Err(http_error("CreateBucket", resp).await);
        }
        Ok(())
    }
}

// ============ AWS SigV4 Helpers ============

/// Output of [`sign_request`].
struct SignedRequest {
    authorization: String,
    amz_date: String,
    canonical_querystring: String,
}

/// Compute the SigV4 `Authorization` header for a request.
///
/// Signs `host`, `x-amz-content-sha256`, `x-amz-date` and, when present,
/// `x-amz-security-token`.
#[allow(clippy::too_many_arguments)]
fn sign_request(
    creds: &AwsCredentials,
    region: &str,
    method: &str,
    host: &str,
    canonical_uri: &str,
    query: &[(String, String)],
    payload_hash: &str,
    now: DateTime<Utc>,
) -> SignedRequest {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let canonical_querystring = canonical_query(query);

    let mut headers = vec![
        ("host".to_string(), host.to_string()),
        ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
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
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method,
        canonical_uri,
        canonical_querystring,
        canonical_headers,
        signed_headers,
        payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date_stamp, region, "s3");
    let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key_id, credential_scope, signed_headers, signature
    );

    SignedRequest {
        authorization,
        amz_date,
        canonical_querystring,
    }
}

/// Canonical query string: URI-encoded pairs sorted by key.
fn canonical_query(params: &[(String, String)]) -> String {
    let mut sorted_params = params.to_vec();
    sorted_params.sort_by(|a, b| a.0.cmp(&b.0));
    sorted_params
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Compute the hex-encoded SHA-256 hash of data.
fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute HMAC-SHA256 of data with the given key.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Compute hex-encoded HMAC-SHA256.
fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
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

/// URI-encode a string per RFC 3986 (used in SigV4 canonical requests).
///
/// Encodes all characters except unreserved characters:
/// `A-Z a-z 0-9 - _ . ~`
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

// ============ XML Parsing ============

#[derive(Default)]
struct PartialEntry {
    key: Option<String>,
    last_modified: Option<String>,
    size: Option<String>,
}

impl PartialEntry {
    fn finish(self) -> Result<ListedObject, StoreError> {
        let malformed = |detail: String| StoreError::Malformed {
            operation: "ListObjectsV2",
            detail,
        };
        let key = self
            .key
            .ok_or_else(|| malformed("<Contents> without <Key>".to_string()))?;
        let last_modified = self
            .last_modified
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| malformed(format!("bad <LastModified> for '{}'", key)))?;
        let size = self
            .size
            .as_deref()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        Ok(ListedObject {
            key,
            size,
            last_modified,
        })
    }
}

/// Parse a `ListObjectsV2` XML response into a [`ListPage`].
///
/// Keys are taken verbatim (entity-unescaped, whitespace preserved).
fn parse_list_objects_response(xml: &str) -> Result<ListPage, StoreError> {
    let malformed = |detail: String| StoreError::Malformed {
        operation: "ListObjectsV2",
        detail,
    };

    let mut objects = Vec::new();
    let mut is_truncated = false;
    let mut next_token: Option<String> = None;

    let mut reader = quick_xml::Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();
    let mut current_tag: Option<String> = None;
    let mut entry: Option<PartialEntry> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "Contents" {
                    entry = Some(PartialEntry::default());
                }
                current_tag = Some(name);
            }
            Ok(Event::Text(te)) => {
                let text = te
                    .unescape()
                    .map_err(|e| malformed(e.to_string()))?
                    .into_owned();
                match (entry.as_mut(), current_tag.as_deref()) {
                    (Some(entry), Some("Key")) => entry.key = Some(text),
                    (Some(entry), Some("LastModified")) => entry.last_modified = Some(text),
                    (Some(entry), Some("Size")) => entry.size = Some(text),
                    (None, Some("IsTruncated")) => is_truncated = text.trim() == "true",
                    (None, Some("NextContinuationToken")) => next_token = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"Contents" {
                    if let Some(done) = entry.take() {
                        objects.push(done.finish()?);
                    }
                }
                current_tag = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if is_truncated && next_token.is_none() {
        return Err(malformed(
            "truncated listing without NextContinuationToken".to_string(),
        ));
    }

    Ok(ListPage {
        objects,
        next_continuation: if is_truncated { next_token } else { None },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_store(endpoint: Option<&str>) -> S3Store {
        S3Store::new(
            "eu-west-1",
            endpoint,
            AwsCredentials::new("AKIDEXAMPLE", "secret", None),
        )
    }

    #[test]
    fn test_signing_key_matches_aws_example() {
        // Published example from the AWS SigV4 documentation.
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("a b/c~d"), "a%20b%2Fc~d");
        assert_eq!(uri_encode("IMG_0001.JPG"), "IMG_0001.JPG");
    }

    #[test]
    fn test_addressing_styles() {
        let aws = test_store(None);
        assert_eq!(aws.host("photos"), "photos.s3.eu-west-1.amazonaws.com");
        assert_eq!(aws.object_path("photos", "2024/a b.jpg"), "/2024/a%20b.jpg");
        assert_eq!(aws.bucket_path("photos"), "/");

        let minio = test_store(Some("http://localhost:9000/"));
        assert_eq!(minio.host("photos"), "localhost:9000");
        assert_eq!(minio.scheme(), "http");
        assert_eq!(minio.object_path("photos", "2024/a.jpg"), "/photos/2024/a.jpg");
        assert_eq!(minio.bucket_path("photos"), "/photos");
    }

    #[test]
    fn test_presign_url_shape() {
        let store = test_store(None);
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let url = store.presign_url("photos", "2024/img.jpg", Duration::from_secs(300), now);

        assert!(url.starts_with("https://photos.s3.eu-west-1.amazonaws.com/2024/img.jpg?"));
        assert!(url.contains("X-Amz-Expires=300"));
        assert!(url.contains("X-Amz-Date=20250102T030405Z"));
        assert!(url.contains(
            "X-Amz-Credential=AKIDEXAMPLE%2F20250102%2Feu-west-1%2Fs3%2Faws4_request"
        ));
        let signature = url.rsplit("X-Amz-Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn test_sign_request_lists_signed_headers() {
        let creds = AwsCredentials::new("AKIDEXAMPLE", "secret", Some("token"));
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let query = vec![
            ("max-keys".to_string(), "2".to_string()),
            ("list-type".to_string(), "2".to_string()),
        ];
        let signed = sign_request(
            &creds,
            "eu-west-1",
            "GET",
            "photos.s3.eu-west-1.amazonaws.com",
            "/",
            &query,
            &hex_sha256(b""),
            now,
        );
        assert_eq!(signed.canonical_querystring, "list-type=2&max-keys=2");
        assert_eq!(signed.amz_date, "20250102T030405Z");
        assert!(signed.authorization.contains(
            "SignedHeaders=host;x-amz-content-sha256;x-amz-date;x-amz-security-token"
        ));
    }

    #[test]
    fn test_parse_list_response_truncated() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>photos</Name>
  <IsTruncated>true</IsTruncated>
  <Contents>
    <Key>2024/</Key>
    <LastModified>2024-05-01T12:00:00.000Z</LastModified>
    <Size>0</Size>
  </Contents>
  <Contents>
    <Key>2024/Tom &amp; Jerry.jpg</Key>
    <LastModified>2024-05-01T12:00:00.250Z</LastModified>
    <ETag>"abc"</ETag>
    <Size>2048</Size>
    <Owner><ID>x</ID></Owner>
  </Contents>
  <NextContinuationToken>token-1</NextContinuationToken>
</ListBucketResult>"#;

        let page = parse_list_objects_response(xml).unwrap();
        assert_eq!(page.objects.len(), 2);
        assert!(page.objects[0].is_directory_marker());
        assert_eq!(page.objects[1].key, "2024/Tom & Jerry.jpg");
        assert_eq!(page.objects[1].size, 2048);
        assert_eq!(
            page.objects[1].last_modified.timestamp_subsec_millis(),
            250
        );
        assert_eq!(page.next_continuation.as_deref(), Some("token-1"));
    }

    #[test]
    fn test_parse_list_response_last_page() {
        let xml = r#"<ListBucketResult><IsTruncated>false</IsTruncated>
<Contents><Key>a.jpg</Key><LastModified>2024-05-01T12:00:00Z</LastModified><Size>1</Size></Contents>
</ListBucketResult>"#;
        let page = parse_list_objects_response(xml).unwrap();
        assert_eq!(page.objects.len(), 1);
        assert!(page.next_continuation.is_none());
    }

    #[test]
    fn test_parse_truncated_without_token_is_malformed() {
        let xml = "<ListBucketResult><IsTruncated>true</IsTruncated></ListBucketResult>";
        assert!(matches!(
            parse_list_objects_response(xml),
            Err(StoreError::Malformed { .. })
        ));
    }
}
