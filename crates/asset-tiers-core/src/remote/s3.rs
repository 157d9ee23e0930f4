//! S3-compatible object store client over HTTP.
//!
//! Path-style requests (`<endpoint>/<bucket>/<key>`) signed with SigV4, which
//! works against Cloudflare R2, MinIO and AWS S3 alike.

use super::signing::{encode_key_path, payload_sha256, SigV4Signer, EMPTY_PAYLOAD_SHA256};
use super::store::{ObjectData, ObjectStore, ObjectSummary, RemoteHealth};
use crate::config::{RemoteStoreConfig, TierDefaults};
use crate::error::{AssetError, Result};
use crate::models::{content_type_for, public_url_for, Tier};
use crate::telemetry;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// Largest page ListObjectsV2 returns.
const LIST_PAGE_LIMIT: usize = 1000;

static CONTENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<Contents>(.*?)</Contents>").expect("contents regex must compile"));
static KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Key>(.*?)</Key>").expect("key regex must compile"));
static SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Size>(\d+)</Size>").expect("size regex must compile"));
static ETAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<ETag>(.*?)</ETag>").expect("etag regex must compile"));
static LAST_MODIFIED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<LastModified>(.*?)</LastModified>").expect("last-modified regex must compile")
});
static IS_TRUNCATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<IsTruncated>(true|false)</IsTruncated>").expect("truncated regex must compile")
});
static NEXT_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<NextContinuationToken>(.*?)</NextContinuationToken>")
        .expect("continuation regex must compile")
});

/// One page of a ListObjectsV2 response.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct ListPage {
    pub objects: Vec<ObjectSummary>,
    pub next_token: Option<String>,
}

/// Parse a ListObjectsV2 XML body.
pub(crate) fn parse_list_response(xml: &str) -> ListPage {
    let capture = |re: &Regex, text: &str| re.captures(text).map(|c| xml_unescape(&c[1]));

    let objects = CONTENTS
        .captures_iter(xml)
        .filter_map(|block| {
            let body = &block[1];
            let key = capture(&KEY, body)?;
            Some(ObjectSummary {
                key,
                size: capture(&SIZE, body)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
                etag: capture(&ETAG, body).map(|e| e.trim_matches('"').to_string()),
                last_modified: capture(&LAST_MODIFIED, body)
                    .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
                    .map(|t| t.with_timezone(&Utc)),
            })
        })
        .collect();

    let truncated = capture(&IS_TRUNCATED, xml).is_some_and(|t| t == "true");
    ListPage {
        objects,
        next_token: if truncated {
            capture(&NEXT_TOKEN, xml)
        } else {
            None
        },
    }
}

/// Decode the predefined XML entities and numeric character references in
/// one pass. Unknown or malformed references are kept verbatim.
fn xml_unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest.find(';').and_then(|end| {
            let c = match &rest[1..end] {
                "amp" => '&',
                "lt" => '<',
                "gt" => '>',
                "quot" => '"',
                "apos" => '\'',
                entity => {
                    let code = match entity.strip_prefix("#x").or(entity.strip_prefix("#X")) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                        None => entity.strip_prefix('#')?.parse().ok()?,
                    };
                    char::from_u32(code)?
                }
            };
            Some((c, end + 1))
        });
        match decoded {
            Some((c, len)) => {
                out.push(c);
                rest = &rest[len..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// S3-compatible remote store.
pub struct S3ObjectStore {
    client: Client,
    config: RemoteStoreConfig,
    endpoint: String,
    signer: SigV4Signer,
    timeout: Duration,
}

impl S3ObjectStore {
    /// Create a client with the default per-request timeout.
    pub fn new(config: RemoteStoreConfig) -> Result<Self> {
        Self::with_timeout(config, TierDefaults::TIER_TIMEOUT)
    }

    /// Create a client with a custom per-request timeout.
    pub fn with_timeout(config: RemoteStoreConfig, timeout: Duration) -> Result<Self> {
        if !config.enabled {
            return Err(AssetError::config("remote tier is disabled"));
        }
        config.ensure_valid()?;

        let endpoint = config.resolved_endpoint();
        Url::parse(&endpoint)
            .map_err(|e| AssetError::config(format!("invalid endpoint {}: {}", endpoint, e)))?;

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(TierDefaults::REMOTE_USER_AGENT)
            .build()
            .map_err(|e| AssetError::config(format!("Failed to create HTTP client: {}", e)))?;

        let signer = SigV4Signer::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            config.region.clone(),
        );

        Ok(Self {
            client,
            config,
            endpoint,
            signer,
            timeout,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket_name
    }

    fn object_url(&self, key: &str) -> Result<Url> {
        let raw = format!(
            "{}/{}/{}",
            self.endpoint,
            self.config.bucket_name,
            encode_key_path(key)
        );
        Url::parse(&raw).map_err(|e| AssetError::Validation {
            field: "key".into(),
            message: format!("cannot build URL for {}: {}", key, e),
        })
    }

    fn bucket_url(&self, query: &[(&str, String)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/{}", self.endpoint, self.config.bucket_name))
            .map_err(|e| AssetError::config(format!("invalid bucket URL: {}", e)))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn signed(&self, method: Method, url: Url, payload_hash: &str) -> RequestBuilder {
        let signed = self
            .signer
            .sign(method.as_str(), &url, &[], payload_hash, Utc::now());
        self.client
            .request(method, url)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header(header::AUTHORIZATION, signed.authorization)
    }

    async fn send(&self, request: RequestBuilder, operation: &str) -> Result<Response> {
        request.send().await.map_err(|e| {
            if e.is_timeout() {
                AssetError::Timeout {
                    tier: Tier::Remote,
                    duration: self.timeout,
                }
            } else {
                AssetError::unavailable(Tier::Remote, format!("{} failed: {}", operation, e))
            }
        })
    }

    /// Map a non-success status to a tier error.
    async fn status_error(response: Response, key: &str, operation: &str) -> AssetError {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return AssetError::NotFound {
                tier: Tier::Remote,
                key: key.to_string(),
            };
        }
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(200).collect();
        AssetError::unavailable(
            Tier::Remote,
            format!("{} {} returned {}: {}", operation, key, status, snippet),
        )
    }

    async fn list_page(
        &self,
        prefix: &str,
        max_keys: usize,
        continuation: Option<&str>,
    ) -> Result<ListPage> {
        let mut query = vec![
            ("list-type", "2".to_string()),
            ("max-keys", max_keys.to_string()),
            ("prefix", prefix.to_string()),
        ];
        if let Some(token) = continuation {
            query.push(("continuation-token", token.to_string()));
        }

        let url = self.bucket_url(&query)?;
        let response = self
            .send(self.signed(Method::GET, url, EMPTY_PAYLOAD_SHA256), "LIST")
            .await?;
        if !response.status().is_success() {
            return Err(Self::status_error(response, prefix, "LIST").await);
        }
        let body = response.text().await?;
        Ok(parse_list_response(&body))
    }

    async fn fetch(&self, key: &str) -> Result<ObjectData> {
        let url = self.object_url(key)?;
        let response = self
            .send(self.signed(Method::GET, url, EMPTY_PAYLOAD_SHA256), "GET")
            .await?;
        if !response.status().is_success() {
            return Err(Self::status_error(response, key, "GET").await);
        }

        let headers = response.headers().clone();
        let header_str = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };

        let content_type =
            header_str(header::CONTENT_TYPE).unwrap_or_else(|| content_type_for(key).to_string());
        let last_modified = header_str(header::LAST_MODIFIED)
            .and_then(|v| DateTime::parse_from_rfc2822(&v).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let etag = header_str(header::ETAG).map(|e| e.trim_matches('"').to_string());

        let bytes = response.bytes().await?;
        Ok(ObjectData {
            size: bytes.len() as u64,
            bytes,
            content_type,
            last_modified,
            etag,
        })
    }

    async fn store(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<String> {
        let url = self.object_url(key)?;
        let hash = payload_sha256(&bytes);
        let request = self
            .signed(Method::PUT, url, &hash)
            .header(header::CONTENT_TYPE, content_type)
            .body(bytes);

        let response = self.send(request, "PUT").await?;
        if !response.status().is_success() {
            return Err(Self::status_error(response, key, "PUT").await);
        }
        Ok(self.public_url(key))
    }
}

fn observe<T>(operation: &'static str, started: Instant, result: &Result<T>) {
    let status = match result {
        Ok(_) => "success",
        Err(e) => e.kind(),
    };
    telemetry::record_tier_request(Tier::Remote, operation, status);
    telemetry::record_tier_latency(Tier::Remote, operation, started.elapsed());
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, key: &str) -> Result<ObjectData> {
        let started = Instant::now();
        let result = self.fetch(key).await;
        observe("get", started, &result);
        if let Ok(object) = &result {
            debug!(key, size = object.size, "Fetched remote object");
        }
        result
    }

    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<String> {
        let started = Instant::now();
        let size = bytes.len();
        let result = self.store(key, bytes, content_type).await;
        observe("put", started, &result);
        if result.is_ok() {
            debug!(key, size, "Stored remote object");
        }
        result
    }

    async fn exists(&self, key: &str) -> bool {
        let started = Instant::now();
        let url = match self.object_url(key) {
            Ok(url) => url,
            Err(_) => return false,
        };
        let result = self
            .send(self.signed(Method::HEAD, url, EMPTY_PAYLOAD_SHA256), "HEAD")
            .await;
        let found = match &result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(key, error = %e, "HEAD failed, reporting absent");
                false
            }
        };
        observe("exists", started, &result.map(|_| ()));
        found
    }

    async fn list(&self, prefix: &str, max_keys: usize) -> Result<Vec<ObjectSummary>> {
        let started = Instant::now();
        let mut objects = Vec::new();
        let mut token: Option<String> = None;

        let result = loop {
            let remaining = max_keys.saturating_sub(objects.len());
            if remaining == 0 {
                break Ok(());
            }
            match self
                .list_page(prefix, remaining.min(LIST_PAGE_LIMIT), token.as_deref())
                .await
            {
                Ok(page) => {
                    objects.extend(page.objects);
                    match page.next_token {
                        Some(next) => token = Some(next),
                        None => break Ok(()),
                    }
                }
                Err(e) => break Err(e),
            }
        };

        observe("list", started, &result);
        result.map(|_| {
            objects.truncate(max_keys);
            objects
        })
    }

    async fn health(&self) -> RemoteHealth {
        let started = Instant::now();
        let result = self.list_page("", 1, None).await;
        observe("health", started, &result);
        match result {
            Ok(_) => RemoteHealth::from_latency(started.elapsed()),
            Err(e) => {
                warn!(error = %e, "Remote health check failed");
                RemoteHealth::failed(started.elapsed(), e.to_string())
            }
        }
    }

    fn public_url(&self, key: &str) -> String {
        public_url_for(&self.config.public_base_url, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RemoteStoreConfig {
        RemoteStoreConfig {
            account_id: "acct".into(),
            access_key_id: "AKID".into(),
            secret_access_key: "secret".into(),
            bucket_name: "media".into(),
            public_base_url: "https://cdn.example.com".into(),
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_disabled_config_rejected() {
        let config = RemoteStoreConfig {
            enabled: false,
            ..config()
        };
        assert!(matches!(
            S3ObjectStore::new(config),
            Err(AssetError::Configuration { .. })
        ));
    }

    #[test]
    fn test_object_url_is_path_style() {
        let store = S3ObjectStore::new(config()).unwrap();
        assert_eq!(
            store.object_url("imgs/hero.png").unwrap().as_str(),
            "https://acct.r2.cloudflarestorage.com/media/imgs/hero.png"
        );
        assert_eq!(
            store.public_url("imgs/hero.png"),
            "https://cdn.example.com/imgs/hero.png"
        );
    }

    #[test]
    fn test_parse_list_response() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>media</Name>
  <Prefix>imgs/</Prefix>
  <KeyCount>2</KeyCount>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>token-2</NextContinuationToken>
  <Contents>
    <Key>imgs/a.png</Key>
    <LastModified>2024-03-01T10:00:00.000Z</LastModified>
    <ETag>&quot;abc123&quot;</ETag>
    <Size>1024</Size>
  </Contents>
  <Contents>
    <Key>imgs/b&amp;c.jpg</Key>
    <Size>2048</Size>
  </Contents>
</ListBucketResult>"#;

        let page = parse_list_response(xml);
        assert_eq!(page.objects.len(), 2);
        assert_eq!(page.objects[0].key, "imgs/a.png");
        assert_eq!(page.objects[0].size, 1024);
        assert_eq!(page.objects[0].etag.as_deref(), Some("abc123"));
        assert!(page.objects[0].last_modified.is_some());
        assert_eq!(page.objects[1].key, "imgs/b&c.jpg");
        assert_eq!(page.next_token.as_deref(), Some("token-2"));
    }

    #[test]
    fn test_xml_unescape_decodes_references_once() {
        assert_eq!(xml_unescape("&#34;abc&#x22;"), "\"abc\"");
        assert_eq!(xml_unescape("imgs/a&amp;lt;b.png"), "imgs/a&lt;b.png");
        assert_eq!(xml_unescape("&lt;&gt;&apos;"), "<>'");
        assert_eq!(xml_unescape("a & b &bogus; &#xZZ;"), "a & b &bogus; &#xZZ;");
    }

    #[test]
    fn test_parse_list_response_with_numeric_references() {
        let xml = "<ListBucketResult><Contents><Key>imgs/caf&#233; &amp; bar.png</Key>\
                   <ETag>&#34;d41d8c&#34;</ETag><Size>7</Size></Contents></ListBucketResult>";
        let page = parse_list_response(xml);
        assert_eq!(page.objects[0].key, "imgs/café & bar.png");
        assert_eq!(page.objects[0].etag.as_deref(), Some("d41d8c"));
    }

    #[test]
    fn test_parse_untruncated_list_has_no_token() {
        let xml = "<ListBucketResult><IsTruncated>false</IsTruncated>\
                   <NextContinuationToken>ignored</NextContinuationToken></ListBucketResult>";
        let page = parse_list_response(xml);
        assert!(page.objects.is_empty());
        assert!(page.next_token.is_none());
    }
}
