//! HTTP content source for a GitHub-compatible hosting API.
//!
//! # Size tiers
//!
//! The contents-by-path endpoint inlines files up to
//! [`INLINE_LIMIT`](crate::INLINE_LIMIT) as base64. Beyond that it returns
//! metadata only, and the bytes have to be fetched from the blob endpoint by
//! content token. [`HttpSource::fetch`] hides the difference.

use crate::ContentSource;
use crate::error::{ErrorKind, Result, Stage};
use crate::models::{AssetDownload, AssetRef, ContentRef, ContentsResponse, ReleaseResponse, RemoteContent};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use exn::{OptionExt, ResultExt};
use futures::TryStreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, ETAG, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, Url};
use tokio_util::io::StreamReader;
use tracing::instrument;

const ACCEPT_JSON: &str = "application/vnd.github+json";
const ACCEPT_RAW: &str = "application/vnd.github.raw+json";
const ACCEPT_BINARY: &str = "application/octet-stream";

/// Content source backed by the hosting provider's REST API.
///
/// # Examples
///
/// ```no_run
/// use shelf_remote::{ContentRef, ContentSource, HttpSource};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let source = HttpSource::new("github", "https://api.github.com", None, "shelf/0.1")?;
/// let content = source.fetch(&ContentRef::new("me", "books", "catalog.json")).await?;
/// println!("{} bytes at {}", content.bytes.len(), content.token);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpSource {
    name: String,
    client: Client,
    api_url: Url,
}

impl HttpSource {
    /// Create a new HTTP content source.
    ///
    /// # Arguments
    /// * `name` - A name for this source (used in logging)
    /// * `api_url` - Base URL of the REST API
    /// * `token` - Optional bearer token; anonymous requests are heavily rate limited
    /// * `user_agent` - Sent with every request (the API rejects requests without one)
    pub fn new(
        name: impl Into<String>,
        api_url: &str,
        token: Option<&str>,
        user_agent: impl Into<String>,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_JSON));
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .or_raise(|| ErrorKind::Config("token contains invalid characters".into()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        let client = Client::builder()
            .user_agent(user_agent.into())
            .default_headers(headers)
            .build()
            .or_raise(|| ErrorKind::Config("could not build HTTP client".into()))?;
        Self::with_client(name, api_url, client)
    }

    /// Create a source around an already configured client.
    pub fn with_client(name: impl Into<String>, api_url: &str, client: Client) -> Result<Self> {
        let api_url = Url::parse(api_url).or_raise(|| ErrorKind::Config(format!("invalid API URL: {api_url}")))?;
        if api_url.cannot_be_a_base() {
            exn::bail!(ErrorKind::Config(format!("API URL cannot be a base: {api_url}")));
        }
        Ok(Self { name: name.into(), client, api_url })
    }

    /// Append percent-encoded path segments to the API base URL.
    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        let mut url = self.api_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .ok()
                .ok_or_raise(|| ErrorKind::Config(format!("API URL cannot be a base: {}", self.api_url)))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder, stage: Stage) -> Result<Response> {
        let response = request.send().await.or_raise(|| ErrorKind::FetchFailed { stage, status: None })?;
        let status = response.status();
        if !status.is_success() {
            exn::bail!(ErrorKind::FetchFailed { stage, status: Some(status.as_u16()) });
        }
        Ok(response)
    }

    /// Second leg of an oversized fetch: raw bytes by content token.
    async fn fetch_raw(&self, content: &ContentRef, sha: &str, size: u64) -> Result<Vec<u8>> {
        let url =
            self.endpoint(["repos", content.owner.as_str(), content.repository.as_str(), "git", "blobs", sha])?;
        let request = self.client.get(url).header(ACCEPT, ACCEPT_RAW);
        let response = self.send(request, Stage::Raw).await?;
        let bytes = response.bytes().await.or_raise(|| ErrorKind::FetchFailed { stage: Stage::Raw, status: None })?;
        if bytes.len() as u64 != size {
            tracing::warn!(content = %content, expected = size, actual = bytes.len(), "Raw content size mismatch");
            exn::bail!(ErrorKind::InvalidResponse(Stage::Raw));
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ContentSource for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(source = %self.name, content = %content))]
    async fn fetch(&self, content: &ContentRef) -> Result<RemoteContent> {
        let segments = ["repos", content.owner.as_str(), content.repository.as_str(), "contents"];
        let url = self.endpoint(segments.into_iter().chain(content.path.split('/').filter(|s| !s.is_empty())))?;
        let mut request = self.client.get(url);
        if let Some(reference) = &content.reference {
            request = request.query(&[("ref", reference)]);
        }
        let response = self.send(request, Stage::Metadata).await?;
        let body: ContentsResponse =
            response.json().await.or_raise(|| ErrorKind::InvalidResponse(Stage::Metadata))?;

        let bytes = if body.is_inline() {
            tracing::debug!(name = %body.name, path = %body.path, size = body.size, "Content inlined");
            decode_inline(&body.content, body.size)?
        } else {
            tracing::debug!(name = %body.name, path = %body.path, size = body.size, "Content not inlined, fetching raw");
            self.fetch_raw(content, &body.sha, body.size).await?
        };
        Ok(RemoteContent { bytes, token: body.sha })
    }

    #[instrument(skip_all, fields(source = %self.name, asset = %asset))]
    async fn open_asset(&self, asset: &AssetRef) -> Result<AssetDownload> {
        let url = self.endpoint([
            "repos",
            asset.owner.as_str(),
            asset.repository.as_str(),
            "releases",
            "tags",
            asset.release.as_str(),
        ])?;
        let response = self.send(self.client.get(url), Stage::Release).await?;
        let release: ReleaseResponse =
            response.json().await.or_raise(|| ErrorKind::InvalidResponse(Stage::Release))?;
        let found = release
            .assets
            .into_iter()
            .find(|candidate| candidate.name == asset.asset)
            .ok_or_raise(|| ErrorKind::AssetNotFound(asset.asset.clone()))?;

        let url = Url::parse(&found.url).or_raise(|| ErrorKind::InvalidResponse(Stage::Release))?;
        let request = self.client.get(url).header(ACCEPT, ACCEPT_BINARY);
        let response = self.send(request, Stage::Asset).await?;
        let token = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim_matches('"').to_string());
        tracing::debug!(size = found.size, token = ?token, "Asset download opened");
        let reader = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
        Ok(AssetDownload { size: found.size, token, reader: Box::pin(reader) })
    }
}

/// Decode base64 content as returned inline by the API: standard alphabet,
/// wrapped with newlines.
fn decode_inline(content: &str, size: u64) -> Result<Vec<u8>> {
    let stripped: String = content.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD.decode(stripped).or_raise(|| ErrorKind::DecodeFailed)?;
    if bytes.len() as u64 != size {
        tracing::warn!(expected = size, actual = bytes.len(), "Decoded content size mismatch");
        exn::bail!(ErrorKind::DecodeFailed);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncReadExt;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer) -> HttpSource {
        HttpSource::new("test", &server.uri(), Some("secret"), "shelf-tests").unwrap()
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// Base64 wrapped at 60 columns, the way the API returns it.
    fn wrapped_base64(bytes: &[u8]) -> String {
        let encoded = STANDARD.encode(bytes);
        let lines: Vec<&str> = encoded.as_bytes().chunks(60).map(|c| std::str::from_utf8(c).unwrap()).collect();
        lines.join("\n") + "\n"
    }

    async fn mount_blob(server: &MockServer, sha: &str, bytes: Vec<u8>, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/repos/me/books/git/blobs/{sha}")))
            .and(header("accept", ACCEPT_RAW))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_small_and_large_fetch_return_identical_shape() {
        let server = MockServer::start().await;
        let small = payload(10 * 1024);
        let large = payload(2 * 1024 * 1024);

        Mock::given(method("GET"))
            .and(path("/repos/me/books/contents/small.bin"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "small.bin",
                "path": "small.bin",
                "sha": "sha-small",
                "size": small.len(),
                "encoding": "base64",
                "content": wrapped_base64(&small),
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/me/books/contents/large.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "large.bin",
                "path": "large.bin",
                "sha": "sha-large",
                "size": large.len(),
                "encoding": "none",
                "content": "",
            })))
            .mount(&server)
            .await;
        mount_blob(&server, "sha-small", Vec::new(), 0).await;
        mount_blob(&server, "sha-large", large.clone(), 1).await;

        let source = source(&server);
        let fetched_small = source.fetch(&ContentRef::new("me", "books", "small.bin")).await.unwrap();
        let fetched_large = source.fetch(&ContentRef::new("me", "books", "large.bin")).await.unwrap();

        assert_eq!(fetched_small, RemoteContent { bytes: small, token: "sha-small".to_string() });
        assert_eq!(fetched_large, RemoteContent { bytes: large, token: "sha-large".to_string() });
    }

    #[tokio::test]
    async fn test_reference_and_nested_path_are_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/me/books/contents/shelves/sci%20fi/dune.json"))
            .and(query_param("ref", "v2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "dune.json",
                "path": "shelves/sci fi/dune.json",
                "sha": "abc",
                "size": 2,
                "encoding": "base64",
                "content": "e30=\n",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let content = ContentRef::new("me", "books", "shelves/sci fi/dune.json").at("v2");
        let fetched = source(&server).fetch(&content).await.unwrap();
        assert_eq!(fetched.bytes, b"{}");
    }

    #[tokio::test]
    async fn test_metadata_failure_is_attributed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/me/books/contents/missing.bin"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = source(&server).fetch(&ContentRef::new("me", "books", "missing.bin")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::FetchFailed { stage: Stage::Metadata, status: Some(404) });
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_raw_failure_is_attributed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/me/books/contents/large.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "large.bin",
                "path": "large.bin",
                "sha": "sha-large",
                "size": 2_000_000,
                "encoding": "none",
                "content": "",
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/me/books/git/blobs/sha-large"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = source(&server).fetch(&ContentRef::new("me", "books", "large.bin")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::FetchFailed { stage: Stage::Raw, status: Some(503) });
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_malformed_inline_content_fails_decoding() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/me/books/contents/broken.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "broken.bin",
                "path": "broken.bin",
                "sha": "abc",
                "size": 5,
                "encoding": "base64",
                "content": "!!not base64!!",
            })))
            .mount(&server)
            .await;

        let err = source(&server).fetch(&ContentRef::new("me", "books", "broken.bin")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::DecodeFailed);
    }

    #[test]
    fn test_decode_inline_rejects_size_mismatch() {
        assert_eq!(decode_inline("aGVsbG8=\n", 5).unwrap(), b"hello");
        assert_eq!(*decode_inline("aGVsbG8=\n", 6).unwrap_err(), ErrorKind::DecodeFailed);
    }

    #[tokio::test]
    async fn test_open_asset_streams_bytes() {
        let server = MockServer::start().await;
        let bytes = payload(64 * 1024);
        Mock::given(method("GET"))
            .and(path("/repos/me/books/releases/tags/v1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "assets": [
                    { "name": "other.pdf", "size": 3, "url": format!("{}/assets/1", server.uri()) },
                    { "name": "dune.epub", "size": bytes.len(), "url": format!("{}/assets/2", server.uri()) },
                ],
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/assets/2"))
            .and(header("accept", ACCEPT_BINARY))
            .respond_with(ResponseTemplate::new(200).insert_header("etag", "\"v1-dune\"").set_body_bytes(bytes.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let mut download = source(&server).open_asset(&AssetRef::new("me", "books", "v1", "dune.epub")).await.unwrap();
        assert_eq!(download.size, bytes.len() as u64);
        assert_eq!(download.token.as_deref(), Some("v1-dune"));
        let mut received = Vec::new();
        download.reader.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, bytes);
    }

    #[tokio::test]
    async fn test_open_asset_missing_from_release() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/me/books/releases/tags/v1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "assets": [] })))
            .mount(&server)
            .await;

        let err = source(&server).open_asset(&AssetRef::new("me", "books", "v1", "dune.epub")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::AssetNotFound("dune.epub".to_string()));
    }

    #[tokio::test]
    async fn test_release_lookup_failure_is_attributed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/me/books/releases/tags/v9"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = source(&server).open_asset(&AssetRef::new("me", "books", "v9", "dune.epub")).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Release));
    }

    #[test]
    fn test_invalid_api_url() {
        let err = HttpSource::new("test", "not a url", None, "shelf-tests").unwrap_err();
        assert!(matches!(&*err, ErrorKind::Config(_)));
    }
}
