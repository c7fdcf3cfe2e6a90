//! Remote content models.

use serde::Deserialize;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Size above which the hosting API stops inlining content (1 MiB). Larger
/// payloads must be fetched from the raw-bytes endpoint by content token.
pub const INLINE_LIMIT: u64 = 1024 * 1024;

pub type BoxAsyncRead = Pin<Box<dyn AsyncRead + Send + 'static>>;

/// A file addressed by path within a repository, at an optional revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentRef {
    pub owner: String,
    pub repository: String,
    pub path: String,
    /// Branch, tag, or commit. `None` means the repository's default branch.
    pub reference: Option<String>,
}
impl ContentRef {
    pub fn new(owner: impl Into<String>, repository: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repository: repository.into(),
            path: path.into(),
            reference: None,
        }
    }

    pub fn at(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}
impl Display for ContentRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}:{}", self.owner, self.repository, self.path)?;
        if let Some(reference) = &self.reference {
            write!(f, "@{reference}")?;
        }
        Ok(())
    }
}

/// A named asset attached to a tagged release.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetRef {
    pub owner: String,
    pub repository: String,
    pub release: String,
    pub asset: String,
}
impl AssetRef {
    pub fn new(
        owner: impl Into<String>,
        repository: impl Into<String>,
        release: impl Into<String>,
        asset: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repository: repository.into(),
            release: release.into(),
            asset: asset.into(),
        }
    }
}
impl Display for AssetRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}@{}:{}", self.owner, self.repository, self.release, self.asset)
    }
}

/// Content as returned by [`fetch`](crate::ContentSource::fetch), whichever
/// request path produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteContent {
    pub bytes: Vec<u8>,
    /// Opaque version handle. Keep it if a conditional update of the same
    /// path may follow: presenting the token last read is what prevents
    /// clobbering someone else's intervening write.
    pub token: String,
}

/// An open, streaming asset download.
pub struct AssetDownload {
    /// Size in bytes as reported by the remote.
    pub size: u64,
    /// Entity tag of the download, if the server sent one.
    pub token: Option<String>,
    pub reader: BoxAsyncRead,
}
impl std::fmt::Debug for AssetDownload {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("AssetDownload")
            .field("size", &self.size)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// How the metadata response carries the content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Encoding {
    /// Inline, base64-encoded and newline-wrapped.
    Base64,
    /// Not inlined ("too large"); fetch separately by token.
    None,
    Other(String),
}
impl From<&str> for Encoding {
    fn from(value: &str) -> Self {
        match value {
            "base64" => Self::Base64,
            "" | "none" => Self::None,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Body of the contents-by-path endpoint.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ContentsResponse {
    pub name: String,
    pub path: String,
    pub sha: String,
    pub size: u64,
    #[serde(default)]
    pub encoding: String,
    #[serde(default)]
    pub content: String,
}
impl ContentsResponse {
    pub(crate) fn encoding(&self) -> Encoding {
        Encoding::from(self.encoding.as_str())
    }

    /// The API signals "too large to inline" either with an explicit encoding
    /// of `none` or by leaving the content empty for a non-empty file.
    pub(crate) fn is_inline(&self) -> bool {
        self.encoding() == Encoding::Base64 && !(self.content.is_empty() && self.size > 0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ReleaseResponse {
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ReleaseAsset {
    pub name: String,
    pub size: u64,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn response(encoding: &str, content: &str, size: u64) -> ContentsResponse {
        ContentsResponse {
            name: "a.pdf".to_string(),
            path: "a.pdf".to_string(),
            sha: "abc".to_string(),
            size,
            encoding: encoding.to_string(),
            content: content.to_string(),
        }
    }

    #[rstest]
    #[case("base64", "aGVsbG8=\n", 5, true)]
    #[case("base64", "", 0, true)]
    #[case("base64", "", 2_000_000, false)]
    #[case("none", "", 2_000_000, false)]
    #[case("", "", 2_000_000, false)]
    fn test_is_inline(#[case] encoding: &str, #[case] content: &str, #[case] size: u64, #[case] expected: bool) {
        assert_eq!(response(encoding, content, size).is_inline(), expected);
    }

    #[test]
    fn test_display() {
        let content = ContentRef::new("me", "books", "catalog.json").at("main");
        assert_eq!(content.to_string(), "me/books:catalog.json@main");
        let asset = AssetRef::new("me", "books", "v1", "dune.epub");
        assert_eq!(asset.to_string(), "me/books@v1:dune.epub");
    }
}
