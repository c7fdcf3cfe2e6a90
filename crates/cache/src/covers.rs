//! Cover thumbnails.
//!
//! Extraction shells out to whatever external tool is installed for the
//! document format. It is strictly best-effort: [`Thumbnailer::attempt`]
//! spawns the work and discards the result, so a missing tool or a broken
//! document never fails the store that triggered it.

use crate::error::{ErrorKind, Result};
use crate::path::{TEMP_SUFFIX, ensure_dir};
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Semaphore;

/// Concurrency ceiling for external tool invocations.
pub const DEFAULT_THUMBNAIL_CONCURRENCY: usize = 8;

/// Which cover was found by [`CacheStore::cover`](crate::CacheStore::cover).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverSource {
    /// Externally supplied; always preferred.
    Catalog,
    /// Extracted from the document itself.
    Extracted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Pdf,
    Ebook,
}
impl Format {
    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "epub" | "mobi" | "azw3" => Some(Self::Ebook),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Tools {
    pdftoppm: Option<PathBuf>,
    ebook_meta: Option<PathBuf>,
}

/// Extracts first-page/cover thumbnails using tools found on `PATH`.
#[derive(Debug)]
pub struct Thumbnailer {
    tools: Tools,
    permits: Arc<Semaphore>,
}
impl Thumbnailer {
    /// Look up the supported tools on `PATH`. Never fails; formats without a
    /// tool are skipped at extraction time.
    pub fn discover(concurrency: usize) -> Self {
        let tools = Tools {
            pdftoppm: which::which("pdftoppm").ok(),
            ebook_meta: which::which("ebook-meta").ok(),
        };
        if tools.pdftoppm.is_none() && tools.ebook_meta.is_none() {
            tracing::info!("No thumbnail tools found in PATH; cover extraction disabled");
        }
        Self::with_tools(tools, concurrency)
    }

    /// A thumbnailer that never finds a tool.
    pub fn disabled() -> Self {
        Self::with_tools(Tools::default(), 1)
    }

    fn with_tools(tools: Tools, concurrency: usize) -> Self {
        Self { tools, permits: Arc::new(Semaphore::new(concurrency.max(1))) }
    }

    /// Whether `path` is a recognised document format with a tool available.
    pub fn supports(&self, path: &Path) -> bool {
        match Format::from_path(path) {
            Some(Format::Pdf) => self.tools.pdftoppm.is_some(),
            Some(Format::Ebook) => self.tools.ebook_meta.is_some(),
            None => false,
        }
    }

    /// Fire-and-forget extraction. Must be called from within a Tokio runtime.
    pub fn attempt(self: &Arc<Self>, source: PathBuf, dest: PathBuf) {
        if !self.supports(&source) {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.extract(&source, &dest).await {
                Ok(()) => tracing::debug!(source = %source.display(), dest = %dest.display(), "Thumbnail extracted"),
                Err(e) => tracing::debug!(source = %source.display(), error = ?e, "Thumbnail extraction failed; ignoring"),
            }
        });
    }

    /// Extract a thumbnail of `source` into `dest` (a `.jpg` path).
    pub async fn extract(&self, source: &Path, dest: &Path) -> Result<()> {
        let format = Format::from_path(source).ok_or_raise(|| ErrorKind::Thumbnail("unsupported format".into()))?;
        let _permit = self
            .permits
            .acquire()
            .await
            .or_raise(|| ErrorKind::Thumbnail("thumbnail pool closed".into()))?;
        let parent = dest.parent().unwrap_or(Path::new("."));
        ensure_dir(parent).await?;
        // The tool writes into a staging directory next to `dest`; only a
        // complete thumbnail is renamed into place.
        let staging = tempfile::Builder::new()
            .prefix(".thumbnail.")
            .suffix(TEMP_SUFFIX)
            .tempdir_in(parent)
            .or_raise(|| ErrorKind::Thumbnail("could not create staging directory".into()))?;
        let staged = staging.path().join("cover.jpg");
        let mut command = match (format, &self.tools) {
            (Format::Pdf, Tools { pdftoppm: Some(tool), .. }) => {
                // pdftoppm appends the extension itself.
                let mut command = Command::new(tool);
                command
                    .args(["-jpeg", "-f", "1", "-l", "1", "-singlefile", "-scale-to", "600"])
                    .arg(source)
                    .arg(staged.with_extension(""));
                command
            },
            (Format::Ebook, Tools { ebook_meta: Some(tool), .. }) => {
                let mut command = Command::new(tool);
                command.arg(source).arg(format!("--get-cover={}", staged.display()));
                command
            },
            _ => exn::bail!(ErrorKind::Thumbnail("no tool available".into())),
        };
        let output = command
            .kill_on_drop(true)
            .output()
            .await
            .or_raise(|| ErrorKind::Thumbnail("could not run tool".into()))?;
        if !output.status.success() {
            exn::bail!(ErrorKind::Thumbnail(format!("tool exited with {}", output.status)));
        }
        tokio::fs::rename(&staged, dest)
            .await
            .or_raise(|| ErrorKind::Thumbnail("tool produced no thumbnail".into()))?;
        Ok(())
    }
}
