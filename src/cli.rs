use clap::{Args, Parser, Subcommand};
use shelf_cache::CacheKey;
use shelf_library::Item;
use shelf_remote::ContentRef;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Parser)]
#[command(name = "shelf", version, about, long_about = None, propagate_version = true)]
pub struct Cli {
    /// Configuration file (defaults to the platform config directory).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Log at debug level (unless RUST_LOG says otherwise).
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Show whether assets are absent, clean or modified.
    #[command(alias = "st")]
    Status(Assets),
    /// Download assets that are not cached yet.
    #[command(alias = "dl")]
    Download {
        #[command(flatten)]
        assets: Assets,
        /// Transfer every asset again, replacing local changes.
        #[arg(long)]
        force: bool,
    },
    /// Remove assets from the local cache.
    #[command(alias = "rm")]
    Uncache(Assets),
    /// Print a repository file to stdout.
    Fetch {
        #[command(flatten)]
        repository: Repository,
        /// Path of the file within the repository.
        path: String,
        /// Branch, tag or commit.
        #[arg(long = "ref")]
        reference: Option<String>,
    },
    /// Print the cover image path of an asset.
    Cover {
        #[command(flatten)]
        assets: Assets,
        /// Fetch the catalog cover from this repository path first.
        #[arg(long)]
        from: Option<String>,
    },
}

#[derive(Clone, Debug, Args)]
pub struct Repository {
    #[arg(long, env = "SHELF_OWNER")]
    pub owner: String,
    #[arg(long = "repo", env = "SHELF_REPOSITORY")]
    pub repository: String,
}

impl Repository {
    pub fn content(&self, path: &str, reference: Option<&str>) -> ContentRef {
        let content = ContentRef::new(&self.owner, &self.repository, path);
        match reference {
            Some(reference) => content.at(reference),
            None => content,
        }
    }
}

#[derive(Clone, Debug, Args)]
pub struct Assets {
    #[command(flatten)]
    pub repository: Repository,
    /// Release tag the assets are attached to.
    #[arg(long)]
    pub release: String,
    /// Asset filenames.
    #[arg(required = true)]
    pub assets: Vec<String>,
}

impl Assets {
    /// Items are identified by the asset's file stem.
    pub fn items(&self) -> Vec<Item> {
        self.assets
            .iter()
            .map(|asset| {
                let id = Path::new(asset).file_stem().and_then(|stem| stem.to_str()).unwrap_or(asset);
                let key = CacheKey::new(&self.repository.owner, &self.repository.repository, id, asset);
                Item::new(key, &self.release)
            })
            .collect()
    }
}
