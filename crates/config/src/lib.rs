//! Layered configuration for shelf.
//!
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults.
//! 2. A configuration file (`toml`, `yaml`/`yml` or `json`, by extension),
//!    `<config dir>/config.toml` unless a path is given.
//! 3. `GITHUB_TOKEN`, as `remote.token`.
//! 4. `SHELF_`-prefixed environment variables, with `__` separating nested
//!    keys (`SHELF_CACHE__ROOT`, `SHELF_REMOTE__API_URL`).
//!
//! The loaded [`Config`] is passed explicitly to whatever needs it.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_COVER_CONCURRENCY: usize = 8;
const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "SHELF_";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "shelf")
}

/// Default location of the configuration file, if the platform has one.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Absolute path of the cache root.
    pub root: PathBuf,
    /// Catalog covers fetched at once.
    pub cover_concurrency: usize,
    /// Extract thumbnails with external tools after each download.
    pub thumbnails: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub api_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub user_agent: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            // Empty when there is no home directory; validation insists on a root.
            root: project_dirs().map(|dirs| dirs.cache_dir().join("library")).unwrap_or_default(),
            cover_concurrency: DEFAULT_COVER_CONCURRENCY,
            thumbnails: true,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: None,
            user_agent: concat!("shelf/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Config {
    /// Load and validate the configuration.
    ///
    /// An explicit `path` must exist; the default path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let figment = Self::figment(path)?;
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(root = %config.cache.root.display(), api_url = %config.remote.api_url, "Configuration loaded");
        Ok(config)
    }

    /// The merged providers, unextracted.
    pub fn figment(path: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        match path {
            Some(path) => {
                if !path.is_file() {
                    exn::bail!(ErrorKind::Invalid(format!("config file not found: {}", path.display())));
                }
                figment = merge_file(figment, path)?;
            },
            None => {
                if let Some(path) = default_config_path() {
                    figment = merge_file(figment, &path)?;
                }
            },
        }
        Ok(figment
            .merge(Env::raw().only(&["GITHUB_TOKEN"]).map(|_| "remote.token".into()))
            .merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.root.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("cache.root must be set".into()));
        }
        if !self.cache.root.is_absolute() {
            exn::bail!(ErrorKind::Invalid(format!("cache.root must be absolute: {}", self.cache.root.display())));
        }
        if self.cache.cover_concurrency == 0 {
            exn::bail!(ErrorKind::Invalid("cache.cover_concurrency must be greater than zero".into()));
        }
        if self.remote.api_url.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("remote.api_url must be set".into()));
        }
        Ok(())
    }
}

/// Missing files contribute nothing.
fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
    Ok(match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
        Some("json") => figment.merge(Json::file(path)),
        _ => exn::bail!(ErrorKind::Invalid(format!("unsupported config file format: {}", path.display()))),
    })
}
