//! The tuf-mirror-config crate owns the definition and loading process for `Mirror.toml`.
//!
//! `Mirror.toml` names the trust anchors a mirror run may start from, the registry credentials
//! used when pushing, and download tuning.  Every field is optional; a missing file yields the
//! default configuration.
//!
//! ```toml
//! tuf_path = "/var/cache/tuf-mirror"
//!
//! [roots.staging]
//! root_role_path = "roots/1.root-staging.json"
//! metadata_base_url = "https://docker.github.io/tuf-staging/metadata"
//! targets_base_url = "https://docker.github.io/tuf-staging/targets"
//!
//! [registry]
//! username = "mirror-bot"
//! password = "hunter2"
//! insecure_registries = ["localhost:5000"]
//!
//! [download]
//! max_concurrent_downloads = 8
//! timeout_secs = 600
//! ```

use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};
use std::collections::HashMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use url::Url;

/// Metadata location of the repository mirrored when nothing else is configured.
pub const DEFAULT_METADATA_URL: &str = "https://docker.github.io/tuf-staging/metadata";
/// Targets location of the repository mirrored when nothing else is configured.
pub const DEFAULT_TARGETS_URL: &str = "https://docker.github.io/tuf-staging/targets";
/// Name of the trust root used when none is requested.
pub const DEFAULT_ROOT_NAME: &str = "default";

/// Configuration needed to load TUF repositories and publish them as OCI artifacts
#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MirrorConfig {
    /// Working directory for the TUF datastore and downloaded targets
    pub tuf_path: Option<PathBuf>,

    /// Named trust anchors, e.g. `default`, `staging`, `dev`
    #[serde(default)]
    pub roots: HashMap<String, TrustRootConfig>,

    pub registry: Option<RegistryConfig>,

    #[serde(default)]
    pub download: DownloadConfig,
}

impl MirrorConfig {
    /// Deserializes a MirrorConfig from a given path.  Relative `root_role_path` entries are
    /// resolved against the directory holding the config file.
    pub fn from_path<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path).context(error::FileSnafu { path })?;
        let mut config: Self =
            toml::from_str(&config_str).context(error::InvalidTomlSnafu { path })?;

        if let Some(base) = path.parent() {
            for root in config.roots.values_mut() {
                if root.root_role_path.is_relative() {
                    root.root_role_path = base.join(&root.root_role_path);
                }
            }
        }
        trace!("Parsed trust roots from {}: {:?}", path.display(), config.roots);
        Ok(config)
    }

    /// Deserializes a MirrorConfig from a given path, if it exists, otherwise builds a default
    /// config
    pub fn from_path_or_default<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        if path.exists() {
            info!("Found mirror config at path: {}", path.display());
            Self::from_path(path)
        } else {
            debug!("No mirror config at '{}', using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// The configured working directory, or `~/.docker/tuf`.
    pub fn tuf_path(&self) -> Result<PathBuf> {
        match &self.tuf_path {
            Some(path) => Ok(path.clone()),
            None => Ok(home::home_dir()
                .context(error::HomeDirSnafu)?
                .join(".docker")
                .join("tuf")),
        }
    }

    /// Loads the trust anchor registered under `name`.
    pub fn trust_anchor(&self, name: &str) -> Result<TrustAnchor> {
        let root = self
            .roots
            .get(name)
            .context(error::MissingConfigSnafu {
                what: format!("definition for trust root '{}'", name),
            })?;
        let mut anchor = TrustAnchor::from_path(name, &root.root_role_path)?;
        anchor.metadata_base_url = root.metadata_base_url.clone();
        anchor.targets_base_url = root.targets_base_url.clone();
        Ok(anchor)
    }
}

/// Location of one trust anchor and, optionally, the repository it belongs to
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
pub struct TrustRootConfig {
    pub root_role_path: PathBuf,
    pub metadata_base_url: Option<Url>,
    pub targets_base_url: Option<Url>,
}

/// The bootstrap root metadata a mirror run starts trusting from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchor {
    pub name: String,
    pub root: Vec<u8>,
    pub metadata_base_url: Option<Url>,
    pub targets_base_url: Option<Url>,
}

impl TrustAnchor {
    /// Reads a root.json from disk; the repository URLs are left unset.
    pub fn from_path<S, P>(name: S, path: P) -> Result<Self>
    where
        S: Into<String>,
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let root = fs::read(path).context(error::FileSnafu { path })?;
        Ok(Self {
            name: name.into(),
            root,
            metadata_base_url: None,
            targets_base_url: None,
        })
    }
}

/// Registry credentials and transport settings
#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Registries reached over plain HTTP
    #[serde(default)]
    pub insecure_registries: Vec<String>,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
pub struct DownloadConfig {
    pub max_concurrent_downloads: Option<NonZeroUsize>,
    pub timeout_secs: Option<u64>,
}

mod error {
    use snafu::Snafu;
    use std::io;
    use std::path::PathBuf;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub enum Error {
        #[snafu(display("Failed to read '{}': {}", path.display(), source))]
        File { path: PathBuf, source: io::Error },

        #[snafu(display("Unable to determine home directory"))]
        HomeDir,

        #[snafu(display("Invalid config file at '{}': {}", path.display(), source))]
        InvalidToml {
            path: PathBuf,
            source: toml::de::Error,
        },

        #[snafu(display("Missing config: {}", what))]
        MissingConfig { what: String },
    }
}
pub use error::Error;
pub type Result<T> = std::result::Result<T, error::Error>;
