//! The provider module defines the boundary between the mirror and the TUF client that verifies
//! repository metadata.  Everything handed across this boundary has already passed signature,
//! threshold, and freshness checks; the mirror only transcribes it.

#[cfg(test)]
pub(crate) mod fake;
mod tuf_repo;

pub use tuf_repo::TufRepoProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_plain::{forward_display_to_serde, forward_from_str_to_serde};
use std::collections::BTreeMap;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};

/// A TUF role type.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Root,
    Snapshot,
    Targets,
    Timestamp,
    DelegatedTargets,
}

forward_display_to_serde!(Role);
forward_from_str_to_serde!(Role);

impl Role {
    /// The roles bundled into a metadata manifest, in layer order.
    pub const TOP_LEVEL: [Role; 4] = [Role::Root, Role::Snapshot, Role::Targets, Role::Timestamp];
}

/// One signed metadata document, exactly as it will be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDocument {
    pub role: Role,
    pub version: NonZeroU64,
    pub bytes: Vec<u8>,
}

/// A target file as listed by a targets or delegated-targets role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    /// Role-relative, POSIX-style path
    pub path: String,
    pub length: u64,
    /// Raw digests keyed by algorithm name, e.g. `sha256`
    pub hashes: BTreeMap<String, Vec<u8>>,
}

/// A role delegated by the top-level targets role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delegation {
    pub name: String,
    /// Declared path patterns, e.g. `images/*`
    pub paths: Vec<String>,
}

/// The verified state of a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedMetadata {
    pub root: RoleDocument,
    pub consistent_snapshot: bool,
    pub snapshot: RoleDocument,
    pub targets: RoleDocument,
    pub timestamp: RoleDocument,
    /// Targets listed directly by the top-level targets role
    pub target_list: Vec<TargetDescriptor>,
    pub delegations: Vec<Delegation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedTarget {
    pub local_path: PathBuf,
    pub data: Vec<u8>,
}

/// Supplies verified TUF metadata and target files.
#[async_trait]
pub trait TrustedMetadataProvider: Send + Sync {
    /// The currently trusted top-level metadata.
    fn metadata(&self) -> Result<TrustedMetadata>;

    /// A superseded root document.  A version the repository no longer serves is a
    /// [`Error::RoleVersionMissing`].
    async fn prior_root(&self, version: NonZeroU64) -> Result<Vec<u8>>;

    /// Downloads a target into `dest_dir`, checking its length and hashes against the metadata
    /// that lists it.
    async fn download_target(&self, path: &str, dest_dir: &Path) -> Result<DownloadedTarget>;

    /// The target list of `role`, a role delegated by `parent`.  The delegated metadata is
    /// verified on its own signatures, not trusted by inheritance.
    async fn delegated_targets(&self, role: &str, parent: &str) -> Result<Vec<TargetDescriptor>>;
}

pub(crate) fn boxed<E>(e: E) -> error::BoxError
where
    E: std::error::Error + Send + Sync + 'static,
{
    Box::new(e)
}

mod error {
    use super::Role;
    use snafu::Snafu;
    use std::io;
    use std::path::PathBuf;

    pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub enum Error {
        #[snafu(display("Role '{}' is not delegated by '{}'", role, parent))]
        DelegatedRoleMissing { role: String, parent: String },

        #[snafu(display("Failed to read path patterns of role '{}': {}", role, source))]
        DelegationPaths {
            role: String,
            source: serde_plain::Error,
        },

        #[snafu(display("Failed to download target '{}': {}", path, source))]
        Download { path: String, source: BoxError },

        #[snafu(display("Failed to fetch '{}': {}", url, source))]
        Fetch { url: String, source: BoxError },

        #[snafu(display("Target '{}' failed verification: {}", path, source))]
        HashMismatch { path: String, source: BoxError },

        #[snafu(display("Invalid URL '{}': {}", input, source))]
        JoinUrl {
            input: String,
            source: url::ParseError,
        },

        #[snafu(display(
            "Failed to load repository from metadata URL '{}': {}",
            metadata_base_url,
            source
        ))]
        Load {
            metadata_base_url: String,
            source: BoxError,
        },

        #[snafu(display("'{}' exceeds the maximum size of {} bytes", url, max))]
        MaxSize { url: String, max: u64 },

        #[snafu(display(
            "Repository does not serve version {} of the {} role: {}",
            version,
            role,
            url
        ))]
        RoleVersionMissing {
            role: Role,
            version: u64,
            url: String,
        },

        #[snafu(display("Failed to serialize {} metadata: {}", role, source))]
        Serialize {
            role: Role,
            source: serde_json::Error,
        },

        #[snafu(display("Target '{}' is not listed by the repository", path))]
        TargetMissing { path: String },

        #[snafu(display("Failed to write target to '{}': {}", path.display(), source))]
        WriteTarget { path: PathBuf, source: io::Error },
    }
}
pub use error::Error;
pub type Result<T> = std::result::Result<T, error::Error>;

#[cfg(test)]
mod test {
    use super::Role;

    #[test]
    fn role_names() {
        assert_eq!(Role::Root.to_string(), "root");
        assert_eq!(Role::DelegatedTargets.to_string(), "delegated-targets");
        assert_eq!("timestamp".parse::<Role>().unwrap(), Role::Timestamp);
        assert!("mirror".parse::<Role>().is_err());
    }
}
