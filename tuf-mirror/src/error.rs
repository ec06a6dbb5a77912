use crate::{oci, provider};
use crate::provider::Role;
use snafu::Snafu;
use std::io;
use std::path::PathBuf;

/// Potential errors while mirroring a TUF repository.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display(
        "Metadata manifest annotations do not reproduce the role mapping: expected {:?}, found {:?}",
        expected,
        found
    ))]
    AnnotationMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[snafu(display("Mirror operation canceled"))]
    Canceled,

    #[snafu(display("Failed to create TUF datastore '{}': {}", path.display(), source))]
    Datastore { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to load targets of delegated role '{}': {}", role, source))]
    DelegatedTargets {
        role: String,
        source: provider::Error,
    },

    #[snafu(display("Failed to download target '{}' of role '{}': {}", path, role, source))]
    DownloadFailure {
        role: String,
        path: String,
        source: provider::Error,
    },

    #[snafu(display(
        "Hash verification failed for target '{}' of role '{}': {}",
        path,
        role,
        source
    ))]
    HashMismatch {
        role: String,
        path: String,
        source: provider::Error,
    },

    #[snafu(display(
        "Root chain is incomplete: version {} below current version {} is unavailable: {}",
        version,
        current,
        reason
    ))]
    IncompleteChain {
        version: u64,
        current: u64,
        reason: String,
    },

    #[snafu(display("Delegated role name '{}' is not usable as a directory name", role))]
    InvalidRoleName { role: String },

    #[snafu(display("Failed to read trusted metadata: {}", source))]
    Metadata { source: provider::Error },

    #[snafu(display("Layer {} of the metadata manifest has no '{}' annotation", layer, key))]
    MissingAnnotation { layer: usize, key: &'static str },

    #[snafu(display("Target '{}' of role '{}' has no sha256 hash", path, role))]
    MissingHash { role: String, path: String },

    #[snafu(display("Delegated role '{}' declares no directory path patterns", role))]
    NoDelegationPaths { role: String },

    #[snafu(display("Failed to build OCI {}: {}", what, source))]
    Oci {
        what: String,
        source: oci::Error,
    },

    #[snafu(display(
        "Target '{}' of role '{}' is not under its delegated directory '{}'",
        path,
        role,
        subdir
    ))]
    TargetOutsideDelegation {
        role: String,
        subdir: String,
        path: String,
    },

    #[snafu(display("Unrecognized TUF metadata file name '{}'", name))]
    UnrecognizedName { name: String },

    #[snafu(display(
        "Unable to derive a directory from path pattern '{}' of role '{}'",
        path,
        role
    ))]
    UnparseableDelegationPath { role: String, path: String },

    #[snafu(display("Role '{}' cannot be bundled into a metadata manifest", role))]
    UnsupportedRole { role: Role },
}

pub type Result<T> = std::result::Result<T, Error>;
