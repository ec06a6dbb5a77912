//! A [`TrustedMetadataProvider`] backed by a `tough` repository.  `tough` performs the update
//! workflow on load: root rotation, threshold signature checks, freshness checks, and
//! verification of delegated metadata.

use super::error;
use super::{
    boxed, Delegation, DownloadedTarget, Result, Role, RoleDocument, TargetDescriptor,
    TrustedMetadata, TrustedMetadataProvider,
};
use async_trait::async_trait;
use futures::TryStreamExt;
use log::{debug, trace};
use serde::Serialize;
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::num::NonZeroU64;
use std::path::Path;
use tough::schema::{DelegatedRole, PathSet, Signed, Target, Targets};
use tough::{
    DefaultTransport, ExpirationEnforcement, Limits, Repository, RepositoryLoader, TargetName,
    Transport, TransportErrorKind,
};
use url::Url;

#[derive(Debug)]
pub struct TufRepoProvider {
    repo: Repository,
    transport: DefaultTransport,
    metadata_base_url: Url,
    max_root_size: u64,
}

impl TufRepoProvider {
    /// Loads and verifies the repository at the given URLs, starting from the trusted `root`.
    /// Verified metadata is cached in `datastore`.
    pub async fn load(
        root: &[u8],
        metadata_base_url: Url,
        targets_base_url: Url,
        datastore: &Path,
    ) -> Result<Self> {
        let limits = Limits::default();
        debug!(
            "Loading TUF repository from '{}' with datastore '{}'",
            metadata_base_url,
            datastore.display()
        );
        let repo = RepositoryLoader::new(&root, metadata_base_url.clone(), targets_base_url)
            .transport(DefaultTransport::new())
            .datastore(datastore.to_path_buf())
            .limits(limits)
            .expiration_enforcement(ExpirationEnforcement::Safe)
            .load()
            .await
            .map_err(boxed)
            .context(error::LoadSnafu {
                metadata_base_url: metadata_base_url.as_str(),
            })?;

        Ok(Self {
            repo,
            transport: DefaultTransport::new(),
            metadata_base_url: with_trailing_slash(metadata_base_url),
            max_root_size: limits.max_root_size,
        })
    }
}

#[async_trait]
impl TrustedMetadataProvider for TufRepoProvider {
    fn metadata(&self) -> Result<TrustedMetadata> {
        let root = self.repo.root();
        let snapshot = self.repo.snapshot();
        let targets = self.repo.targets();
        let timestamp = self.repo.timestamp();

        let delegations = match &targets.signed.delegations {
            Some(delegations) => delegations
                .roles
                .iter()
                .map(delegation)
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(TrustedMetadata {
            root: document(Role::Root, root.signed.version, root)?,
            consistent_snapshot: root.signed.consistent_snapshot,
            snapshot: document(Role::Snapshot, snapshot.signed.version, snapshot)?,
            targets: document(Role::Targets, targets.signed.version, targets)?,
            timestamp: document(Role::Timestamp, timestamp.signed.version, timestamp)?,
            target_list: descriptors(&targets.signed),
            delegations,
        })
    }

    async fn prior_root(&self, version: NonZeroU64) -> Result<Vec<u8>> {
        let name = format!("{}.root.json", version);
        let url = self
            .metadata_base_url
            .join(&name)
            .context(error::JoinUrlSnafu { input: name })?;
        trace!("Fetching prior root from '{}'", url);

        let mut stream = match self.transport.fetch(url.clone()).await {
            Ok(stream) => stream,
            Err(e) if matches!(e.kind(), TransportErrorKind::FileNotFound) => {
                return error::RoleVersionMissingSnafu {
                    role: Role::Root,
                    version: version.get(),
                    url: url.as_str(),
                }
                .fail();
            }
            Err(e) => return Err(boxed(e)).context(error::FetchSnafu { url: url.as_str() }),
        };

        let mut data = Vec::new();
        while let Some(chunk) = stream
            .try_next()
            .await
            .map_err(boxed)
            .context(error::FetchSnafu { url: url.as_str() })?
        {
            data.extend_from_slice(&chunk);
            ensure!(
                data.len() as u64 <= self.max_root_size,
                error::MaxSizeSnafu {
                    url: url.as_str(),
                    max: self.max_root_size,
                }
            );
        }
        Ok(data)
    }

    async fn download_target(&self, path: &str, dest_dir: &Path) -> Result<DownloadedTarget> {
        let name = TargetName::new(path)
            .map_err(boxed)
            .context(error::DownloadSnafu { path })?;
        let stream = self
            .repo
            .read_target(&name)
            .await
            .map_err(boxed)
            .context(error::DownloadSnafu { path })?
            .context(error::TargetMissingSnafu { path })?;

        // The stream checks length and sha256 as it is consumed and fails on the final chunk
        // if either disagrees with the metadata.
        let data = stream
            .try_fold(Vec::new(), |mut data, chunk| async move {
                data.extend_from_slice(&chunk);
                Ok(data)
            })
            .await
            .map_err(|e| match e {
                tough::error::Error::HashMismatch { .. } => error::Error::HashMismatch {
                    path: path.to_string(),
                    source: boxed(e),
                },
                _ => error::Error::Download {
                    path: path.to_string(),
                    source: boxed(e),
                },
            })?;

        let local_path = dest_dir.join(name.resolved());
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context(error::WriteTargetSnafu { path: parent })?;
        }
        tokio::fs::write(&local_path, &data)
            .await
            .context(error::WriteTargetSnafu { path: &local_path })?;

        Ok(DownloadedTarget { local_path, data })
    }

    async fn delegated_targets(&self, role: &str, parent: &str) -> Result<Vec<TargetDescriptor>> {
        let parent_targets = if parent == Role::Targets.to_string() {
            self.repo.targets()
        } else {
            self.repo
                .delegated_role(parent)
                .and_then(|r| r.targets.as_ref())
                .context(error::DelegatedRoleMissingSnafu { role, parent })?
        };

        let delegated = parent_targets
            .signed
            .delegations
            .as_ref()
            .and_then(|d| d.roles.iter().find(|r| r.name == role))
            .and_then(|r| r.targets.as_ref())
            .context(error::DelegatedRoleMissingSnafu { role, parent })?;

        Ok(descriptors(&delegated.signed))
    }
}

fn document<T: Serialize>(
    role: Role,
    version: NonZeroU64,
    signed: &Signed<T>,
) -> Result<RoleDocument> {
    let bytes = serde_json::to_vec(signed).context(error::SerializeSnafu { role })?;
    Ok(RoleDocument {
        role,
        version,
        bytes,
    })
}

fn descriptors(targets: &Targets) -> Vec<TargetDescriptor> {
    let mut list: Vec<_> = targets
        .targets
        .iter()
        .map(|(name, target)| descriptor(name, target))
        .collect();
    list.sort_by(|a, b| a.path.cmp(&b.path));
    list
}

fn descriptor(name: &TargetName, target: &Target) -> TargetDescriptor {
    let mut hashes = BTreeMap::new();
    hashes.insert("sha256".to_string(), target.hashes.sha256.to_vec());
    TargetDescriptor {
        path: name.raw().to_string(),
        length: target.length,
        hashes,
    }
}

fn delegation(role: &DelegatedRole) -> Result<Delegation> {
    // Hash-prefix delegations do not name directories, so they contribute no patterns.
    let paths = match &role.paths {
        PathSet::Paths(patterns) => patterns
            .iter()
            .map(serde_plain::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()
            .context(error::DelegationPathsSnafu { role: &role.name })?,
        PathSet::PathHashPrefixes(_) => Vec::new(),
    };
    Ok(Delegation {
        name: role.name.clone(),
        paths,
    })
}

/// `Url::join` replaces the last path segment unless the base ends in a slash.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
