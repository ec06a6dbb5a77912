//! Reconstruction of the root metadata history.  A client bootstrapping from version 1 walks
//! every root version in turn, so a mirror must carry all of them.

use crate::error::{self, Result};
use crate::mirror::TufMirror;
use crate::provider::{Role, RoleDocument, TrustedMetadataProvider};
use log::{debug, info};
use snafu::ensure;
use std::collections::BTreeMap;
use std::num::NonZeroU64;

/// Root versions `1..=current`, each with its signed bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootChain {
    versions: BTreeMap<NonZeroU64, Vec<u8>>,
}

impl RootChain {
    /// Builds a chain from the current root and the prior versions below it.  Every version in
    /// `1..current` must be present.
    pub fn from_versions(
        current: &RoleDocument,
        mut prior: BTreeMap<NonZeroU64, Vec<u8>>,
    ) -> Result<Self> {
        ensure!(
            current.role == Role::Root,
            error::UnsupportedRoleSnafu { role: current.role }
        );
        prior.retain(|version, _| *version < current.version);
        for version in 1..current.version.get() {
            ensure!(
                prior.keys().any(|v| v.get() == version),
                error::IncompleteChainSnafu {
                    version,
                    current: current.version.get(),
                    reason: "version is missing",
                }
            );
        }
        prior.insert(current.version, current.bytes.clone());
        Ok(Self { versions: prior })
    }

    pub fn current_version(&self) -> NonZeroU64 {
        self.versions
            .keys()
            .next_back()
            .copied()
            .unwrap_or(NonZeroU64::MIN)
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Versions in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (NonZeroU64, &[u8])> {
        self.versions
            .iter()
            .map(|(version, bytes)| (*version, bytes.as_slice()))
    }
}

impl<P: TrustedMetadataProvider> TufMirror<P> {
    /// Fetches every superseded root below the trusted `root` and returns the full chain.
    pub async fn reconstruct_root_chain(&self, root: &RoleDocument) -> Result<RootChain> {
        let current = root.version.get();
        let mut prior = BTreeMap::new();
        for version in (1..current).filter_map(NonZeroU64::new) {
            debug!("Fetching root version {} of {}", version, current);
            let bytes = self
                .cancellable(async {
                    self.provider.prior_root(version).await.map_err(|e| {
                        error::IncompleteChainSnafu {
                            version: version.get(),
                            current,
                            reason: e.to_string(),
                        }
                        .build()
                    })
                })
                .await?;
            prior.insert(version, bytes);
        }
        let chain = RootChain::from_versions(root, prior)?;
        info!("Reconstructed root chain of {} version(s)", chain.len());
        Ok(chain)
    }
}
