//! In-memory provider used by the engine tests.

use super::{
    Delegation, DownloadedTarget, Error, Result, Role, RoleDocument, TargetDescriptor,
    TrustedMetadata, TrustedMetadataProvider,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::num::NonZeroU64;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
pub(crate) struct FakeProvider {
    pub(crate) metadata: TrustedMetadata,
    pub(crate) prior_roots: BTreeMap<u64, Vec<u8>>,
    files: HashMap<String, Vec<u8>>,
    delegated: HashMap<String, Vec<TargetDescriptor>>,
    corrupt: HashSet<String>,
    stalled: HashSet<String>,
    pub(crate) downloads: AtomicUsize,
    in_flight: AtomicUsize,
    /// Most downloads ever running at once
    pub(crate) peak_downloads: AtomicUsize,
}

pub(crate) fn role_bytes(role: Role, version: u64) -> Vec<u8> {
    format!(
        r#"{{"signed":{{"_type":"{}","version":{}}},"signatures":[]}}"#,
        role, version
    )
    .into_bytes()
}

fn document(role: Role, version: u64) -> RoleDocument {
    RoleDocument {
        role,
        version: NonZeroU64::new(version).unwrap(),
        bytes: role_bytes(role, version),
    }
}

fn descriptor(path: &str, data: &[u8]) -> TargetDescriptor {
    let mut hashes = BTreeMap::new();
    hashes.insert("sha256".to_string(), Sha256::digest(data).to_vec());
    TargetDescriptor {
        path: path.to_string(),
        length: data.len() as u64,
        hashes,
    }
}

impl FakeProvider {
    /// A repository whose root is at `root_version` with every prior root still served.  The
    /// other top-level roles share `version`.
    pub(crate) fn new(root_version: u64, version: u64, consistent_snapshot: bool) -> Self {
        let prior_roots = (1..root_version)
            .map(|v| (v, role_bytes(Role::Root, v)))
            .collect();
        Self {
            metadata: TrustedMetadata {
                root: document(Role::Root, root_version),
                consistent_snapshot,
                snapshot: document(Role::Snapshot, version),
                targets: document(Role::Targets, version),
                timestamp: document(Role::Timestamp, version),
                target_list: Vec::new(),
                delegations: Vec::new(),
            },
            prior_roots,
            files: HashMap::new(),
            delegated: HashMap::new(),
            corrupt: HashSet::new(),
            stalled: HashSet::new(),
            downloads: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_downloads: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_target(mut self, path: &str, data: &str) -> Self {
        self.metadata.target_list.push(descriptor(path, data.as_bytes()));
        self.files.insert(path.to_string(), data.as_bytes().to_vec());
        self
    }

    pub(crate) fn with_delegation(
        mut self,
        name: &str,
        paths: &[&str],
        targets: &[(&str, &str)],
    ) -> Self {
        self.metadata.delegations.push(Delegation {
            name: name.to_string(),
            paths: paths.iter().map(|p| p.to_string()).collect(),
        });
        let mut list = Vec::new();
        for (path, data) in targets {
            list.push(descriptor(path, data.as_bytes()));
            self.files.insert(path.to_string(), data.as_bytes().to_vec());
        }
        self.delegated.insert(name.to_string(), list);
        self
    }

    /// Lists a delegation whose metadata cannot be loaded.
    pub(crate) fn with_broken_delegation(mut self, name: &str, paths: &[&str]) -> Self {
        self.metadata.delegations.push(Delegation {
            name: name.to_string(),
            paths: paths.iter().map(|p| p.to_string()).collect(),
        });
        self
    }

    pub(crate) fn without_hash(mut self, path: &str) -> Self {
        let all = self
            .metadata
            .target_list
            .iter_mut()
            .chain(self.delegated.values_mut().flatten());
        for target in all.filter(|t| t.path == path) {
            target.hashes.clear();
        }
        self
    }

    pub(crate) fn corrupt(mut self, path: &str) -> Self {
        self.corrupt.insert(path.to_string());
        self
    }

    /// Downloads of `path` never finish.
    pub(crate) fn stalled(mut self, path: &str) -> Self {
        self.stalled.insert(path.to_string());
        self
    }

    pub(crate) fn without_prior_root(mut self, version: u64) -> Self {
        self.prior_roots.remove(&version);
        self
    }
}

#[async_trait]
impl TrustedMetadataProvider for FakeProvider {
    fn metadata(&self) -> Result<TrustedMetadata> {
        Ok(self.metadata.clone())
    }

    async fn prior_root(&self, version: NonZeroU64) -> Result<Vec<u8>> {
        self.prior_roots
            .get(&version.get())
            .cloned()
            .ok_or_else(|| Error::RoleVersionMissing {
                role: Role::Root,
                version: version.get(),
                url: format!("memory:///{}.root.json", version),
            })
    }

    async fn download_target(&self, path: &str, dest_dir: &Path) -> Result<DownloadedTarget> {
        if self.stalled.contains(path) {
            futures::future::pending::<()>().await;
        }
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_downloads.fetch_max(running, Ordering::SeqCst);
        // Let sibling downloads start while this one is running.
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.corrupt.contains(path) {
            return Err(Error::HashMismatch {
                path: path.to_string(),
                source: "calculated hash does not match metadata".into(),
            });
        }
        let data = self.files.get(path).cloned().ok_or_else(|| Error::TargetMissing {
            path: path.to_string(),
        })?;
        Ok(DownloadedTarget {
            local_path: dest_dir.join(path),
            data,
        })
    }

    async fn delegated_targets(&self, role: &str, parent: &str) -> Result<Vec<TargetDescriptor>> {
        self.delegated
            .get(role)
            .cloned()
            .ok_or_else(|| Error::DelegatedRoleMissing {
                role: role.to_string(),
                parent: parent.to_string(),
            })
    }
}
