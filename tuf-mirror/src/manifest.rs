//! Bundles the top-level TUF metadata into one OCI image.
//!
//! Each layer carries one signed document and a single identity annotation holding its
//! canonical file name.  The role and version are encoded in that name, so the mapping can be
//! recovered from annotations alone; layer order is only a convenience for human readers.

use crate::chain::RootChain;
use crate::error::{self, Result};
use crate::mirror::TufMirror;
use crate::naming;
use crate::oci::{file_annotation, Image, Layer, TUF_FILE_ANNOTATION, TUF_METADATA_MEDIA_TYPE};
use crate::provider::{Role, RoleDocument, TrustedMetadata, TrustedMetadataProvider};
use log::{debug, info};
use oci_client::manifest::OciImageManifest;
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::num::NonZeroU64;

/// A signed metadata document with its canonical name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFile {
    pub name: String,
    pub role: Role,
    pub bytes: Vec<u8>,
}

/// Everything a metadata manifest is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TufMetadata {
    /// One entry per root version, oldest first
    pub root: Vec<MetadataFile>,
    pub snapshot: MetadataFile,
    pub targets: MetadataFile,
    pub timestamp: MetadataFile,
    pub consistent_snapshot: bool,
}

impl TufMetadata {
    pub fn new(chain: &RootChain, metadata: &TrustedMetadata) -> Result<Self> {
        let consistent = metadata.consistent_snapshot;
        let named = |document: &RoleDocument| -> Result<MetadataFile> {
            Ok(MetadataFile {
                name: naming::document_name(document, consistent)?,
                role: document.role,
                bytes: document.bytes.clone(),
            })
        };
        Ok(Self {
            root: chain
                .iter()
                .map(|(version, bytes)| MetadataFile {
                    name: naming::root_name(version),
                    role: Role::Root,
                    bytes: bytes.to_vec(),
                })
                .collect(),
            snapshot: named(&metadata.snapshot)?,
            targets: named(&metadata.targets)?,
            timestamp: named(&metadata.timestamp)?,
            consistent_snapshot: consistent,
        })
    }

    /// The documents of one role.  Only the top-level roles are bundled.
    pub fn files(&self, role: Role) -> Result<Vec<&MetadataFile>> {
        match role {
            Role::Root => Ok(self.root.iter().collect()),
            Role::Snapshot => Ok(vec![&self.snapshot]),
            Role::Targets => Ok(vec![&self.targets]),
            Role::Timestamp => Ok(vec![&self.timestamp]),
            Role::DelegatedTargets => error::UnsupportedRoleSnafu { role }.fail(),
        }
    }

    /// Every file name with its role.
    pub fn role_files(&self) -> BTreeMap<String, Role> {
        self.root
            .iter()
            .chain([&self.snapshot, &self.targets, &self.timestamp])
            .map(|file| (file.name.clone(), file.role))
            .collect()
    }
}

/// Builds the metadata image from the given roles, in order.
pub fn build_metadata_image(metadata: &TufMetadata, roles: &[Role]) -> Result<Image> {
    let mut image = Image::new();
    for role in roles {
        for file in metadata.files(*role)? {
            debug!("Adding {} layer '{}'", role, file.name);
            image.append(Layer::new(
                TUF_METADATA_MEDIA_TYPE,
                file.bytes.clone(),
                file_annotation(&file.name),
            ));
        }
    }
    Ok(image)
}

/// Recovers `file name -> (role, version)` from a metadata manifest's annotations.
pub fn recover_role_files(
    manifest: &OciImageManifest,
) -> Result<BTreeMap<String, (Role, Option<NonZeroU64>)>> {
    manifest
        .layers
        .iter()
        .enumerate()
        .map(|(layer, descriptor)| -> Result<_> {
            let name = descriptor
                .annotations
                .as_ref()
                .and_then(|a| a.get(TUF_FILE_ANNOTATION))
                .context(error::MissingAnnotationSnafu {
                    layer,
                    key: TUF_FILE_ANNOTATION,
                })?;
            let parsed = naming::parse_metadata_name(name)?;
            Ok((name.clone(), parsed))
        })
        .collect()
}

/// Checks that the manifest's annotations reproduce exactly the mapping it was built from.
fn verify_annotations(image: &Image, metadata: &TufMetadata) -> Result<()> {
    let manifest = image.manifest().context(error::OciSnafu {
        what: "metadata manifest",
    })?;
    let recovered: BTreeMap<String, Role> = recover_role_files(&manifest)?
        .into_iter()
        .map(|(name, (role, _))| (name, role))
        .collect();
    let expected = metadata.role_files();
    ensure!(
        recovered == expected && manifest.layers.len() == expected.len(),
        error::AnnotationMismatchSnafu {
            expected: expected.keys().cloned().collect::<Vec<_>>(),
            found: recovered.keys().cloned().collect::<Vec<_>>(),
        }
    );
    Ok(())
}

impl<P: TrustedMetadataProvider> TufMirror<P> {
    /// The trusted top-level metadata with the full root chain, named for publication.
    pub async fn tuf_metadata(&self) -> Result<TufMetadata> {
        let metadata = self.trusted_metadata()?;
        let chain = self.reconstruct_root_chain(&metadata.root).await?;
        TufMetadata::new(&chain, &metadata)
    }

    /// Builds the metadata manifest image.  Nothing partial is returned: any failure in the
    /// chain, naming, or the annotation self-check fails the whole image.
    pub async fn create_metadata_manifest(&self) -> Result<Image> {
        let metadata = self.tuf_metadata().await?;
        let image = build_metadata_image(&metadata, &Role::TOP_LEVEL)?;
        verify_annotations(&image, &metadata)?;
        info!(
            "Built metadata manifest with {} layer(s) covering {} root version(s)",
            image.layers().len(),
            metadata.root.len()
        );
        Ok(image)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;
    use crate::mirror::MirrorSettings;
    use crate::provider::fake::{role_bytes, FakeProvider};

    fn mirror(provider: FakeProvider) -> TufMirror<FakeProvider> {
        TufMirror::new(provider, MirrorSettings::new("/nonexistent"))
    }

    fn layer_names(image: &Image) -> Vec<String> {
        image
            .layers()
            .iter()
            .map(|layer| layer.annotations()[TUF_FILE_ANNOTATION].clone())
            .collect()
    }

    #[tokio::test]
    async fn consistent_snapshot_manifest() {
        let mirror = mirror(FakeProvider::new(3, 3, true));
        let image = mirror.create_metadata_manifest().await.unwrap();
        assert_eq!(
            layer_names(&image),
            vec![
                "1.root.json",
                "2.root.json",
                "3.root.json",
                "3.snapshot.json",
                "3.targets.json",
                "timestamp.json",
            ]
        );
        for layer in image.layers() {
            assert_eq!(layer.media_type(), TUF_METADATA_MEDIA_TYPE);
            assert_eq!(layer.annotations().len(), 1);
        }
        assert_eq!(image.layers()[1].data(), role_bytes(Role::Root, 2));
        assert_eq!(image.layers()[4].data(), role_bytes(Role::Targets, 3));
    }

    #[tokio::test]
    async fn plain_snapshot_manifest() {
        let mirror = mirror(FakeProvider::new(2, 8, false));
        let image = mirror.create_metadata_manifest().await.unwrap();
        assert_eq!(
            layer_names(&image),
            vec![
                "1.root.json",
                "2.root.json",
                "snapshot.json",
                "targets.json",
                "timestamp.json",
            ]
        );
    }

    #[tokio::test]
    async fn annotations_round_trip() {
        let mirror = mirror(FakeProvider::new(3, 5, true));
        let metadata = mirror.tuf_metadata().await.unwrap();
        let image = build_metadata_image(&metadata, &Role::TOP_LEVEL).unwrap();
        let recovered = recover_role_files(&image.manifest().unwrap()).unwrap();

        let roles: BTreeMap<String, Role> = recovered
            .iter()
            .map(|(name, (role, _))| (name.clone(), *role))
            .collect();
        assert_eq!(roles, metadata.role_files());

        let v = |n| NonZeroU64::new(n);
        assert_eq!(recovered["2.root.json"], (Role::Root, v(2)));
        assert_eq!(recovered["5.snapshot.json"], (Role::Snapshot, v(5)));
        assert_eq!(recovered["timestamp.json"], (Role::Timestamp, None));
    }

    #[tokio::test]
    async fn broken_chain_builds_nothing() {
        let mirror = mirror(FakeProvider::new(3, 3, true).without_prior_root(1));
        assert!(matches!(
            mirror.create_metadata_manifest().await,
            Err(Error::IncompleteChain { version: 1, .. })
        ));
    }

    #[tokio::test]
    async fn delegated_role_is_unsupported() {
        let mirror = mirror(FakeProvider::new(1, 1, true));
        let metadata = mirror.tuf_metadata().await.unwrap();
        assert!(matches!(
            build_metadata_image(&metadata, &[Role::Root, Role::DelegatedTargets]),
            Err(Error::UnsupportedRole {
                role: Role::DelegatedTargets
            })
        ));
    }

    #[tokio::test]
    async fn self_check_catches_missing_layers() {
        let mirror = mirror(FakeProvider::new(2, 1, true));
        let metadata = mirror.tuf_metadata().await.unwrap();
        let partial = build_metadata_image(&metadata, &[Role::Root, Role::Snapshot]).unwrap();
        assert!(matches!(
            verify_annotations(&partial, &metadata),
            Err(Error::AnnotationMismatch { .. })
        ));
    }

    #[test]
    fn unannotated_layer_is_rejected() {
        let mut image = Image::new();
        image.append(Layer::new(
            TUF_METADATA_MEDIA_TYPE,
            b"{}".to_vec(),
            Default::default(),
        ));
        assert!(matches!(
            recover_role_files(&image.manifest().unwrap()),
            Err(Error::MissingAnnotation { layer: 0, .. })
        ));
    }

    #[tokio::test]
    async fn building_twice_is_identical() {
        let mirror = mirror(FakeProvider::new(3, 2, true));
        let first = mirror.create_metadata_manifest().await.unwrap();
        let second = mirror.create_metadata_manifest().await.unwrap();
        assert_eq!(first.digest().unwrap(), second.digest().unwrap());
    }
}
