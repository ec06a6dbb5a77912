//! Mirrors target files as OCI artifacts.
//!
//! Every target listed by the top-level targets role becomes a single-layer image tagged with
//! its hash-prefixed name.  Every delegated role becomes one image index, tagged with the
//! directory cut from its path pattern, holding one image per target under that directory.

use crate::error::{self, Result};
use crate::mirror::TufMirror;
use crate::naming;
use crate::oci::{file_annotation, Image, Index, Layer, TUF_TARGET_MEDIA_TYPE};
use crate::provider::{Delegation, Role, TrustedMetadataProvider};
use futures::future::try_join_all;
use log::{error, info, warn};
use snafu::ResultExt;

/// An image and the tag it is published under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorImage {
    pub image: Image,
    pub tag: String,
}

/// An image index for one delegated role and the tag it is published under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorIndex {
    pub index: Index,
    /// The delegated directory, e.g. `images`
    pub tag: String,
    pub role: String,
}

/// The outcome of mirroring one delegated role.
#[derive(Debug)]
pub struct DelegatedMirror {
    pub role: String,
    pub result: Result<MirrorIndex>,
}

/// A single-layer image holding one target file.
fn target_image(name: &str, data: Vec<u8>) -> Image {
    let mut image = Image::new();
    image.append(Layer::new(TUF_TARGET_MEDIA_TYPE, data, file_annotation(name)));
    image
}

impl<P: TrustedMetadataProvider> TufMirror<P> {
    /// One image per top-level target, in metadata order.  Any failure fails the whole set.
    pub async fn target_mirrors(&self) -> Result<Vec<MirrorImage>> {
        let metadata = self.trusted_metadata()?;
        let role = Role::Targets.to_string();

        // Name everything before downloading so a missing hash fails without network traffic.
        let named = metadata
            .target_list
            .iter()
            .map(|target| -> Result<_> { Ok((naming::target_name(target)?, target)) })
            .collect::<Result<Vec<_>>>()?;
        info!("Mirroring {} top-level target(s)", named.len());

        // Every download is started at once; the download semaphore bounds how many run.
        let role = role.as_str();
        let dest = self.targets_download_dir();
        let dest = dest.as_path();
        try_join_all(named.into_iter().map(|(name, target)| async move {
            let data = self.download(role, dest, target).await?;
            Ok::<_, error::Error>(MirrorImage {
                image: target_image(&name, data),
                tag: name,
            })
        }))
        .await
    }

    /// One index per delegated role.  Roles are mirrored independently: a failure is recorded
    /// against its role and the remaining roles still run.  Cancellation fails the whole call.
    pub async fn delegated_target_mirrors(&self) -> Result<Vec<DelegatedMirror>> {
        let metadata = self.trusted_metadata()?;
        info!(
            "Mirroring targets of {} delegated role(s)",
            metadata.delegations.len()
        );

        let mut mirrors = Vec::with_capacity(metadata.delegations.len());
        for delegation in &metadata.delegations {
            let result = self.delegated_mirror(delegation).await;
            match &result {
                Err(error::Error::Canceled) => return error::CanceledSnafu.fail(),
                Err(e) => error!("Failed to mirror delegated role '{}': {}", delegation.name, e),
                Ok(mirror) => info!(
                    "Mirrored {} target(s) of delegated role '{}'",
                    mirror.index.entries().len(),
                    delegation.name
                ),
            }
            mirrors.push(DelegatedMirror {
                role: delegation.name.clone(),
                result,
            });
        }
        Ok(mirrors)
    }

    async fn delegated_mirror(&self, delegation: &Delegation) -> Result<MirrorIndex> {
        let role = delegation.name.as_str();
        let dest = self.delegated_download_dir(role)?;
        let dest = dest.as_path();
        let subdir = naming::delegation_subdir(role, &delegation.paths)?;
        if delegation.paths.len() > 1 {
            warn!(
                "Delegated role '{}' declares {} path patterns; only '{}' is mirrored",
                role,
                delegation.paths.len(),
                delegation.paths[0]
            );
        }

        let targets = self
            .cancellable(async {
                self.provider
                    .delegated_targets(role, &Role::Targets.to_string())
                    .await
                    .context(error::DelegatedTargetsSnafu { role })
            })
            .await?;

        let named = targets
            .iter()
            .map(|target| -> Result<_> {
                Ok((naming::delegated_target_name(role, &subdir, target)?, target))
            })
            .collect::<Result<Vec<_>>>()?;

        let images: Vec<(String, Image)> = try_join_all(named.into_iter().map(
            |((layer_name, entry_name), target)| async move {
                let data = self.download(role, dest, target).await?;
                Ok::<_, error::Error>((entry_name, target_image(&layer_name, data)))
            },
        ))
        .await?;

        let mut index = Index::new();
        for (entry_name, image) in images {
            index.append(image, file_annotation(entry_name));
        }
        Ok(MirrorIndex {
            index,
            tag: subdir,
            role: role.to_string(),
        })
    }
}
