//! The targets subcommand mirrors target files, and with `--full` delegated targets, as OCI
//! images and image indexes.

use super::destination::Destination;
use super::Session;
use crate::Args;
use clap::Parser;
use log::{error, info};
use oci_client::Reference;
use snafu::{ensure, ResultExt};
use tuf_mirror::{MirrorImage, MirrorIndex, OciLayout, Publisher};
use url::Url;

/// Mirrors TUF targets to OCI layouts or a registry repository
#[derive(Debug, Parser)]
pub(crate) struct TargetsArgs {
    #[arg(short, long)]
    /// Metadata URL; defaults to the trust root's, then to the Docker TUF staging repository
    metadata: Option<Url>,

    #[arg(short, long)]
    /// Targets URL; defaults to the trust root's, then to the Docker TUF staging repository
    source: Option<Url>,

    #[arg(short, long)]
    /// oci://<directory> for one layout per target, or docker://<repository> without a tag
    destination: Destination,
}

/// Builds target images, and delegated indexes when `full` is set, and stores them at
/// `destination`.  Delegated roles that fail are reported once everything else is stored.
pub(crate) async fn mirror(
    session: &Session,
    full: bool,
    destination: &Destination,
) -> Result<()> {
    let targets = session
        .mirror
        .target_mirrors()
        .await
        .context(error::TargetsSnafu)?;

    let mut delegated = Vec::new();
    let mut failed = Vec::new();
    if full {
        for mirror in session
            .mirror
            .delegated_target_mirrors()
            .await
            .context(error::TargetsSnafu)?
        {
            match mirror.result {
                Ok(index) => delegated.push(index),
                Err(e) => {
                    error!("Delegated role '{}' not mirrored: {}", mirror.role, e);
                    failed.push(mirror.role);
                }
            }
        }
    }

    match destination {
        Destination::Layout(path) => {
            for target in &targets {
                let layout = OciLayout::new(path.join(&target.tag));
                layout
                    .append_image(&target.image, Some(target.tag.as_str()))
                    .context(error::StoreSnafu { tag: &target.tag })?;
                info!("Target manifest layout saved to {}", layout.path().display());
            }
            for index in &delegated {
                let layout = OciLayout::new(path.join(&index.tag));
                layout
                    .append_index(&index.index, Some(index.tag.as_str()))
                    .context(error::StoreSnafu { tag: &index.tag })?;
                info!(
                    "Delegated target index manifest layout saved to {}",
                    layout.path().display()
                );
            }
        }
        Destination::Registry(repository) => {
            push(&session.registry(), repository, &targets, &delegated).await?;
        }
    }

    ensure!(failed.is_empty(), error::DelegatedRolesSnafu { roles: failed });
    Ok(())
}

/// Registry references for every target image and delegated index, in push order.
struct PushPlan<'a> {
    images: Vec<(Reference, &'a MirrorImage)>,
    indexes: Vec<(Reference, &'a MirrorIndex)>,
}

impl<'a> PushPlan<'a> {
    /// Fails on the first artifact whose tag is not a valid registry tag.
    fn new(
        repository: &str,
        targets: &'a [MirrorImage],
        delegated: &'a [MirrorIndex],
    ) -> Result<Self> {
        let images = targets
            .iter()
            .map(|target| {
                Destination::tagged(repository, &target.tag)
                    .context(error::TargetTagSnafu { tag: &target.tag })
                    .map(|reference| (reference, target))
            })
            .collect::<Result<Vec<_>>>()?;
        let indexes = delegated
            .iter()
            .map(|index| {
                Destination::tagged(repository, &index.tag)
                    .context(error::RoleTagSnafu {
                        role: &index.role,
                        tag: &index.tag,
                    })
                    .map(|reference| (reference, index))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { images, indexes })
    }
}

/// Pushes everything to `repository`.  All references are resolved before the first push.
async fn push<P: Publisher>(
    publisher: &P,
    repository: &str,
    targets: &[MirrorImage],
    delegated: &[MirrorIndex],
) -> Result<()> {
    let plan = PushPlan::new(repository, targets, delegated)?;
    for (reference, target) in plan.images {
        publisher
            .push_image(&target.image, &reference)
            .await
            .context(error::StoreSnafu { tag: &target.tag })?;
        info!("Target manifest pushed to {}", reference.whole());
    }
    for (reference, index) in plan.indexes {
        publisher
            .push_index(&index.index, &reference)
            .await
            .context(error::StoreSnafu { tag: &index.tag })?;
        info!(
            "Delegated target index manifest pushed to {}",
            reference.whole()
        );
    }
    Ok(())
}

/// Mirrors targets
pub(crate) async fn run(args: &Args, targets_args: &TargetsArgs) -> Result<()> {
    for url in [&targets_args.metadata, &targets_args.source].into_iter().flatten() {
        super::check_source(url).context(error::SessionSnafu)?;
    }
    targets_args
        .destination
        .ensure_untagged()
        .context(error::DestinationSnafu)?;
    info!(
        "Mirroring TUF targets {} to {}",
        targets_args
            .source
            .as_ref()
            .map(Url::as_str)
            .unwrap_or("from the trust root"),
        targets_args.destination
    );

    let session = Session::load(
        args,
        targets_args.metadata.as_ref(),
        targets_args.source.as_ref(),
    )
    .await
    .context(error::SessionSnafu)?;
    mirror(&session, args.full, &targets_args.destination).await
}

mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub enum Error {
        #[snafu(display("Failed to mirror delegated role(s): {}", roles.join(", ")))]
        DelegatedRoles { roles: Vec<String> },

        #[snafu(display("{}", source))]
        Destination {
            source: crate::cmd::destination::Error,
        },

        #[snafu(display(
            "Delegated role '{}' cannot be pushed under tag '{}': {}",
            role,
            tag,
            source
        ))]
        RoleTag {
            role: String,
            tag: String,
            source: crate::cmd::destination::Error,
        },

        #[snafu(display("{}", source))]
        Session { source: crate::cmd::Error },

        #[snafu(display("Failed to store '{}': {}", tag, source))]
        Store {
            tag: String,
            source: tuf_mirror::oci::Error,
        },

        #[snafu(display("Target '{}' cannot be pushed under its name as a tag: {}", tag, source))]
        TargetTag {
            tag: String,
            source: crate::cmd::destination::Error,
        },

        #[snafu(display("Failed to create target mirrors: {}", source))]
        Targets { source: tuf_mirror::Error },
    }
}
pub use error::Error;
pub type Result<T> = std::result::Result<T, error::Error>;
