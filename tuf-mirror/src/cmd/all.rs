//! The all subcommand mirrors metadata and targets from one loaded repository.

use super::destination::Destination;
use super::{metadata, targets, Session};
use crate::Args;
use clap::Parser;
use log::info;
use snafu::ResultExt;
use url::Url;

/// Mirrors TUF metadata and targets
#[derive(Debug, Parser)]
pub(crate) struct AllArgs {
    #[arg(long)]
    /// Metadata URL; defaults to the trust root's, then to the Docker TUF staging repository
    source_metadata: Option<Url>,

    #[arg(long)]
    /// oci://<path> or docker://<reference> for the metadata manifest
    dest_metadata: Destination,

    #[arg(long)]
    /// Targets URL; defaults to the trust root's, then to the Docker TUF staging repository
    source_targets: Option<Url>,

    #[arg(long)]
    /// oci://<directory> or docker://<repository> without a tag, for targets
    dest_targets: Destination,
}

/// Mirrors metadata, then targets
pub(crate) async fn run(args: &Args, all_args: &AllArgs) -> Result<()> {
    for url in [&all_args.source_metadata, &all_args.source_targets]
        .into_iter()
        .flatten()
    {
        super::check_source(url).context(error::SessionSnafu)?;
    }
    // Fail on a tagged targets destination before anything is fetched.
    all_args
        .dest_targets
        .ensure_untagged()
        .context(error::DestinationSnafu)?;
    info!(
        "Mirroring TUF metadata to {} and targets to {}",
        all_args.dest_metadata, all_args.dest_targets
    );

    let session = Session::load(
        args,
        all_args.source_metadata.as_ref(),
        all_args.source_targets.as_ref(),
    )
    .await
    .context(error::SessionSnafu)?;

    metadata::mirror(&session, &all_args.dest_metadata)
        .await
        .context(error::MetadataSnafu)?;
    targets::mirror(&session, args.full, &all_args.dest_targets)
        .await
        .context(error::TargetsSnafu)?;
    Ok(())
}

mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub enum Error {
        #[snafu(display("{}", source))]
        Destination {
            source: crate::cmd::destination::Error,
        },

        #[snafu(display("{}", source))]
        Metadata { source: crate::cmd::metadata::Error },

        #[snafu(display("{}", source))]
        Session { source: crate::cmd::Error },

        #[snafu(display("{}", source))]
        Targets { source: crate::cmd::targets::Error },
    }
}
pub use error::Error;
pub type Result<T> = std::result::Result<T, error::Error>;
