//! The metadata subcommand mirrors top-level TUF metadata as one OCI image.

use super::destination::Destination;
use super::Session;
use crate::Args;
use clap::Parser;
use log::info;
use snafu::ResultExt;
use tuf_mirror::oci::registry::parse_reference;
use tuf_mirror::OciLayout;
use url::Url;

/// Ref name given to the metadata manifest inside an OCI layout.
const LAYOUT_REF_NAME: &str = "latest";

/// Mirrors TUF metadata to an OCI layout or registry
#[derive(Debug, Parser)]
pub(crate) struct MetadataArgs {
    #[arg(short, long)]
    /// Metadata URL; defaults to the trust root's, then to the Docker TUF staging repository
    source: Option<Url>,

    #[arg(short, long)]
    /// oci://<path> or docker://<reference>
    destination: Destination,
}

/// Builds the metadata manifest and stores it at `destination`.
pub(crate) async fn mirror(session: &Session, destination: &Destination) -> Result<()> {
    let image = session
        .mirror
        .create_metadata_manifest()
        .await
        .context(error::ManifestSnafu)?;

    match destination {
        Destination::Layout(path) => {
            OciLayout::new(path)
                .append_image(&image, Some(LAYOUT_REF_NAME))
                .context(error::StoreSnafu {
                    destination: destination.to_string(),
                })?;
            info!("Metadata manifest layout saved to {}", path.display());
        }
        Destination::Registry(reference) => {
            let reference = parse_reference(reference).context(error::StoreSnafu {
                destination: destination.to_string(),
            })?;
            session
                .registry()
                .push_image(&image, &reference)
                .await
                .context(error::StoreSnafu {
                    destination: destination.to_string(),
                })?;
            info!("Metadata manifest pushed to {}", reference.whole());
        }
    }
    Ok(())
}

/// Mirrors metadata
pub(crate) async fn run(args: &Args, metadata_args: &MetadataArgs) -> Result<()> {
    if let Some(source) = &metadata_args.source {
        super::check_source(source).context(error::SessionSnafu)?;
    }
    info!(
        "Mirroring TUF metadata {} to {}",
        metadata_args
            .source
            .as_ref()
            .map(Url::as_str)
            .unwrap_or("from the trust root"),
        metadata_args.destination
    );

    let session = Session::load(args, metadata_args.source.as_ref(), None)
        .await
        .context(error::SessionSnafu)?;
    mirror(&session, &metadata_args.destination).await
}

mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub enum Error {
        #[snafu(display("Failed to create metadata manifest: {}", source))]
        Manifest { source: tuf_mirror::Error },

        #[snafu(display("{}", source))]
        Session { source: crate::cmd::Error },

        #[snafu(display("Failed to store metadata manifest at {}: {}", destination, source))]
        Store {
            destination: String,
            source: tuf_mirror::oci::Error,
        },
    }
}
pub use error::Error;
pub type Result<T> = std::result::Result<T, error::Error>;
