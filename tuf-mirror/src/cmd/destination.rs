//! Parsing of `--destination` values.

use snafu::{ensure, OptionExt, ResultExt};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tuf_mirror::oci::registry::parse_reference;

const OCI_PREFIX: &str = "oci://";
const REGISTRY_PREFIX: &str = "docker://";

/// Where mirrored artifacts are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Destination {
    /// A local OCI image layout directory
    Layout(PathBuf),
    /// A registry reference, e.g. `registry.example.com/tuf/metadata:latest`
    Registry(String),
}

impl Destination {
    /// For targets the registry reference names a repository; each artifact gets its own tag.
    pub(crate) fn ensure_untagged(&self) -> Result<()> {
        if let Destination::Registry(reference) = self {
            // Only the last path segment can carry a tag; a colon before it is a registry port.
            let name = reference.rsplit('/').next().unwrap_or(reference);
            ensure!(
                !name.contains(':') && !name.contains('@'),
                error::TaggedSnafu { reference }
            );
        }
        Ok(())
    }

    /// The registry reference for one artifact of a repository destination.
    pub(crate) fn tagged(repository: &str, tag: &str) -> Result<oci_client::Reference> {
        let reference = format!("{}:{}", repository, tag);
        parse_reference(&reference).context(error::ReferenceSnafu { reference })
    }
}

impl FromStr for Destination {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(path) = s.strip_prefix(OCI_PREFIX) {
            let path = Some(path)
                .filter(|path| !path.is_empty())
                .context(error::EmptySnafu { destination: s })?;
            return Ok(Destination::Layout(PathBuf::from(path)));
        }
        if let Some(reference) = s.strip_prefix(REGISTRY_PREFIX) {
            parse_reference(reference).context(error::ReferenceSnafu { reference })?;
            return Ok(Destination::Registry(reference.to_string()));
        }
        error::UnsupportedSnafu { destination: s }.fail()
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Layout(path) => write!(f, "{}{}", OCI_PREFIX, path.display()),
            Destination::Registry(reference) => write!(f, "{}{}", REGISTRY_PREFIX, reference),
        }
    }
}

mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub enum Error {
        #[snafu(display("Destination '{}' names no path", destination))]
        Empty { destination: String },

        #[snafu(display("Invalid registry reference '{}': {}", reference, source))]
        Reference {
            reference: String,
            source: tuf_mirror::oci::Error,
        },

        #[snafu(display(
            "Destination registry reference should not have a tag: '{}'",
            reference
        ))]
        Tagged { reference: String },

        #[snafu(display(
            "Destination not supported: '{}', expected oci://<path> or docker://<reference>",
            destination
        ))]
        Unsupported { destination: String },
    }
}
pub use error::Error;
pub type Result<T> = std::result::Result<T, error::Error>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_layout_and_registry() {
        assert_eq!(
            "oci:///srv/mirror".parse::<Destination>().unwrap(),
            Destination::Layout(PathBuf::from("/srv/mirror"))
        );
        assert_eq!(
            "docker://localhost:5000/tuf/metadata:latest"
                .parse::<Destination>()
                .unwrap(),
            Destination::Registry("localhost:5000/tuf/metadata:latest".to_string())
        );
        assert!(matches!(
            "s3://bucket".parse::<Destination>(),
            Err(Error::Unsupported { .. })
        ));
        assert!(matches!(
            "oci://".parse::<Destination>(),
            Err(Error::Empty { .. })
        ));
    }

    #[test]
    fn targets_destination_must_be_untagged() {
        let untagged: Destination = "docker://localhost:5000/tuf/targets".parse().unwrap();
        assert!(untagged.ensure_untagged().is_ok());
        let tagged: Destination = "docker://localhost:5000/tuf/targets:v1".parse().unwrap();
        assert!(matches!(
            tagged.ensure_untagged(),
            Err(Error::Tagged { .. })
        ));
        let layout: Destination = "oci://out".parse().unwrap();
        assert!(layout.ensure_untagged().is_ok());
    }

    #[test]
    fn tags_are_appended() {
        let reference = Destination::tagged("localhost:5000/tuf/targets", "images").unwrap();
        assert_eq!(reference.repository(), "tuf/targets");
        assert_eq!(reference.tag(), Some("images"));
    }

    #[test]
    fn display_round_trips() {
        for raw in ["oci://out/dir", "docker://registry.example.com/tuf"] {
            assert_eq!(raw.parse::<Destination>().unwrap().to_string(), raw);
        }
    }
}
