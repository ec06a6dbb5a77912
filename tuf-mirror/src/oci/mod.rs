//! OCI image and image index model for mirrored TUF content, plus the sinks that store it.
//!
//! An [`Image`] is built by appending [`Layer`]s; its config blob and manifest are derived from
//! the layers on demand, so identical layers always produce identical digests.  An [`Index`]
//! groups images, one per entry, each entry carrying its own annotations.

pub mod layout;
pub mod registry;

pub use layout::OciLayout;
pub use registry::{Publisher, Registry};

use oci_client::manifest::{ImageIndexEntry, OciDescriptor, OciImageIndex, OciImageManifest};
use serde::Serialize;
use sha2::{Digest, Sha256};
use snafu::ResultExt;
use std::collections::BTreeMap;

pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
/// Media type of layers holding a signed TUF metadata document
pub const TUF_METADATA_MEDIA_TYPE: &str = "application/vnd.tuf.metadata+json";
/// Media type of layers holding a TUF target file
pub const TUF_TARGET_MEDIA_TYPE: &str = "application/vnd.tuf.target";
/// Identity annotation: the canonical TUF file name of a layer or index entry
pub const TUF_FILE_ANNOTATION: &str = "tuf.io/filename";
/// Names a manifest inside an OCI layout's `index.json`
pub const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

pub type Annotations = BTreeMap<String, String>;

/// `sha256:<hex>` digest of a blob.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// Annotations holding just the TUF identity annotation.
pub fn file_annotation<S: Into<String>>(name: S) -> Annotations {
    let mut annotations = Annotations::new();
    annotations.insert(TUF_FILE_ANNOTATION.to_string(), name.into());
    annotations
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    media_type: String,
    data: Vec<u8>,
    annotations: Annotations,
}

impl Layer {
    pub fn new<S: Into<String>>(media_type: S, data: Vec<u8>, annotations: Annotations) -> Self {
        Self {
            media_type: media_type.into(),
            data,
            annotations,
        }
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    pub fn digest(&self) -> String {
        sha256_digest(&self.data)
    }

    pub fn descriptor(&self) -> OciDescriptor {
        OciDescriptor {
            media_type: self.media_type.clone(),
            digest: self.digest(),
            size: self.data.len() as i64,
            urls: None,
            annotations: (!self.annotations.is_empty()).then(|| self.annotations.clone()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ImageConfig<'a> {
    architecture: &'a str,
    os: &'a str,
    config: BTreeMap<String, String>,
    rootfs: RootFs,
}

#[derive(Debug, Serialize)]
struct RootFs {
    #[serde(rename = "type")]
    kind: &'static str,
    diff_ids: Vec<String>,
}

/// An image under construction.  Builders only ever append layers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Image {
    layers: Vec<Layer>,
}

impl Image {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, layer: Layer) {
        self.layers.push(layer);
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Image config blob.  Layers are stored uncompressed, so diff IDs equal layer digests.
    pub fn config(&self) -> Result<Vec<u8>> {
        let config = ImageConfig {
            architecture: "",
            os: "",
            config: BTreeMap::new(),
            rootfs: RootFs {
                kind: "layers",
                diff_ids: self.layers.iter().map(Layer::digest).collect(),
            },
        };
        serde_json::to_vec(&config).context(error::SerializeSnafu { what: "image config" })
    }

    pub fn manifest(&self) -> Result<OciImageManifest> {
        let config = self.config()?;
        Ok(OciImageManifest {
            schema_version: 2,
            media_type: Some(MANIFEST_MEDIA_TYPE.to_string()),
            config: OciDescriptor {
                media_type: CONFIG_MEDIA_TYPE.to_string(),
                digest: sha256_digest(&config),
                size: config.len() as i64,
                urls: None,
                annotations: None,
            },
            layers: self.layers.iter().map(Layer::descriptor).collect(),
            subject: None,
            artifact_type: None,
            annotations: None,
        })
    }

    pub fn raw_manifest(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.manifest()?).context(error::SerializeSnafu {
            what: "image manifest",
        })
    }

    pub fn digest(&self) -> Result<String> {
        Ok(sha256_digest(&self.raw_manifest()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    image: Image,
    annotations: Annotations,
}

impl IndexEntry {
    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    fn index_entry(&self) -> Result<ImageIndexEntry> {
        let raw = self.image.raw_manifest()?;
        Ok(ImageIndexEntry {
            media_type: MANIFEST_MEDIA_TYPE.to_string(),
            digest: sha256_digest(&raw),
            size: raw.len() as i64,
            platform: None,
            annotations: (!self.annotations.is_empty()).then(|| self.annotations.clone()),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    entries: Vec<IndexEntry>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, image: Image, annotations: Annotations) {
        self.entries.push(IndexEntry { image, annotations });
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn manifest(&self) -> Result<OciImageIndex> {
        Ok(OciImageIndex {
            schema_version: 2,
            media_type: Some(INDEX_MEDIA_TYPE.to_string()),
            manifests: self
                .entries
                .iter()
                .map(IndexEntry::index_entry)
                .collect::<Result<Vec<_>>>()?,
            artifact_type: None,
            annotations: None,
        })
    }

    pub fn raw_manifest(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.manifest()?).context(error::SerializeSnafu {
            what: "image index",
        })
    }

    pub fn digest(&self) -> Result<String> {
        Ok(sha256_digest(&self.raw_manifest()?))
    }
}

mod error {
    use snafu::Snafu;
    use std::io;
    use std::path::PathBuf;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub enum Error {
        #[snafu(display("Failed to create directory '{}': {}", path.display(), source))]
        CreateDir { path: PathBuf, source: io::Error },

        #[snafu(display("Invalid OCI layout index '{}': {}", path.display(), source))]
        LayoutIndex {
            path: PathBuf,
            source: serde_json::Error,
        },

        #[snafu(display("Failed to push '{}': {}", reference, source))]
        Push {
            reference: String,
            source: oci_client::errors::OciDistributionError,
        },

        #[snafu(display("Failed to read '{}': {}", path.display(), source))]
        ReadFile { path: PathBuf, source: io::Error },

        #[snafu(display("Invalid image reference '{}': {}", reference, source))]
        Reference {
            reference: String,
            source: oci_client::ParseError,
        },

        #[snafu(display("Failed to serialize {}: {}", what, source))]
        Serialize {
            what: &'static str,
            source: serde_json::Error,
        },

        #[snafu(display("Unsupported OCI layout version '{}' in '{}'", version, path.display()))]
        UnsupportedLayout { path: PathBuf, version: String },

        #[snafu(display("Failed to write '{}': {}", path.display(), source))]
        WriteFile { path: PathBuf, source: io::Error },
    }
}
pub use error::Error;
pub type Result<T> = std::result::Result<T, error::Error>;

#[cfg(test)]
mod test {
    use super::*;

    fn image(names: &[(&str, &[u8])]) -> Image {
        let mut image = Image::new();
        for (name, data) in names {
            image.append(Layer::new(
                TUF_TARGET_MEDIA_TYPE,
                data.to_vec(),
                file_annotation(*name),
            ));
        }
        image
    }

    #[test]
    fn manifest_describes_layers() {
        let image = image(&[("a", b"alpha"), ("b", b"beta")]);
        let manifest = image.manifest().unwrap();
        assert_eq!(manifest.schema_version, 2);
        assert_eq!(manifest.media_type.as_deref(), Some(MANIFEST_MEDIA_TYPE));
        assert_eq!(manifest.config.media_type, CONFIG_MEDIA_TYPE);
        assert_eq!(manifest.layers.len(), 2);
        assert_eq!(manifest.layers[1].digest, sha256_digest(b"beta"));
        assert_eq!(manifest.layers[1].size, 4);
        assert_eq!(
            manifest.layers[0].annotations.as_ref().unwrap()[TUF_FILE_ANNOTATION],
            "a"
        );
    }

    #[test]
    fn config_lists_diff_ids() {
        let image = image(&[("a", b"alpha")]);
        let config: serde_json::Value = serde_json::from_slice(&image.config().unwrap()).unwrap();
        assert_eq!(config["rootfs"]["type"], "layers");
        assert_eq!(config["rootfs"]["diff_ids"][0], sha256_digest(b"alpha"));
    }

    #[test]
    fn digests_are_deterministic() {
        let first = image(&[("a", b"alpha")]);
        let second = image(&[("a", b"alpha")]);
        assert_eq!(first.digest().unwrap(), second.digest().unwrap());
        assert_ne!(
            first.digest().unwrap(),
            image(&[("b", b"alpha")]).digest().unwrap()
        );
    }

    #[test]
    fn index_entries_point_at_images() {
        let child = image(&[("x", b"x")]);
        let mut index = Index::new();
        index.append(child.clone(), file_annotation("dir/x"));
        let manifest = index.manifest().unwrap();
        assert_eq!(manifest.media_type.as_deref(), Some(INDEX_MEDIA_TYPE));
        assert_eq!(manifest.manifests.len(), 1);
        assert_eq!(manifest.manifests[0].digest, child.digest().unwrap());
        assert_eq!(manifest.manifests[0].media_type, MANIFEST_MEDIA_TYPE);
        assert_eq!(
            manifest.manifests[0].annotations.as_ref().unwrap()[TUF_FILE_ANNOTATION],
            "dir/x"
        );
    }
}
