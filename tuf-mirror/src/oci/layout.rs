//! Writes images and indexes into an OCI image layout directory: an `oci-layout` marker,
//! content-addressed blobs under `blobs/sha256`, and an `index.json` naming the top-level
//! manifests.

use super::{error, Image, Index, Result, INDEX_MEDIA_TYPE, MANIFEST_MEDIA_TYPE, REF_NAME_ANNOTATION};
use log::{debug, trace};
use oci_client::manifest::{ImageIndexEntry, OciImageIndex};
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const LAYOUT_FILE: &str = "oci-layout";
const LAYOUT_VERSION: &str = "1.0.0";
const INDEX_FILE: &str = "index.json";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutMarker {
    image_layout_version: String,
}

/// A local OCI image layout.
#[derive(Debug, Clone)]
pub struct OciLayout {
    path: PathBuf,
}

impl OciLayout {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stores an image's blobs and manifest and lists it in `index.json`, named `ref_name` when
    /// given.  Returns the manifest digest.
    pub fn append_image(&self, image: &Image, ref_name: Option<&str>) -> Result<String> {
        self.init()?;
        let (digest, size) = self.write_image(image)?;
        self.add_to_index(ImageIndexEntry {
            media_type: MANIFEST_MEDIA_TYPE.to_string(),
            digest: digest.clone(),
            size,
            platform: None,
            annotations: ref_annotation(ref_name),
        })?;
        debug!("Wrote image {} to '{}'", digest, self.path.display());
        Ok(digest)
    }

    /// Stores every image of the index, then the index itself.  Returns the index digest.
    pub fn append_index(&self, index: &Index, ref_name: Option<&str>) -> Result<String> {
        self.init()?;
        for entry in index.entries() {
            self.write_image(entry.image())?;
        }
        let raw = index.raw_manifest()?;
        let digest = self.write_blob(&raw)?;
        self.add_to_index(ImageIndexEntry {
            media_type: INDEX_MEDIA_TYPE.to_string(),
            digest: digest.clone(),
            size: raw.len() as i64,
            platform: None,
            annotations: ref_annotation(ref_name),
        })?;
        debug!("Wrote index {} to '{}'", digest, self.path.display());
        Ok(digest)
    }

    /// Creates the layout skeleton if it doesn't exist, and refuses layouts of another version.
    fn init(&self) -> Result<()> {
        let blobs = self.blob_dir();
        fs::create_dir_all(&blobs).context(error::CreateDirSnafu { path: &blobs })?;

        let marker_path = self.path.join(LAYOUT_FILE);
        if marker_path.exists() {
            let data = fs::read(&marker_path).context(error::ReadFileSnafu { path: &marker_path })?;
            let marker: LayoutMarker = serde_json::from_slice(&data)
                .context(error::LayoutIndexSnafu { path: &marker_path })?;
            ensure!(
                marker.image_layout_version == LAYOUT_VERSION,
                error::UnsupportedLayoutSnafu {
                    path: &marker_path,
                    version: marker.image_layout_version,
                }
            );
        } else {
            let marker = LayoutMarker {
                image_layout_version: LAYOUT_VERSION.to_string(),
            };
            let data = serde_json::to_vec(&marker).context(error::SerializeSnafu {
                what: "oci-layout marker",
            })?;
            write(&marker_path, &data)?;
        }

        let index_path = self.path.join(INDEX_FILE);
        if !index_path.exists() {
            self.write_index(&empty_index())?;
        }
        Ok(())
    }

    fn blob_dir(&self) -> PathBuf {
        self.path.join("blobs").join("sha256")
    }

    /// Writes a blob under its digest.  Existing blobs are left alone since their content is
    /// fixed by their name.
    fn write_blob(&self, data: &[u8]) -> Result<String> {
        let digest = super::sha256_digest(data);
        let hex = digest.trim_start_matches("sha256:");
        let path = self.blob_dir().join(hex);
        if path.exists() {
            trace!("Blob {} already present", digest);
        } else {
            write(&path, data)?;
        }
        Ok(digest)
    }

    /// Writes layers, config and manifest; returns the manifest digest and size.
    fn write_image(&self, image: &Image) -> Result<(String, i64)> {
        for layer in image.layers() {
            self.write_blob(layer.data())?;
        }
        self.write_blob(&image.config()?)?;
        let raw = image.raw_manifest()?;
        let digest = self.write_blob(&raw)?;
        Ok((digest, raw.len() as i64))
    }

    fn read_index(&self) -> Result<OciImageIndex> {
        let path = self.path.join(INDEX_FILE);
        let data = fs::read(&path).context(error::ReadFileSnafu { path: &path })?;
        serde_json::from_slice(&data).context(error::LayoutIndexSnafu { path })
    }

    fn write_index(&self, index: &OciImageIndex) -> Result<()> {
        let data = serde_json::to_vec_pretty(index).context(error::SerializeSnafu {
            what: "layout index",
        })?;
        write(&self.path.join(INDEX_FILE), &data)
    }

    /// Appends a manifest to `index.json`.  A previous manifest with the same ref name is
    /// replaced so rerunning a mirror doesn't accumulate stale entries.
    fn add_to_index(&self, entry: ImageIndexEntry) -> Result<()> {
        let mut index = self.read_index()?;
        let ref_name = entry
            .annotations
            .as_ref()
            .and_then(|a| a.get(REF_NAME_ANNOTATION))
            .cloned();
        if let Some(ref_name) = ref_name {
            index.manifests.retain(|existing| {
                existing
                    .annotations
                    .as_ref()
                    .and_then(|a| a.get(REF_NAME_ANNOTATION))
                    != Some(&ref_name)
            });
        }
        index.manifests.push(entry);
        self.write_index(&index)
    }
}

fn empty_index() -> OciImageIndex {
    OciImageIndex {
        schema_version: 2,
        media_type: Some(INDEX_MEDIA_TYPE.to_string()),
        manifests: Vec::new(),
        artifact_type: None,
        annotations: None,
    }
}

fn ref_annotation(ref_name: Option<&str>) -> Option<BTreeMap<String, String>> {
    ref_name.map(|name| {
        let mut annotations = BTreeMap::new();
        annotations.insert(REF_NAME_ANNOTATION.to_string(), name.to_string());
        annotations
    })
}

fn write(path: &Path, data: &[u8]) -> Result<()> {
    fs::write(path, data).context(error::WriteFileSnafu { path })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::oci::{file_annotation, Layer, TUF_TARGET_MEDIA_TYPE};

    fn image(name: &str, data: &[u8]) -> Image {
        let mut image = Image::new();
        image.append(Layer::new(
            TUF_TARGET_MEDIA_TYPE,
            data.to_vec(),
            file_annotation(name),
        ));
        image
    }

    fn blob(layout: &OciLayout, digest: &str) -> Vec<u8> {
        let hex = digest.trim_start_matches("sha256:");
        fs::read(layout.path().join("blobs/sha256").join(hex)).unwrap()
    }

    #[test]
    fn writes_layout_skeleton_and_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OciLayout::new(dir.path());
        let image = image("abc.a.txt", b"hello");

        let digest = layout.append_image(&image, Some("tuf-metadata")).unwrap();
        assert_eq!(digest, image.digest().unwrap());

        let marker = fs::read_to_string(dir.path().join("oci-layout")).unwrap();
        assert!(marker.contains("\"imageLayoutVersion\":\"1.0.0\""));
        assert_eq!(blob(&layout, &crate::oci::sha256_digest(b"hello")), b"hello");
        assert_eq!(blob(&layout, &digest), image.raw_manifest().unwrap());

        let index = layout.read_index().unwrap();
        assert_eq!(index.manifests.len(), 1);
        assert_eq!(index.manifests[0].digest, digest);
        assert_eq!(
            index.manifests[0].annotations.as_ref().unwrap()[REF_NAME_ANNOTATION],
            "tuf-metadata"
        );
    }

    #[test]
    fn same_ref_name_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OciLayout::new(dir.path());
        layout.append_image(&image("a", b"one"), Some("latest")).unwrap();
        let second = layout.append_image(&image("a", b"two"), Some("latest")).unwrap();
        layout.append_image(&image("b", b"three"), Some("other")).unwrap();

        let index = layout.read_index().unwrap();
        assert_eq!(index.manifests.len(), 2);
        assert_eq!(index.manifests[0].digest, second);
    }

    #[test]
    fn index_children_are_stored() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OciLayout::new(dir.path());
        let child = image("01.logo.png", b"png");
        let mut index = Index::new();
        index.append(child.clone(), file_annotation("images/01.logo.png"));

        let digest = layout.append_index(&index, Some("images")).unwrap();
        assert_eq!(digest, index.digest().unwrap());
        assert_eq!(blob(&layout, &child.digest().unwrap()), child.raw_manifest().unwrap());
        let stored: OciImageIndex = serde_json::from_slice(&blob(&layout, &digest)).unwrap();
        assert_eq!(stored.manifests[0].digest, child.digest().unwrap());
        assert_eq!(
            layout.read_index().unwrap().manifests[0].media_type,
            INDEX_MEDIA_TYPE
        );
    }

    #[test]
    fn rejects_foreign_layout_version() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("oci-layout"),
            r#"{"imageLayoutVersion":"2.0.0"}"#,
        )
        .unwrap();
        let layout = OciLayout::new(dir.path());
        assert!(matches!(
            layout.append_image(&image("a", b"a"), None),
            Err(crate::oci::Error::UnsupportedLayout { .. })
        ));
    }
}
