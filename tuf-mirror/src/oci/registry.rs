//! Pushes images and indexes to an OCI distribution registry.

use super::{error, Image, Index, Result, CONFIG_MEDIA_TYPE};
use async_trait::async_trait;
use log::{debug, info};
use oci_client::client::{ClientConfig, ClientProtocol, Config, ImageLayer};
use oci_client::secrets::RegistryAuth;
use oci_client::{Client, Reference};
use snafu::ResultExt;
use std::str::FromStr;

/// Parses an image reference such as `registry.example.com/tuf/metadata:latest`.
pub fn parse_reference(reference: &str) -> Result<Reference> {
    Reference::from_str(reference).context(error::ReferenceSnafu { reference })
}

/// Publishes built artifacts under registry references.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Returns the manifest URL.
    async fn push_image(&self, image: &Image, reference: &Reference) -> Result<String>;

    /// Returns the index URL.
    async fn push_index(&self, index: &Index, reference: &Reference) -> Result<String>;
}

/// A registry sink.
pub struct Registry {
    client: Client,
    auth: RegistryAuth,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Credentials stay out of logs.
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

impl Registry {
    /// Basic auth is used when both `username` and `password` are given; otherwise access is
    /// anonymous.  Registries listed in `insecure` are reached over plain HTTP.
    pub fn new(username: Option<String>, password: Option<String>, insecure: Vec<String>) -> Self {
        let auth = match (username, password) {
            (Some(username), Some(password)) => RegistryAuth::Basic(username, password),
            _ => RegistryAuth::Anonymous,
        };
        let protocol = if insecure.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(insecure)
        };
        let client = Client::new(ClientConfig {
            protocol,
            ..Default::default()
        });
        Self { client, auth }
    }

    /// Pushes the image's layers, config and manifest.  Returns the manifest URL.
    pub async fn push_image(&self, image: &Image, reference: &Reference) -> Result<String> {
        let layers: Vec<ImageLayer> = image
            .layers()
            .iter()
            .map(|layer| {
                ImageLayer::new(
                    layer.data().to_vec(),
                    layer.media_type().to_string(),
                    Some(layer.annotations().clone()),
                )
            })
            .collect();
        let config = Config::new(image.config()?, CONFIG_MEDIA_TYPE.to_string(), None);
        let manifest = image.manifest()?;

        debug!(
            "Pushing {} layer(s) to '{}'",
            layers.len(),
            reference.whole()
        );
        let response = self
            .client
            .push(reference, &layers, config, &self.auth, Some(manifest))
            .await
            .context(error::PushSnafu {
                reference: reference.whole(),
            })?;
        info!("Pushed {}", response.manifest_url);
        Ok(response.manifest_url)
    }

    /// Pushes every image of the index by digest, then the index under `reference`.  Returns
    /// the index URL.
    pub async fn push_index(&self, index: &Index, reference: &Reference) -> Result<String> {
        for entry in index.entries() {
            let child = Reference::with_digest(
                reference.registry().to_string(),
                reference.repository().to_string(),
                entry.image().digest()?,
            );
            self.push_image(entry.image(), &child).await?;
        }

        let url = self
            .client
            .push_manifest_list(reference, &self.auth, index.manifest()?)
            .await
            .context(error::PushSnafu {
                reference: reference.whole(),
            })?;
        info!("Pushed index {}", url);
        Ok(url)
    }
}

#[async_trait]
impl Publisher for Registry {
    async fn push_image(&self, image: &Image, reference: &Reference) -> Result<String> {
        Registry::push_image(self, image, reference).await
    }

    async fn push_index(&self, index: &Index, reference: &Reference) -> Result<String> {
        Registry::push_index(self, index, reference).await
    }
}

#[cfg(test)]
mod test {
    use super::parse_reference;

    #[test]
    fn parses_tagged_reference() {
        let reference = parse_reference("localhost:5000/tuf/targets:images").unwrap();
        assert_eq!(reference.registry(), "localhost:5000");
        assert_eq!(reference.repository(), "tuf/targets");
        assert_eq!(reference.tag(), Some("images"));
    }

    #[test]
    fn rejects_garbage_reference() {
        assert!(parse_reference("not a reference!").is_err());
    }
}
