/*!
`tuf-mirror` copies a TUF repository into OCI storage.

The top-level metadata is bundled into one image whose layers are the signed role documents,
including every historical root version a client needs to walk the root chain.  Target files
become one single-layer image each, and each delegated role becomes one image index.  Every
layer and index entry carries a `tuf.io/filename` annotation holding the canonical TUF file
name, which is enough to lay the content back out as a TUF repository.

Metadata is loaded and verified through a [`TrustedMetadataProvider`]; the production provider
is [`TufRepoProvider`], built on `tough`.  Built artifacts are stored with an [`OciLayout`] or
pushed with a [`Registry`].
*/

pub mod chain;
mod error;
pub mod manifest;
pub mod mirror;
pub mod naming;
pub mod oci;
pub mod provider;
pub mod targets;

pub use chain::RootChain;
pub use error::{Error, Result};
pub use manifest::{MetadataFile, TufMetadata};
pub use mirror::{MirrorSettings, TufMirror};
pub use oci::{OciLayout, Publisher, Registry};
pub use provider::{Role, TrustedMetadataProvider, TufRepoProvider};
pub use targets::{DelegatedMirror, MirrorImage, MirrorIndex};
