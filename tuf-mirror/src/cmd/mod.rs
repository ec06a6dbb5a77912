//! Subcommands, and the session setup they share: config, trust anchor, and cancellation.

pub(crate) mod all;
pub(crate) mod destination;
pub(crate) mod metadata;
pub(crate) mod targets;

use crate::Args;
use log::{debug, info, warn};
use snafu::{ensure, ResultExt};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tuf_mirror::mirror::default_concurrency;
use tuf_mirror::{MirrorSettings, Registry, TufMirror, TufRepoProvider};
use tuf_mirror_config::{MirrorConfig, TrustAnchor, DEFAULT_METADATA_URL, DEFAULT_TARGETS_URL};
use url::Url;

/// Mirror.toml is picked up from the working directory unless --config-path says otherwise.
const DEFAULT_CONFIG_FILE: &str = "Mirror.toml";

/// Source URL schemes the TUF transport can fetch from.
const SOURCE_SCHEMES: &[&str] = &["https", "http", "file"];

/// A loaded repository plus what's needed to publish from it.
pub(crate) struct Session {
    pub(crate) mirror: TufMirror<TufRepoProvider>,
    config: MirrorConfig,
}

impl Session {
    /// Loads config and the trust anchor, then loads and verifies the repository.  Source URLs
    /// given on the command line win over those of the trust root, which win over the defaults.
    pub(crate) async fn load(
        args: &Args,
        metadata_url: Option<&Url>,
        targets_url: Option<&Url>,
    ) -> Result<Self> {
        let config = match &args.config_path {
            Some(path) => MirrorConfig::from_path(path),
            None => MirrorConfig::from_path_or_default(DEFAULT_CONFIG_FILE),
        }
        .context(error::ConfigSnafu)?;
        debug!("Trust roots configured: {:?}", config.roots.keys());

        let anchor = trust_anchor(&config, &args.tuf_root, args.root_role_path.as_deref())?;
        info!("Using trust root '{}'", anchor.name);

        let metadata_url =
            source_url(metadata_url, &anchor.metadata_base_url, DEFAULT_METADATA_URL)?;
        let targets_url =
            source_url(targets_url, &anchor.targets_base_url, DEFAULT_TARGETS_URL)?;
        debug!("Metadata from '{}', targets from '{}'", metadata_url, targets_url);

        let tuf_path = match &args.tuf_path {
            Some(path) => path.clone(),
            None => config.tuf_path().context(error::ConfigSnafu)?,
        };
        let timeout = args
            .timeout_secs
            .or(config.download.timeout_secs)
            .map(Duration::from_secs);
        let settings = MirrorSettings {
            tuf_path,
            max_concurrent_downloads: args
                .max_concurrent_downloads
                .or(config.download.max_concurrent_downloads)
                .unwrap_or_else(default_concurrency),
            cancel: cancellation(timeout),
        };

        let mirror = TufMirror::load(&anchor.root, metadata_url, targets_url, settings)
            .await
            .context(error::LoadSnafu)?;
        Ok(Self { mirror, config })
    }

    /// A registry client with the configured credentials.
    pub(crate) fn registry(&self) -> Registry {
        let registry = self.config.registry.clone().unwrap_or_default();
        Registry::new(
            registry.username,
            registry.password,
            registry.insecure_registries,
        )
    }
}

/// The trust anchor at `root_role_path` if given, otherwise the root named `tuf_root` in the
/// config.
fn trust_anchor(
    config: &MirrorConfig,
    tuf_root: &str,
    root_role_path: Option<&Path>,
) -> Result<TrustAnchor> {
    if let Some(path) = root_role_path {
        return TrustAnchor::from_path(path.display().to_string(), path)
            .context(error::ConfigSnafu);
    }
    ensure!(
        config.roots.contains_key(tuf_root),
        error::UnknownTrustRootSnafu { name: tuf_root }
    );
    config.trust_anchor(tuf_root).context(error::ConfigSnafu)
}

/// Checks a source URL given on the command line.
pub(crate) fn check_source(url: &Url) -> Result<()> {
    ensure!(
        SOURCE_SCHEMES.contains(&url.scheme()),
        error::UnsupportedSourceSnafu { url: url.as_str() }
    );
    Ok(())
}

fn source_url(given: Option<&Url>, configured: &Option<Url>, default: &str) -> Result<Url> {
    let url = match (given, configured) {
        (Some(url), _) | (None, Some(url)) => url.clone(),
        (None, None) => Url::parse(default).context(error::DefaultUrlSnafu { url: default })?,
    };
    check_source(&url)?;
    Ok(url)
}

/// A token canceled by Ctrl-C or, when given, once `timeout` passes.
fn cancellation(timeout: Option<Duration>) -> CancellationToken {
    let token = CancellationToken::new();

    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, canceling mirror");
            on_signal.cancel();
        }
    });

    if let Some(timeout) = timeout {
        let on_timeout = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!("Timed out after {}s, canceling mirror", timeout.as_secs());
            on_timeout.cancel();
        });
    }
    token
}

mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub enum Error {
        #[snafu(display("Error reading config: {}", source))]
        Config { source: tuf_mirror_config::Error },

        #[snafu(display("Invalid default URL '{}': {}", url, source))]
        DefaultUrl { url: String, source: url::ParseError },

        #[snafu(display("Failed to load TUF repository: {}", source))]
        Load { source: tuf_mirror::Error },

        #[snafu(display(
            "No trust root named '{}': define [roots.{}] in Mirror.toml or pass --root-role-path",
            name,
            name
        ))]
        UnknownTrustRoot { name: String },

        #[snafu(display(
            "Source not supported: '{}', expected an https://, http:// or file:// URL",
            url
        ))]
        UnsupportedSource { url: String },
    }
}
pub use error::Error;
pub type Result<T> = std::result::Result<T, error::Error>;
