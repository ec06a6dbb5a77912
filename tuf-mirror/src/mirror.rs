//! The mirror session shared by every engine operation.

use crate::error::{self, Result};
use crate::provider::{
    Role, TargetDescriptor, TrustedMetadata, TrustedMetadataProvider, TufRepoProvider,
};
use log::debug;
use snafu::{ensure, IntoError, ResultExt};
use std::ffi::OsStr;
use std::future::Future;
use std::num::NonZeroUsize;
use std::path::{Component, Path, PathBuf};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Upper bound on the default number of concurrent target downloads.
const MAX_DOWNLOAD_THREADS: usize = 16;

/// Parent of the per-role download directories of delegated roles.
const DELEGATED_DIR: &str = "delegated";

/// Tuning for a mirror session.
#[derive(Debug, Clone)]
pub struct MirrorSettings {
    /// Working directory: the TUF datastore and downloaded targets live below it
    pub tuf_path: PathBuf,
    pub max_concurrent_downloads: NonZeroUsize,
    /// Canceling this token aborts in-flight operations with [`Error::Canceled`]
    ///
    /// [`Error::Canceled`]: crate::Error::Canceled
    pub cancel: CancellationToken,
}

impl MirrorSettings {
    pub fn new<P: Into<PathBuf>>(tuf_path: P) -> Self {
        Self {
            tuf_path: tuf_path.into(),
            max_concurrent_downloads: default_concurrency(),
            cancel: CancellationToken::new(),
        }
    }
}

/// One download per CPU, capped at [`MAX_DOWNLOAD_THREADS`].
pub fn default_concurrency() -> NonZeroUsize {
    NonZeroUsize::new(num_cpus::get().min(MAX_DOWNLOAD_THREADS)).unwrap_or(NonZeroUsize::MIN)
}

/// A mirroring session over one trusted repository.
#[derive(Debug)]
pub struct TufMirror<P> {
    pub(crate) provider: P,
    tuf_path: PathBuf,
    downloads: Semaphore,
    cancel: CancellationToken,
}

impl TufMirror<TufRepoProvider> {
    /// Loads and verifies the repository, keeping its datastore under `<tuf_path>/metadata`.
    pub async fn load(
        root: &[u8],
        metadata_base_url: Url,
        targets_base_url: Url,
        settings: MirrorSettings,
    ) -> Result<Self> {
        let datastore = settings.tuf_path.join("metadata");
        tokio::fs::create_dir_all(&datastore)
            .await
            .context(error::DatastoreSnafu { path: &datastore })?;
        let cancel = settings.cancel.clone();
        let load = TufRepoProvider::load(root, metadata_base_url, targets_base_url, &datastore);
        let provider = tokio::select! {
            biased;
            _ = cancel.cancelled() => return error::CanceledSnafu.fail(),
            provider = load => provider.context(error::MetadataSnafu)?,
        };
        Ok(Self::new(provider, settings))
    }
}

impl<P: TrustedMetadataProvider> TufMirror<P> {
    pub fn new(provider: P, settings: MirrorSettings) -> Self {
        Self {
            provider,
            tuf_path: settings.tuf_path,
            downloads: Semaphore::new(settings.max_concurrent_downloads.get()),
            cancel: settings.cancel,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn tuf_path(&self) -> &Path {
        &self.tuf_path
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Where downloaded target files are kept.
    pub fn download_dir(&self) -> PathBuf {
        self.tuf_path.join("download")
    }

    pub(crate) fn trusted_metadata(&self) -> Result<TrustedMetadata> {
        self.provider.metadata().context(error::MetadataSnafu)
    }

    /// Runs `fut` unless the session is canceled first.
    pub(crate) async fn cancellable<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => error::CanceledSnafu.fail(),
            res = fut => res,
        }
    }

    /// Where targets of the top-level targets role are downloaded.
    pub(crate) fn targets_download_dir(&self) -> PathBuf {
        self.download_dir().join(Role::Targets.to_string())
    }

    /// Where targets of delegated `role` are downloaded.  The role name must be a single path
    /// segment.
    pub(crate) fn delegated_download_dir(&self, role: &str) -> Result<PathBuf> {
        let mut components = Path::new(role).components();
        ensure!(
            matches!(
                (components.next(), components.next()),
                (Some(Component::Normal(name)), None) if name == OsStr::new(role)
            ),
            error::InvalidRoleNameSnafu { role }
        );
        Ok(self.download_dir().join(DELEGATED_DIR).join(role))
    }

    /// Downloads one target listed by `role` into `dest`, holding a download permit for the
    /// duration.
    pub(crate) async fn download(
        &self,
        role: &str,
        dest: &Path,
        target: &TargetDescriptor,
    ) -> Result<Vec<u8>> {
        self.cancellable(async {
            let _permit = self
                .downloads
                .acquire()
                .await
                .map_err(|_| error::CanceledSnafu.build())?;
            debug!("Downloading target '{}' of role '{}'", target.path, role);
            let downloaded = self
                .provider
                .download_target(&target.path, dest)
                .await
                .map_err(|e| match e {
                    crate::provider::Error::HashMismatch { .. } => {
                        error::HashMismatchSnafu {
                            role,
                            path: &target.path,
                        }
                        .into_error(e)
                    }
                    _ => error::DownloadFailureSnafu {
                        role,
                        path: &target.path,
                    }
                    .into_error(e),
                })?;
            Ok(downloaded.data)
        })
        .await
    }
}
