use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::OrdersApi;
use crate::error::Error;
use crate::lifecycle::OrderState;

/// Downloads finished orders into one directory per month under `base_dir`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadTrigger {
    base_dir: PathBuf,
}

impl DownloadTrigger {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn month_dir(&self, order_name: &str) -> PathBuf {
        self.base_dir.join(order_name)
    }

    /// Creates the month directory if needed and downloads into it. A
    /// directory created by this call is removed again when the download
    /// fails or is cancelled before anything was written to it.
    pub async fn download(
        &self,
        client: &impl OrdersApi,
        order_id: &str,
        order_name: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, Error> {
        let dir = self.month_dir(order_name);
        let failed = |cause: anyhow::Error| Error::DownloadFailed {
            order_id: order_id.to_string(),
            cause,
        };

        let created = !fs::try_exists(&dir).await.unwrap_or(false);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Creating {}", dir.display()))
            .map_err(failed)?;
        let guard = CreatedDir {
            path: created.then(|| dir.clone()),
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled {
                order_id: Some(order_id.to_string()),
                last_state: OrderState::Success,
            }),
            downloaded = client.download_order(order_id, &dir) => downloaded.map_err(failed),
        };

        match result {
            Ok(files) => {
                guard.keep();
                info!(%order_id, files = files.len(), dir = %dir.display(), "Order downloaded");
                Ok(dir)
            }
            Err(e) => {
                guard.remove_if_empty().await;
                Err(e)
            }
        }
    }
}

/// A directory this run created, cleaned up unless explicitly kept.
struct CreatedDir {
    path: Option<PathBuf>,
}

impl CreatedDir {
    fn keep(mut self) {
        self.path = None;
    }

    async fn remove_if_empty(mut self) {
        if let Some(path) = self.path.take() {
            remove_empty_dir(&path).await;
        }
    }
}

impl Drop for CreatedDir {
    // Reached when the download future is dropped mid-flight
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_dir(&path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(dir = %path.display(), "Leaving partially downloaded directory: {e}");
                }
            }
        }
    }
}

async fn remove_empty_dir(path: &Path) {
    // remove_dir refuses non-empty directories, which is what we want
    if let Err(e) = fs::remove_dir(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(dir = %path.display(), "Leaving partially downloaded directory: {e}");
        }
    }
}
