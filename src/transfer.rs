//! Per-request scratch directories for materialized downloads.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tokio::{runtime::Handle, time::Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const STALE_JOB_AGE: Duration = Duration::from_secs(2 * 60 * 60);

/// A job directory that is removed when the value is dropped.
///
/// The download response body owns the job, so the directory disappears once
/// the body has been sent or the client went away. Inside a runtime the
/// removal runs on the blocking pool; otherwise it happens inline.
#[derive(Debug)]
pub struct TransferJob {
    dir: PathBuf,
}

impl TransferJob {
    pub async fn create(transfer_dir: &Path) -> std::io::Result<Self> {
        let dir = transfer_dir.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}

impl Drop for TransferJob {
    fn drop(&mut self) {
        let dir = std::mem::take(&mut self.dir);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_job_dir(&dir));
            }
            Err(_) => remove_job_dir(&dir),
        }
    }
}

fn remove_job_dir(dir: &Path) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => debug!("removed transfer job {:?}", dir),
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => info!("could not remove transfer job {:?}: {error}", dir),
    }
}

/// Removes entries of `transfer_dir` whose last modification is at least `max_age` old.
pub async fn cleanup_stale_jobs(transfer_dir: &Path, max_age: Duration) {
    let mut entries = match tokio::fs::read_dir(transfer_dir).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("cannot open transfer dir for cleanup: {error}");
            }
            return;
        }
    };

    let now = std::time::SystemTime::now();

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                warn!("cannot iterate transfer dir for cleanup: {error}");
                break;
            }
        };

        let path = entry.path();
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified_at| now.duration_since(modified_at).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        let removal = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match removal {
            Ok(()) => info!("removed stale transfer entry {:?}", path),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!("cannot remove stale transfer entry {:?}: {error}", path),
        }
    }
}
