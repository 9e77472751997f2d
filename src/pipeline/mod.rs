//! Request pipelines: validate the caller's input, consult the resolver,
//! apply the format policy and hand back something the HTTP layer can send.

use std::{path::PathBuf, sync::Arc};

use tokio::{sync::Semaphore, time::Duration};

use crate::{
    error::PipelineError, policy::FormatPolicy, resolver::VideoResolver, validation::VideoRef,
};

mod download;
mod info;

pub use download::DownloadResult;
pub use info::{FormatEntry, InfoResult};

pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECONDS: u64 = 10 * 60;

#[derive(Clone)]
pub struct VideoService {
    resolver: Arc<dyn VideoResolver>,
    policy: FormatPolicy,
    transfer_dir: PathBuf,
    download_semaphore: Arc<Semaphore>,
    download_timeout: Duration,
}

impl VideoService {
    pub fn new(
        resolver: Arc<dyn VideoResolver>,
        policy: FormatPolicy,
        transfer_dir: PathBuf,
        max_concurrent_downloads: usize,
    ) -> Self {
        Self {
            resolver,
            policy,
            transfer_dir,
            download_semaphore: Arc::new(Semaphore::new(max_concurrent_downloads.max(1))),
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECONDS),
        }
    }
}

fn require_video_ref(url: Option<&str>) -> Result<VideoRef, PipelineError> {
    let url = url
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(PipelineError::InvalidInput("Missing url."))?;

    VideoRef::parse(url).ok_or(PipelineError::InvalidInput("Invalid video URL."))
}
