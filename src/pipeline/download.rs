use std::{
    path::Path,
    pin::Pin,
    task::{Context, Poll},
};

use axum::body::Bytes;
use futures::{Stream, TryStreamExt};
use tokio::{fs::File, io::AsyncWriteExt, time::timeout};
use tokio_util::io::ReaderStream;
use tracing::info;

use super::{VideoService, require_video_ref};
use crate::{
    error::PipelineError,
    policy::mime_type_for,
    resolver::ByteStream,
    transfer::{STALE_JOB_AGE, TransferJob, cleanup_stale_jobs},
    validation::sanitize_filename,
};

const ARTIFACT_STEM: &str = "media";

/// A materialized stream ready to be sent as an attachment.
///
/// Dropping `body` removes the job directory backing it.
pub struct DownloadResult {
    pub body: ByteStream,
    pub filename: String,
    pub mime_type: &'static str,
    pub content_length: u64,
}

impl std::fmt::Debug for DownloadResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadResult")
            .field("filename", &self.filename)
            .field("mime_type", &self.mime_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Reads the artifact back while keeping its job directory alive.
struct JobFileStream {
    inner: ReaderStream<File>,
    _job: TransferJob,
}

impl Stream for JobFileStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl VideoService {
    pub async fn download(
        &self,
        url: Option<&str>,
        id: Option<i64>,
    ) -> Result<DownloadResult, PipelineError> {
        if url.map(str::trim).is_none_or(str::is_empty) {
            return Err(PipelineError::InvalidInput("Missing url."));
        }
        let id = id.ok_or(PipelineError::InvalidInput("Missing itag."))?;
        let id = u32::try_from(id)
            .ok()
            .filter(|value| *value > 0)
            .ok_or(PipelineError::InvalidInput("itag must be a positive integer."))?;
        let video = require_video_ref(url)?;

        let descriptor = self
            .resolver
            .fetch_stream_by_id(&video, id)
            .await?
            .ok_or(PipelineError::FormatNotAvailable)?;

        self.policy
            .enforce(&descriptor.container_type, descriptor.byte_size)?;

        let _permit = self
            .download_semaphore
            .acquire()
            .await
            .map_err(|_| PipelineError::DownloadFailed("download semaphore closed".into()))?;
        cleanup_stale_jobs(&self.transfer_dir, STALE_JOB_AGE).await;

        let job = TransferJob::create(&self.transfer_dir)
            .await
            .map_err(failed("cannot create job dir"))?;
        // Titles can exceed the filesystem's name limit in bytes, so the
        // artifact gets a fixed name and the title only names the attachment.
        let artifact = job
            .path()
            .join(format!("{ARTIFACT_STEM}.{}", descriptor.container_type));

        let materialized = timeout(self.download_timeout, async {
            let source = self
                .resolver
                .open_stream(&descriptor)
                .await
                .map_err(failed("cannot open stream"))?;
            write_capped(source, &artifact, self.policy.max_bytes()).await
        })
        .await
        .map_err(|_| {
            PipelineError::DownloadFailed(format!(
                "materialization timed out after {}s",
                self.download_timeout.as_secs()
            ))
        })?;
        let content_length = materialized?;

        let filename = sanitize_filename(&format!(
            "{}.{}",
            descriptor.title, descriptor.container_type
        ));
        let file = File::open(&artifact)
            .await
            .map_err(failed("cannot reopen artifact"))?;

        info!(
            "materialized itag {id} of {} ({content_length} bytes)",
            video.video_id()
        );

        Ok(DownloadResult {
            body: Box::pin(JobFileStream {
                inner: ReaderStream::new(file),
                _job: job,
            }),
            filename,
            mime_type: mime_type_for(&descriptor.container_type),
            content_length,
        })
    }
}

/// Copies `source` into `destination`, giving up once more than `max_bytes` arrive.
async fn write_capped(
    mut source: ByteStream,
    destination: &Path,
    max_bytes: u64,
) -> Result<u64, PipelineError> {
    let mut file = File::create(destination)
        .await
        .map_err(failed("cannot create artifact"))?;

    let mut written = 0u64;
    while let Some(chunk) = source
        .try_next()
        .await
        .map_err(failed("stream read failed"))?
    {
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(PipelineError::FileTooLarge);
        }
        file.write_all(&chunk).await.map_err(failed("write failed"))?;
    }

    file.flush().await.map_err(failed("flush failed"))?;
    Ok(written)
}

fn failed<E: std::fmt::Display>(context: &'static str) -> impl FnOnce(E) -> PipelineError {
    move |error| PipelineError::DownloadFailed(format!("{context}: {error}"))
}
