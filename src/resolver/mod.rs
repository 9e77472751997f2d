//! The video-resolution capability the pipelines sit on top of.
//!
//! A resolver turns a [`VideoRef`] into metadata plus a list of progressive
//! streams, and opens a lazily-read byte stream for one of them. Everything
//! platform-specific (scraping, manifests, signatures) lives behind
//! [`VideoResolver`].

use std::{io, pin::Pin};

use async_trait::async_trait;
use axum::body::Bytes;
use futures::Stream;
use thiserror::Error;

use crate::{error::PipelineError, validation::VideoRef};

pub mod ytdlp;

pub use ytdlp::YtDlpResolver;

pub const AUDIO_ONLY: &str = "audio only";

pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub title: String,
    pub author: String,
    pub duration_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    /// Platform itag, always positive.
    pub id: u32,
    /// `"720p"` and similar, or [`AUDIO_ONLY`].
    pub resolution: String,
    /// Lower-case extension-like token such as `mp4`.
    pub container_type: String,
    pub byte_size: Option<u64>,
    /// Title of the video the stream belongs to; used to name the artifact.
    pub title: String,
    /// Where the resolver fetches the bytes from. Opaque to the pipelines.
    pub locator: String,
    pub request_headers: Vec<(String, String)>,
}

/// Failure modes a resolver may signal.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("video is unavailable")]
    Unavailable,

    #[error("not a video reference")]
    MalformedReference,

    #[error("{0}")]
    Other(String),
}

impl From<ResolveError> for PipelineError {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::Unavailable => PipelineError::VideoUnavailable,
            ResolveError::MalformedReference => PipelineError::MalformedReference,
            ResolveError::Other(detail) => PipelineError::ResolverError(detail),
        }
    }
}

#[async_trait]
pub trait VideoResolver: Send + Sync {
    /// Metadata plus progressive streams only, in the order the platform lists them.
    async fn fetch_metadata_and_streams(
        &self,
        video: &VideoRef,
    ) -> Result<(VideoMetadata, Vec<StreamDescriptor>), ResolveError>;

    async fn fetch_stream_by_id(
        &self,
        video: &VideoRef,
        id: u32,
    ) -> Result<Option<StreamDescriptor>, ResolveError> {
        let (_, streams) = self.fetch_metadata_and_streams(video).await?;
        Ok(streams.into_iter().find(|stream| stream.id == id))
    }

    async fn open_stream(&self, descriptor: &StreamDescriptor) -> Result<ByteStream, ResolveError>;
}
