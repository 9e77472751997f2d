use serde::Serialize;
use tracing::debug;

use super::{VideoService, require_video_ref};
use crate::error::PipelineError;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FormatEntry {
    pub quality: String,
    #[serde(rename = "type")]
    pub container_type: String,
    #[serde(rename = "itag")]
    pub id: u32,
    #[serde(rename = "filesize")]
    pub byte_size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InfoResult {
    pub title: String,
    #[serde(rename = "length")]
    pub duration_seconds: u64,
    pub author: String,
    pub formats: Vec<FormatEntry>,
}

impl VideoService {
    /// Lists the downloadable formats of a video, keeping the resolver's order.
    ///
    /// Streams whose container type is not allow-listed are dropped silently.
    pub async fn get_info(&self, url: Option<&str>) -> Result<InfoResult, PipelineError> {
        let video = require_video_ref(url)?;
        let (metadata, streams) = self.resolver.fetch_metadata_and_streams(&video).await?;

        let total = streams.len();
        let formats: Vec<FormatEntry> = streams
            .into_iter()
            .filter(|stream| self.policy.is_type_allowed(&stream.container_type))
            .map(|stream| FormatEntry {
                quality: stream.resolution,
                container_type: stream.container_type,
                id: stream.id,
                byte_size: stream.byte_size,
            })
            .collect();

        debug!(
            "{}: {} of {total} stream(s) allowed",
            video.video_id(),
            formats.len()
        );

        if formats.is_empty() {
            return Err(PipelineError::NoFormatsAvailable);
        }

        Ok(InfoResult {
            title: metadata.title,
            duration_seconds: metadata.duration_seconds,
            author: metadata.author,
            formats,
        })
    }
}
