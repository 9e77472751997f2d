use std::{collections::HashMap, io, io::ErrorKind};

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::{
    process::Command,
    time::{Duration, timeout},
};
use tracing::{debug, warn};

use super::{
    AUDIO_ONLY, ByteStream, ResolveError, StreamDescriptor, VideoMetadata, VideoResolver,
};
use crate::validation::VideoRef;

pub const DEFAULT_YT_DLP_BIN: &str = "yt-dlp";
const YT_DLP_TIMEOUT_SECONDS: u64 = 180;
const CONNECT_TIMEOUT_SECONDS: u64 = 15;

const UNAVAILABLE_MARKERS: [&str; 8] = [
    "video unavailable",
    "private video",
    "not available in your country",
    "has been removed",
    "members-only",
    "sign in to confirm",
    "this video is not available",
    "account associated with this video has been terminated",
];

const MALFORMED_MARKERS: [&str; 3] = [
    "unsupported url",
    "is not a valid url",
    "incomplete youtube id",
];

#[derive(Debug, Deserialize)]
struct YtDlpVideoInfo {
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
    #[serde(default)]
    formats: Vec<YtDlpFormat>,
}

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    format_id: String,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    height: Option<u32>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
    url: Option<String>,
    #[serde(default)]
    http_headers: HashMap<String, String>,
}

/// Resolves videos by shelling out to `yt-dlp` and fetching media over HTTP.
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    binary: String,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<String>) -> Result<Self, ResolveError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECONDS))
            .build()
            .map_err(|error| ResolveError::Other(format!("cannot build HTTP client: {error}")))?;

        Ok(Self {
            binary: binary.into(),
            timeout: Duration::from_secs(YT_DLP_TIMEOUT_SECONDS),
            http_client,
        })
    }

    async fn dump_json(&self, video: &VideoRef) -> Result<YtDlpVideoInfo, ResolveError> {
        let command_future = Command::new(&self.binary)
            .args(["-J", "--no-playlist", "--no-warnings", video.as_str()])
            .kill_on_drop(true)
            .output();

        let output = timeout(self.timeout, command_future)
            .await
            .map_err(|_| {
                ResolveError::Other(format!(
                    "{} timed out after {}s for {}",
                    self.binary,
                    self.timeout.as_secs(),
                    video.video_id()
                ))
            })?
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    ResolveError::Other(format!("{} is not installed", self.binary))
                } else {
                    ResolveError::Other(format!("cannot run {}: {error}", self.binary))
                }
            })?;

        if !output.status.success() {
            return Err(classify_failure(&output.stderr));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|error| ResolveError::Other(format!("unreadable yt-dlp output: {error}")))
    }
}

#[async_trait]
impl VideoResolver for YtDlpResolver {
    async fn fetch_metadata_and_streams(
        &self,
        video: &VideoRef,
    ) -> Result<(VideoMetadata, Vec<StreamDescriptor>), ResolveError> {
        let info = self.dump_json(video).await?;
        let (metadata, streams) = into_progressive_streams(info);
        debug!(
            "resolved {} with {} progressive stream(s)",
            video.video_id(),
            streams.len()
        );
        Ok((metadata, streams))
    }

    async fn open_stream(&self, descriptor: &StreamDescriptor) -> Result<ByteStream, ResolveError> {
        let mut request = self.http_client.get(&descriptor.locator);
        for (name, value) in &descriptor.request_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|error| ResolveError::Other(format!("media request failed: {error}")))?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::FORBIDDEN | StatusCode::NOT_FOUND | StatusCode::GONE
        ) {
            warn!("media host answered {status} for itag {}", descriptor.id);
            return Err(ResolveError::Unavailable);
        }
        if !status.is_success() {
            return Err(ResolveError::Other(format!(
                "media host answered {status} for itag {}",
                descriptor.id
            )));
        }

        let stream = response.bytes_stream().map_err(io::Error::other);
        Ok(Box::pin(stream))
    }
}

fn classify_failure(stderr: &[u8]) -> ResolveError {
    let message = String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp failed without output")
        .to_string();
    let lower = message.to_ascii_lowercase();

    if UNAVAILABLE_MARKERS.iter().any(|marker| lower.contains(marker)) {
        ResolveError::Unavailable
    } else if MALFORMED_MARKERS.iter().any(|marker| lower.contains(marker)) {
        ResolveError::MalformedReference
    } else {
        ResolveError::Other(message)
    }
}

fn is_present_codec(codec: Option<&str>) -> bool {
    matches!(codec, Some(value) if value != "none")
}

fn into_progressive_streams(info: YtDlpVideoInfo) -> (VideoMetadata, Vec<StreamDescriptor>) {
    let title = info
        .title
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "Untitled".to_string());
    let author = info
        .uploader
        .or(info.channel)
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "Unknown".to_string());
    let duration_seconds = info
        .duration
        .filter(|value| value.is_finite() && *value > 0.0)
        .map(|value| value.floor() as u64)
        .unwrap_or_default();

    let streams = info
        .formats
        .into_iter()
        .filter(|format| {
            is_present_codec(format.vcodec.as_deref()) && is_present_codec(format.acodec.as_deref())
        })
        .filter_map(|format| {
            let id = format
                .format_id
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|id| *id > 0)?;
            let locator = format.url?;
            let byte_size = format
                .filesize
                .or(format.filesize_approx)
                .filter(|size| size.is_finite() && *size >= 0.0)
                .map(|size| size as u64);

            Some(StreamDescriptor {
                id,
                resolution: format
                    .height
                    .map(|height| format!("{height}p"))
                    .unwrap_or_else(|| AUDIO_ONLY.to_string()),
                container_type: format.ext.unwrap_or_default().to_ascii_lowercase(),
                byte_size,
                title: title.clone(),
                locator,
                request_headers: format.http_headers.into_iter().collect(),
            })
        })
        .collect();

    (
        VideoMetadata {
            title,
            author,
            duration_seconds,
        },
        streams,
    )
}
