#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, Bytes},
    extract::connect_info::MockConnectInfo,
    http::{Request, header::CONTENT_TYPE},
};
use futures::stream;
use tempfile::TempDir;
use video_proxy::{
    pipeline::VideoService,
    policy::FormatPolicy,
    rate_limit::RateLimiter,
    resolver::{ByteStream, ResolveError, StreamDescriptor, VideoMetadata, VideoResolver},
    server::{AppState, router},
    validation::VideoRef,
};

pub const VALID_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
pub const MIB: u64 = 1024 * 1024;

/// In-memory resolver serving a fixed video.
pub struct StaticResolver {
    pub metadata: VideoMetadata,
    pub streams: Vec<StreamDescriptor>,
    pub failure: Option<fn() -> ResolveError>,
    pub payload: Vec<Bytes>,
    pub fail_open: bool,
    pub fetches: AtomicUsize,
}

impl StaticResolver {
    pub fn new(streams: Vec<StreamDescriptor>) -> Self {
        Self {
            metadata: VideoMetadata {
                title: "Never Gonna Give You Up".to_string(),
                author: "Rick Astley".to_string(),
                duration_seconds: 212,
            },
            streams,
            failure: None,
            payload: vec![Bytes::from_static(b"fake "), Bytes::from_static(b"video")],
            fail_open: false,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn failing(failure: fn() -> ResolveError) -> Self {
        Self {
            failure: Some(failure),
            ..Self::new(Vec::new())
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoResolver for StaticResolver {
    async fn fetch_metadata_and_streams(
        &self,
        _video: &VideoRef,
    ) -> Result<(VideoMetadata, Vec<StreamDescriptor>), ResolveError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.failure {
            return Err(failure());
        }
        Ok((self.metadata.clone(), self.streams.clone()))
    }

    async fn open_stream(
        &self,
        _descriptor: &StreamDescriptor,
    ) -> Result<ByteStream, ResolveError> {
        if self.fail_open {
            return Err(ResolveError::Other("connection reset by peer".to_string()));
        }
        let chunks: Vec<std::io::Result<Bytes>> = self.payload.iter().cloned().map(Ok).collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

pub fn descriptor(id: u32, container_type: &str, byte_size: Option<u64>) -> StreamDescriptor {
    StreamDescriptor {
        id,
        resolution: "360p".to_string(),
        container_type: container_type.to_string(),
        byte_size,
        title: "Never Gonna Give You Up".to_string(),
        locator: format!("memory://{id}"),
        request_headers: Vec::new(),
    }
}

pub struct TestApp {
    pub router: Router,
    pub resolver: Arc<StaticResolver>,
    pub transfer_dir: TempDir,
}

impl TestApp {
    pub fn new(resolver: StaticResolver) -> Self {
        Self::with_policy(resolver, FormatPolicy::default())
    }

    pub fn with_policy(resolver: StaticResolver, policy: FormatPolicy) -> Self {
        let resolver = Arc::new(resolver);
        let transfer_dir = tempfile::tempdir().unwrap();
        let service = VideoService::new(
            resolver.clone(),
            policy,
            transfer_dir.path().to_path_buf(),
            2,
        );
        let state = AppState {
            service,
            rate_limiter: Arc::new(RateLimiter::default()),
            trust_proxy_headers: false,
        };
        let router =
            router(state).layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));

        Self {
            router,
            resolver,
            transfer_dir,
        }
    }

    pub fn leftover_jobs(&self) -> usize {
        std::fs::read_dir(self.transfer_dir.path()).unwrap().count()
    }

    /// Job directories are removed off the request task, so give that a moment.
    pub async fn settled_jobs(&self) -> usize {
        for _ in 0..200 {
            if self.leftover_jobs() == 0 {
                return 0;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.leftover_jobs()
    }
}

pub fn json_post(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_json(body: Body) -> serde_json::Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
