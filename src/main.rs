use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;
use tracing::{info, warn};
use video_proxy::{
    config::{AppConfig, build_cors_layer},
    error::ApiError,
    pipeline::VideoService,
    policy::FormatPolicy,
    rate_limit::RateLimiter,
    resolver::YtDlpResolver,
    server::{AppState, router},
    transfer::{STALE_JOB_AGE, cleanup_stale_jobs},
};

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_filter().to_string()),
        )
        .init();

    if let Err(error) = run(config).await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run(config: AppConfig) -> Result<(), ApiError> {
    tokio::fs::create_dir_all(&config.transfer_dir)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "Could not create transfer directory {:?}: {error}",
                config.transfer_dir
            ))
        })?;
    cleanup_stale_jobs(&config.transfer_dir, STALE_JOB_AGE).await;

    let resolver = YtDlpResolver::new(config.yt_dlp_bin.clone())
        .map_err(|error| ApiError::internal(format!("Could not create resolver: {error}")))?;

    if !config.trust_proxy_headers {
        warn!("TRUST_PROXY_HEADERS=false: rate limits use the socket peer address.");
    }

    let state = AppState {
        service: VideoService::new(
            Arc::new(resolver),
            FormatPolicy::default(),
            config.transfer_dir.clone(),
            config.max_concurrent_downloads,
        ),
        rate_limiter: Arc::new(RateLimiter::default()),
        trust_proxy_headers: config.trust_proxy_headers,
    };

    let cors = build_cors_layer(&config.allowed_origins)?;
    let app = router(state).layer(cors);

    let listener = TcpListener::bind(&config.bind_addr).await.map_err(|error| {
        ApiError::internal(format!("Could not bind {}: {error}", config.bind_addr))
    })?;

    info!("Listening on http://{}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!("Failed to install Ctrl+C handler: {error}");
    }
}
