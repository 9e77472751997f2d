use std::{any::Any, net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::{ConnectInfo, DefaultBodyLimit, Request, State, rejection::JsonRejection},
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::Value;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::{
    config::DOWNLOAD_FILENAME_HEADER,
    error::ApiError,
    pipeline::{InfoResult, VideoService},
    rate_limit::{RateLimiter, RateScope},
};

pub const SERVICE_NAME: &str = "video-proxy";
pub const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub service: VideoService,
    pub rate_limiter: Arc<RateLimiter>,
    pub trust_proxy_headers: bool,
}

#[derive(Debug, Default, Deserialize)]
struct InfoRequest {
    #[serde(default)]
    url: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct DownloadRequest {
    #[serde(default)]
    url: Option<Value>,
    #[serde(default)]
    itag: Option<Value>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/info", post(fetch_info))
        .route("/download", post(start_download))
        .route_layer(middleware::from_fn_with_state(state.clone(), enforce_rate_limit))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
}

async fn health() -> Json<Value> {
    Json(serde_json::json!({"status": "healthy", "service": SERVICE_NAME}))
}

async fn fetch_info(
    State(state): State<AppState>,
    payload: Result<Json<InfoRequest>, JsonRejection>,
) -> Result<Json<InfoResult>, ApiError> {
    let Json(payload) = payload.map_err(reject_body)?;
    let url = string_field(payload.url.as_ref(), "url must be a string.")?;

    let info = state.service.get_info(url).await?;
    Ok(Json(info))
}

async fn start_download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload.map_err(reject_body)?;
    let url = string_field(payload.url.as_ref(), "url must be a string.")?;
    let itag = parse_itag(payload.itag.as_ref())?;

    let prepared = state.service.download(url, itag).await?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(prepared.mime_type));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(prepared.content_length));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(&prepared.filename))
            .map_err(|_| ApiError::internal("Could not build the download header."))?,
    );
    headers.insert(
        HeaderName::from_static(DOWNLOAD_FILENAME_HEADER),
        HeaderValue::from_str(&sanitize_ascii_filename(&prepared.filename))
            .map_err(|_| ApiError::internal("Could not build the filename header."))?,
    );

    info!("sending {} ({} bytes)", prepared.filename, prepared.content_length);
    Ok((headers, Body::from_stream(prepared.body)).into_response())
}

async fn enforce_rate_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let client_ip = client_ip_for_request(&state, request.headers(), addr);
    let scope = RateScope::for_path(request.uri().path());

    state
        .rate_limiter
        .check(&client_ip, scope)
        .await
        .map_err(ApiError::rate_limited)?;

    Ok(next.run(request).await)
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("request handler panicked: {detail}");
    ApiError::internal("Internal server error.").into_response()
}

fn reject_body(rejection: JsonRejection) -> ApiError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large()
    } else {
        ApiError::bad_request("Request body must be a JSON object.")
    }
}

fn string_field<'a>(
    value: Option<&'a Value>,
    message: &'static str,
) -> Result<Option<&'a str>, ApiError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.as_str())),
        Some(_) => Err(ApiError::bad_request(message)),
    }
}

/// Accepts a JSON integer or a numeric string. Range checks happen in the pipeline.
fn parse_itag(value: Option<&Value>) -> Result<Option<i64>, ApiError> {
    let invalid = || ApiError::bad_request("itag must be a positive integer.");
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number.as_i64().map(Some).ok_or_else(invalid),
        Some(Value::String(text)) => text.trim().parse::<i64>().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let check_header = |key: &str| {
        headers
            .get(key)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    };

    if let Some(forwarded) = check_header("x-forwarded-for") {
        let first_ip = forwarded
            .split(',')
            .next()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string);

        if first_ip.is_some() {
            return first_ip;
        }
    }

    check_header("cf-connecting-ip").or_else(|| check_header("x-real-ip"))
}

fn client_ip_for_request(state: &AppState, headers: &HeaderMap, addr: SocketAddr) -> String {
    if state.trust_proxy_headers {
        extract_client_ip(headers).unwrap_or_else(|| addr.ip().to_string())
    } else {
        addr.ip().to_string()
    }
}

fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric()
                || matches!(character, '.' | '-' | '_' | ' ' | '(' | ')')
            {
                character
            } else {
                '_'
            }
        })
        .collect();

    let compact = sanitized.trim();
    if compact.is_empty() {
        "download.bin".to_string()
    } else {
        compact.to_string()
    }
}
