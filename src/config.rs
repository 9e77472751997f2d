use std::{collections::HashSet, path::PathBuf, sync::Arc};

use axum::http::{HeaderName, HeaderValue, Method, header::CONTENT_DISPOSITION};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::ApiError,
    pipeline::DEFAULT_MAX_CONCURRENT_DOWNLOADS,
    resolver::ytdlp::DEFAULT_YT_DLP_BIN,
};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;
pub const DOWNLOAD_FILENAME_HEADER: &str = "x-download-filename";

const DEV_ORIGINS: [&str; 2] = ["http://127.0.0.1:5173", "http://localhost:5173"];

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub debug: bool,
    pub trust_proxy_headers: bool,
    pub allowed_origins: Vec<String>,
    pub max_concurrent_downloads: usize,
    pub transfer_dir: PathBuf,
    pub yt_dlp_bin: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let debug = read_bool(&lookup, "DEBUG").unwrap_or(false);
        let trust_proxy_headers = read_bool(&lookup, "TRUST_PROXY_HEADERS").unwrap_or(false);
        let max_concurrent_downloads = lookup("MAX_CONCURRENT_DOWNLOADS")
            .and_then(|value| value.trim().parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_CONCURRENT_DOWNLOADS);
        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let transfer_dir = lookup("TRANSFER_DIR")
            .and_then(|value| non_empty(&value).map(PathBuf::from))
            .unwrap_or_else(|| std::env::temp_dir().join("video-proxy"));
        let yt_dlp_bin = lookup("YT_DLP_BIN")
            .and_then(|value| non_empty(&value).map(ToString::to_string))
            .unwrap_or_else(|| DEFAULT_YT_DLP_BIN.to_string());

        Self {
            bind_addr: resolve_bind_addr(&lookup),
            debug,
            trust_proxy_headers,
            allowed_origins,
            max_concurrent_downloads,
            transfer_dir,
            yt_dlp_bin,
        }
    }

    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "video_proxy=debug,tower_http=debug"
        } else {
            "video_proxy=info,tower_http=info"
        }
    }
}

fn read_bool(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<bool> {
    let value = lookup(name)?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!("ignoring unrecognized {name}={value:?}");
            None
        }
    }
}

fn resolve_bind_addr(lookup: &impl Fn(&str) -> Option<String>) -> String {
    if let Some(configured) =
        lookup("APP_ADDR").and_then(|value| non_empty(&value).map(ToString::to_string))
    {
        return configured;
    }

    let host = lookup("HOST")
        .and_then(|value| non_empty(&value).map(ToString::to_string))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = match lookup("PORT") {
        Some(value) => value.trim().parse::<u16>().unwrap_or_else(|_| {
            warn!("ignoring invalid PORT={value:?}");
            DEFAULT_PORT
        }),
        None => DEFAULT_PORT,
    };

    format!("{host}:{port}")
}

pub fn build_cors_layer(configured: &[String]) -> Result<CorsLayer, ApiError> {
    let origins: Vec<String> = if configured.is_empty() {
        warn!("ALLOWED_ORIGINS is not set; using development origins.");
        DEV_ORIGINS.iter().map(ToString::to_string).collect()
    } else {
        configured.to_vec()
    };

    let normalized_origins = origins
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "Invalid origin in ALLOWED_ORIGINS: {origin}. Use values like https://example.com"
                ))
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;
    let allowed_origins = Arc::new(normalized_origins);
    let allow_origin = AllowOrigin::predicate({
        let allowed_origins = Arc::clone(&allowed_origins);
        move |origin: &HeaderValue, _| {
            let normalized = origin.to_str().ok().and_then(normalize_origin);
            let allowed = normalized
                .as_ref()
                .is_some_and(|value| allowed_origins.contains(value));
            debug!(
                "CORS origin check raw={:?} normalized={:?} allowed={}",
                origin, normalized, allowed
            );
            allowed
        }
    });
    info!("CORS allow-list loaded with {} origin(s)", allowed_origins.len());

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([
            CONTENT_DISPOSITION,
            HeaderName::from_static(DOWNLOAD_FILENAME_HEADER),
        ]))
}

fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}

pub fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        AppConfig::from_lookup(|name| values.get(name).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config_from(&[]);
        assert_eq!(config.bind_addr, "0.0.0.0:5000");
        assert!(!config.debug);
        assert!(!config.trust_proxy_headers);
        assert_eq!(config.max_concurrent_downloads, DEFAULT_MAX_CONCURRENT_DOWNLOADS);
        assert_eq!(config.yt_dlp_bin, DEFAULT_YT_DLP_BIN);
        assert!(config.allowed_origins.is_empty());
    }

    #[test]
    fn reads_host_port_and_flags() {
        let config = config_from(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("DEBUG", "yes"),
            ("TRUST_PROXY_HEADERS", "1"),
            ("MAX_CONCURRENT_DOWNLOADS", "7"),
            ("ALLOWED_ORIGINS", "https://a.example, ,https://b.example"),
        ]);
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert!(config.debug);
        assert!(config.trust_proxy_headers);
        assert_eq!(config.max_concurrent_downloads, 7);
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert_eq!(config.log_filter(), "video_proxy=debug,tower_http=debug");
    }

    #[test]
    fn app_addr_overrides_host_and_port() {
        let config = config_from(&[("APP_ADDR", "10.0.0.1:9000"), ("PORT", "1")]);
        assert_eq!(config.bind_addr, "10.0.0.1:9000");
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = config_from(&[
            ("PORT", "not-a-port"),
            ("DEBUG", "maybe"),
            ("MAX_CONCURRENT_DOWNLOADS", "0"),
        ]);
        assert_eq!(config.bind_addr, "0.0.0.0:5000");
        assert!(!config.debug);
        assert_eq!(config.max_concurrent_downloads, DEFAULT_MAX_CONCURRENT_DOWNLOADS);
    }

    #[test]
    fn normalizes_origins() {
        assert_eq!(
            normalize_origin("https://Example.com:443/").as_deref(),
            Some("https://example.com")
        );
        assert_eq!(
            normalize_origin("http://localhost:5173").as_deref(),
            Some("http://localhost:5173")
        );
        assert_eq!(normalize_origin("https://example.com/path"), None);
        assert_eq!(normalize_origin("ftp://example.com"), None);
    }

    #[test]
    fn rejects_invalid_cors_origins() {
        assert!(build_cors_layer(&["not an origin".to_string()]).is_err());
        assert!(build_cors_layer(&[]).is_ok());
    }
}
