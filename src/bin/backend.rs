#![forbid(unsafe_code)]

//! Axum backend for the video site.
//!
//! Serves the catalog CRUD API, the image proxy that re-fetches hotlink
//! protected covers, and the cover extractor used by the admin form. All
//! outbound calls go through blocking `ureq`, so those handlers hop onto the
//! blocking pool.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{
        Path as AxumPath, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderName, HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use videosite_tools::{
    catalog::{self, CatalogEntry, TagCount, VideoDraft, VideoPatch, VideoQuery, VideoStore},
    config::{ConfigOverrides, ServerConfig, resolve_server_config},
    error::{ExtractError, ProxyError, StoreError},
    extract::{CoverExtractor, ExtractedMetadata, Platform, SUPPORTED_PLATFORMS},
    http::{HttpClient, UreqClient},
    proxy::ImageProxy,
    store::{StoreKind, open_store},
};

const PLACEHOLDER_HEADER: HeaderName = HeaderName::from_static("x-proxy-placeholder");

#[derive(Debug, Parser)]
#[command(name = "backend", about = "Video catalog API, image proxy and cover extractor")]
struct BackendArgs {
    /// Listen address (VIDEOSITE_HOST)
    #[arg(long)]
    host: Option<String>,
    /// Listen port (VIDEOSITE_PORT)
    #[arg(long)]
    port: Option<u16>,
    /// Catalog backend: memory, json or sqlite (VIDEOSITE_STORE)
    #[arg(long, value_parser = parse_store_arg)]
    store: Option<StoreKind>,
    /// Catalog file or database (VIDEOSITE_DATA_PATH)
    #[arg(long)]
    data_path: Option<PathBuf>,
    /// Alternate `.env` file
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn into_overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host,
            port: self.port,
            store: self.store,
            data_path: self.data_path,
            env_path: self.env_file,
        }
    }
}

fn parse_store_arg(value: &str) -> Result<StoreKind, String> {
    StoreKind::parse(value).ok_or_else(|| format!("unknown store {value:?} (memory, json, sqlite)"))
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/VIDEOSITE_HOST")
}

/// Shared handler state. Everything is injected here at startup; handlers
/// never reach for globals.
#[derive(Clone)]
struct AppState {
    store: Arc<dyn VideoStore>,
    proxy: Arc<ImageProxy>,
    extractor: Arc<CoverExtractor>,
}

impl AppState {
    fn new(store: Arc<dyn VideoStore>, client: Arc<dyn HttpClient>, config: &ServerConfig) -> Self {
        Self {
            store,
            proxy: Arc::new(ImageProxy::new(client.clone(), config.proxy.clone())),
            extractor: Arc::new(CoverExtractor::new(client, config.extractor.clone())),
        }
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    details: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        let (status, message) = match &err {
            ProxyError::InvalidUrl(_) => (StatusCode::BAD_REQUEST, "Invalid image URL"),
            ProxyError::DisallowedHost(_) => (StatusCode::FORBIDDEN, "Domain not allowed"),
            ProxyError::PayloadTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "Image too large"),
            err if err.is_timeout() => (StatusCode::REQUEST_TIMEOUT, "Upstream request timed out"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch image"),
        };
        let details = match &err {
            ProxyError::Exhausted(failures) => failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        };
        Self::new(status, message).with_details(details)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::not_found(format!("video {id} not found")),
            StoreError::Invalid(message) => Self::bad_request(message),
            StoreError::Backend(err) => {
                error!(reason = %format!("{err:#}"), "catalog storage failed");
                Self::internal("catalog storage failed").with_details(format!("{err:#}"))
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request("invalid request body").with_details(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request("invalid query string").with_details(rejection.body_text())
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = resolve_server_config(BackendArgs::parse().into_overrides())?;
    let host = parse_host_arg(&config.host)?;

    let store = open_store(config.store, &config.data_path)
        .await
        .with_context(|| format!("opening {} catalog", store_label(config.store)))?;
    let client: Arc<dyn HttpClient> = Arc::new(UreqClient::new());
    let state = AppState::new(store, client, &config);

    let addr = SocketAddr::new(host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(
        %addr,
        store = state.store.backend_name(),
        data_path = %config.data_path.display(),
        "API server listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn store_label(kind: StoreKind) -> &'static str {
    match kind {
        StoreKind::Memory => "memory",
        StoreKind::Json => "json",
        StoreKind::Sqlite => "sqlite",
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route(
            "/api/proxy-image",
            get(proxy_image).options(proxy_image_preflight),
        )
        .route(
            "/api/extract-cover",
            get(extract_cover_usage).post(extract_cover),
        )
        .route("/api/videos", get(list_videos).post(create_video))
        .route(
            "/api/videos/{id}",
            get(get_video).put(update_video).delete(delete_video),
        )
        .route("/api/tags", get(list_tags))
        .fallback(api_fallback)
        .layer(middleware::map_response(allow_any_origin))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!(reason = %err, "failed to install Ctrl+C handler");
    }
    info!("shutting down");
}

async fn allow_any_origin(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

async fn api_fallback() -> ApiError {
    ApiError::not_found("endpoint not found")
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "store": state.store.backend_name(),
    }))
}

#[derive(Debug, Deserialize)]
struct ProxyQuery {
    url: Option<String>,
}

async fn proxy_image(
    State(state): State<AppState>,
    query: Result<Query<ProxyQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query?;
    let url = query
        .url
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing url parameter"))?;

    let proxy = state.proxy.clone();
    let image = tokio::task::spawn_blocking(move || proxy.fetch(&url))
        .await
        .map_err(|err| ApiError::internal(format!("image task failed: {err}")))??;

    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, image.content_type.clone()),
            (header::CACHE_CONTROL, image.cache_control().to_string()),
        ],
        image.bytes,
    )
        .into_response();
    if image.is_placeholder {
        response
            .headers_mut()
            .insert(PLACEHOLDER_HEADER, HeaderValue::from_static("1"));
    }
    Ok(response)
}

async fn proxy_image_preflight() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, OPTIONS"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
            (header::ACCESS_CONTROL_MAX_AGE, "86400"),
        ],
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractRequest {
    video_url: Option<String>,
}

/// Cover data in the shape the admin form fills its fields from.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CoverData {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cover_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExtractResponse {
    success: bool,
    platform: Platform,
    data: CoverData,
}

impl From<ExtractedMetadata> for ExtractResponse {
    fn from(metadata: ExtractedMetadata) -> Self {
        Self {
            success: true,
            platform: metadata.platform,
            data: CoverData {
                title: metadata.title,
                cover_image: metadata.cover_url,
                duration: metadata.duration,
                description: metadata.description,
            },
        }
    }
}

fn extract_failure(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "success": false,
            "error": error.into(),
        })),
    )
        .into_response()
}

fn extract_status(err: &ExtractError) -> StatusCode {
    match err {
        ExtractError::InvalidInput(_) | ExtractError::UnsupportedPlatform => {
            StatusCode::BAD_REQUEST
        }
        ExtractError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
        ExtractError::UpstreamError(_) | ExtractError::PlatformApiError(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn extract_cover(
    State(state): State<AppState>,
    payload: Result<Json<ExtractRequest>, JsonRejection>,
) -> Response {
    let video_url = match payload {
        Ok(Json(request)) => request.video_url.unwrap_or_default(),
        Err(rejection) => {
            return extract_failure(
                StatusCode::BAD_REQUEST,
                format!("invalid request body: {}", rejection.body_text()),
            );
        }
    };

    let extractor = state.extractor.clone();
    match tokio::task::spawn_blocking(move || extractor.extract(&video_url)).await {
        Ok(Ok(metadata)) => Json(ExtractResponse::from(metadata)).into_response(),
        Ok(Err(err)) => extract_failure(extract_status(&err), err.to_string()),
        Err(err) => extract_failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("extraction task failed: {err}"),
        ),
    }
}

async fn extract_cover_usage() -> Json<serde_json::Value> {
    Json(json!({
        "message": "POST a JSON body {\"videoUrl\": \"...\"} to extract cover metadata",
        "supportedPlatforms": SUPPORTED_PLATFORMS,
    }))
}

async fn list_videos(
    State(state): State<AppState>,
    query: Result<Query<VideoQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<CatalogEntry>>> {
    let Query(query) = query?;
    let videos = state.store.list_videos().await?;
    let entries = catalog::search(videos, &query)
        .into_iter()
        .map(CatalogEntry::from)
        .collect();
    Ok(Json(entries))
}

async fn get_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<CatalogEntry>> {
    state
        .store
        .get_video(&id)
        .await?
        .map(|video| Json(CatalogEntry::from(video)))
        .ok_or_else(|| ApiError::not_found(format!("video {id} not found")))
}

async fn create_video(
    State(state): State<AppState>,
    payload: Result<Json<VideoDraft>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CatalogEntry>)> {
    let Json(draft) = payload?;
    let video = state.store.create_video(draft).await?;
    info!(id = %video.id, title = %video.title, "created video");
    Ok((StatusCode::CREATED, Json(CatalogEntry::from(video))))
}

async fn update_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    payload: Result<Json<VideoPatch>, JsonRejection>,
) -> ApiResult<Json<CatalogEntry>> {
    let Json(patch) = payload?;
    let video = state.store.update_video(&id, patch).await?;
    info!(id = %video.id, "updated video");
    Ok(Json(CatalogEntry::from(video)))
}

async fn delete_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if state.store.delete_video(&id).await? {
        info!(id = %id, "deleted video");
        Ok(Json(json!({ "success": true })))
    } else {
        Err(ApiError::not_found(format!("video {id} not found")))
    }
}

async fn list_tags(State(state): State<AppState>) -> ApiResult<Json<Vec<TagCount>>> {
    let videos = state.store.list_videos().await?;
    Ok(Json(catalog::tag_counts(&videos)))
}
