//! Request handlers for the `/api` routes.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use super::{ApiError, AppContext};
use crate::extractors::VideoRef;
use crate::search::SearchResult;
use crate::TubetoneError;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub query: Option<String>,
}

/// Body of `GET /api/video/{id}`
#[derive(Debug, Serialize, Deserialize)]
pub struct VideoInfo {
    pub title: String,
    pub duration: u64,
    pub author: String,
    pub thumbnail: Option<String>,
    pub formats: Vec<serde_json::Value>,
}

/// Body of `GET /api/health`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: String,
    pub timestamp: String,
    pub temp_dir: String,
}

pub async fn search(
    State(ctx): State<AppContext>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchResult>>, ApiError> {
    let query = params.query.unwrap_or_default();
    if query.trim().is_empty() {
        return Err(ApiError::from_error(TubetoneError::MissingQuery, ctx.dev_mode()));
    }

    let results = ctx
        .search
        .search(&query, ctx.config.search.limit)
        .await
        .map_err(|e| ApiError::from_error(e, ctx.dev_mode()))?;

    Ok(Json(results))
}

pub async fn video_info(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<VideoInfo>, ApiError> {
    let video = VideoRef::new(&id).map_err(|e| ApiError::from_error(e, ctx.dev_mode()))?;

    let metadata = ctx.metadata.fetch(&video).await.map_err(|e| {
        tracing::warn!("Metadata for {} failed: {}", video.id(), e);
        ApiError::from_error(e, ctx.dev_mode())
    })?;

    Ok(Json(VideoInfo {
        title: metadata.title,
        duration: metadata.duration_seconds,
        author: metadata.author,
        thumbnail: metadata.thumbnail_url,
        formats: metadata.formats,
    }))
}

pub async fn download(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let video = VideoRef::new(&id).map_err(|e| ApiError::from_error(e, ctx.dev_mode()))?;

    let stream = ctx
        .downloader
        .start(video)
        .await
        .map_err(|e| ApiError::from_error(e, ctx.dev_mode()))?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, stream.content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", stream.filename),
        )
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream.body))
        .map_err(|e| {
            tracing::error!("Failed to build download response: {}", e);
            stream.session.terminate();
            ApiError::internal("Failed to start download")
        })
}

pub async fn health(State(ctx): State<AppContext>) -> Json<Health> {
    Json(Health {
        status: "OK".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        temp_dir: ctx.temp_dir.path().display().to_string(),
    })
}

pub async fn not_found() -> impl IntoResponse {
    ApiError::new(StatusCode::NOT_FOUND, "Not found")
}
