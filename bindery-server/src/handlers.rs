//! HTTP front door. Handlers are thin: every state change goes through the
//! job registry, and the pipeline owns all heavy lifting.

use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use bindery_core::{FetchError, JobState, RETAIN_SUCCESS};
use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::pipeline;
use crate::state::AppState;

/// Error response rendered as `{"error": <message>}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn job_not_found() -> ApiError {
    ApiError::not_found("Download ID not found")
}

fn parse_job_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| job_not_found())
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub book_id: String,
}

/// POST /api/download. A cache probe runs first; a usable record answers 200
/// immediately, anything else creates a job and launches the pipeline.
pub async fn download_book(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|_| ApiError::bad_request("Invalid request"))?;
    if request.book_id.is_empty() {
        return Err(ApiError::bad_request("Book ID is required"));
    }
    let book_id = request.book_id;
    debug!(book_id, "download requested");

    if let (Some(cache), Some(store)) = (state.cache(), state.store()) {
        let record = cache.get(&book_id).await.ok().flatten();
        if let Some(record) = record {
            if let Ok(url) = store
                .presign_get(&record.artifact_key, state.config().presigned_ttl())
                .await
            {
                info!(book_id, "answering download from cache");
                let job = state.registry().create(book_id.clone()).await;
                pipeline::complete_from_cache(&job, &record, url.clone()).await;
                state.registry().schedule_removal(job.id, RETAIN_SUCCESS);

                return Ok((
                    StatusCode::OK,
                    Json(json!({
                        "download_id": job.id,
                        "cached": true,
                        "book_title": record.book_title,
                        "file_size": record.artifact_size,
                        "epub_size": record.artifact_size,
                        "epub_url": url,
                        "minio_url": url,
                        "uploaded_at": record.uploaded_at,
                    })),
                )
                    .into_response());
            }
        }
    }

    let job = state.registry().create(book_id.clone()).await;
    info!(job_id = %job.id, book_id, "job created");
    tokio::spawn(pipeline::run(state.clone(), job.clone()));

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "download_id": job.id, "cached": "false" })),
    )
        .into_response())
}

/// GET /api/status/{id}
pub async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_job_id(&id)?;
    let job = state.registry().get(id).await.ok_or_else(job_not_found)?;

    let book_id = job.book_id.clone();
    let body = job
        .read(move |data| {
            let mut body = json!({
                "status": data.state,
                "progress": data.progress,
                "message": data.message.clone(),
                "book_id": book_id,
                "book_title": data.book_title.clone().unwrap_or_default(),
                "file_size": data.artifact_size.unwrap_or(0),
                "epub_size": data.artifact_size.unwrap_or(0),
                "cached": data.cached,
            });
            if let Some(error) = &data.error {
                body["error"] = json!(error);
            }
            if let Some(url) = &data.presigned_url {
                body["epub_url"] = json!(url);
                body["minio_url"] = json!(url);
            }
            if let Some(uploaded_at) = &data.uploaded_at {
                body["uploaded_at"] = json!(uploaded_at);
            }
            body
        })
        .await;

    Ok(Json(body))
}

/// GET /api/stream/{id}, served as SSE. The current state is sent immediately, every
/// registry update follows, and the stream ends after a terminal update.
pub async fn stream_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let id = parse_job_id(&id)?;
    let job = state.registry().get(id).await.ok_or_else(job_not_found)?;

    let (_token, receiver) = job.subscribe().await;
    let stream = stream::unfold((receiver, false), |(mut receiver, done)| async move {
        if done {
            return None;
        }
        match receiver.recv().await {
            Some(update) => {
                let terminal = update.status.is_terminal();
                let event = Event::default().json_data(&update);
                Some((event, (receiver, terminal)))
            }
            None => None,
        }
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keepalive"),
    ))
}

/// GET /api/file/{id}: 307 to a presigned URL. The URL is re-minted from
/// the artifact key on each retrieval when the store is reachable.
pub async fn file_redirect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_job_id(&id)?;
    let job = state.registry().get(id).await.ok_or_else(job_not_found)?;

    let (job_state, artifact_key, presigned_url) = job
        .read(|data| {
            (
                data.state,
                data.artifact_key.clone(),
                data.presigned_url.clone(),
            )
        })
        .await;

    if job_state != JobState::Completed {
        return Err(ApiError::bad_request("Download not completed"));
    }

    if let (Some(key), Some(store)) = (&artifact_key, state.store()) {
        if let Ok(url) = store.presign_get(key, state.config().presigned_ttl()).await {
            return Ok(Redirect::temporary(&url).into_response());
        }
    }

    match presigned_url {
        Some(url) => Ok(Redirect::temporary(&url).into_response()),
        None => Err(ApiError::not_found(
            "File not available - no storage URL found",
        )),
    }
}

/// GET /api/file/{id}/info
pub async fn file_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_job_id(&id)?;
    let job = state.registry().get(id).await.ok_or_else(job_not_found)?;

    let (job_state, title, size) = job
        .read(|data| {
            (
                data.state,
                data.book_title.clone().unwrap_or_default(),
                data.artifact_size.unwrap_or(0),
            )
        })
        .await;

    if job_state != JobState::Completed {
        return Err(ApiError::bad_request("Download not completed"));
    }

    Ok(Json(json!({
        "title": title,
        "format": "EPUB",
        "size": size,
        "download_id": id,
        "book_id": job.book_id,
    })))
}

/// GET /api/book/{id}/info: upstream metadata proxy, no job involved.
pub async fn book_info(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let meta = match state.provider().metadata(&book_id).await {
        Ok(meta) => meta,
        Err(FetchError::NotFound { .. }) => {
            return Err(ApiError::not_found("Book not found"));
        }
        Err(err) => {
            return Err(ApiError::internal(format!(
                "Failed to fetch book info: {err}"
            )));
        }
    };

    let authors: Vec<&str> = meta.authors.iter().map(|a| a.name.as_str()).collect();
    let publishers: Vec<&str> = meta.publishers.iter().map(|p| p.name.as_str()).collect();

    Ok(Json(json!({
        "id": meta.id,
        "title": meta.title,
        "authors": authors,
        "description": meta.description,
        "cover": meta.cover,
        "publishers": publishers,
        "issued": meta.issued,
        "isbn": meta.isbn,
    })))
}

/// GET /api/stats
pub async fn stats(State(state): State<AppState>) -> Json<Value> {
    let counts = state.registry().counts().await;
    let pools = state.pools().stats();

    Json(json!({
        "total_downloads": counts.total,
        "jobs": counts,
        "download_slots_total": pools.fetch.total,
        "download_slots_used": pools.fetch.used,
        "download_slots_free": pools.fetch.free,
        "conversion_slots_total": pools.convert.total,
        "conversion_slots_used": pools.convert.used,
        "conversion_slots_free": pools.convert.free,
        "redis_enabled": state.cache().is_some(),
        "minio_enabled": state.store().is_some(),
        "presigned_url_expiry_hours": state.config().presigned_ttl_hours,
    }))
}
