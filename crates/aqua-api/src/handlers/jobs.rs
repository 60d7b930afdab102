//! Job handlers: upload, status, cancellation and result delivery.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, Path as UrlPath, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use base64::Engine;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::info;

use aqua_media::workspace::OUTPUT_FILE_NAME;
use aqua_media::{InputLimits, JobWorkspace, MediaError};
use aqua_models::{JobId, JobSnapshot};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::services::{JobHandle, JobLogger};
use crate::state::AppState;

/// Multipart field carrying the video.
const VIDEO_FIELD: &str = "video";

// ============================================================================
// Upload
// ============================================================================

/// Accept an uploaded video and queue it for annotation.
pub async fn create_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<JobSnapshot>)> {
    let limits = &state.runner.settings().limits;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(VIDEO_FIELD) {
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("Upload has no file name"))?;
        limits.validate_filename(&file_name)?;
        limits.validate_extension(Path::new(&file_name))?;
        let extension = Path::new(&file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_string();

        let workspace = JobWorkspace::create(&state.config.work_dir, &extension).await?;
        let size = store_upload(field, workspace.input_path(), limits).await?;
        limits.validate_file_size(size)?;

        let job = Arc::new(JobHandle::new(JobId::new(), Some(file_name), workspace));
        let snapshot = job.snapshot().await;
        JobLogger::new(job.id(), "upload").log_start(&format!("{} bytes received", size));

        state.jobs.insert(Arc::clone(&job)).await;
        state.runner.spawn(job);
        metrics::record_job_submitted(size);

        return Ok((StatusCode::ACCEPTED, Json(snapshot)));
    }

    Err(ApiError::bad_request(format!(
        "Missing multipart field '{}'",
        VIDEO_FIELD
    )))
}

/// Stream a multipart field to `path`, enforcing the size limit as bytes arrive.
async fn store_upload(
    mut field: Field<'_>,
    path: &Path,
    limits: &InputLimits,
) -> ApiResult<u64> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(MediaError::from)?;
    let mut size = 0u64;

    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        size += chunk.len() as u64;
        if size > limits.max_file_size_bytes {
            return Err(MediaError::ResourceLimit(format!(
                "upload exceeds {} MB",
                limits.max_file_size_bytes / (1024 * 1024)
            ))
            .into());
        }
        file.write_all(&chunk).await.map_err(MediaError::from)?;
    }

    file.flush().await.map_err(MediaError::from)?;
    Ok(size)
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::bad_request(e.body_text())
    }
}

// ============================================================================
// Status and lifecycle
// ============================================================================

async fn find_job(state: &AppState, job_id: &str) -> ApiResult<Arc<JobHandle>> {
    let id: JobId = job_id
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid job id"))?;
    state
        .jobs
        .get(&id)
        .await
        .ok_or_else(|| ApiError::not_found("Job not found"))
}

/// Current job snapshot.
pub async fn get_job(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<String>,
) -> ApiResult<Json<JobSnapshot>> {
    let job = find_job(&state, &job_id).await?;
    Ok(Json(job.snapshot().await))
}

/// Ask a queued or running job to stop.
pub async fn cancel_job(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<String>,
) -> ApiResult<(StatusCode, Json<JobSnapshot>)> {
    let job = find_job(&state, &job_id).await?;
    if !job.request_cancel().await {
        return Err(ApiError::conflict("Job already finished"));
    }
    info!(job_id = %job.id(), "Cancellation requested");
    Ok((StatusCode::ACCEPTED, Json(job.snapshot().await)))
}

/// Forget a job and delete its files.
pub async fn delete_job(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<String>,
) -> ApiResult<StatusCode> {
    let job = find_job(&state, &job_id).await?;
    state.jobs.remove(job.id()).await;

    // A running job releases its own workspace once the pipeline stops
    if !job.request_cancel().await {
        job.release_workspace().await;
    }
    info!(job_id = %job.id(), "Job deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Result delivery
// ============================================================================

async fn completed_output(state: &AppState, job_id: &str) -> ApiResult<PathBuf> {
    let job = find_job(state, job_id).await?;
    job.completed_output()
        .await
        .ok_or_else(|| ApiError::conflict("Annotated video is not available"))
}

/// Byte range of a `Range: bytes=...` header, resolved against `size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Inclusive
    pub end: u64,
}

impl ByteRange {
    fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parse a single-range header.
///
/// `Ok(None)` means the header should be ignored and the whole file served;
/// `Err` means the range cannot be satisfied.
pub fn parse_range(value: &str, size: u64) -> Result<Option<ByteRange>, ApiError> {
    let unsatisfiable = || ApiError::RangeNotSatisfiable { size };

    let Some(spec) = value.trim().strip_prefix("bytes=") else {
        return Ok(None);
    };
    // Multiple ranges are not supported
    if spec.contains(',') {
        return Ok(None);
    }
    let Some((start, end)) = spec.split_once('-') else {
        return Ok(None);
    };
    let (start, end) = (start.trim(), end.trim());

    if size == 0 {
        return Err(unsatisfiable());
    }

    let range = if start.is_empty() {
        let suffix: u64 = end.parse().map_err(|_| unsatisfiable())?;
        if suffix == 0 {
            return Err(unsatisfiable());
        }
        ByteRange {
            start: size.saturating_sub(suffix),
            end: size - 1,
        }
    } else {
        let start: u64 = start.parse().map_err(|_| unsatisfiable())?;
        let end = if end.is_empty() {
            size - 1
        } else {
            end.parse::<u64>().map_err(|_| unsatisfiable())?.min(size - 1)
        };
        if start >= size || start > end {
            return Err(unsatisfiable());
        }
        ByteRange { start, end }
    };

    Ok(Some(range))
}

async fn read_range(path: &Path, range: ByteRange) -> Result<Vec<u8>, MediaError> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(range.start)).await?;
    let mut buf = vec![0u8; range.len() as usize];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Inline playback of the annotated video, with `Range` support.
pub async fn stream_video(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let path = completed_output(&state, &job_id).await?;
    let size = tokio::fs::metadata(&path)
        .await
        .map_err(MediaError::from)?
        .len();

    let range = match headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        Some(value) => parse_range(value, size)?,
        None => None,
    };

    let builder = Response::builder()
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_DISPOSITION, "inline")
        .header(header::CACHE_CONTROL, "private, max-age=3600");

    let response = match range {
        Some(range) => {
            let bytes = read_range(&path, range).await?;
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", range.start, range.end, size),
                )
                .header(header::CONTENT_LENGTH, bytes.len())
                .body(Body::from(bytes))
        }
        None => {
            let bytes = tokio::fs::read(&path).await.map_err(MediaError::from)?;
            builder
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, bytes.len())
                .body(Body::from(bytes))
        }
    };

    response.map_err(|e| ApiError::internal(format!("Failed to build response: {}", e)))
}

/// Download the annotated video as an attachment.
pub async fn download_video(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<String>,
) -> ApiResult<Response> {
    let path = completed_output(&state, &job_id).await?;
    let bytes = tokio::fs::read(&path).await.map_err(MediaError::from)?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CONTENT_LENGTH, bytes.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", OUTPUT_FILE_NAME),
        )
        .body(Body::from(bytes))
        .map_err(|e| ApiError::internal(format!("Failed to build response: {}", e)))
}

#[derive(Debug, Serialize)]
pub struct DownloadLink {
    pub filename: String,
    pub href: String,
}

/// Self-contained download link: a data URI embedding the whole video.
pub async fn download_link(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<String>,
) -> ApiResult<Json<DownloadLink>> {
    let path = completed_output(&state, &job_id).await?;
    let bytes = tokio::fs::read(&path).await.map_err(MediaError::from)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);

    Ok(Json(DownloadLink {
        filename: OUTPUT_FILE_NAME.to_string(),
        href: format!("data:video/mp4;base64,{}", encoded),
    }))
}
