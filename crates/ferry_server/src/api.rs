use crate::state::AppState;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Component, PathBuf};
use tracing::debug;

pub struct ApiError(anyhow::Error);

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.0
            .downcast_ref::<std::io::Error>()
            .map(|io_err| match io_err.kind() {
                ErrorKind::NotFound => (StatusCode::NOT_FOUND, "File not found".to_string()),
                ErrorKind::InvalidInput => (StatusCode::BAD_REQUEST, io_err.to_string()),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, io_err.to_string()),
            })
            .unwrap_or((
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal Server Error: {}", self.0),
            ))
            .into_response()
    }
}

/// Joins `path` below the root, refusing anything that would escape it.
fn resolve(state: &AppState, path: &str) -> Result<PathBuf, ApiError> {
    let mut resolved = state.root.as_ref().clone();
    for component in std::path::Path::new(path).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => {
                return Err(ApiError::from(std::io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("Invalid path: {path}"),
                )));
            }
        }
    }
    Ok(resolved)
}

/// `bytes=start-` or `bytes=start-end`, inclusive end.
fn parse_range(value: &str, len: u64) -> Option<(u64, u64)> {
    let range = value.trim().strip_prefix("bytes=")?;
    let (start, end) = range.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end = match end.trim() {
        "" => len.checked_sub(1)?,
        end => end.parse::<u64>().ok()?.min(len.checked_sub(1)?),
    };
    (start <= end).then_some((start, end))
}

/// GET /{*path}
///
/// Plain file download. A `Range` header is answered with 206 and the
/// requested slice, or 416 when it starts past the end of the file.
pub async fn download_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let file_path = resolve(&state, &path)?;
    let data = Bytes::from(tokio::fs::read(&file_path).await?);
    let len = data.len() as u64;

    let Some(range) = headers.get(header::RANGE).and_then(|value| value.to_str().ok()) else {
        return Ok(data.into_response());
    };

    match parse_range(range, len) {
        Some((start, end)) => {
            debug!("Serving {path} bytes {start}-{end}/{len}");
            let body = data.slice(start as usize..=end as usize);
            let content_range = HeaderValue::from_str(&format!("bytes {start}-{end}/{len}"))?;
            Ok((
                StatusCode::PARTIAL_CONTENT,
                [(header::CONTENT_RANGE, content_range)],
                body,
            )
                .into_response())
        }
        None => {
            let content_range = HeaderValue::from_str(&format!("bytes */{len}"))?;
            Ok((
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(header::CONTENT_RANGE, content_range)],
            )
                .into_response())
        }
    }
}
