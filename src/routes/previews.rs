use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use tokio::task;

use crate::{error::AppResult, state::AppState};

pub async fn get_preview(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> AppResult<Response> {
    let previews = state.previews.clone();
    // runs to completion even if the client goes away, so the cache still fills
    let preview = task::spawn_blocking(move || previews.get_preview(&path)).await??;

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (header::CACHE_CONTROL, "public, max-age=86400".to_string()),
            (
                header::HeaderName::from_static("x-original-width"),
                preview.width.to_string(),
            ),
            (
                header::HeaderName::from_static("x-original-height"),
                preview.height.to_string(),
            ),
        ],
        preview.bytes.clone(),
    )
        .into_response())
}
