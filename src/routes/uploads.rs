use axum::{
    extract::{Json, Multipart, State},
    http::StatusCode,
};
use tracing::{error, info};

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    source::detect_image_extension,
    state::AppState,
    week::CalendarWeek,
};

use super::weeks::{upload_response, UploadResponse};

/// Stores the `file` field as a new upload of the current week.
pub async fn upload_image(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<UploadResponse>)> {
    let mut file_bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        let msg = format!("invalid multipart data: {err}");
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(msg)
    })? {
        if field.name() == Some("file") {
            let data = field.bytes().await.map_err(|err| {
                let msg = format!("failed to read file bytes: {err}");
                error!(error = %err, "failed to read file bytes");
                AppError::bad_request(msg)
            })?;
            file_bytes = Some(data.to_vec());
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| {
        error!("upload rejected: missing file field");
        AppError::bad_request("file field is required")
    })?;
    if file_bytes.is_empty() {
        return Err(AppError::bad_request("file field must not be empty"));
    }

    let extension = detect_image_extension(&file_bytes)?;
    let cw = CalendarWeek::current();
    let owner = user.username.clone();
    let upload = state
        .with_store(move |store| store.store_upload(&owner, cw, &file_bytes, extension))
        .await
        .inspect_err(|err| error!(error = ?err, user = %user.username, "upload failed"))?;

    info!(user = %user.username, file = %upload.file_name(), "upload succeeded");
    Ok((StatusCode::CREATED, Json(upload_response(&upload, None))))
}
