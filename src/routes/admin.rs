use axum::extract::{Json, Path, State};
use tracing::info;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    lock::LockName,
    state::AppState,
    week::CalendarWeek,
};

use super::weeks::PhaseResponse;

fn parse_lock(name: &str) -> AppResult<LockName> {
    name.parse().map_err(AppError::bad_request)
}

pub async fn create_lock(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(name): Path<String>,
) -> AppResult<Json<PhaseResponse>> {
    let lock = parse_lock(&name)?;
    let cw = CalendarWeek::current();
    info!(user = %user.username, lock = %lock, week = %cw, "closing phase");
    let phase = state
        .with_store(move |store| {
            store.create_lock(lock, cw)?;
            store.phase(cw)
        })
        .await?;
    Ok(Json(PhaseResponse::new(cw, phase)))
}

pub async fn remove_lock(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(name): Path<String>,
) -> AppResult<Json<PhaseResponse>> {
    let lock = parse_lock(&name)?;
    let cw = CalendarWeek::current();
    info!(user = %user.username, lock = %lock, week = %cw, "reopening phase");
    let phase = state
        .with_store(move |store| {
            store.remove_lock(lock, cw)?;
            store.phase(cw)
        })
        .await?;
    Ok(Json(PhaseResponse::new(cw, phase)))
}
