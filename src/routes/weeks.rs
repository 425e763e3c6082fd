use std::collections::BTreeSet;

use axum::extract::{Json, Path, State};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::{
    error::{AppError, AppResult, StoreError},
    lock::Phase,
    models::{Template, Upload, VoteResult, WeekFolder},
    preview::PreviewCache,
    state::AppState,
    votes::allowed_vote_count,
    week::CalendarWeek,
};

/// Width the original site renders list images at.
const DISPLAY_WIDTH: u32 = 300;

#[derive(Serialize)]
pub struct PreviewInfo {
    pub width: u32,
    pub height: u32,
    pub display_width: u32,
    pub display_height: u32,
    /// Base64 (unpadded) JPEG bytes.
    pub data: String,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub file_name: String,
    pub owner: String,
    pub week_seq: u32,
    pub owner_seq: u32,
    pub href: String,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub preview: Option<PreviewInfo>,
}

#[derive(Serialize)]
pub struct TemplateResponse {
    pub file_name: String,
    pub href: String,
    pub preview: Option<PreviewInfo>,
}

#[derive(Serialize)]
pub struct WeekResponse {
    pub year: i32,
    pub week: u32,
    pub href: String,
    pub is_current_week: bool,
    pub phase: Phase,
    pub can_upload: bool,
    pub can_vote: bool,
    pub voting_finished: bool,
    pub allowed_votes: usize,
    pub template: Option<TemplateResponse>,
    pub uploads: Vec<UploadResponse>,
    pub votes: Vec<VoteResult>,
}

#[derive(Serialize)]
pub struct PhaseResponse {
    pub year: i32,
    pub week: u32,
    pub phase: Phase,
    pub can_upload: bool,
    pub can_vote: bool,
    pub voting_finished: bool,
}

impl PhaseResponse {
    pub fn new(cw: CalendarWeek, phase: Phase) -> Self {
        Self {
            year: cw.year,
            week: cw.week,
            phase,
            can_upload: phase.can_upload(),
            can_vote: phase.can_vote(),
            voting_finished: phase.voting_finished(),
        }
    }
}

fn preview_info(previews: &PreviewCache, href: &str) -> Option<PreviewInfo> {
    match previews.get_preview(href) {
        Ok(preview) => {
            let (display_width, display_height) = preview.display_size(DISPLAY_WIDTH);
            Some(PreviewInfo {
                width: preview.width,
                height: preview.height,
                display_width,
                display_height,
                data: preview.to_base64(),
            })
        }
        Err(err) => {
            warn!(path = %href, error = %err, "preview unavailable, clients fall back to the original");
            None
        }
    }
}

pub fn upload_response(upload: &Upload, previews: Option<&PreviewCache>) -> UploadResponse {
    let href = upload.href();
    UploadResponse {
        file_name: upload.file_name(),
        owner: upload.owner.clone(),
        week_seq: upload.week_seq,
        owner_seq: upload.owner_seq,
        preview: previews.and_then(|previews| preview_info(previews, &href)),
        href,
        uploaded_at: upload.uploaded_at,
    }
}

fn template_response(template: &Template, previews: &PreviewCache) -> TemplateResponse {
    let href = template.href();
    TemplateResponse {
        file_name: template.file_name(),
        preview: preview_info(previews, &href),
        href,
    }
}

/// Builds the JSON view of a week. Blocks on preview generation.
pub fn week_response(
    week: &WeekFolder,
    previews: &PreviewCache,
    current: CalendarWeek,
) -> WeekResponse {
    WeekResponse {
        year: week.cw.year,
        week: week.cw.week,
        href: week.cw.href(),
        is_current_week: week.cw == current,
        phase: week.phase,
        can_upload: week.can_upload(),
        can_vote: week.can_vote(),
        voting_finished: week.voting_finished(),
        allowed_votes: allowed_vote_count(week.uploads.len()),
        template: week
            .template
            .as_ref()
            .map(|template| template_response(template, previews)),
        uploads: week
            .uploads
            .iter()
            .map(|upload| upload_response(upload, Some(previews)))
            .collect(),
        votes: week.votes.clone(),
    }
}

fn parse_week(year: i32, week: u32) -> AppResult<CalendarWeek> {
    CalendarWeek::new(year, week).ok_or_else(|| AppError::bad_request("invalid calendar week"))
}

pub async fn list_years(State(state): State<AppState>) -> AppResult<Json<BTreeSet<i32>>> {
    let years = state.with_store(|store| store.list_years()).await?;
    Ok(Json(years))
}

pub async fn list_year(
    State(state): State<AppState>,
    Path(year): Path<i32>,
) -> AppResult<Json<Vec<WeekResponse>>> {
    let previews = state.previews.clone();
    let current = CalendarWeek::current();
    let weeks = state
        .with_store(move |store| {
            let weeks = store.list_year(year)?;
            Ok::<Vec<WeekResponse>, StoreError>(
                weeks
                    .iter()
                    .map(|week| week_response(week, &previews, current))
                    .collect(),
            )
        })
        .await?;
    Ok(Json(weeks))
}

pub async fn list_weeks_of_year(
    State(state): State<AppState>,
    Path(year): Path<i32>,
) -> AppResult<Json<Vec<CalendarWeek>>> {
    let weeks = state
        .with_store(move |store| store.list_weeks_of_year(year))
        .await?;
    Ok(Json(weeks))
}

pub async fn get_week(
    State(state): State<AppState>,
    Path((year, week)): Path<(i32, u32)>,
) -> AppResult<Json<WeekResponse>> {
    let cw = parse_week(year, week)?;
    let previews = state.previews.clone();
    let current = CalendarWeek::current();
    let response = state
        .with_store(move |store| {
            let week = store.list_week(cw)?;
            Ok::<_, StoreError>(week_response(&week, &previews, current))
        })
        .await?;
    Ok(Json(response))
}

/// A year's weeks reduced to one user's uploads.
pub async fn list_user_uploads(
    State(state): State<AppState>,
    Path((year, user)): Path<(i32, String)>,
) -> AppResult<Json<Vec<WeekResponse>>> {
    let user = user.to_lowercase();
    let previews = state.previews.clone();
    let current = CalendarWeek::current();
    let weeks = state
        .with_store(move |store| {
            if !store.list_users()?.contains(&user) {
                return Err(AppError::not_found());
            }
            let mut weeks = store.list_year(year)?;
            for week in &mut weeks {
                week.uploads.retain(|upload| upload.is_owned_by(&user));
            }
            Ok::<Vec<WeekResponse>, AppError>(
                weeks
                    .iter()
                    .filter(|week| !week.uploads.is_empty())
                    .map(|week| week_response(week, &previews, current))
                    .collect(),
            )
        })
        .await?;
    Ok(Json(weeks))
}

pub async fn list_users(State(state): State<AppState>) -> AppResult<Json<Vec<String>>> {
    let users = state.with_store(|store| store.list_users()).await?;
    Ok(Json(users))
}

pub async fn current_phase(State(state): State<AppState>) -> AppResult<Json<PhaseResponse>> {
    let cw = CalendarWeek::current();
    let phase = state.with_store(move |store| store.phase(cw)).await?;
    Ok(Json(PhaseResponse::new(cw, phase)))
}
