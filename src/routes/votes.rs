use axum::extract::{Json, State};
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthenticatedUser,
    error::{AppResult, StoreError},
    state::AppState,
    votes::allowed_vote_count,
    week::CalendarWeek,
};

#[derive(Deserialize)]
pub struct SubmitBallotRequest {
    pub choices: Vec<String>,
}

#[derive(Serialize)]
pub struct BallotResponse {
    pub owner: String,
    pub allowed_votes: usize,
    pub choices: Vec<String>,
}

pub async fn submit_ballot(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<SubmitBallotRequest>,
) -> AppResult<Json<BallotResponse>> {
    let cw = CalendarWeek::current();
    let (ballot, allowed_votes) = state
        .with_store(move |store| {
            let ballot = store.submit_ballot(cw, &user.username, payload.choices)?;
            let uploads = store.list_week_files(cw)?.uploads.len();
            Ok::<_, StoreError>((ballot, allowed_vote_count(uploads)))
        })
        .await?;

    Ok(Json(BallotResponse {
        owner: ballot.owner,
        allowed_votes,
        choices: ballot.choices,
    }))
}

/// The caller's current ballot for this week, empty if they have not voted.
pub async fn my_ballot(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<BallotResponse>> {
    let cw = CalendarWeek::current();
    let response = state
        .with_store(move |store| {
            let uploads = match store.list_week_files(cw) {
                Ok(week) => week.uploads.len(),
                Err(StoreError::NotFound(_)) => 0,
                Err(err) => return Err(err),
            };
            let choices = store
                .ballots(cw)?
                .get(&user.username)
                .map(|ballot| ballot.choices.clone())
                .unwrap_or_default();
            Ok(BallotResponse {
                owner: user.username,
                allowed_votes: allowed_vote_count(uploads),
                choices,
            })
        })
        .await?;
    Ok(Json(response))
}
