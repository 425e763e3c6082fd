use axum::{http::StatusCode, response::Json};
use serde_json::json;

use crate::week::CalendarWeek;

pub async fn health_check() -> (StatusCode, Json<serde_json::Value>) {
    let cw = CalendarWeek::current();
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "week": cw.href() })),
    )
}
