use std::path::Path;

use axum::http::{HeaderValue, StatusCode};
use axum::{
    extract::{DefaultBodyLimit, Request},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::warn;

use crate::{models::is_image_extension, state::AppState};

pub mod admin;
pub mod health;
pub mod previews;
pub mod uploads;
pub mod votes;
pub mod weeks;

/// Largest accepted upload body.
const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 64;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .filter_map(|value| match value.parse::<HeaderValue>() {
                Ok(header) => Some(header),
                Err(err) => {
                    warn!(origin = %value, error = %err, "ignoring invalid CORS allowed origin");
                    None
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let years_routes = Router::new()
        .route("/", get(weeks::list_years))
        .route("/:year", get(weeks::list_year))
        .route("/:year/weeks", get(weeks::list_weeks_of_year))
        .route("/:year/weeks/:week", get(weeks::get_week))
        .route("/:year/users/:user", get(weeks::list_user_uploads));

    let admin_routes = Router::new().route(
        "/locks/:name",
        post(admin::create_lock).delete(admin::remove_lock),
    );

    let originals = Router::new()
        .nest_service("/mm", ServeDir::new(state.store.root()))
        .route_layer(middleware::from_fn(only_images));

    Router::new()
        .nest("/api/years", years_routes)
        .nest("/api/admin", admin_routes)
        .route("/api/users", get(weeks::list_users))
        .route("/api/phase", get(weeks::current_phase))
        .route("/api/previews/*path", get(previews::get_preview))
        .route("/api/uploads", post(uploads::upload_image))
        .route("/api/votes", get(votes::my_ballot).post(votes::submit_ballot))
        .route("/api/health", get(health::health_check))
        .merge(originals)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

/// Keeps ballots, user lists and lock files out of the static file route.
async fn only_images(request: Request, next: Next) -> Response {
    let is_image = Path::new(request.uri().path())
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(is_image_extension);
    if is_image {
        next.run(request).await
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}
