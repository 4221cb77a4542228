//! Administrator dashboard and content moderation.

use axum::{
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::auth::{types::ActionResponse, AuthState, CurrentPrincipal, ViewContext};
use crate::api::views::{self, DashboardData};

const RECENT_REVIEWS: i64 = 10;

// GET /admin/dashboard
pub async fn dashboard(
    State(auth_state): State<Arc<AuthState>>,
    Extension(view): Extension<ViewContext>,
    headers: HeaderMap,
) -> Response {
    let catalog = auth_state.catalog();
    let loaded = async {
        let counts = catalog.counts().await?;
        let recent = catalog.recent_reviews(RECENT_REVIEWS).await?;
        anyhow::Ok((counts, recent))
    }
    .await;

    match loaded {
        Ok((counts, recent)) => {
            let data = DashboardData {
                course_count: counts.courses,
                review_count: counts.reviews,
                recent_reviews: &recent,
            };
            Html(views::dashboard_page(&view, &data)).into_response()
        }
        Err(err) => {
            error!("Failed to load dashboard: {err:#}");
            auth_state
                .internal_error(&format!("{err:#}"))
                .respond(&headers)
        }
    }
}

#[utoipa::path(
    delete,
    path = "/admin/courses/{id}",
    params(("id" = String, Path, description = "Course id")),
    responses(
        (status = 200, description = "Course and its reviews deleted", body = ActionResponse),
        (status = 403, description = "Not an administrator or invalid CSRF token", body = super::auth::types::ErrorBody),
        (status = 404, description = "Course not found", body = ActionResponse),
        (status = 500, description = "Deletion failed", body = ActionResponse)
    ),
    tag = "admin"
)]
pub async fn delete_course(
    State(auth_state): State<Arc<AuthState>>,
    Extension(CurrentPrincipal(principal)): Extension<CurrentPrincipal>,
    Path(id): Path<String>,
) -> Response {
    let Ok(course_id) = Uuid::parse_str(&id) else {
        return not_found("Course not found");
    };
    match auth_state.catalog().delete_course(course_id).await {
        Ok(true) => {
            info!(course_id = %course_id, username = %principal.username, "Course deleted");
            Json(ActionResponse::ok("Course deleted")).into_response()
        }
        Ok(false) => not_found("Course not found"),
        Err(err) => {
            error!("Failed to delete course {course_id}: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ActionResponse::failed("Failed to delete course")),
            )
                .into_response()
        }
    }
}

#[utoipa::path(
    delete,
    path = "/admin/reviews/{id}",
    params(("id" = String, Path, description = "Review id")),
    responses(
        (status = 200, description = "Review deleted", body = ActionResponse),
        (status = 403, description = "Not an administrator or invalid CSRF token", body = super::auth::types::ErrorBody),
        (status = 404, description = "Review not found", body = ActionResponse),
        (status = 500, description = "Deletion failed", body = ActionResponse)
    ),
    tag = "admin"
)]
pub async fn delete_review(
    State(auth_state): State<Arc<AuthState>>,
    Extension(CurrentPrincipal(principal)): Extension<CurrentPrincipal>,
    Path(id): Path<String>,
) -> Response {
    let Ok(review_id) = Uuid::parse_str(&id) else {
        return not_found("Review not found");
    };
    match auth_state.catalog().delete_review(review_id).await {
        Ok(true) => {
            info!(review_id = %review_id, username = %principal.username, "Review deleted");
            Json(ActionResponse::ok("Review deleted")).into_response()
        }
        Ok(false) => not_found("Review not found"),
        Err(err) => {
            error!("Failed to delete review {review_id}: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ActionResponse::failed("Failed to delete review")),
            )
                .into_response()
        }
    }
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(ActionResponse::failed(message))).into_response()
}
