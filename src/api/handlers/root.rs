use axum::{extract::Extension, response::Html};

use super::auth::ViewContext;
use crate::api::views;

// GET /
pub async fn root(Extension(view): Extension<ViewContext>) -> Html<String> {
    Html(views::home_page(&view))
}
