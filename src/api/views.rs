//! Minimal HTML pages for the admin surface.
//!
//! Every dynamic value goes through [`escape`].

use axum::http::StatusCode;
use std::fmt::Write as _;

use super::handlers::{auth::ViewContext, catalog::ReviewSummary};

/// Escape text for HTML element and attribute content.
#[must_use]
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

fn layout(title: &str, view: Option<&ViewContext>, body: &str) -> String {
    let nav = match view {
        Some(ViewContext {
            is_admin: true,
            current_username,
            csrf_token,
        }) => format!(
            r#"<nav><span>Signed in as {}</span> <a href="/admin/dashboard">Dashboard</a>
<form method="post" action="/admin/logout"><input type="hidden" name="_csrf" value="{}"><button type="submit">Log out</button></form></nav>"#,
            escape(current_username.as_deref().unwrap_or_default()),
            escape(csrf_token.as_deref().unwrap_or_default()),
        ),
        _ => r#"<nav><a href="/admin/login">Admin</a></nav>"#.to_string(),
    };
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>{} | Course Wiki</title></head>
<body>
<header><a href="/">Course Wiki</a> {nav}</header>
<main>
{body}
</main>
</body>
</html>
"#,
        escape(title)
    )
}

#[must_use]
pub fn home_page(view: &ViewContext) -> String {
    let body = if view.is_admin {
        "<h1>Course Wiki</h1><p>You are logged in.</p>"
    } else {
        "<h1>Course Wiki</h1><p>Browse courses and share anonymous reviews.</p>"
    };
    layout("Home", Some(view), body)
}

#[must_use]
pub fn login_page(csrf_token: &str, error: Option<&str>, username: &str) -> String {
    let error = error
        .map(|message| format!(r#"<p class="error" role="alert">{}</p>"#, escape(message)))
        .unwrap_or_default();
    let body = format!(
        r#"<h1>Admin login</h1>
{error}
<form method="post" action="/admin/login">
<input type="hidden" name="_csrf" value="{}">
<label>Username <input name="username" value="{}" autocomplete="username" required></label>
<label>Password <input type="password" name="password" autocomplete="current-password" required></label>
<button type="submit">Log in</button>
</form>"#,
        escape(csrf_token),
        escape(username)
    );
    layout("Admin login", None, &body)
}

pub struct DashboardData<'a> {
    pub course_count: i64,
    pub review_count: i64,
    pub recent_reviews: &'a [ReviewSummary],
}

#[must_use]
pub fn dashboard_page(view: &ViewContext, data: &DashboardData<'_>) -> String {
    let mut rows = String::new();
    for review in data.recent_reviews {
        let _ = write!(
            rows,
            r#"<tr data-review-id="{}"><td>{}</td><td>{}</td><td>{}</td></tr>"#,
            review.id,
            escape(&review.course_title),
            escape(&review.comment),
            review.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    let csrf = escape(view.csrf_token.as_deref().unwrap_or_default());
    let body = format!(
        r#"<h1>Dashboard</h1>
<meta name="csrf-token" content="{csrf}">
<ul><li>Courses: {}</li><li>Reviews: {}</li></ul>
<h2>Recent reviews</h2>
<table><thead><tr><th>Course</th><th>Comment</th><th>Posted</th></tr></thead><tbody>{rows}</tbody></table>"#,
        data.course_count, data.review_count
    );
    layout("Dashboard", Some(view), &body)
}

#[must_use]
pub fn error_page(status: StatusCode, title: &str, message: &str, detail: Option<&str>) -> String {
    let detail = detail
        .map(|detail| format!("<pre>{}</pre>", escape(detail)))
        .unwrap_or_default();
    let body = format!(
        "<h1>{} {}</h1><p>{}</p>{detail}",
        status.as_u16(),
        escape(title),
        escape(message)
    );
    layout(title, None, &body)
}
