//! Auth module tests.
//!
//! Router-level tests drive the full middleware stack with in-memory stores.
//! Postgres-backed tests run only when `COURSE_WIKI_TEST_DSN` is set.

use super::{
    login::{INVALID_CREDENTIALS, LOGIN_FAILED},
    rate_limit::WindowConfig,
    AuthConfig, AuthState, Authenticator, CredentialStore, MemoryCredentialStore,
    MemorySessionStore, ProvisionOutcome, SessionRecord, SessionStore, StaticAuthenticator,
    StoreAuthenticator,
};
use crate::api::{
    handlers::{
        catalog::{Catalog, MemoryCatalog},
        health::Backend,
    },
    router,
};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{
        header::{ACCEPT, CONTENT_TYPE, COOKIE, LOCATION, RETRY_AFTER, SET_COOKIE},
        HeaderValue, Request, StatusCode,
    },
    response::Response,
    Router,
};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use secrecy::SecretString;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tower::ServiceExt;

const SESSION_SECRET: &str = "test-session-secret-0123456789abcdef";
const ADMIN_USERNAME: &str = "admin";
const ADMIN_PASSWORD: &str = "correct-horse-battery";

struct TestApp {
    router: Router,
    sessions: Arc<MemorySessionStore>,
    catalog: Arc<MemoryCatalog>,
}

fn static_authenticator() -> Arc<dyn Authenticator> {
    Arc::new(StaticAuthenticator::new(
        ADMIN_USERNAME.to_string(),
        &SecretString::from(ADMIN_PASSWORD.to_string()),
    ))
}

fn test_app(config: AuthConfig) -> TestApp {
    test_app_with(config, static_authenticator())
}

fn test_app_with(config: AuthConfig, authenticator: Arc<dyn Authenticator>) -> TestApp {
    let sessions = Arc::new(MemorySessionStore::new());
    let catalog = Arc::new(MemoryCatalog::new());
    let state = Arc::new(AuthState::new(
        config,
        authenticator,
        sessions.clone(),
        catalog.clone(),
        SecretString::from(SESSION_SECRET.to_string()),
    ));
    TestApp {
        router: router(state, Backend::Memory),
        sessions,
        catalog,
    }
}

async fn send(router: &Router, request: Request<Body>) -> Result<Response> {
    Ok(router.clone().oneshot(request).await?)
}

async fn body_string(response: Response) -> Result<String> {
    let bytes = response.into_body().collect().await?.to_bytes();
    String::from_utf8(bytes.to_vec()).context("body is not utf-8")
}

/// `sessionId=<token>` from a response that set the session cookie.
fn session_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .find(|pair| pair.starts_with("sessionId=") && *pair != "sessionId=")
        .map(str::to_string)
}

fn clears_session_cookie(response: &Response) -> bool {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.starts_with("sessionId=;") && value.contains("Max-Age=0"))
}

fn location(response: &Response) -> Option<&str> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
}

fn attribute_after(html: &str, marker: &str) -> Option<String> {
    let start = html.find(marker)? + marker.len();
    let end = html[start..].find('"')?;
    Some(html[start..start + end].to_string())
}

fn get(path: &str, cookie: Option<&str>) -> Result<Request<Body>> {
    let mut builder = Request::builder().method("GET").uri(path);
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, cookie);
    }
    Ok(builder.body(Body::empty())?)
}

fn form_post(path: &str, cookie: Option<&str>, fields: &[(&str, &str)]) -> Result<Request<Body>> {
    let body = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish();
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, cookie);
    }
    Ok(builder.body(Body::from(body))?)
}

/// Load the login form; returns the session cookie and the form's CSRF token.
async fn open_login_form(router: &Router, cookie: Option<&str>) -> Result<(String, String)> {
    let response = send(router, get("/admin/login", cookie)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = match (session_cookie(&response), cookie) {
        (Some(set), _) => set,
        (None, Some(existing)) => existing.to_string(),
        (None, None) => bail!("login form did not set a session cookie"),
    };
    let html = body_string(response).await?;
    let token = attribute_after(&html, r#"name="_csrf" value=""#)
        .ok_or_else(|| anyhow!("login form has no csrf token"))?;
    Ok((cookie, token))
}

async fn submit_login(
    router: &Router,
    cookie: &str,
    token: &str,
    username: &str,
    password: &str,
) -> Result<Response> {
    send(
        router,
        form_post(
            "/admin/login",
            Some(cookie),
            &[("username", username), ("password", password), ("_csrf", token)],
        )?,
    )
    .await
}

/// Log in and return the authenticated cookie plus its CSRF token.
async fn log_in(router: &Router) -> Result<(String, String)> {
    let (cookie, token) = open_login_form(router, None).await?;
    let response = submit_login(router, &cookie, &token, ADMIN_USERNAME, ADMIN_PASSWORD).await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    let cookie = session_cookie(&response).ok_or_else(|| anyhow!("login set no cookie"))?;

    let dashboard = send(router, get("/admin/dashboard", Some(&cookie))?).await?;
    assert_eq!(dashboard.status(), StatusCode::OK);
    let html = body_string(dashboard).await?;
    let token = attribute_after(&html, r#"name="csrf-token" content=""#)
        .ok_or_else(|| anyhow!("dashboard has no csrf token"))?;
    Ok((cookie, token))
}

#[tokio::test]
async fn login_issues_new_session_token() -> Result<()> {
    let app = test_app(AuthConfig::new());
    let (before, token) = open_login_form(&app.router, None).await?;

    let response =
        submit_login(&app.router, &before, &token, ADMIN_USERNAME, ADMIN_PASSWORD).await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), Some("/admin/dashboard"));
    let after = session_cookie(&response).ok_or_else(|| anyhow!("no cookie after login"))?;
    assert_ne!(before, after);

    // The pre-login token is anonymous now.
    let stale = send(&app.router, get("/admin/dashboard", Some(&before))?).await?;
    assert_eq!(stale.status(), StatusCode::FOUND);
    assert_eq!(location(&stale), Some("/admin/login"));

    let current = send(&app.router, get("/admin/dashboard", Some(&after))?).await?;
    assert_eq!(current.status(), StatusCode::OK);
    assert!(body_string(current).await?.contains("Signed in as admin"));
    Ok(())
}

#[tokio::test]
async fn failed_logins_share_one_message() -> Result<()> {
    let app = test_app(AuthConfig::new());
    let (cookie, token) = open_login_form(&app.router, None).await?;

    let unknown_user = submit_login(&app.router, &cookie, &token, "root", ADMIN_PASSWORD).await?;
    assert_eq!(unknown_user.status(), StatusCode::OK);
    assert!(session_cookie(&unknown_user).is_none());
    let unknown_user = body_string(unknown_user).await?;

    let wrong_password = submit_login(&app.router, &cookie, &token, ADMIN_USERNAME, "nope").await?;
    assert_eq!(wrong_password.status(), StatusCode::OK);
    let wrong_password = body_string(wrong_password).await?;

    assert!(unknown_user.contains(INVALID_CREDENTIALS));
    assert!(wrong_password.contains(INVALID_CREDENTIALS));
    Ok(())
}

#[tokio::test]
async fn store_mode_login_end_to_end() -> Result<()> {
    let store = Arc::new(MemoryCredentialStore::new());
    let hash = super::hash_password(&SecretString::from(ADMIN_PASSWORD.to_string()), 4).await?;
    let ProvisionOutcome::Created(admin) = store.provision(ADMIN_USERNAME, &hash).await? else {
        bail!("provisioning should succeed");
    };
    let authenticator = Arc::new(StoreAuthenticator::new(store.clone(), 4).await?);
    let app = test_app_with(AuthConfig::new(), authenticator);

    let (cookie, token) = open_login_form(&app.router, None).await?;
    let failed = submit_login(&app.router, &cookie, &token, "ghost", ADMIN_PASSWORD).await?;
    assert!(body_string(failed).await?.contains(INVALID_CREDENTIALS));

    let (cookie, _) = log_in(&app.router).await?;
    let stored = store.find_by_id(admin.id).await?;
    assert!(stored.and_then(|record| record.last_login_at).is_some());

    // Removing the administrator demotes the live session on its next request.
    store.delete_all().await?;
    let response = send(&app.router, get("/admin/dashboard", Some(&cookie))?).await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), Some("/admin/login"));
    Ok(())
}

#[tokio::test]
async fn authenticated_sessions_bypass_general_limiter() -> Result<()> {
    let config = AuthConfig::new()
        .with_general_window(WindowConfig::new(600, 3))
        .with_trusted_proxies(1);
    let app = test_app(config);

    // Two anonymous requests: the form and the login post.
    let (cookie, _token) = log_in(&app.router).await?;
    for _ in 0..10 {
        let response = send(&app.router, get("/", Some(&cookie))?).await?;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let anonymous = || -> Result<Request<Body>> {
        Ok(Request::builder()
            .uri("/")
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::empty())?)
    };
    for _ in 0..3 {
        let response = send(&app.router, anonymous()?).await?;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let throttled = send(&app.router, anonymous()?).await?;
    assert_eq!(throttled.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(throttled.headers().contains_key(RETRY_AFTER));
    assert!(body_string(throttled)
        .await?
        .contains("Too many requests. Please wait and try again."));
    Ok(())
}

#[tokio::test]
async fn mutating_request_without_token_is_rejected_even_when_logged_in() -> Result<()> {
    let app = test_app(AuthConfig::new());
    let course = app.catalog.add_course("Operating Systems").await;
    let (cookie, token) = log_in(&app.router).await?;
    let path = format!("/admin/courses/{course}");

    let without_token = Request::builder()
        .method("DELETE")
        .uri(&path)
        .header(COOKIE, &cookie)
        .header(ACCEPT, "application/json")
        .body(Body::empty())?;
    let response = send(&app.router, without_token).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await?)?;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Invalid CSRF token");
    assert_eq!(
        body["message"],
        "Invalid request. Reload the page and try again."
    );
    assert_eq!(app.catalog.counts().await?.courses, 1);

    let with_token = Request::builder()
        .method("DELETE")
        .uri(&path)
        .header(COOKIE, &cookie)
        .header(ACCEPT, "application/json")
        .header("x-csrf-token", &token)
        .body(Body::empty())?;
    let response = send(&app.router, with_token).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await?)?;
    assert_eq!(body["success"], true);
    assert_eq!(app.catalog.counts().await?.courses, 0);
    Ok(())
}

#[tokio::test]
async fn blocked_page_returns_after_login() -> Result<()> {
    let app = test_app(AuthConfig::new());

    let blocked = send(&app.router, get("/admin/dashboard", None)?).await?;
    assert_eq!(blocked.status(), StatusCode::FOUND);
    assert_eq!(location(&blocked), Some("/admin/login"));
    let cookie = session_cookie(&blocked).ok_or_else(|| anyhow!("gate set no cookie"))?;

    let (cookie, token) = open_login_form(&app.router, Some(&cookie)).await?;
    let response =
        submit_login(&app.router, &cookie, &token, ADMIN_USERNAME, ADMIN_PASSWORD).await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), Some("/admin/dashboard"));

    let next = session_cookie(&response).ok_or_else(|| anyhow!("no cookie after login"))?;
    let dashboard = send(&app.router, get("/admin/dashboard", Some(&next))?).await?;
    assert_eq!(dashboard.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn return_to_keeps_query() -> Result<()> {
    let app = test_app(AuthConfig::new());
    let blocked = send(&app.router, get("/admin/dashboard?tab=reviews", None)?).await?;
    let cookie = session_cookie(&blocked).ok_or_else(|| anyhow!("gate set no cookie"))?;

    let (cookie, token) = open_login_form(&app.router, Some(&cookie)).await?;
    let response =
        submit_login(&app.router, &cookie, &token, ADMIN_USERNAME, ADMIN_PASSWORD).await?;
    assert_eq!(location(&response), Some("/admin/dashboard?tab=reviews"));
    Ok(())
}

#[tokio::test]
async fn logout_twice_redirects_home() -> Result<()> {
    let app = test_app(AuthConfig::new());
    let (cookie, token) = log_in(&app.router).await?;

    let first = send(
        &app.router,
        form_post("/admin/logout", Some(&cookie), &[("_csrf", &token)])?,
    )
    .await?;
    assert_eq!(first.status(), StatusCode::FOUND);
    assert_eq!(location(&first), Some("/"));
    assert!(clears_session_cookie(&first));

    let second = send(&app.router, form_post("/admin/logout", Some(&cookie), &[])?).await?;
    assert_eq!(second.status(), StatusCode::FOUND);
    assert_eq!(location(&second), Some("/"));
    assert!(clears_session_cookie(&second));

    assert!(app.sessions.is_empty().await);
    let dashboard = send(&app.router, get("/admin/dashboard", Some(&cookie))?).await?;
    assert_eq!(location(&dashboard), Some("/admin/login"));
    Ok(())
}

#[tokio::test]
async fn authenticated_logout_requires_token() -> Result<()> {
    let app = test_app(AuthConfig::new());
    let (cookie, _token) = log_in(&app.router).await?;

    let response = send(&app.router, form_post("/admin/logout", Some(&cookie), &[])?).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let dashboard = send(&app.router, get("/admin/dashboard", Some(&cookie))?).await?;
    assert_eq!(dashboard.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn success_after_five_failures_keeps_login_open() -> Result<()> {
    let app = test_app(AuthConfig::new());
    let (cookie, token) = open_login_form(&app.router, None).await?;

    for _ in 0..5 {
        let response = submit_login(&app.router, &cookie, &token, ADMIN_USERNAME, "wrong").await?;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let success =
        submit_login(&app.router, &cookie, &token, ADMIN_USERNAME, ADMIN_PASSWORD).await?;
    assert_eq!(success.status(), StatusCode::FOUND);

    let (cookie, token) = open_login_form(&app.router, None).await?;
    let next = submit_login(&app.router, &cookie, &token, ADMIN_USERNAME, "wrong").await?;
    assert_eq!(next.status(), StatusCode::OK);
    assert!(body_string(next).await?.contains(INVALID_CREDENTIALS));
    Ok(())
}

#[tokio::test]
async fn repeated_failures_throttle_login() -> Result<()> {
    let app = test_app(AuthConfig::new());
    let (cookie, token) = open_login_form(&app.router, None).await?;

    for _ in 0..6 {
        let response = submit_login(&app.router, &cookie, &token, ADMIN_USERNAME, "wrong").await?;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let throttled =
        submit_login(&app.router, &cookie, &token, ADMIN_USERNAME, ADMIN_PASSWORD).await?;
    assert_eq!(throttled.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(throttled.headers().contains_key(RETRY_AFTER));
    assert!(body_string(throttled)
        .await?
        .contains("Too many login attempts. Please try again later."));
    Ok(())
}

#[tokio::test]
async fn login_requires_csrf_token_by_default() -> Result<()> {
    let app = test_app(AuthConfig::new());
    let response = send(
        &app.router,
        form_post(
            "/admin/login",
            None,
            &[("username", ADMIN_USERNAME), ("password", ADMIN_PASSWORD)],
        )?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(session_cookie(&response).is_none());
    Ok(())
}

#[tokio::test]
async fn login_without_csrf_when_disabled() -> Result<()> {
    let app = test_app(AuthConfig::new().with_csrf_on_login(false));
    let response = send(
        &app.router,
        form_post(
            "/admin/login",
            None,
            &[("username", ADMIN_USERNAME), ("password", ADMIN_PASSWORD)],
        )?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(session_cookie(&response).is_some());
    Ok(())
}

#[tokio::test]
async fn login_form_redirects_when_logged_in() -> Result<()> {
    let app = test_app(AuthConfig::new());
    let (cookie, _token) = log_in(&app.router).await?;
    let response = send(&app.router, get("/admin/login", Some(&cookie))?).await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), Some("/admin/dashboard"));
    Ok(())
}

#[tokio::test]
async fn json_clients_get_gate_errors() -> Result<()> {
    let app = test_app(AuthConfig::new());

    let request = Request::builder()
        .uri("/admin/dashboard")
        .header(ACCEPT, "application/json")
        .body(Body::empty())?;
    let response = send(&app.router, request).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await?)?;
    assert_eq!(
        body,
        serde_json::json!({
            "success": false,
            "error": "Authentication required",
            "message": "Please log in."
        })
    );

    // An anonymous session with a valid token passes CSRF but not the admin gate.
    let (cookie, token) = open_login_form(&app.router, None).await?;
    let request = Request::builder()
        .method("DELETE")
        .uri("/admin/reviews/00000000-0000-0000-0000-000000000000")
        .header(COOKIE, &cookie)
        .header(ACCEPT, "application/json")
        .header("x-csrf-token", &token)
        .body(Body::empty())?;
    let response = send(&app.router, request).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await?)?;
    assert_eq!(
        body,
        serde_json::json!({
            "success": false,
            "error": "Forbidden",
            "message": "Administrators only."
        })
    );
    Ok(())
}

#[tokio::test]
async fn deleting_missing_content_is_not_found() -> Result<()> {
    let app = test_app(AuthConfig::new());
    let course = app.catalog.add_course("Compilers").await;
    let review = app
        .catalog
        .add_review(course, "great")
        .await
        .ok_or_else(|| anyhow!("review not created"))?;
    let (cookie, token) = log_in(&app.router).await?;

    let delete = |path: String| -> Result<Request<Body>> {
        Ok(Request::builder()
            .method("DELETE")
            .uri(path)
            .header(COOKIE, &cookie)
            .header(ACCEPT, "application/json")
            .header("x-csrf-token", &token)
            .body(Body::empty())?)
    };

    let response = send(&app.router, delete(format!("/admin/reviews/{review}"))?).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app.router, delete(format!("/admin/reviews/{review}"))?).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await?)?;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Review not found");

    let response = send(&app.router, delete("/admin/courses/not-a-uuid".to_string())?).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn responses_carry_security_headers() -> Result<()> {
    let app = test_app(AuthConfig::new());
    let response = send(&app.router, get("/", None)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(
        headers.get("x-content-type-options").map(|v| v.as_bytes()),
        Some(&b"nosniff"[..])
    );
    assert_eq!(
        headers.get("x-frame-options").map(|v| v.as_bytes()),
        Some(&b"DENY"[..])
    );
    assert!(headers.contains_key("referrer-policy"));
    assert!(headers.contains_key("content-security-policy"));
    assert!(headers.contains_key("x-request-id"));
    // Anonymous visits that store nothing do not start a session.
    assert!(session_cookie(&response).is_none());
    assert!(app.sessions.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn health_reports_memory_backend() -> Result<()> {
    let app = test_app(AuthConfig::new());
    let response = send(&app.router, get("/health", None)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-app"));
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await?)?;
    assert_eq!(body["database"], "memory");
    assert_eq!(body["authenticator"], "static");
    assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
    Ok(())
}

#[tokio::test]
async fn openapi_document_is_served() -> Result<()> {
    let app = test_app(AuthConfig::new());
    let response = send(&app.router, get("/openapi.json", None)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await?)?;
    assert!(body["paths"]["/admin/courses/{id}"].is_object());
    Ok(())
}

/// Session store whose rotation always fails.
struct RotateFailsStore(MemorySessionStore);

#[async_trait]
impl SessionStore for RotateFailsStore {
    async fn load(&self, key: &[u8]) -> Result<Option<SessionRecord>> {
        self.0.load(key).await
    }

    async fn save(&self, key: &[u8], record: &SessionRecord) -> Result<()> {
        self.0.save(key, record).await
    }

    async fn rotate(&self, _old: &[u8], _new: &[u8], _record: &SessionRecord) -> Result<()> {
        bail!("store offline")
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.0.delete(key).await
    }

    async fn touch(&self, key: &[u8], expires_at: DateTime<Utc>) -> Result<()> {
        self.0.touch(key, expires_at).await
    }

    async fn purge_expired(&self) -> Result<u64> {
        self.0.purge_expired().await
    }
}

#[tokio::test]
async fn regeneration_failure_aborts_login() -> Result<()> {
    let state = Arc::new(AuthState::new(
        AuthConfig::new(),
        static_authenticator(),
        Arc::new(RotateFailsStore(MemorySessionStore::new())),
        Arc::new(MemoryCatalog::new()),
        SecretString::from(SESSION_SECRET.to_string()),
    ));
    let router = router(state, Backend::Memory);

    let (cookie, token) = open_login_form(&router, None).await?;
    let response = submit_login(&router, &cookie, &token, ADMIN_USERNAME, ADMIN_PASSWORD).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(session_cookie(&response).is_none());
    assert!(body_string(response).await?.contains(LOGIN_FAILED));

    let dashboard = send(&router, get("/admin/dashboard", Some(&cookie))?).await?;
    assert_eq!(location(&dashboard), Some("/admin/login"));
    Ok(())
}

/// Login attempts with a different spoofed `X-Forwarded-For` each time.
async fn failed_logins_rotating_forwarded_for(
    app: &TestApp,
    attempts: u8,
) -> Result<Vec<StatusCode>> {
    let (cookie, token) = open_login_form(&app.router, None).await?;
    let mut statuses = Vec::new();
    for i in 0..attempts {
        let mut request = form_post(
            "/admin/login",
            Some(&cookie),
            &[("username", ADMIN_USERNAME), ("password", "wrong"), ("_csrf", &token)],
        )?;
        request.headers_mut().insert(
            "x-forwarded-for",
            HeaderValue::from_str(&format!("198.51.100.{i}, 10.0.0.1"))?,
        );
        statuses.push(send(&app.router, request).await?.status());
    }
    Ok(statuses)
}

#[tokio::test]
async fn spoofed_forwarded_for_is_ignored_without_trusted_proxy() -> Result<()> {
    let app = test_app(AuthConfig::new());
    let statuses = failed_logins_rotating_forwarded_for(&app, 8).await?;
    assert_eq!(statuses[..6], [StatusCode::OK; 6]);
    assert_eq!(statuses[6..], [StatusCode::TOO_MANY_REQUESTS; 2]);
    Ok(())
}

#[tokio::test]
async fn trusted_proxy_keys_on_the_address_it_saw() -> Result<()> {
    let app = test_app(AuthConfig::new().with_trusted_proxies(1));
    // Every attempt arrives through the proxy as 10.0.0.1; the entries to its
    // left are whatever the client claimed.
    let statuses = failed_logins_rotating_forwarded_for(&app, 8).await?;
    assert_eq!(statuses[..6], [StatusCode::OK; 6]);
    assert_eq!(statuses[6..], [StatusCode::TOO_MANY_REQUESTS; 2]);
    Ok(())
}

/// Session store that accepts the rotation but fails every later save.
struct SaveFailsAfterRotateStore {
    inner: MemorySessionStore,
    rotated: AtomicBool,
}

#[async_trait]
impl SessionStore for SaveFailsAfterRotateStore {
    async fn load(&self, key: &[u8]) -> Result<Option<SessionRecord>> {
        self.inner.load(key).await
    }

    async fn save(&self, key: &[u8], record: &SessionRecord) -> Result<()> {
        if self.rotated.load(Ordering::SeqCst) {
            bail!("store offline");
        }
        self.inner.save(key, record).await
    }

    async fn rotate(&self, old: &[u8], new: &[u8], record: &SessionRecord) -> Result<()> {
        self.inner.rotate(old, new, record).await?;
        self.rotated.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn touch(&self, key: &[u8], expires_at: DateTime<Utc>) -> Result<()> {
        self.inner.touch(key, expires_at).await
    }

    async fn purge_expired(&self) -> Result<u64> {
        self.inner.purge_expired().await
    }
}

#[tokio::test]
async fn persist_failure_after_regeneration_leaves_client_anonymous() -> Result<()> {
    let state = Arc::new(AuthState::new(
        AuthConfig::new(),
        static_authenticator(),
        Arc::new(SaveFailsAfterRotateStore {
            inner: MemorySessionStore::new(),
            rotated: AtomicBool::new(false),
        }),
        Arc::new(MemoryCatalog::new()),
        SecretString::from(SESSION_SECRET.to_string()),
    ));
    let router = router(state, Backend::Memory);

    let (before, token) = open_login_form(&router, None).await?;
    let response = submit_login(&router, &before, &token, ADMIN_USERNAME, ADMIN_PASSWORD).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let after = session_cookie(&response).ok_or_else(|| anyhow!("no replacement cookie"))?;
    assert_ne!(before, after);
    assert!(body_string(response).await?.contains(LOGIN_FAILED));

    for cookie in [&before, &after] {
        let dashboard = send(&router, get("/admin/dashboard", Some(cookie))?).await?;
        assert_eq!(dashboard.status(), StatusCode::FOUND);
        assert_eq!(location(&dashboard), Some("/admin/login"));
    }
    Ok(())
}

mod postgres {
    //! Store tests against a real database.

    use super::super::{PgCredentialStore, PgSessionStore};
    use super::*;
    use crate::api::handlers::catalog::PgCatalog;
    use sqlx::{
        postgres::{PgConnectOptions, PgPoolOptions},
        Executor, PgPool,
    };
    use uuid::Uuid;

    const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

    /// A pool bound to a throwaway schema, or `None` when no database is configured.
    async fn test_pool() -> Result<Option<PgPool>> {
        let Ok(dsn) = std::env::var("COURSE_WIKI_TEST_DSN") else {
            eprintln!("Skipping integration test: COURSE_WIKI_TEST_DSN is not set");
            return Ok(None);
        };

        let schema = format!("test_{}", Uuid::new_v4().simple());
        let admin = PgPoolOptions::new()
            .max_connections(1)
            .connect(&dsn)
            .await
            .context("failed to connect test pool")?;
        admin
            .execute(format!("CREATE SCHEMA {schema}").as_str())
            .await
            .context("failed to create test schema")?;

        let options: PgConnectOptions = dsn.parse().context("invalid COURSE_WIKI_TEST_DSN")?;
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(options.options([("search_path", schema.as_str())]))
            .await
            .context("failed to connect schema pool")?;

        for (index, statement) in split_sql_statements(SCHEMA_SQL).iter().enumerate() {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .with_context(|| format!("failed to execute schema statement {}", index + 1))?;
        }
        Ok(Some(pool))
    }

    fn split_sql_statements(sql: &str) -> Vec<String> {
        let mut statements = Vec::new();
        let mut current = String::new();

        for line in sql.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with("--") {
                continue;
            }
            current.push_str(line);
            current.push('\n');

            if trimmed.ends_with(';') {
                let statement = current.trim();
                if !statement.is_empty() {
                    statements.push(statement.to_string());
                }
                current.clear();
            }
        }

        let leftover = current.trim();
        if !leftover.is_empty() {
            statements.push(leftover.to_string());
        }

        statements
    }

    #[test]
    fn schema_splits_into_statements() {
        let statements = split_sql_statements(SCHEMA_SQL);
        assert!(statements
            .iter()
            .any(|s| s.contains("CREATE TABLE IF NOT EXISTS admin_sessions")));
        assert!(statements.iter().all(|s| s.ends_with(';')));
    }

    #[tokio::test]
    async fn credential_store_provisions_once() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let store = PgCredentialStore::new(pool);

        let ProvisionOutcome::Created(admin) = store.provision("admin", "$2b$04$hash").await?
        else {
            bail!("first provisioning should succeed");
        };
        assert!(matches!(
            store.provision("other", "$2b$04$hash").await?,
            ProvisionOutcome::AlreadyProvisioned(existing) if existing.len() == 1
        ));
        assert!(store.find_by_username("ADMIN").await?.is_none());

        let now = Utc::now();
        store.record_login(admin.id, now).await?;
        let reloaded = store.find_by_id(admin.id).await?;
        assert!(reloaded.and_then(|a| a.last_login_at).is_some());

        assert_eq!(store.delete_all().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn session_store_rotates_atomically() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let store = PgSessionStore::new(pool);
        let now = Utc::now();
        let record = SessionRecord {
            principal_id: None,
            authenticated: false,
            return_to: Some("/admin/dashboard".to_string()),
            csrf_salt: "salt".to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
        };

        store.save(b"old-key", &record).await?;
        store.rotate(b"old-key", b"new-key", &record).await?;
        assert!(store.load(b"old-key").await?.is_none());
        let loaded = store.load(b"new-key").await?;
        assert_eq!(
            loaded.and_then(|r| r.return_to),
            Some("/admin/dashboard".to_string())
        );

        let mut expired = record.clone();
        expired.expires_at = now - chrono::Duration::seconds(1);
        store.save(b"expired", &expired).await?;
        assert!(store.load(b"expired").await?.is_none());
        assert_eq!(store.purge_expired().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn authenticated_session_requires_principal() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let store = PgSessionStore::new(pool);
        let now = Utc::now();
        let record = SessionRecord {
            principal_id: None,
            authenticated: true,
            return_to: None,
            csrf_salt: "salt".to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
        };
        assert!(store.save(b"key", &record).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn catalog_cascades_course_deletion() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let course_id = Uuid::new_v4();
        sqlx::query("INSERT INTO courses (id, title) VALUES ($1, 'Databases')")
            .bind(course_id)
            .execute(&pool)
            .await?;
        sqlx::query("INSERT INTO reviews (id, course_id, comment) VALUES ($1, $2, 'solid')")
            .bind(Uuid::new_v4())
            .bind(course_id)
            .execute(&pool)
            .await?;

        let catalog = PgCatalog::new(pool);
        assert_eq!(catalog.counts().await?.reviews, 1);
        assert_eq!(catalog.recent_reviews(10).await?.len(), 1);
        assert!(catalog.delete_course(course_id).await?);
        assert_eq!(catalog.counts().await?.reviews, 0);
        assert!(!catalog.delete_course(course_id).await?);
        Ok(())
    }
}
