use crate::api::handlers::{
    admin,
    auth::{
        access::{load_session, require_admin, require_auth},
        csrf::csrf_protect,
        login,
        rate_limit::{general_rate_limit, login_rate_limit},
        AuthState, DASHBOARD_PATH, LOGIN_PATH, LOGOUT_PATH,
    },
    health::{self, Backend},
    root,
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{CONTENT_SECURITY_POLICY, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS},
        HeaderName, HeaderValue, Request,
    },
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Extension, Router,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, task::JoinHandle};
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer,
    set_header::{SetRequestHeaderLayer, SetResponseHeaderLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, info_span, Span};
use ulid::Ulid;

pub mod handlers;
// OpenAPI document wiring lives in openapi.rs.
mod openapi;
pub(crate) mod views;

pub use openapi::openapi;

const REQUEST_ID: &str = "x-request-id";

/// Build the application router.
///
/// Layers run outermost first: request id, trace span, security headers,
/// session load, general rate limit, CSRF. Route layers add the login rate
/// limit and the access gates.
#[must_use]
pub fn router(auth_state: Arc<AuthState>, backend: Backend) -> Router {
    let dashboard = Router::new()
        .route(DASHBOARD_PATH, get(admin::dashboard))
        .route_layer(from_fn_with_state(auth_state.clone(), require_auth));

    let moderation = Router::new()
        .route("/admin/courses/:id", delete(admin::delete_course))
        .route("/admin/reviews/:id", delete(admin::delete_review))
        .route_layer(from_fn_with_state(auth_state.clone(), require_admin));

    let login_routes = Router::new()
        .route(LOGIN_PATH, get(login::login_form).post(login::login))
        .route_layer(from_fn_with_state(auth_state.clone(), login_rate_limit));

    Router::new()
        .route("/", get(root::root))
        .route(LOGOUT_PATH, post(login::logout))
        .route("/health", get(health::health).options(health::health))
        .route("/openapi.json", get(openapi::openapi_json))
        .merge(dashboard)
        .merge(moderation)
        .merge(login_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static(REQUEST_ID),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    REQUEST_ID,
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(SetResponseHeaderLayer::if_not_present(
                    X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    X_FRAME_OPTIONS,
                    HeaderValue::from_static("DENY"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    REFERRER_POLICY,
                    HeaderValue::from_static("same-origin"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    CONTENT_SECURITY_POLICY,
                    HeaderValue::from_static(
                        "default-src 'self'; frame-ancestors 'none'; form-action 'self'",
                    ),
                ))
                .layer(Extension(backend))
                .layer(from_fn_with_state(auth_state.clone(), load_session))
                .layer(from_fn_with_state(auth_state.clone(), general_rate_limit))
                .layer(from_fn_with_state(auth_state.clone(), csrf_protect)),
        )
        .with_state(auth_state)
}

/// Connect to the database.
///
/// # Errors
/// Return error if the pool cannot be created
pub async fn connect(dsn: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn serve(port: u16, auth_state: Arc<AuthState>, backend: Backend) -> Result<()> {
    let purge = spawn_purge_task(auth_state.clone());
    let app = router(auth_state, backend);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    purge.abort();

    Ok(())
}

/// Periodically drop closed rate-limit windows and expired sessions.
fn spawn_purge_task(auth_state: Arc<AuthState>) -> JoinHandle<()> {
    let period = auth_state
        .general_limiter()
        .window()
        .min(auth_state.login_limiter().window())
        .max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let windows = auth_state.general_limiter().purge_expired().await
                + auth_state.login_limiter().purge_expired().await;
            match auth_state.sessions().store().purge_expired().await {
                Ok(sessions) => debug!(windows, sessions, "Purged expired state"),
                Err(err) => error!("Failed to purge expired sessions: {err:#}"),
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => error!("Failed to listen for SIGTERM: {err}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
