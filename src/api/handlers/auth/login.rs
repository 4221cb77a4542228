//! Login form, login and logout handlers.
//!
//! Flow Overview:
//! 1) `GET /admin/login` stores the session (so its CSRF token can be checked)
//!    and renders the form.
//! 2) `POST /admin/login` verifies the token, authenticates, regenerates the
//!    session, binds the principal and saves it before redirecting. Any
//!    failure after authentication re-renders the form with a generic error.
//! 3) `POST /admin/logout` destroys the session and always clears the cookie.

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Extension, Form, State},
    http::{header::SET_COOKIE, HeaderMap, HeaderValue},
    response::{Html, IntoResponse, Response},
};
use secrecy::SecretString;
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info, warn};

use super::{
    access::{CurrentPrincipal, CurrentSession, ViewContext},
    authenticator::{log_backend_error, AuthError},
    csrf::submitted_token,
    found,
    rate_limit::{peer_key, LoginSucceeded},
    session::Session,
    state::AuthState,
    types::{LoginForm, SecurityError},
    utils::local_redirect_target,
    DASHBOARD_PATH,
};
use crate::api::views;

pub(crate) const INVALID_CREDENTIALS: &str = "Invalid username or password";
pub(crate) const LOGIN_FAILED: &str = "An error occurred during login. Please try again.";

fn client_label(
    auth_state: &AuthState,
    headers: &HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> String {
    peer_key(
        headers,
        peer.map(|ConnectInfo(addr)| addr),
        auth_state.config().trusted_proxies(),
    )
}

fn render_form(
    auth_state: &AuthState,
    session: &Session,
    error: Option<&str>,
    username: &str,
) -> Response {
    let token = if session.is_persisted() {
        auth_state.csrf().issue_token(session)
    } else {
        String::new()
    };
    Html(views::login_page(&token, error, username)).into_response()
}

fn with_session_cookie(auth_state: &AuthState, session: &Session, mut response: Response) -> Response {
    match auth_state.sessions().cookie(session) {
        Ok(cookie) => {
            response.headers_mut().append(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build session cookie: {err}"),
    }
    response
}

// GET /admin/login
pub async fn login_form(
    State(auth_state): State<Arc<AuthState>>,
    Extension(CurrentSession(mut session)): Extension<CurrentSession>,
    Extension(view): Extension<ViewContext>,
    headers: HeaderMap,
) -> Response {
    if view.is_admin {
        return found(DASHBOARD_PATH);
    }

    if session.is_persisted() || !auth_state.config().csrf_on_login() {
        return render_form(&auth_state, &session, None, "");
    }

    if let Err(err) = auth_state.sessions().save(&mut session).await {
        error!(error = ?err, "Failed to store session for login form");
        return auth_state.internal_error(&err).respond(&headers);
    }
    let response = render_form(&auth_state, &session, None, "");
    with_session_cookie(&auth_state, &session, response)
}

// POST /admin/login
pub async fn login(
    State(auth_state): State<Arc<AuthState>>,
    Extension(CurrentSession(session)): Extension<CurrentSession>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response {
    let client = client_label(&auth_state, &headers, peer);

    if auth_state.config().csrf_on_login() {
        let valid = session.is_persisted()
            && form
                .csrf
                .as_deref()
                .is_some_and(|token| auth_state.csrf().verify(&session, token));
        if !valid {
            warn!(client = %client, path = "/admin/login", "Rejected login with invalid CSRF token");
            return SecurityError::BadCsrfToken.respond(&headers);
        }
    }

    let password = SecretString::from(form.password);
    let principal = match auth_state
        .authenticator()
        .authenticate(&form.username, &password)
        .await
    {
        Ok(principal) => principal,
        Err(AuthError::InvalidCredentials) => {
            warn!(client = %client, username = %form.username, "Failed admin login");
            return render_form(
                &auth_state,
                &session,
                Some(INVALID_CREDENTIALS),
                &form.username,
            );
        }
        Err(err) => {
            log_backend_error(&err);
            return render_form(&auth_state, &session, Some(LOGIN_FAILED), &form.username);
        }
    };

    let sessions = auth_state.sessions();
    let mut next = match sessions.regenerate(&session).await {
        Ok(next) => next,
        Err(err) => {
            error!(error = ?err, "Session regeneration failed during login");
            return render_form(&auth_state, &session, Some(LOGIN_FAILED), &form.username);
        }
    };

    next.bind(principal.id);
    let target = next
        .take_return_to()
        .and_then(|target| local_redirect_target(&target))
        .unwrap_or_else(|| DASHBOARD_PATH.to_string());

    if let Err(err) = sessions.save(&mut next).await {
        error!(error = ?err, "Failed to persist session during login");
        // The old token is gone; hand the client the fresh, still anonymous one.
        next.demote();
        let response = render_form(&auth_state, &next, Some(LOGIN_FAILED), &form.username);
        return with_session_cookie(&auth_state, &next, response);
    }

    info!(client = %client, username = %principal.username, "Admin login succeeded");

    let mut response = with_session_cookie(&auth_state, &next, found(&target));
    response.extensions_mut().insert(LoginSucceeded);
    response
}

// POST /admin/logout
pub async fn logout(
    State(auth_state): State<Arc<AuthState>>,
    Extension(CurrentSession(session)): Extension<CurrentSession>,
    principal: Option<Extension<CurrentPrincipal>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(Extension(CurrentPrincipal(principal))) = principal {
        let valid = submitted_token(&headers, &body)
            .is_some_and(|token| auth_state.csrf().verify(&session, &token));
        if !valid {
            warn!(client = %client_label(&auth_state, &headers, peer), path = "/admin/logout", "Rejected logout with invalid CSRF token");
            return SecurityError::BadCsrfToken.respond(&headers);
        }
        info!(username = %principal.username, "Admin logged out");
    }

    if session.is_persisted() {
        if let Err(err) = auth_state.sessions().destroy(&session).await {
            error!(error = ?err, "Failed to destroy session");
        }
    }

    let mut response = found("/");
    let cookie = auth_state
        .sessions()
        .clear_cookie()
        .unwrap_or_else(|_| HeaderValue::from_static("sessionId=; Path=/; Max-Age=0"));
    response.headers_mut().append(SET_COOKIE, cookie);
    response
}
