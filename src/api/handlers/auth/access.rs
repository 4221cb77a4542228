//! Session loading and access gates.
//!
//! Flow Overview:
//! 1) `load_session` resolves the cookie, re-resolves the bound principal and
//!    publishes `CurrentSession`, `ViewContext` and (when logged in)
//!    `CurrentPrincipal` as request extensions.
//! 2) `require_auth` and `require_admin` guard routes. Blocked page requests
//!    remember where they were going so login can send them back.

use axum::{
    extract::{Request, State},
    http::{header::SET_COOKIE, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{error, warn};

use super::{
    authenticator::{log_backend_error, Principal},
    found,
    session::Session,
    state::AuthState,
    types::SecurityError,
    utils::{local_redirect_target, wants_json},
    LOGIN_PATH,
};

/// The request's session as loaded from the cookie.
#[derive(Clone, Debug)]
pub struct CurrentSession(pub Session);

/// The logged-in administrator, present only for authenticated sessions.
#[derive(Clone, Debug)]
pub struct CurrentPrincipal(pub Principal);

/// Values every rendered page may show.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ViewContext {
    pub is_admin: bool,
    pub current_username: Option<String>,
    /// Present once the session is stored; forms post it back as `_csrf`.
    pub csrf_token: Option<String>,
}

pub async fn load_session(
    State(auth_state): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let sessions = auth_state.sessions();
    let mut session = match sessions.load(request.headers()).await {
        Ok(session) => session,
        Err(err) => {
            error!(error = ?err, "Failed to load session");
            return auth_state
                .internal_error(&err)
                .respond(request.headers());
        }
    };

    let mut principal = None;
    if let Some(id) = session.principal_id().filter(|_| session.is_authenticated()) {
        match auth_state.authenticator().principal(id).await {
            Ok(Some(resolved)) => principal = Some(resolved),
            Ok(None) => {
                warn!(principal_id = %id, "Session principal no longer exists; demoting session");
                session.demote();
                if let Err(err) = sessions.save(&mut session).await {
                    error!(error = ?err, "Failed to demote session");
                }
            }
            Err(err) => {
                log_backend_error(&err);
                return auth_state
                    .internal_error(&err)
                    .respond(request.headers());
            }
        }
    }

    if let Err(err) = sessions.touch(&mut session).await {
        warn!(error = ?err, "Failed to extend session expiry");
    }

    let view = ViewContext {
        is_admin: principal.is_some(),
        current_username: principal.as_ref().map(|p| p.username.clone()),
        csrf_token: session
            .is_persisted()
            .then(|| auth_state.csrf().issue_token(&session)),
    };

    let extensions = request.extensions_mut();
    extensions.insert(CurrentSession(session));
    extensions.insert(view);
    if let Some(principal) = principal {
        extensions.insert(CurrentPrincipal(principal));
    }

    next.run(request).await
}

fn is_authenticated(request: &Request) -> bool {
    request.extensions().get::<CurrentPrincipal>().is_some()
}

/// The page a blocked GET request was heading to, with the session to store it on.
fn return_target(request: &Request) -> Option<(String, Session)> {
    if request.method() != Method::GET {
        return None;
    }
    let target = request
        .uri()
        .path_and_query()
        .and_then(|pq| local_redirect_target(pq.as_str()))?;
    let CurrentSession(session) = request.extensions().get::<CurrentSession>().cloned()?;
    Some((target, session))
}

/// Remember the requested page on the session; returns a cookie when the
/// session had to be created for it.
async fn remember_return_to(
    auth_state: &AuthState,
    pending: Option<(String, Session)>,
) -> Option<HeaderValue> {
    let (target, mut session) = pending?;

    let was_persisted = session.is_persisted();
    session.set_return_to(target);
    if let Err(err) = auth_state.sessions().save(&mut session).await {
        error!(error = ?err, "Failed to store return path");
        return None;
    }
    if was_persisted {
        return None;
    }
    auth_state.sessions().cookie(&session).ok()
}

fn with_cookie(mut response: Response, cookie: Option<HeaderValue>) -> Response {
    if let Some(cookie) = cookie {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}

/// Require a logged-in session.
///
/// JSON clients get 401; pages redirect to the login form.
pub async fn require_auth(
    State(auth_state): State<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Response {
    if is_authenticated(&request) {
        return next.run(request).await;
    }
    if wants_json(request.headers()) {
        return SecurityError::Unauthenticated.respond(request.headers());
    }
    let pending = return_target(&request);
    let cookie = remember_return_to(&auth_state, pending).await;
    with_cookie(found(LOGIN_PATH).into_response(), cookie)
}

/// Require an administrator.
///
/// Every principal is an administrator, so this admits exactly the sessions
/// `require_auth` admits; it differs in how refusals are reported (403).
pub async fn require_admin(
    State(auth_state): State<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Response {
    if is_authenticated(&request) {
        return next.run(request).await;
    }
    if wants_json(request.headers()) {
        return SecurityError::Forbidden.respond(request.headers());
    }
    let pending = return_target(&request);
    let cookie = remember_return_to(&auth_state, pending).await;
    with_cookie(SecurityError::Forbidden.respond(request.headers()), cookie)
}
