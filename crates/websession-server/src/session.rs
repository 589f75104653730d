//! Session middleware and extractor.
//!
//! The middleware runs every request through the [`SessionGateway`]: the
//! session cookie selects the replicated session, the bound [`Session`] is
//! placed in the request extensions, and once the handler has answered its
//! changes are written back. A 5xx answer counts as a failed handler, so the
//! session changes it made are discarded.
//!
//! In ATOMIC mode a session created for a failed request stays in the cache,
//! so the 5xx still carries its cookie. A TRANSACTIONAL failure rolls the
//! creation back and issues no cookie.
//!
//! [`SessionGateway`]: websession::SessionGateway

use std::ops::Deref;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{
        HeaderMap, HeaderValue,
        header::{COOKIE, SET_COOKIE},
        request::Parts,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};
use websession::{ConsistencyMode, Session, normalize_session_id};

use crate::error::SessionLayerError;
use crate::state::AppState;

// ─────────────────────────────────────────────────────────────────────────────
// Middleware
// ─────────────────────────────────────────────────────────────────────────────

/// Session middleware function.
pub async fn session_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let cookie_name = state.config().cookie_name.as_str();
    let requested = session_cookie(request.headers(), cookie_name);
    let presented = requested.as_deref();
    let created_survives_failure = state.gateway().mode() == ConsistencyMode::Atomic;

    let result = state
        .gateway()
        .handle(presented, |session| async move {
            let mut request = request;
            request.extensions_mut().insert(session.clone());

            let mut response = next.run(request).await;
            if response.status().is_server_error() {
                let id = session.id();
                if created_survives_failure && needs_cookie(presented, &id) {
                    set_session_cookie(&mut response, cookie_name, &id);
                }
                return Err(SessionLayerError::Handler(response));
            }
            Ok((response, session.id()))
        })
        .await;

    match result {
        Ok((mut response, id)) => {
            if needs_cookie(presented, &id) {
                set_session_cookie(&mut response, cookie_name, &id);
            }
            response
        }
        Err(e) => {
            if !matches!(e, SessionLayerError::Handler(_)) {
                warn!(error = %e, "Request rejected by session middleware");
            }
            e.into_response()
        }
    }
}

/// Session id presented in the request's `Cookie` headers.
fn session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// Whether the client must be told about `id`.
fn needs_cookie(presented: Option<&str>, id: &str) -> bool {
    presented.map(normalize_session_id) != Some(id)
}

fn set_session_cookie(response: &mut Response, name: &str, id: &str) {
    match HeaderValue::from_str(&format!("{name}={id}; Path=/; HttpOnly; SameSite=Lax")) {
        Ok(value) => {
            debug!(session_id = %id, "Issuing session cookie");
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(e) => warn!(session_id = %id, error = %e, "Session id is not a valid cookie value"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Extractor
// ─────────────────────────────────────────────────────────────────────────────

/// The request's session, for handlers behind [`session_middleware`].
///
/// Extraction fails with a 500 on routes the middleware does not cover.
#[derive(Debug, Clone)]
pub struct WebSession(pub Session);

impl Deref for WebSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.0
    }
}

impl<S> FromRequestParts<S> for WebSession
where
    S: Send + Sync,
{
    type Rejection = SessionLayerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .map(WebSession)
            .ok_or(SessionLayerError::MissingSession)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(cookies: &[&str]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for cookie in cookies {
            map.append(COOKIE, HeaderValue::from_str(cookie).unwrap());
        }
        map
    }

    #[test]
    fn test_cookie_found_among_others() {
        let map = headers(&["theme=dark; JSESSIONID=abc123; lang=en"]);
        assert_eq!(session_cookie(&map, "JSESSIONID").as_deref(), Some("abc123"));
    }

    #[test]
    fn test_cookie_across_headers() {
        let map = headers(&["theme=dark", "SID=\"xyz\""]);
        assert_eq!(session_cookie(&map, "SID").as_deref(), Some("xyz"));
    }

    #[test]
    fn test_cookie_missing_or_empty() {
        assert!(session_cookie(&headers(&[]), "JSESSIONID").is_none());
        assert!(session_cookie(&headers(&["JSESSIONID="]), "JSESSIONID").is_none());
        assert!(session_cookie(&headers(&["XJSESSIONID=1"]), "JSESSIONID").is_none());
    }

    #[test]
    fn test_needs_cookie_compares_canonical_id() {
        assert!(needs_cookie(None, "abc"));
        assert!(needs_cookie(Some("stale"), "abc"));
        assert!(!needs_cookie(Some("abc"), "abc"));
        assert!(!needs_cookie(Some("abc!-5083!1385045122601"), "abc"));
    }

    #[test]
    fn test_cookie_keeps_routing_suffix() {
        let map = headers(&["JSESSIONID=abc!-5083!1385045122601"]);
        assert_eq!(
            session_cookie(&map, "JSESSIONID").as_deref(),
            Some("abc!-5083!1385045122601")
        );
    }
}
