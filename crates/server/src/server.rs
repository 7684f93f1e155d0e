use axum::{
    Router,
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
};
use axum_extra::extract::CookieJar;

use std::sync::Arc;

use crate::{ServerError, user};
use engine::{Engine, User};

/// Scheme accepted in the `Authorization` header.
const TOKEN_SCHEME: &[u8] = b"token";

/// Session cookie settings.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub cookie_name: String,
    /// Lifetime of a session row and `Max-Age` of its cookie.
    pub max_age_secs: i64,
    /// Mark the cookie `Secure`.
    pub secure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "sessionid".to_string(),
            max_age_secs: 1_209_600,
            secure: false,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_age_secs)
    }
}

#[derive(Clone)]
pub struct ServerState {
    pub engine: Arc<Engine>,
    pub sessions: Arc<SessionConfig>,
}

impl ServerState {
    /// Key of the session cookie sent with the request, if any.
    pub fn session_key(&self, jar: &CookieJar) -> Option<String> {
        jar.get(&self.sessions.cookie_name)
            .map(|cookie| cookie.value().to_string())
    }
}

/// The authenticated user of a request, inserted by [`auth`].
#[derive(Clone, Debug)]
pub struct Caller {
    pub user: User,
    /// The caller's own live session from the cookie, even when a token
    /// authenticated the request.
    pub session_key: Option<String>,
}

/// Extract the key from `Authorization: Token <key>`.
///
/// Other schemes are not ours and read as no credentials.
fn token_from_headers(headers: &HeaderMap) -> Result<Option<String>, ServerError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };

    let mut parts = value
        .as_bytes()
        .split(u8::is_ascii_whitespace)
        .filter(|part| !part.is_empty());
    match parts.next() {
        Some(scheme) if scheme.eq_ignore_ascii_case(TOKEN_SCHEME) => {}
        _ => return Ok(None),
    }

    let Some(key) = parts.next() else {
        return Err(ServerError::InvalidToken(
            "Invalid token header. No credentials provided.",
        ));
    };
    if parts.next().is_some() {
        return Err(ServerError::InvalidToken(
            "Invalid token header. Token string should not contain spaces.",
        ));
    }

    let key = std::str::from_utf8(key).map_err(|_| {
        ServerError::InvalidToken(
            "Invalid token header. Token string should not contain invalid characters.",
        )
    })?;
    Ok(Some(key.to_string()))
}

/// Resolve the caller from the token header, then from the session cookie.
///
/// A bad token is an error; a stale or unknown session is anonymous.
async fn identify(
    state: &ServerState,
    headers: &HeaderMap,
    jar: &CookieJar,
) -> Result<Option<Caller>, ServerError> {
    let session_key = state.session_key(jar);

    if let Some(key) = token_from_headers(headers)? {
        let user = state
            .engine
            .token_user(&key)
            .await?
            .ok_or(ServerError::InvalidToken("Invalid token."))?;
        // A cookie for some other account is not this caller's session.
        let session_key = match session_key {
            Some(session_key) => state
                .engine
                .session_user(&session_key)
                .await?
                .filter(|owner| owner.id == user.id)
                .map(|_| session_key),
            None => None,
        };
        return Ok(Some(Caller { user, session_key }));
    }

    let Some(key) = session_key else {
        return Ok(None);
    };
    let user = state.engine.session_user(&key).await?;
    Ok(user.map(|user| Caller {
        user,
        session_key: Some(key),
    }))
}

async fn auth(
    State(state): State<ServerState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let caller = identify(&state, request.headers(), &jar)
        .await?
        .ok_or(ServerError::NotAuthenticated)?;

    request.extensions_mut().insert(caller);
    Ok(next.run(request).await)
}

async fn health() -> &'static str {
    "ok"
}

pub fn router(engine: Engine, sessions: SessionConfig) -> Router {
    let state = ServerState {
        engine: Arc::new(engine),
        sessions: Arc::new(sessions),
    };

    let protected = Router::new()
        .route("/api/v1/user/logout/", post(user::logout))
        .route("/api/v1/user/participant/", post(user::participant))
        .route(
            "/api/v1/user/{id}/",
            get(user::retrieve).put(user::update),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth));

    Router::new()
        .route("/api/v1/user/", post(user::create))
        .route("/api/v1/user/login/", put(user::login))
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}

pub async fn run_with_listener(
    engine: Engine,
    sessions: SessionConfig,
    listener: tokio::net::TcpListener,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router(engine, sessions)).await
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn token_header_yields_key() {
        let key = token_from_headers(&headers("Token abc123")).unwrap();
        assert_eq!(key.as_deref(), Some("abc123"));
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let key = token_from_headers(&headers("token abc123")).unwrap();
        assert_eq!(key.as_deref(), Some("abc123"));
    }

    #[test]
    fn other_schemes_are_ignored() {
        assert!(token_from_headers(&headers("Basic dXNlcjpwdw==")).unwrap().is_none());
        assert!(token_from_headers(&HeaderMap::new()).unwrap().is_none());
    }

    #[test]
    fn malformed_token_headers_are_rejected() {
        assert!(matches!(
            token_from_headers(&headers("Token")),
            Err(ServerError::InvalidToken(_))
        ));
        assert!(matches!(
            token_from_headers(&headers("Token abc def")),
            Err(ServerError::InvalidToken(_))
        ));
    }

    #[test]
    fn default_session_lasts_two_weeks() {
        assert_eq!(SessionConfig::default().ttl(), chrono::Duration::days(14));
    }
}
