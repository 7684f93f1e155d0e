//! Handlers for `/api/v1/user/`.

use api_types::{
    participant::{ParticipantNew, ParticipantView},
    user::{Login, SERVER_CONTROLLED_FIELDS, UserNew, UserUpdate, UserView, UserWithToken},
};
use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use axum_extra::extract::{
    CookieJar,
    cookie::{Cookie, SameSite},
};
use engine::{EngineError, NewParticipant, NewUser, Session, UserChanges, UserProfile};

use crate::{
    ServerError,
    payload::{payload, validated},
    server::{Caller, ServerState, SessionConfig},
};

/// Path segment naming the caller.
const ME: &str = "me";

fn user_view(profile: UserProfile) -> UserView {
    let UserProfile { user, participant } = profile;
    UserView {
        id: user.id,
        username: user.username,
        email: user.email,
        first_name: user.first_name,
        last_name: user.last_name,
        last_login: user.last_login,
        date_joined: user.date_joined,
        participant: participant.map(|participant| ParticipantView {
            id: participant.id,
            university: participant.university,
            accepted: participant.accepted,
        }),
    }
}

fn session_cookie(config: &SessionConfig, session: &Session) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), session.key.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.secure)
        .max_age(time::Duration::seconds(config.max_age_secs))
        .build()
}

/// Open a session for `user_id`, replacing the one in `jar` if present.
async fn log_in(
    state: &ServerState,
    jar: CookieJar,
    user_id: i32,
) -> Result<CookieJar, ServerError> {
    let previous = state.session_key(&jar);
    let session = state
        .engine
        .open_session(user_id, state.sessions.ttl(), previous.as_deref())
        .await?;
    Ok(jar.add(session_cookie(&state.sessions, &session)))
}

/// `me` or a numeric id. Anything else cannot name a user.
fn target_id(caller: &Caller, id: &str) -> Result<i32, ServerError> {
    if id == ME {
        return Ok(caller.user.id);
    }
    id.parse()
        .map_err(|_| EngineError::KeyNotFound(format!("user {id}")).into())
}

/// Register a user and log them in.
pub async fn create(
    State(state): State<ServerState>,
    jar: CookieJar,
    body: Bytes,
) -> Result<(StatusCode, CookieJar, Json<UserWithToken>), ServerError> {
    let data: UserNew = validated(&body, &[])?;

    let (profile, token) = state
        .engine
        .register(NewUser {
            username: data.username.unwrap_or_default(),
            password: data.password.unwrap_or_default(),
            email: data.email.unwrap_or_default(),
            first_name: data.first_name.unwrap_or_default(),
            last_name: data.last_name.unwrap_or_default(),
        })
        .await?;
    let user_id = profile.user.id;
    tracing::info!(user_id, username = %profile.user.username, "user registered");

    let jar = log_in(&state, jar, user_id).await?;
    // Re-read so the response carries the `last_login` just stamped.
    let profile = state.engine.user(user_id).await?;

    Ok((
        StatusCode::CREATED,
        jar,
        Json(UserWithToken {
            user: user_view(profile),
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<ServerState>,
    jar: CookieJar,
    body: Bytes,
) -> Result<(CookieJar, Json<UserWithToken>), ServerError> {
    // Credentials that are absent, null or not strings fail like a wrong password.
    let data: Login = match payload(&body, &[]) {
        Ok(data) => data,
        Err(ServerError::Validation(_)) => Login::default(),
        Err(err) => return Err(err),
    };
    let (Some(username), Some(password)) = (data.username, data.password) else {
        tracing::warn!("login rejected: missing credentials");
        return Err(EngineError::InvalidCredentials.into());
    };

    let user = match state.engine.authenticate(&username, &password).await {
        Ok(user) => user,
        Err(EngineError::InvalidCredentials) => {
            tracing::warn!(%username, "login rejected");
            return Err(EngineError::InvalidCredentials.into());
        }
        Err(err) => return Err(err.into()),
    };

    let jar = log_in(&state, jar, user.id).await?;
    let token = state.engine.token_for(user.id).await?;
    let profile = state.engine.user(user.id).await?;
    tracing::info!(user_id = user.id, "user logged in");

    Ok((
        jar,
        Json(UserWithToken {
            user: user_view(profile),
            token,
        }),
    ))
}

pub async fn logout(
    State(state): State<ServerState>,
    Extension(caller): Extension<Caller>,
    mut jar: CookieJar,
) -> Result<(StatusCode, CookieJar), ServerError> {
    if let Some(key) = &caller.session_key {
        state.engine.close_session(key).await?;
        jar = jar.remove(Cookie::build((state.sessions.cookie_name.clone(), "")).path("/"));
    }
    tracing::info!(user_id = caller.user.id, "user logged out");

    Ok((StatusCode::OK, jar))
}

pub async fn retrieve(
    State(state): State<ServerState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<UserView>, ServerError> {
    let user_id = target_id(&caller, &id)?;
    let profile = state.engine.user(user_id).await?;
    Ok(Json(user_view(profile)))
}

/// Partial update of the caller. Only `me` is writable.
pub async fn update(
    State(state): State<ServerState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<UserView>, ServerError> {
    if id != ME {
        return Err(ServerError::ForbiddenUpdate);
    }
    let data: UserUpdate = validated(&body, SERVER_CONTROLLED_FIELDS)?;

    let profile = state
        .engine
        .update_user(
            caller.user.id,
            UserChanges {
                username: data.username,
                password: data.password,
                email: data.email,
                first_name: data.first_name,
                last_name: data.last_name,
                university: data.university,
            },
        )
        .await?;
    tracing::info!(user_id = caller.user.id, "user updated");

    Ok(Json(user_view(profile)))
}

/// Attach a participant profile to the caller.
pub async fn participant(
    State(state): State<ServerState>,
    Extension(caller): Extension<Caller>,
    body: Bytes,
) -> Result<(StatusCode, Json<UserView>), ServerError> {
    let current = state.engine.user(caller.user.id).await?;
    if current.participant.is_some() {
        return Err(EngineError::AlreadyParticipant.into());
    }
    let data: ParticipantNew = validated(&body, SERVER_CONTROLLED_FIELDS)?;

    let profile = state
        .engine
        .become_participant(
            caller.user.id,
            NewParticipant {
                university: data.university.unwrap_or_default(),
            },
        )
        .await?;
    tracing::info!(user_id = caller.user.id, "participant profile created");

    Ok((StatusCode::CREATED, Json(user_view(profile))))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use engine::{ParticipantProfile, User};

    use super::*;

    fn user(id: i32) -> User {
        User {
            id,
            username: "alice".to_string(),
            email: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            is_active: true,
            date_joined: Utc::now(),
            last_login: None,
        }
    }

    fn caller(id: i32) -> Caller {
        Caller {
            user: user(id),
            session_key: None,
        }
    }

    #[test]
    fn me_resolves_to_the_caller() {
        assert_eq!(target_id(&caller(7), "me").unwrap(), 7);
        assert_eq!(target_id(&caller(7), "12").unwrap(), 12);
    }

    #[test]
    fn non_numeric_target_is_not_found() {
        let err = target_id(&caller(7), "alice").unwrap_err();
        assert!(matches!(err, ServerError::Engine(EngineError::KeyNotFound(_))));
    }

    #[test]
    fn user_view_carries_participant() {
        let now = Utc::now();
        let view = user_view(UserProfile {
            user: user(3),
            participant: Some(ParticipantProfile {
                id: 9,
                user_id: 3,
                university: "SNU".to_string(),
                accepted: true,
                created_at: now,
                updated_at: now,
            }),
        });
        assert_eq!(view.id, 3);
        assert_eq!(
            view.participant,
            Some(ParticipantView {
                id: 9,
                university: "SNU".to_string(),
                accepted: true,
            })
        );
    }

    #[test]
    fn session_cookie_attributes() {
        let config = SessionConfig::default();
        let session = Session {
            key: "k".to_string(),
            user_id: 1,
            expires_at: Utc::now(),
        };
        let cookie = session_cookie(&config, &session);
        assert_eq!(cookie.name(), "sessionid");
        assert_eq!(cookie.value(), "k");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(1_209_600)));
    }
}
