use chrono::Utc;
use sea_orm::{ActiveValue, ConnectionTrait, QueryFilter, TransactionTrait, prelude::*};

use crate::{
    EngineError, ResultEngine, User, UserProfile,
    error::is_unique_violation,
    participant_profiles,
    password::{hash_password, verify_password},
    users,
    util::{normalize_text, normalize_username},
};

use super::{Engine, tokens::create_token, with_tx};

/// Input for [`Engine::register`].
#[derive(Clone, Debug, Default)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// Partial update for [`Engine::update_user`]. `None` leaves a field untouched.
#[derive(Clone, Debug, Default)]
pub struct UserChanges {
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Written to the participant profile; ignored when the user has none.
    pub university: Option<String>,
}

fn duplicate_or(err: DbErr) -> EngineError {
    if is_unique_violation(&err) {
        tracing::warn!("username taken by a concurrent write");
        EngineError::DuplicateUsername
    } else {
        err.into()
    }
}

async fn username_taken<C: ConnectionTrait>(
    db: &C,
    username: &str,
    exclude: Option<i32>,
) -> ResultEngine<bool> {
    let mut query = users::Entity::find().filter(users::Column::Username.eq(username));
    if let Some(id) = exclude {
        query = query.filter(users::Column::Id.ne(id));
    }
    Ok(query.one(db).await?.is_some())
}

/// Load a user with its participant profile.
pub(super) async fn load_profile<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
) -> ResultEngine<UserProfile> {
    let (user, participant) = users::Entity::find_by_id(user_id)
        .find_also_related(participant_profiles::Entity)
        .one(db)
        .await?
        .ok_or_else(|| EngineError::KeyNotFound("user not exists".to_string()))?;

    Ok(UserProfile {
        user: user.into(),
        participant: participant.map(Into::into),
    })
}

impl Engine {
    /// Create a user and its API token in one transaction.
    ///
    /// Returns the new profile and the token key.
    pub async fn register(&self, new_user: NewUser) -> ResultEngine<(UserProfile, String)> {
        let username = normalize_username(&new_user.username)?;
        let password = hash_password(&new_user.password)?;
        let now = Utc::now();

        with_tx!(self, |db_tx| {
            if username_taken(&db_tx, &username, None).await? {
                return Err(EngineError::DuplicateUsername);
            }

            let model = users::ActiveModel {
                id: ActiveValue::NotSet,
                username: ActiveValue::Set(username),
                password: ActiveValue::Set(password),
                email: ActiveValue::Set(normalize_text(&new_user.email)),
                first_name: ActiveValue::Set(normalize_text(&new_user.first_name)),
                last_name: ActiveValue::Set(normalize_text(&new_user.last_name)),
                is_active: ActiveValue::Set(true),
                date_joined: ActiveValue::Set(now),
                last_login: ActiveValue::Set(None),
            }
            .insert(&db_tx)
            .await
            .map_err(duplicate_or)?;

            let token = create_token(&db_tx, model.id).await?;
            Ok((
                UserProfile {
                    user: model.into(),
                    participant: None,
                },
                token,
            ))
        })
    }

    /// Check a username/password pair.
    ///
    /// Unknown users, wrong passwords and inactive accounts all yield
    /// [`EngineError::InvalidCredentials`].
    pub async fn authenticate(&self, username: &str, password: &str) -> ResultEngine<User> {
        let model = users::Entity::find()
            .filter(users::Column::Username.eq(username))
            .one(&self.database)
            .await?;

        let Some(model) = model else {
            // Unknown usernames cost one hash, same as a wrong password.
            hash_password(password)?;
            tracing::warn!(%username, "authentication failed: unknown user");
            return Err(EngineError::InvalidCredentials);
        };

        if !verify_password(password, &model.password)? {
            tracing::warn!(user_id = model.id, "authentication failed: wrong password");
            return Err(EngineError::InvalidCredentials);
        }
        if !model.is_active {
            tracing::warn!(user_id = model.id, "authentication failed: inactive user");
            return Err(EngineError::InvalidCredentials);
        }
        Ok(model.into())
    }

    /// Return a user with its participant profile.
    pub async fn user(&self, user_id: i32) -> ResultEngine<UserProfile> {
        load_profile(&self.database, user_id).await
    }

    /// Apply a partial update and return the refreshed profile.
    pub async fn update_user(
        &self,
        user_id: i32,
        changes: UserChanges,
    ) -> ResultEngine<UserProfile> {
        let username = changes
            .username
            .as_deref()
            .map(normalize_username)
            .transpose()?;
        let password = changes
            .password
            .as_deref()
            .map(hash_password)
            .transpose()?;

        with_tx!(self, |db_tx| {
            let model = users::Entity::find_by_id(user_id)
                .one(&db_tx)
                .await?
                .ok_or_else(|| EngineError::KeyNotFound("user not exists".to_string()))?;
            let mut active: users::ActiveModel = model.into();

            if let Some(username) = username {
                if username_taken(&db_tx, &username, Some(user_id)).await? {
                    return Err(EngineError::DuplicateUsername);
                }
                active.username = ActiveValue::Set(username);
            }
            if let Some(password) = password {
                active.password = ActiveValue::Set(password);
            }
            if let Some(email) = changes.email.as_deref() {
                active.email = ActiveValue::Set(normalize_text(email));
            }
            if let Some(first_name) = changes.first_name.as_deref() {
                active.first_name = ActiveValue::Set(normalize_text(first_name));
            }
            if let Some(last_name) = changes.last_name.as_deref() {
                active.last_name = ActiveValue::Set(normalize_text(last_name));
            }
            if active.is_changed() {
                active.update(&db_tx).await.map_err(duplicate_or)?;
            }

            if let Some(university) = changes.university.as_deref() {
                let profile = participant_profiles::Entity::find()
                    .filter(participant_profiles::Column::UserId.eq(user_id))
                    .one(&db_tx)
                    .await?;
                if let Some(profile) = profile {
                    let mut profile: participant_profiles::ActiveModel = profile.into();
                    profile.university = ActiveValue::Set(normalize_text(university));
                    profile.updated_at = ActiveValue::Set(Utc::now());
                    profile.update(&db_tx).await?;
                }
            }

            load_profile(&db_tx, user_id).await
        })
    }

    /// Replace the password of `username`.
    pub async fn set_password(&self, username: &str, password: &str) -> ResultEngine<()> {
        let hashed = hash_password(password)?;
        with_tx!(self, |db_tx| {
            let model = users::Entity::find()
                .filter(users::Column::Username.eq(username))
                .one(&db_tx)
                .await?
                .ok_or_else(|| EngineError::KeyNotFound(username.to_string()))?;

            let mut active: users::ActiveModel = model.into();
            active.password = ActiveValue::Set(hashed);
            active.update(&db_tx).await?;
            tracing::info!(%username, "password replaced");
            Ok(())
        })
    }
}
