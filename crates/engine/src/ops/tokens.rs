use chrono::Utc;
use sea_orm::{ActiveValue, ConnectionTrait, QueryFilter, TransactionTrait, prelude::*};

use crate::{
    EngineError, ResultEngine, User, auth_tokens,
    error::is_unique_violation,
    users,
    util::{TOKEN_BYTES, random_key},
};

use super::{Engine, with_tx};

/// Insert a fresh token for `user_id` and return its key.
pub(super) async fn create_token<C: ConnectionTrait>(db: &C, user_id: i32) -> ResultEngine<String> {
    let key = random_key(TOKEN_BYTES);
    auth_tokens::ActiveModel {
        key: ActiveValue::Set(key.clone()),
        user_id: ActiveValue::Set(user_id),
        created: ActiveValue::Set(Utc::now()),
    }
    .insert(db)
    .await?;
    Ok(key)
}

async fn existing_token<C: ConnectionTrait>(db: &C, user_id: i32) -> ResultEngine<Option<String>> {
    Ok(auth_tokens::Entity::find()
        .filter(auth_tokens::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .map(|token| token.key))
}

impl Engine {
    /// Get the user's token, creating it on first use.
    ///
    /// Two callers racing on a user without a token both end up with the
    /// row that won the unique index on `user_id`.
    pub async fn token_for(&self, user_id: i32) -> ResultEngine<String> {
        if let Some(key) = existing_token(&self.database, user_id).await? {
            return Ok(key);
        }

        match create_token(&self.database, user_id).await {
            Ok(key) => Ok(key),
            Err(EngineError::Database(err)) if is_unique_violation(&err) => {
                tracing::debug!(user_id, "token created concurrently, reusing it");
                existing_token(&self.database, user_id)
                    .await?
                    .ok_or_else(|| EngineError::KeyNotFound("token not exists".to_string()))
            }
            Err(err) => Err(err),
        }
    }

    /// Resolve a token key to its active owner.
    pub async fn token_user(&self, key: &str) -> ResultEngine<Option<User>> {
        let row = auth_tokens::Entity::find_by_id(key.to_string())
            .find_also_related(users::Entity)
            .one(&self.database)
            .await?;

        Ok(row
            .and_then(|(_, user)| user)
            .filter(|user| user.is_active)
            .map(User::from))
    }

    /// Drop the user's token and issue a new one.
    pub async fn regenerate_token(&self, username: &str) -> ResultEngine<String> {
        with_tx!(self, |db_tx| {
            let user = users::Entity::find()
                .filter(users::Column::Username.eq(username))
                .one(&db_tx)
                .await?
                .ok_or_else(|| EngineError::KeyNotFound(username.to_string()))?;

            auth_tokens::Entity::delete_many()
                .filter(auth_tokens::Column::UserId.eq(user.id))
                .exec(&db_tx)
                .await?;
            let key = create_token(&db_tx, user.id).await?;
            tracing::info!(user_id = user.id, "token regenerated");
            Ok(key)
        })
    }
}
