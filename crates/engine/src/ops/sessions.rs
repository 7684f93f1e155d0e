use chrono::{Duration, Utc};
use sea_orm::{ActiveValue, QueryFilter, TransactionTrait, prelude::*};

use crate::{
    ResultEngine, Session, User, sessions, users,
    util::{SESSION_KEY_BYTES, random_key},
};

use super::{Engine, with_tx};

impl Engine {
    /// Log `user_id` in: create a session valid for `ttl` and stamp
    /// `last_login`.
    ///
    /// `previous` is the session the client presented, if any. It is deleted
    /// so a login always rotates the key.
    pub async fn open_session(
        &self,
        user_id: i32,
        ttl: Duration,
        previous: Option<&str>,
    ) -> ResultEngine<Session> {
        let now = Utc::now();
        let session = Session {
            key: random_key(SESSION_KEY_BYTES),
            user_id,
            expires_at: now + ttl,
        };

        with_tx!(self, |db_tx| {
            if let Some(previous) = previous {
                sessions::Entity::delete_by_id(previous.to_string())
                    .exec(&db_tx)
                    .await?;
            }
            sessions::ActiveModel::from(&session).insert(&db_tx).await?;

            users::ActiveModel {
                id: ActiveValue::Unchanged(user_id),
                last_login: ActiveValue::Set(Some(now)),
                ..Default::default()
            }
            .update(&db_tx)
            .await?;

            Ok(session)
        })
    }

    /// Resolve a session key to its active owner.
    ///
    /// Expired sessions are deleted on sight and resolve to `None`.
    pub async fn session_user(&self, key: &str) -> ResultEngine<Option<User>> {
        let row = sessions::Entity::find_by_id(key.to_string())
            .find_also_related(users::Entity)
            .one(&self.database)
            .await?;

        let Some((session, user)) = row else {
            return Ok(None);
        };

        if Session::from(session).is_expired(Utc::now()) {
            tracing::debug!("dropping expired session");
            self.close_session(key).await?;
            return Ok(None);
        }

        Ok(user.filter(|user| user.is_active).map(User::from))
    }

    /// Delete a session. Missing keys are not an error.
    pub async fn close_session(&self, key: &str) -> ResultEngine<()> {
        sessions::Entity::delete_by_id(key.to_string())
            .exec(&self.database)
            .await?;
        Ok(())
    }

    /// Purge every expired session and return how many were removed.
    pub async fn clear_expired_sessions(&self) -> ResultEngine<u64> {
        let result = sessions::Entity::delete_many()
            .filter(sessions::Column::ExpireDate.lte(Utc::now()))
            .exec(&self.database)
            .await?;
        tracing::info!(purged = result.rows_affected, "expired sessions cleared");
        Ok(result.rows_affected)
    }
}
