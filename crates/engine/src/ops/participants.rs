use chrono::Utc;
use sea_orm::{ActiveValue, QueryFilter, TransactionTrait, prelude::*};

use crate::{
    EngineError, ResultEngine, UserProfile,
    error::is_unique_violation,
    participant_profiles::{self, DEFAULT_ACCEPTED},
    util::normalize_text,
};

use super::{Engine, accounts::load_profile, with_tx};

/// Input for [`Engine::become_participant`].
#[derive(Clone, Debug, Default)]
pub struct NewParticipant {
    pub university: String,
}

impl Engine {
    /// Attach a participant profile to `user_id` and return the refreshed
    /// user.
    ///
    /// Fails with [`EngineError::AlreadyParticipant`] when a profile exists,
    /// including when a concurrent request created it first.
    pub async fn become_participant(
        &self,
        user_id: i32,
        participant: NewParticipant,
    ) -> ResultEngine<UserProfile> {
        let now = Utc::now();
        with_tx!(self, |db_tx| {
            let existing = participant_profiles::Entity::find()
                .filter(participant_profiles::Column::UserId.eq(user_id))
                .one(&db_tx)
                .await?;
            if existing.is_some() {
                return Err(EngineError::AlreadyParticipant);
            }

            participant_profiles::ActiveModel {
                id: ActiveValue::NotSet,
                user_id: ActiveValue::Set(user_id),
                university: ActiveValue::Set(normalize_text(&participant.university)),
                accepted: ActiveValue::Set(DEFAULT_ACCEPTED),
                created_at: ActiveValue::Set(now),
                updated_at: ActiveValue::Set(now),
            }
            .insert(&db_tx)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    tracing::warn!(user_id, "participant profile created concurrently");
                    EngineError::AlreadyParticipant
                } else {
                    err.into()
                }
            })?;

            load_profile(&db_tx, user_id).await
        })
    }
}
