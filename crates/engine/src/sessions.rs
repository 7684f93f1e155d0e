//! Server-side login sessions.
//!
//! A session row binds an opaque key (carried by the client in a cookie) to a
//! user until `expire_date`. Expired rows are treated as absent.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub key: String,
    pub user_id: i32,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub session_key: String,
    pub user_id: i32,
    pub expire_date: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Users,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Session> for ActiveModel {
    fn from(session: &Session) -> Self {
        Self {
            session_key: ActiveValue::Set(session.key.clone()),
            user_id: ActiveValue::Set(session.user_id),
            expire_date: ActiveValue::Set(session.expires_at),
        }
    }
}

impl From<Model> for Session {
    fn from(model: Model) -> Self {
        Self {
            key: model.session_key,
            user_id: model.user_id,
            expires_at: model.expire_date,
        }
    }
}
