use chrono::Duration;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};

use engine::{Engine, EngineError, NewParticipant, NewUser, UserChanges};
use migration::MigratorTrait;

async fn engine_with_db() -> (Engine, DatabaseConnection) {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let engine = Engine::builder()
        .database(db.clone())
        .build()
        .await
        .unwrap();
    (engine, db)
}

fn new_user(username: &str, password: &str) -> NewUser {
    NewUser {
        username: username.to_string(),
        password: password.to_string(),
        ..Default::default()
    }
}

async fn deactivate(db: &DatabaseConnection, user_id: i32) {
    let backend = db.get_database_backend();
    db.execute(Statement::from_sql_and_values(
        backend,
        "UPDATE users SET is_active = ? WHERE id = ?",
        vec![false.into(), user_id.into()],
    ))
    .await
    .unwrap();
}

#[tokio::test]
async fn register_creates_user_with_token() {
    let (engine, _db) = engine_with_db().await;

    let (profile, token) = engine
        .register(NewUser {
            username: "alice".to_string(),
            password: "s3cret".to_string(),
            email: "alice@example.com".to_string(),
            first_name: " Alice ".to_string(),
            last_name: String::new(),
        })
        .await
        .unwrap();

    assert_eq!(profile.user.username, "alice");
    assert_eq!(profile.user.first_name, "Alice");
    assert!(profile.user.is_active);
    assert!(profile.user.last_login.is_none());
    assert!(profile.participant.is_none());
    assert_eq!(token.len(), 40);

    let owner = engine.token_user(&token).await.unwrap().unwrap();
    assert_eq!(owner.id, profile.user.id);
}

#[tokio::test]
async fn register_rejects_duplicate_username() {
    let (engine, _db) = engine_with_db().await;
    engine.register(new_user("alice", "pw")).await.unwrap();

    let err = engine.register(new_user("alice", "other")).await.unwrap_err();
    assert_eq!(err, EngineError::DuplicateUsername);

    // Surrounding whitespace does not make a new name.
    let err = engine.register(new_user(" alice ", "other")).await.unwrap_err();
    assert_eq!(err, EngineError::DuplicateUsername);
}

#[tokio::test]
async fn register_rejects_invalid_username() {
    let (engine, _db) = engine_with_db().await;

    let err = engine.register(new_user("bad name", "pw")).await.unwrap_err();
    let EngineError::Validation(fields) = err else {
        panic!("expected a validation error, got {err:?}");
    };
    assert!(fields.get("username").is_some());
}

#[tokio::test]
async fn authenticate_checks_password_and_activity() {
    let (engine, db) = engine_with_db().await;
    let (profile, _) = engine.register(new_user("alice", "pw")).await.unwrap();

    let user = engine.authenticate("alice", "pw").await.unwrap();
    assert_eq!(user.id, profile.user.id);

    assert_eq!(
        engine.authenticate("alice", "nope").await.unwrap_err(),
        EngineError::InvalidCredentials
    );
    assert_eq!(
        engine.authenticate("bob", "pw").await.unwrap_err(),
        EngineError::InvalidCredentials
    );

    deactivate(&db, profile.user.id).await;
    assert_eq!(
        engine.authenticate("alice", "pw").await.unwrap_err(),
        EngineError::InvalidCredentials
    );
}

#[tokio::test]
async fn token_for_is_stable_and_regenerate_replaces_it() {
    let (engine, _db) = engine_with_db().await;
    let (profile, token) = engine.register(new_user("alice", "pw")).await.unwrap();

    assert_eq!(engine.token_for(profile.user.id).await.unwrap(), token);
    assert_eq!(engine.token_for(profile.user.id).await.unwrap(), token);

    let fresh = engine.regenerate_token("alice").await.unwrap();
    assert_ne!(fresh, token);
    assert!(engine.token_user(&token).await.unwrap().is_none());
    assert_eq!(engine.token_for(profile.user.id).await.unwrap(), fresh);

    assert_eq!(
        engine.regenerate_token("ghost").await.unwrap_err(),
        EngineError::KeyNotFound("ghost".to_string())
    );
}

#[tokio::test]
async fn inactive_users_do_not_resolve_from_token_or_session() {
    let (engine, db) = engine_with_db().await;
    let (profile, token) = engine.register(new_user("alice", "pw")).await.unwrap();
    let session = engine
        .open_session(profile.user.id, Duration::hours(1), None)
        .await
        .unwrap();

    deactivate(&db, profile.user.id).await;

    assert!(engine.token_user(&token).await.unwrap().is_none());
    assert!(engine.session_user(&session.key).await.unwrap().is_none());
}

#[tokio::test]
async fn open_session_stamps_last_login_and_rotates() {
    let (engine, _db) = engine_with_db().await;
    let (profile, _) = engine.register(new_user("alice", "pw")).await.unwrap();
    let user_id = profile.user.id;

    let first = engine
        .open_session(user_id, Duration::hours(1), None)
        .await
        .unwrap();
    assert_eq!(first.key.len(), 32);
    assert_eq!(
        engine.session_user(&first.key).await.unwrap().unwrap().id,
        user_id
    );
    assert!(engine.user(user_id).await.unwrap().user.last_login.is_some());

    let second = engine
        .open_session(user_id, Duration::hours(1), Some(&first.key))
        .await
        .unwrap();
    assert_ne!(first.key, second.key);
    assert!(engine.session_user(&first.key).await.unwrap().is_none());
    assert!(engine.session_user(&second.key).await.unwrap().is_some());
}

#[tokio::test]
async fn close_session_is_idempotent() {
    let (engine, _db) = engine_with_db().await;
    let (profile, _) = engine.register(new_user("alice", "pw")).await.unwrap();
    let session = engine
        .open_session(profile.user.id, Duration::hours(1), None)
        .await
        .unwrap();

    engine.close_session(&session.key).await.unwrap();
    engine.close_session(&session.key).await.unwrap();
    engine.close_session("never-issued").await.unwrap();
    assert!(engine.session_user(&session.key).await.unwrap().is_none());
}

#[tokio::test]
async fn expired_sessions_are_ignored_and_purged() {
    let (engine, _db) = engine_with_db().await;
    let (profile, _) = engine.register(new_user("alice", "pw")).await.unwrap();
    let user_id = profile.user.id;

    let stale = engine
        .open_session(user_id, Duration::seconds(-1), None)
        .await
        .unwrap();
    engine
        .open_session(user_id, Duration::seconds(-1), None)
        .await
        .unwrap();
    let live = engine
        .open_session(user_id, Duration::hours(1), None)
        .await
        .unwrap();

    assert!(engine.session_user(&stale.key).await.unwrap().is_none());
    // One expired row was already dropped by the lookup above.
    assert_eq!(engine.clear_expired_sessions().await.unwrap(), 1);
    assert_eq!(engine.clear_expired_sessions().await.unwrap(), 0);
    assert!(engine.session_user(&live.key).await.unwrap().is_some());
}

#[tokio::test]
async fn update_user_touches_only_supplied_fields() {
    let (engine, _db) = engine_with_db().await;
    let (profile, _) = engine
        .register(NewUser {
            username: "alice".to_string(),
            password: "pw".to_string(),
            email: "alice@example.com".to_string(),
            first_name: "Alice".to_string(),
            last_name: "Liddell".to_string(),
        })
        .await
        .unwrap();

    let updated = engine
        .update_user(
            profile.user.id,
            UserChanges {
                first_name: Some("Al".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.user.first_name, "Al");
    assert_eq!(updated.user.last_name, "Liddell");
    assert_eq!(updated.user.email, "alice@example.com");
    assert_eq!(updated.user.username, "alice");

    let unchanged = engine
        .update_user(profile.user.id, UserChanges::default())
        .await
        .unwrap();
    assert_eq!(unchanged, updated);
}

#[tokio::test]
async fn update_user_rehashes_password_and_guards_username() {
    let (engine, _db) = engine_with_db().await;
    let (alice, _) = engine.register(new_user("alice", "pw")).await.unwrap();
    engine.register(new_user("bob", "pw")).await.unwrap();

    engine
        .update_user(
            alice.user.id,
            UserChanges {
                password: Some("new-pw".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(engine.authenticate("alice", "pw").await.is_err());
    assert!(engine.authenticate("alice", "new-pw").await.is_ok());

    let err = engine
        .update_user(
            alice.user.id,
            UserChanges {
                username: Some("bob".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::DuplicateUsername);

    // Renaming to the current name is not a conflict.
    let same = engine
        .update_user(
            alice.user.id,
            UserChanges {
                username: Some("alice".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(same.user.username, "alice");
}

#[tokio::test]
async fn become_participant_only_once() {
    let (engine, _db) = engine_with_db().await;
    let (profile, _) = engine.register(new_user("alice", "pw")).await.unwrap();
    let user_id = profile.user.id;

    let refreshed = engine
        .become_participant(
            user_id,
            NewParticipant {
                university: "SNU".to_string(),
            },
        )
        .await
        .unwrap();
    let participant = refreshed.participant.unwrap();
    assert_eq!(participant.user_id, user_id);
    assert_eq!(participant.university, "SNU");
    assert!(participant.accepted);

    let err = engine
        .become_participant(user_id, NewParticipant::default())
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::AlreadyParticipant);
}

#[tokio::test]
async fn university_update_requires_a_profile() {
    let (engine, _db) = engine_with_db().await;
    let (profile, _) = engine.register(new_user("alice", "pw")).await.unwrap();
    let user_id = profile.user.id;
    let changes = UserChanges {
        university: Some("KAIST".to_string()),
        ..Default::default()
    };

    let updated = engine.update_user(user_id, changes.clone()).await.unwrap();
    assert!(updated.participant.is_none());

    engine
        .become_participant(
            user_id,
            NewParticipant {
                university: "SNU".to_string(),
            },
        )
        .await
        .unwrap();
    let updated = engine.update_user(user_id, changes).await.unwrap();
    let participant = updated.participant.unwrap();
    assert_eq!(participant.university, "KAIST");
    assert!(participant.accepted);
}

#[tokio::test]
async fn unknown_user_is_not_found() {
    let (engine, _db) = engine_with_db().await;
    assert_eq!(
        engine.user(999).await.unwrap_err(),
        EngineError::KeyNotFound("user not exists".to_string())
    );
}

#[tokio::test]
async fn set_password_replaces_credentials() {
    let (engine, _db) = engine_with_db().await;
    engine.register(new_user("alice", "pw")).await.unwrap();

    engine.set_password("alice", "changed").await.unwrap();
    assert!(engine.authenticate("alice", "changed").await.is_ok());
    assert_eq!(
        engine.set_password("ghost", "pw").await.unwrap_err(),
        EngineError::KeyNotFound("ghost".to_string())
    );
}
