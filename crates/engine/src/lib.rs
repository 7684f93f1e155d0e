//! Account engine: users, API tokens, login sessions and participant
//! profiles on top of `sea-orm`.
//!
//! All operations go through [`Engine`], built with [`Engine::builder`].

pub use error::{EngineError, FieldErrors};
pub use ops::{Engine, EngineBuilder, NewParticipant, NewUser, UserChanges};
pub use participant_profiles::ParticipantProfile;
pub use sessions::Session;
pub use users::{User, UserProfile};

mod auth_tokens;
mod error;
mod ops;
mod participant_profiles;
mod password;
mod sessions;
mod users;
mod util;

type ResultEngine<T> = Result<T, EngineError>;
