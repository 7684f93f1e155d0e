use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidateEmail, ValidationError};

/// Accept an empty string (no email on file) or something shaped like an address.
fn blank_or_email(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || value.to_string().validate_email() {
        return Ok(());
    }
    Err(ValidationError::new("email").with_message(Cow::Borrowed("Enter a valid email address.")))
}

pub mod user {
    use super::*;
    use crate::participant::ParticipantView;

    /// Fields clients may send but the server owns. They are dropped from
    /// update payloads before validation.
    pub const SERVER_CONTROLLED_FIELDS: &[&str] = &["accepted"];

    /// Registration payload for `POST /api/v1/user/`.
    #[derive(Debug, Default, Serialize, Deserialize, Validate)]
    pub struct UserNew {
        #[validate(
            required(message = "This field is required."),
            length(
                min = 1,
                max = 150,
                message = "Ensure this field has between 1 and 150 characters."
            )
        )]
        pub username: Option<String>,
        #[validate(
            required(message = "This field is required."),
            length(
                min = 1,
                max = 128,
                message = "Ensure this field has between 1 and 128 characters."
            )
        )]
        pub password: Option<String>,
        #[validate(
            custom(function = "blank_or_email"),
            length(max = 254, message = "Ensure this field has no more than 254 characters.")
        )]
        pub email: Option<String>,
        #[validate(length(max = 150, message = "Ensure this field has no more than 150 characters."))]
        pub first_name: Option<String>,
        #[validate(length(max = 150, message = "Ensure this field has no more than 150 characters."))]
        pub last_name: Option<String>,
    }

    /// Credentials for `PUT /api/v1/user/login/`.
    ///
    /// Both fields are optional on the wire: a missing field is reported as a
    /// failed login, not as a validation error.
    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct Login {
        pub username: Option<String>,
        pub password: Option<String>,
    }

    /// Partial update for `PUT /api/v1/user/me/`. Absent fields are left as-is.
    #[derive(Debug, Default, Serialize, Deserialize, Validate)]
    pub struct UserUpdate {
        #[validate(length(
            min = 1,
            max = 150,
            message = "Ensure this field has between 1 and 150 characters."
        ))]
        pub username: Option<String>,
        #[validate(length(
            min = 1,
            max = 128,
            message = "Ensure this field has between 1 and 128 characters."
        ))]
        pub password: Option<String>,
        #[validate(
            custom(function = "blank_or_email"),
            length(max = 254, message = "Ensure this field has no more than 254 characters.")
        )]
        pub email: Option<String>,
        #[validate(length(max = 150, message = "Ensure this field has no more than 150 characters."))]
        pub first_name: Option<String>,
        #[validate(length(max = 150, message = "Ensure this field has no more than 150 characters."))]
        pub last_name: Option<String>,
        /// Applied to the participant profile, if the user has one.
        #[validate(length(max = 100, message = "Ensure this field has no more than 100 characters."))]
        pub university: Option<String>,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct UserView {
        pub id: i32,
        pub username: String,
        pub email: String,
        pub first_name: String,
        pub last_name: String,
        pub last_login: Option<DateTime<Utc>>,
        pub date_joined: DateTime<Utc>,
        pub participant: Option<ParticipantView>,
    }

    /// A user together with the caller's API token, returned by register and login.
    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct UserWithToken {
        #[serde(flatten)]
        pub user: UserView,
        pub token: String,
    }
}

pub mod participant {
    use super::*;

    #[derive(Debug, Default, Serialize, Deserialize, Validate)]
    pub struct ParticipantNew {
        #[validate(length(max = 100, message = "Ensure this field has no more than 100 characters."))]
        pub university: Option<String>,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ParticipantView {
        pub id: i32,
        pub university: String,
        pub accepted: bool,
    }
}

#[cfg(test)]
mod tests {
    use super::participant::ParticipantNew;
    use super::user::{UserNew, UserUpdate, UserWithToken, UserView};
    use validator::Validate;

    fn user_new(username: &str, password: &str) -> UserNew {
        UserNew {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn registration_requires_username_and_password() {
        let errors = UserNew::default().validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("username"));
        assert!(fields.contains_key("password"));
    }

    #[test]
    fn registration_accepts_blank_email() {
        let mut payload = user_new("alice", "secret");
        payload.email = Some(String::new());
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn registration_rejects_malformed_email() {
        let mut payload = user_new("alice", "secret");
        payload.email = Some("not-an-address".to_string());
        let errors = payload.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("email"));
    }

    #[test]
    fn registration_rejects_long_username() {
        let payload = user_new(&"a".repeat(151), "secret");
        let errors = payload.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("username"));
    }

    #[test]
    fn empty_update_is_valid() {
        assert!(UserUpdate::default().validate().is_ok());
    }

    #[test]
    fn update_rejects_empty_password() {
        let payload = UserUpdate {
            password: Some(String::new()),
            ..Default::default()
        };
        let errors = payload.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("password"));
    }

    #[test]
    fn participant_university_is_bounded() {
        let payload = ParticipantNew {
            university: Some("u".repeat(101)),
        };
        assert!(payload.validate().is_err());
    }

    #[test]
    fn token_is_flattened_next_to_user_fields() {
        let body = UserWithToken {
            user: UserView {
                id: 7,
                username: "alice".to_string(),
                email: String::new(),
                first_name: String::new(),
                last_name: String::new(),
                last_login: None,
                date_joined: chrono::Utc::now(),
                participant: None,
            },
            token: "abc".to_string(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["token"], "abc");
        assert!(json["participant"].is_null());
        assert!(json.get("password").is_none());
    }
}
