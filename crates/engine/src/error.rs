//! The module contains the errors the engine can throw.
//!
//! Most variants map one-to-one onto an HTTP outcome at the server edge:
//!
//! - [`DuplicateUsername`] when the username is already taken.
//! - [`InvalidCredentials`] when authentication fails for any reason.
//! - [`AlreadyParticipant`] when a user already owns a participant profile.
//! - [`Validation`] when a field is rejected after normalization.
//!
//!  [`DuplicateUsername`]: EngineError::DuplicateUsername
//!  [`InvalidCredentials`]: EngineError::InvalidCredentials
//!  [`AlreadyParticipant`]: EngineError::AlreadyParticipant
//!  [`Validation`]: EngineError::Validation
use std::{collections::BTreeMap, fmt};

use sea_orm::{DbErr, SqlErr};
use serde::Serialize;
use thiserror::Error;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("A user with that username already exists.")]
    DuplicateUsername,
    #[error("Wrong username or wrong password")]
    InvalidCredentials,
    #[error("You're already a participant")]
    AlreadyParticipant,
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("Invalid input: {0}")]
    Validation(FieldErrors),
    #[error("Password hashing failed: {0}")]
    Password(String),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl EngineError {
    /// Shorthand for a validation error on a single field.
    pub fn field(field: &str, message: &str) -> Self {
        Self::Validation(FieldErrors::single(field, message))
    }
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::DuplicateUsername, Self::DuplicateUsername)
            | (Self::InvalidCredentials, Self::InvalidCredentials)
            | (Self::AlreadyParticipant, Self::AlreadyParticipant) => true,
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::Validation(a), Self::Validation(b)) => a == b,
            (Self::Password(a), Self::Password(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

/// Per-field validation messages, keyed by the wire field name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn single(field: &str, message: &str) -> Self {
        let mut errors = Self::default();
        errors.push(field, message);
        errors
    }

    pub fn push(&mut self, field: &str, message: &str) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{field}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// True when the database rejected a write because of a unique index.
pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
