//! Request body decoding.
//!
//! Bodies are read as raw bytes so that malformed JSON, non-object bodies and
//! server-controlled keys are handled before the typed payload is built.

use axum::body::Bytes;
use engine::FieldErrors;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use validator::Validate;

use crate::ServerError;

/// An empty body reads as `{}`.
fn json_object(body: &Bytes) -> Result<Map<String, Value>, ServerError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => Err(ServerError::BadRequest(
            "Invalid data. Expected a dictionary.".to_string(),
        )),
        Err(err) => Err(ServerError::BadRequest(format!("JSON parse error - {err}"))),
    }
}

/// Decode `body` into `T` after dropping every key listed in `strip`.
///
/// Explicit `null`s and values of the wrong type are reported per field.
pub(crate) fn payload<T: DeserializeOwned>(body: &Bytes, strip: &[&str]) -> Result<T, ServerError> {
    let mut object = json_object(body)?;
    for field in strip {
        object.remove(*field);
    }

    let mut errors = FieldErrors::default();
    for (field, value) in &object {
        if value.is_null() {
            errors.push(field, "This field may not be null.");
        }
    }
    if !errors.is_empty() {
        return Err(ServerError::Validation(errors));
    }

    serde_json::from_value(Value::Object(object.clone())).map_err(|_| field_errors::<T>(object))
}

/// Decode each key on its own to find which ones `T` rejects.
fn field_errors<T: DeserializeOwned>(object: Map<String, Value>) -> ServerError {
    let mut errors = FieldErrors::default();
    for (field, value) in object {
        let single = Map::from_iter([(field.clone(), value)]);
        if let Err(err) = serde_json::from_value::<T>(Value::Object(single)) {
            errors.push(&field, type_message(&err));
        }
    }

    if errors.is_empty() {
        ServerError::BadRequest("Invalid data.".to_string())
    } else {
        ServerError::Validation(errors)
    }
}

fn type_message(err: &serde_json::Error) -> &'static str {
    if err.to_string().contains("expected a string") {
        "Not a valid string."
    } else {
        "Incorrect type."
    }
}

/// [`payload`] followed by the type's validation rules.
pub(crate) fn validated<T: DeserializeOwned + Validate>(
    body: &Bytes,
    strip: &[&str],
) -> Result<T, ServerError> {
    let value: T = payload(body, strip)?;
    value.validate()?;
    Ok(value)
}
