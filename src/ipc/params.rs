use crate::error::{AttendanceError, Result};
use crate::store::{normalize_subject, parse_date, AttendanceStatus};
use chrono::NaiveDate;

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String> {
    optional_str(params, key)?
        .ok_or_else(|| AttendanceError::validation(format!("missing {}", key)))
}

/// Absent, null and blank strings all read as `None`.
pub fn optional_str(params: &serde_json::Value, key: &str) -> Result<Option<String>> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => {
            let t = s.trim();
            Ok(if t.is_empty() { None } else { Some(t.to_string()) })
        }
        Some(_) => Err(AttendanceError::validation(format!(
            "{} must be a string",
            key
        ))),
    }
}

/// Free text (notes, photo handles) is passed through untrimmed.
pub fn optional_text(params: &serde_json::Value, key: &str) -> Result<Option<String>> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(AttendanceError::validation(format!(
            "{} must be a string",
            key
        ))),
    }
}

pub fn required_date(params: &serde_json::Value, key: &str) -> Result<NaiveDate> {
    parse_date(&required_str(params, key)?)
}

pub fn optional_date(params: &serde_json::Value, key: &str) -> Result<Option<NaiveDate>> {
    optional_str(params, key)?
        .map(|s| parse_date(&s))
        .transpose()
}

pub fn required_status(params: &serde_json::Value, key: &str) -> Result<AttendanceStatus> {
    AttendanceStatus::parse(&required_str(params, key)?)
}

pub fn subject(params: &serde_json::Value) -> Result<Option<String>> {
    Ok(normalize_subject(optional_str(params, "subjectId")?.as_deref()))
}

pub fn optional_bool(params: &serde_json::Value, key: &str) -> Result<Option<bool>> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(AttendanceError::validation(format!(
            "{} must be a boolean",
            key
        ))),
    }
}
