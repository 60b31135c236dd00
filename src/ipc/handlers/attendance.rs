use crate::error::{AttendanceError, Result};
use crate::ipc::error::{attendance_err, no_workspace, ok};
use crate::ipc::params::{
    optional_date, optional_str, optional_text, required_date, required_status, required_str,
    subject,
};
use crate::ipc::types::{AppState, Request};
use crate::roster::{RosterProvider, SqliteRoster};
use crate::store::{AttendanceFilter, AttendanceStore, AttendanceWrite, BatchEntry, SlotKey};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashSet;

fn parse_entries(params: &serde_json::Value) -> Result<Vec<BatchEntry>> {
    let Some(raw) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(AttendanceError::validation("missing entries"));
    };
    let mut seen = HashSet::with_capacity(raw.len());
    let mut entries = Vec::with_capacity(raw.len());
    for (i, entry) in raw.iter().enumerate() {
        let at = |e: AttendanceError| match e {
            AttendanceError::Validation(m) => {
                AttendanceError::validation(format!("entries[{}]: {}", i, m))
            }
            other => other,
        };
        let student_id = required_str(entry, "studentId").map_err(at)?;
        // One row per student per slot; a repeat would silently overwrite the earlier mark.
        if !seen.insert(student_id.clone()) {
            return Err(AttendanceError::validation(format!(
                "entries[{}]: duplicate studentId {}",
                i, student_id
            )));
        }
        entries.push(BatchEntry {
            student_id,
            status: required_status(entry, "status").map_err(at)?,
            photo: optional_text(entry, "photo").map_err(at)?,
            notes: optional_text(entry, "notes").map_err(at)?,
        });
    }
    Ok(entries)
}

/// Batch write for one class/day/subject slot. Malformed input rejects the whole request before
/// anything is written; per-row store failures are reported and do not stop the batch.
fn attendance_submit(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let class_id = required_str(params, "classId")?;
    let date = required_date(params, "date")?;
    let actor_id = required_str(params, "actorId")?;
    let subject_id = subject(params)?;
    let entries = parse_entries(params)?;

    if !SqliteRoster::new(conn).class_exists(&class_id)? {
        return Err(AttendanceError::not_found("class not found"));
    }

    let slot = SlotKey {
        class_id,
        date,
        subject_id,
    };
    let outcome = AttendanceStore::new(conn).submit_batch(&slot, &actor_id, &entries);
    tracing::info!(
        class_id = %slot.class_id,
        date = %slot.date,
        written = outcome.written,
        failed = outcome.failures.len(),
        "attendance batch submitted"
    );
    Ok(json!(outcome))
}

fn attendance_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let limit = match params.get("limit") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => Some(
            v.as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    AttendanceError::validation("limit must be a non-negative integer")
                })?,
        ),
    };
    let filter = AttendanceFilter {
        class_id: optional_str(params, "classId")?,
        date: optional_date(params, "date")?,
        student_id: optional_str(params, "studentId")?,
        subject_id: subject(params)?,
        limit,
    };
    let records = AttendanceStore::new(conn).query_by_filter(&filter)?;
    Ok(json!({ "records": records }))
}

fn attendance_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let write = AttendanceWrite {
        student_id: required_str(params, "studentId")?,
        class_id: required_str(params, "classId")?,
        subject_id: subject(params)?,
        date: required_date(params, "date")?,
        status: required_status(params, "status")?,
        marked_by: required_str(params, "actorId")?,
        photo: optional_text(params, "photo")?,
        notes: optional_text(params, "notes")?,
    };
    let record = AttendanceStore::new(conn).upsert(&write)?;
    Ok(json!({ "record": record }))
}

fn handle_attendance_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    match attendance_submit(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => attendance_err(&req.id, &e),
    }
}

fn handle_attendance_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    match attendance_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => attendance_err(&req.id, &e),
    }
}

fn handle_attendance_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    match attendance_upsert(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => attendance_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.submit" => Some(handle_attendance_submit(state, req)),
        "attendance.list" => Some(handle_attendance_list(state, req)),
        "attendance.upsert" => Some(handle_attendance_upsert(state, req)),
        _ => None,
    }
}
