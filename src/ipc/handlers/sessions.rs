use crate::config::FinalizePolicy;
use crate::error::{AttendanceError, Result};
use crate::ipc::error::{attendance_err, no_workspace, ok};
use crate::ipc::params::{optional_text, required_date, required_status, required_str, subject};
use crate::ipc::types::{AppState, Request};
use crate::session::Session;
use crate::store::SlotKey;
use serde_json::json;

fn session_mut<'a>(state: &'a mut AppState, params: &serde_json::Value) -> Result<&'a mut Session> {
    let session_id = required_str(params, "sessionId")?;
    state
        .sessions
        .get_mut(&session_id)
        .ok_or_else(|| AttendanceError::not_found(format!("session not found: {}", session_id)))
}

fn parse_policy(params: &serde_json::Value, default: FinalizePolicy) -> Result<FinalizePolicy> {
    match params.get("onUnsaved") {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(v) => serde_json::from_value(v.clone()).map_err(|_| {
            AttendanceError::validation("onUnsaved must be one of: refuse, submit, discard")
        }),
    }
}

fn session_start(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value> {
    let actor_id = required_str(params, "actorId")?;
    let slot = SlotKey {
        class_id: required_str(params, "classId")?,
        date: required_date(params, "date")?,
        subject_id: subject(params)?,
    };
    let Some(conn) = state.db.as_ref() else {
        return Err(AttendanceError::conflict("no_workspace", "select a workspace first"));
    };
    let session = Session::start(conn, &actor_id, slot)?;
    let snapshot = session.snapshot();
    state.sessions.insert(session.id().to_string(), session);
    Ok(json!({ "session": snapshot }))
}

fn session_get(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value> {
    let session = session_mut(state, params)?;
    Ok(json!({ "session": session.snapshot() }))
}

fn session_list(state: &mut AppState, _params: &serde_json::Value) -> Result<serde_json::Value> {
    let mut sessions: Vec<serde_json::Value> = state
        .sessions
        .values()
        .map(|s| {
            let snap = s.snapshot();
            json!({
                "sessionId": snap.session_id,
                "actorId": snap.actor_id,
                "classId": snap.class_id,
                "date": snap.date,
                "subjectId": snap.subject_id,
                "state": snap.state,
                "startedAt": snap.started_at,
                "unsaved": snap.unsaved,
            })
        })
        .collect();
    sessions.sort_by(|a, b| a["startedAt"].as_str().cmp(&b["startedAt"].as_str()));
    Ok(json!({ "sessions": sessions }))
}

fn session_mark_present(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value> {
    let student_id = required_str(params, "studentId")?;
    let photo = optional_text(params, "photo")?;
    let session = session_mut(state, params)?;
    session.mark_present(&student_id, photo)?;
    Ok(json!({ "session": session.snapshot() }))
}

fn session_mark_absent(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value> {
    let student_id = required_str(params, "studentId")?;
    let notes = optional_text(params, "notes")?;
    let session = session_mut(state, params)?;
    session.mark_absent(&student_id, notes)?;
    Ok(json!({ "session": session.snapshot() }))
}

fn session_mark(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value> {
    let student_id = required_str(params, "studentId")?;
    let status = required_status(params, "status")?;
    let photo = optional_text(params, "photo")?;
    let notes = optional_text(params, "notes")?;
    let session = session_mut(state, params)?;
    session.mark(&student_id, status, photo, notes)?;
    Ok(json!({ "session": session.snapshot() }))
}

fn session_mark_remaining(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value> {
    let status = required_status(params, "status")?;
    let session = session_mut(state, params)?;
    let stamped = session.mark_remaining(status)?;
    Ok(json!({ "stamped": stamped, "session": session.snapshot() }))
}

fn session_revert(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value> {
    let student_id = required_str(params, "studentId")?;
    let session = session_mut(state, params)?;
    session.revert(&student_id)?;
    Ok(json!({ "session": session.snapshot() }))
}

fn session_submit(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value> {
    let session_id = required_str(params, "sessionId")?;
    let AppState { db, sessions, .. } = state;
    let Some(conn) = db.as_ref() else {
        return Err(AttendanceError::conflict("no_workspace", "select a workspace first"));
    };
    let session = sessions
        .get_mut(&session_id)
        .ok_or_else(|| AttendanceError::not_found(format!("session not found: {}", session_id)))?;
    let outcome = session.submit(conn)?;
    Ok(json!({
        "written": outcome.written,
        "failures": outcome.failures,
        "session": session.snapshot(),
    }))
}

fn session_finalize(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value> {
    let session_id = required_str(params, "sessionId")?;
    let policy = parse_policy(params, state.finalize_policy)?;
    let AppState { db, sessions, .. } = state;
    let Some(conn) = db.as_ref() else {
        return Err(AttendanceError::conflict("no_workspace", "select a workspace first"));
    };
    let session = sessions
        .get_mut(&session_id)
        .ok_or_else(|| AttendanceError::not_found(format!("session not found: {}", session_id)))?;
    let outcome = session.finalize(conn, policy)?;
    let snapshot = session.snapshot();
    sessions.remove(&session_id);
    Ok(json!({
        "discarded": outcome.discarded,
        "submitted": outcome.submitted,
        "session": snapshot,
    }))
}

/// Drops a session without writing anything; unsaved marks are lost.
fn session_close(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value> {
    let session_id = required_str(params, "sessionId")?;
    let session = state
        .sessions
        .remove(&session_id)
        .ok_or_else(|| AttendanceError::not_found(format!("session not found: {}", session_id)))?;
    let discarded = session.unsaved_count();
    if discarded > 0 {
        tracing::warn!(session_id = %session_id, discarded, "session closed with unsaved marks");
    }
    Ok(json!({ "discarded": discarded }))
}

type SessionOp = fn(&mut AppState, &serde_json::Value) -> Result<serde_json::Value>;

fn dispatch(state: &mut AppState, req: &Request, op: SessionOp) -> serde_json::Value {
    if state.db.is_none() {
        return no_workspace(&req.id);
    }
    match op(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => attendance_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: SessionOp = match req.method.as_str() {
        "session.start" => session_start,
        "session.get" => session_get,
        "session.list" => session_list,
        "session.markPresent" => session_mark_present,
        "session.markAbsent" => session_mark_absent,
        "session.mark" => session_mark,
        "session.markRemaining" => session_mark_remaining,
        "session.revert" => session_revert,
        "session.submit" => session_submit,
        "session.finalize" => session_finalize,
        "session.close" => session_close,
        _ => return None,
    };
    Some(dispatch(state, req, op))
}
