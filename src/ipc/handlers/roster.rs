use crate::error::Result;
use crate::ipc::error::{attendance_err, no_workspace, ok};
use crate::ipc::params::{optional_bool, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::roster::{self, NewStudent, RosterProvider, SqliteRoster};
use rusqlite::Connection;
use serde_json::json;

fn classes_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let name = required_str(params, "name")?;
    let class_id = roster::create_class(conn, &name)?;
    Ok(json!({ "classId": class_id }))
}

fn classes_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value> {
    let classes: Vec<serde_json::Value> = roster::list_classes(conn)?
        .into_iter()
        .map(|(id, name, student_count)| {
            json!({
                "id": id,
                "name": name,
                "studentCount": student_count
            })
        })
        .collect();
    Ok(json!({ "classes": classes }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let class_id = required_str(params, "classId")?;
    let last_name = required_str(params, "lastName")?;
    let first_name = required_str(params, "firstName")?;
    let student_no = optional_str(params, "studentNo")?;
    let active = optional_bool(params, "active")?.unwrap_or(true);
    let student_id = roster::create_student(
        conn,
        &NewStudent {
            class_id: &class_id,
            last_name: &last_name,
            first_name: &first_name,
            student_no: student_no.as_deref(),
            active,
        },
    )?;
    Ok(json!({ "studentId": student_id }))
}

fn students_set_active(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let student_id = required_str(params, "studentId")?;
    let active = optional_bool(params, "active")?.unwrap_or(true);
    roster::set_student_active(conn, &student_id, active)?;
    Ok(json!({ "ok": true }))
}

/// Currently enrolled students of one class, in roster order.
fn roster_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let class_id = required_str(params, "classId")?;
    let provider = SqliteRoster::new(conn);
    if !provider.class_exists(&class_id)? {
        return Err(crate::error::AttendanceError::not_found("class not found"));
    }
    let students = provider.enrolled_students(&class_id)?;
    Ok(json!({ "classId": class_id, "students": students }))
}

type RosterOp = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value>;

fn dispatch(state: &AppState, req: &Request, op: RosterOp) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    match op(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => attendance_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: RosterOp = match req.method.as_str() {
        "classes.create" => classes_create,
        "classes.list" => classes_list,
        "students.create" => students_create,
        "students.setActive" => students_set_active,
        "students.list" | "roster.get" => roster_get,
        _ => return None,
    };
    Some(dispatch(state, req, op))
}
