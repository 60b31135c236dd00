use crate::error::Result;
use crate::ipc::error::{attendance_err, no_workspace, ok};
use crate::ipc::params::{optional_date, optional_str, required_date, required_str, subject};
use crate::ipc::types::{AppState, Request};
use crate::reports;
use rusqlite::Connection;
use serde_json::json;

fn reports_daily(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let date = required_date(params, "date")?;
    let class_id = optional_str(params, "classId")?;
    let subject_id = subject(params)?;
    let summary = reports::daily_summary(conn, date, class_id.as_deref(), subject_id.as_deref())?;
    Ok(json!(summary))
}

fn reports_range(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let student_id = required_str(params, "studentId")?;
    let start = required_date(params, "startDate")?;
    let end = required_date(params, "endDate")?;
    Ok(json!(reports::range_summary(conn, &student_id, start, end)?))
}

fn reports_monthly(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let student_id = required_str(params, "studentId")?;
    let months = reports::monthly_breakdown(conn, &student_id)?;
    Ok(json!({ "studentId": student_id, "months": months }))
}

fn reports_class_performance(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value> {
    let class_id = optional_str(params, "classId")?;
    let start = optional_date(params, "startDate")?;
    let end = optional_date(params, "endDate")?;
    let rows = reports::class_performance(conn, class_id.as_deref(), start, end)?;
    Ok(json!({
        "classId": class_id,
        "startDate": start,
        "endDate": end,
        "students": rows
    }))
}

fn reports_student_history(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value> {
    let student_id = required_str(params, "studentId")?;
    let start = required_date(params, "startDate")?;
    let end = required_date(params, "endDate")?;
    let records = reports::student_history(conn, &student_id, start, end)?;
    Ok(json!({ "studentId": student_id, "records": records }))
}

type ReportOp = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value>;

fn run_report(state: &AppState, req: &Request, op: ReportOp) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    match op(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => attendance_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: ReportOp = match req.method.as_str() {
        "reports.daily" => reports_daily,
        "reports.range" => reports_range,
        "reports.monthly" => reports_monthly,
        "reports.classPerformance" => reports_class_performance,
        "reports.studentHistory" => reports_student_history,
        _ => return None,
    };
    Some(run_report(state, req, op))
}
