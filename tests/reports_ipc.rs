use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rollcalld");
    let mut child = Command::new(exe)
        .env_remove("ROLLCALLD_WORKSPACE")
        .env_remove("ROLLCALLD_FINALIZE_POLICY")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rollcalld");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded",
        method
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string()
}

/// Opens a fresh workspace and creates a class with the given last names, in roster order.
fn seed_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
    last_names: &[&str],
) -> (String, Vec<String>) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_id = request_ok(stdin, reader, "class", "classes.create", json!({ "name": "8C" }))
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let student_ids = last_names
        .iter()
        .enumerate()
        .map(|(i, last)| {
            request_ok(
                stdin,
                reader,
                &format!("student-{}", i),
                "students.create",
                json!({
                    "classId": class_id,
                    "lastName": last,
                    "firstName": "Kim",
                    "studentNo": format!("{}", 100 + i)
                }),
            )
            .get("studentId")
            .and_then(|v| v.as_str())
            .expect("studentId")
            .to_string()
        })
        .collect();
    (class_id, student_ids)
}

fn upsert(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    class_id: &str,
    student_id: &str,
    date: &str,
    status: &str,
) {
    let _ = request_ok(
        stdin,
        reader,
        id,
        "attendance.upsert",
        json!({
            "actorId": "teacher-1",
            "classId": class_id,
            "studentId": student_id,
            "date": date,
            "status": status
        }),
    );
}

#[test]
fn monthly_breakdown_computes_each_month_independently() {
    let workspace = temp_dir("rollcall-reports-monthly");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, s) = seed_class(&mut stdin, &mut reader, &workspace, &["Ames"]);

    let marks = [
        ("2024-01-08", "present"),
        ("2024-01-09", "present"),
        ("2024-01-10", "absent"),
        ("2024-01-11", "present"),
        ("2024-02-01", "present"),
        ("2024-02-02", "late"),
        ("2024-02-05", "excused"),
    ];
    for (i, (date, status)) in marks.iter().enumerate() {
        upsert(&mut stdin, &mut reader, &format!("m{}", i), &class_id, &s[0], date, status);
    }

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "reports.monthly",
        json!({ "studentId": s[0] }),
    );
    let months = res.get("months").and_then(|v| v.as_array()).cloned().unwrap_or_default();
    assert_eq!(months.len(), 2);

    assert_eq!(months[0].get("month").and_then(|v| v.as_str()), Some("2024-02"));
    assert_eq!(months[0].get("totalDays").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(months[0].get("presentDays").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(months[0].get("percentage").and_then(|v| v.as_f64()), Some(33.33));

    assert_eq!(months[1].get("month").and_then(|v| v.as_str()), Some("2024-01"));
    assert_eq!(months[1].get("totalDays").and_then(|v| v.as_u64()), Some(4));
    assert_eq!(months[1].get("presentDays").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(months[1].get("percentage").and_then(|v| v.as_f64()), Some(75.0));
}

#[test]
fn range_summary_with_no_records_reports_zero_percent() {
    let workspace = temp_dir("rollcall-reports-range");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, s) = seed_class(&mut stdin, &mut reader, &workspace, &["Ames"]);

    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "reports.range",
        json!({ "studentId": s[0], "startDate": "2024-03-01", "endDate": "2024-03-31" }),
    );
    assert_eq!(empty.get("totalDays").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(empty.get("percentage").and_then(|v| v.as_f64()), Some(0.0));

    upsert(&mut stdin, &mut reader, "2", &class_id, &s[0], "2024-03-04", "present");
    upsert(&mut stdin, &mut reader, "3", &class_id, &s[0], "2024-03-05", "late");
    upsert(&mut stdin, &mut reader, "4", &class_id, &s[0], "2024-04-01", "absent");

    let march = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "reports.range",
        json!({ "studentId": s[0], "startDate": "2024-03-01", "endDate": "2024-03-31" }),
    );
    assert_eq!(march.get("totalDays").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(march.get("lateDays").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(march.get("percentage").and_then(|v| v.as_f64()), Some(50.0));

    let inverted = request_err_code(
        &mut stdin,
        &mut reader,
        "6",
        "reports.range",
        json!({ "studentId": s[0], "startDate": "2024-03-31", "endDate": "2024-03-01" }),
    );
    assert_eq!(inverted, "bad_params");

    let unknown = request_err_code(
        &mut stdin,
        &mut reader,
        "7",
        "reports.range",
        json!({ "studentId": "ghost", "startDate": "2024-03-01", "endDate": "2024-03-31" }),
    );
    assert_eq!(unknown, "not_found");
}

#[test]
fn class_performance_lists_students_without_records() {
    let workspace = temp_dir("rollcall-reports-class");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, s) = seed_class(&mut stdin, &mut reader, &workspace, &["Cruz", "Ames", "Bell"]);

    upsert(&mut stdin, &mut reader, "1", &class_id, &s[0], "2024-05-06", "present");
    upsert(&mut stdin, &mut reader, "2", &class_id, &s[0], "2024-05-07", "absent");
    upsert(&mut stdin, &mut reader, "3", &class_id, &s[1], "2024-05-06", "present");

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reports.classPerformance",
        json!({ "classId": class_id, "startDate": "2024-05-01", "endDate": "2024-05-31" }),
    );
    let rows = res.get("students").and_then(|v| v.as_array()).cloned().unwrap_or_default();
    let names: Vec<&str> = rows
        .iter()
        .filter_map(|r| r.get("name").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(names, vec!["Ames, Kim", "Bell, Kim", "Cruz, Kim"]);

    assert_eq!(rows[0].get("percentage").and_then(|v| v.as_f64()), Some(100.0));
    assert_eq!(rows[1].get("totalDays").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(rows[1].get("percentage").and_then(|v| v.as_f64()), Some(0.0));
    assert_eq!(rows[2].get("presentDays").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(rows[2].get("percentage").and_then(|v| v.as_f64()), Some(50.0));
}

#[test]
fn student_history_is_ascending_within_the_range() {
    let workspace = temp_dir("rollcall-reports-history");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, s) = seed_class(&mut stdin, &mut reader, &workspace, &["Ames"]);

    upsert(&mut stdin, &mut reader, "1", &class_id, &s[0], "2024-06-12", "absent");
    upsert(&mut stdin, &mut reader, "2", &class_id, &s[0], "2024-06-10", "present");
    upsert(&mut stdin, &mut reader, "3", &class_id, &s[0], "2024-07-01", "present");

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reports.studentHistory",
        json!({ "studentId": s[0], "startDate": "2024-06-01", "endDate": "2024-06-30" }),
    );
    let dates: Vec<&str> = res
        .get("records")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|r| r.get("date").and_then(|v| v.as_str())).collect())
        .unwrap_or_default();
    assert_eq!(dates, vec!["2024-06-10", "2024-06-12"]);
}
