use crate::error::{AttendanceError, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterStudent {
    pub student_id: String,
    pub class_id: String,
    pub name: String,
    pub roll_number: Option<String>,
}

/// Source of truth for who is currently enrolled in a class.
pub trait RosterProvider {
    fn class_exists(&self, class_id: &str) -> Result<bool>;
    fn student_exists(&self, student_id: &str) -> Result<bool>;
    /// Active students of one class, in roster order.
    fn enrolled_students(&self, class_id: &str) -> Result<Vec<RosterStudent>>;
    /// Active students of every class, grouped by class then roster order.
    fn all_enrolled_students(&self) -> Result<Vec<RosterStudent>>;
}

pub struct SqliteRoster<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRoster<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn query_students(&self, class_id: Option<&str>) -> Result<Vec<RosterStudent>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, class_id, last_name, first_name, student_no
             FROM students
             WHERE active = 1 AND (?1 IS NULL OR class_id = ?1)
             ORDER BY class_id, sort_order",
        )?;
        let rows = stmt
            .query_map([class_id], |r| {
                let last: String = r.get(2)?;
                let first: String = r.get(3)?;
                Ok(RosterStudent {
                    student_id: r.get(0)?,
                    class_id: r.get(1)?,
                    name: display_name(&last, &first),
                    roll_number: r.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl RosterProvider for SqliteRoster<'_> {
    fn class_exists(&self, class_id: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    fn student_exists(&self, student_id: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    fn enrolled_students(&self, class_id: &str) -> Result<Vec<RosterStudent>> {
        self.query_students(Some(class_id))
    }

    fn all_enrolled_students(&self) -> Result<Vec<RosterStudent>> {
        self.query_students(None)
    }
}

pub fn display_name(last: &str, first: &str) -> String {
    format!("{}, {}", last, first)
}

// Seeding helpers used by the classes/students IPC methods. Roster management proper lives
// outside this sidecar.

pub fn create_class(conn: &Connection, name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AttendanceError::validation("name must not be empty"));
    }
    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name) VALUES(?, ?)",
        (&class_id, name),
    )?;
    Ok(class_id)
}

pub struct NewStudent<'a> {
    pub class_id: &'a str,
    pub last_name: &'a str,
    pub first_name: &'a str,
    pub student_no: Option<&'a str>,
    pub active: bool,
}

pub fn create_student(conn: &Connection, student: &NewStudent<'_>) -> Result<String> {
    let last_name = student.last_name.trim();
    let first_name = student.first_name.trim();
    if last_name.is_empty() || first_name.is_empty() {
        return Err(AttendanceError::validation(
            "firstName/lastName must not be empty",
        ));
    }
    if !SqliteRoster::new(conn).class_exists(student.class_id)? {
        return Err(AttendanceError::not_found("class not found"));
    }
    let sort_order: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE class_id = ?",
        [student.class_id],
        |r| r.get(0),
    )?;
    let student_no = student
        .student_no
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(
           id, class_id, last_name, first_name, student_no, active, sort_order, updated_at
         )
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            student.class_id,
            last_name,
            first_name,
            student_no,
            i64::from(student.active),
            sort_order,
            Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(student_id)
}

pub fn set_student_active(conn: &Connection, student_id: &str, active: bool) -> Result<()> {
    let changed = conn.execute(
        "UPDATE students SET active = ?, updated_at = ? WHERE id = ?",
        (i64::from(active), Utc::now().to_rfc3339(), student_id),
    )?;
    if changed == 0 {
        return Err(AttendanceError::not_found("student not found"));
    }
    Ok(())
}

pub fn list_classes(conn: &Connection) -> Result<Vec<(String, String, i64)>> {
    // Correlated subquery keeps the count independent of joins.
    let mut stmt = conn.prepare(
        "SELECT
           c.id,
           c.name,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id AND s.active = 1)
         FROM classes c
         ORDER BY c.name",
    )?;
    let rows = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
