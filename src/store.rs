use crate::error::{AttendanceError, Result};
use crate::roster::{RosterProvider, SqliteRoster};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, Row};
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "late" => Ok(AttendanceStatus::Late),
            "excused" => Ok(AttendanceStatus::Excused),
            other => Err(AttendanceError::validation(format!(
                "status must be one of: present, absent, late, excused (got {:?})",
                other
            ))),
        }
    }
}

impl ToSql for AttendanceStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AttendanceStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        AttendanceStatus::parse(raw).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        AttendanceError::validation(format!("date must be YYYY-MM-DD (got {:?})", raw))
    })
}

/// Empty subject ids collapse to the "no subject" slot.
pub fn normalize_subject(subject_id: Option<&str>) -> Option<String> {
    subject_id
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub class_id: String,
    pub subject_id: Option<String>,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub marked_by: String,
    pub photo: Option<String>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const RETURNING_COLUMNS: &str = "id, student_id, class_id, subject_id, date, status, marked_by, \
     photo, notes, created_at, updated_at";

const RECORD_COLUMNS: &str = "r.id, r.student_id, r.class_id, r.subject_id, r.date, r.status, \
     r.marked_by, r.photo, r.notes, r.created_at, r.updated_at";

fn record_from_row(r: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let subject: String = r.get(3)?;
    Ok(AttendanceRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        class_id: r.get(2)?,
        subject_id: if subject.is_empty() { None } else { Some(subject) },
        date: r.get(4)?,
        status: r.get(5)?,
        marked_by: r.get(6)?,
        photo: r.get(7)?,
        notes: r.get(8)?,
        created_at: r.get(9)?,
        updated_at: r.get(10)?,
    })
}

/// One attendance slot minus the student: what a marking session or batch targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotKey {
    pub class_id: String,
    pub date: NaiveDate,
    pub subject_id: Option<String>,
}

impl SlotKey {
    fn subject_key(&self) -> &str {
        self.subject_id.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceWrite {
    pub student_id: String,
    pub class_id: String,
    pub subject_id: Option<String>,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub marked_by: String,
    pub photo: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AttendanceFilter {
    pub class_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub student_id: Option<String>,
    pub subject_id: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub student_id: String,
    pub status: AttendanceStatus,
    pub photo: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowFailure {
    pub student_id: String,
    pub code: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub written: usize,
    pub failures: Vec<RowFailure>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct AttendanceStore<'a> {
    conn: &'a Connection,
}

impl<'a> AttendanceStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Inserts the slot or replaces every mutable column of the existing row. The row id and
    /// created_at survive replacement. Two writers racing on one key: the later write wins whole.
    pub fn upsert(&self, write: &AttendanceWrite) -> Result<AttendanceRecord> {
        if write.student_id.trim().is_empty() {
            return Err(AttendanceError::validation("missing studentId"));
        }
        if write.class_id.trim().is_empty() {
            return Err(AttendanceError::validation("missing classId"));
        }
        if write.marked_by.trim().is_empty() {
            return Err(AttendanceError::validation("missing actorId"));
        }

        let roster = SqliteRoster::new(self.conn);
        if !roster.student_exists(&write.student_id)? {
            return Err(AttendanceError::not_found(format!(
                "student not found: {}",
                write.student_id
            )));
        }
        if !roster.class_exists(&write.class_id)? {
            return Err(AttendanceError::not_found(format!(
                "class not found: {}",
                write.class_id
            )));
        }

        let subject = normalize_subject(write.subject_id.as_deref()).unwrap_or_default();
        let notes = write.notes.clone().unwrap_or_default();
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO attendance_records(
                id, student_id, class_id, subject_id, date, status, marked_by, photo, notes,
                created_at, updated_at
             )
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, class_id, subject_id, date) DO UPDATE SET
               status = excluded.status,
               marked_by = excluded.marked_by,
               photo = excluded.photo,
               notes = excluded.notes,
               updated_at = excluded.updated_at
             RETURNING {}",
            RETURNING_COLUMNS
        );
        let record = self.conn.query_row(
            &sql,
            (
                Uuid::new_v4().to_string(),
                &write.student_id,
                &write.class_id,
                &subject,
                write.date,
                write.status,
                &write.marked_by,
                &write.photo,
                &notes,
                now,
                now,
            ),
            record_from_row,
        )?;
        tracing::debug!(
            record_id = %record.id,
            student_id = %record.student_id,
            status = record.status.as_str(),
            "attendance upserted"
        );
        Ok(record)
    }

    pub fn query_by_filter(&self, filter: &AttendanceFilter) -> Result<Vec<AttendanceRecord>> {
        let sql = format!(
            "SELECT {}
             FROM attendance_records r
             LEFT JOIN students s ON s.id = r.student_id
             WHERE (?1 IS NULL OR r.class_id = ?1)
               AND (?2 IS NULL OR r.date = ?2)
               AND (?3 IS NULL OR r.student_id = ?3)
               AND (?4 IS NULL OR r.subject_id = ?4)
             ORDER BY r.date DESC, s.last_name, s.first_name, r.subject_id
             LIMIT ?5",
            RECORD_COLUMNS
        );
        let subject = normalize_subject(filter.subject_id.as_deref());
        // SQLite treats a negative LIMIT as unbounded.
        let limit = filter.limit.map(i64::from).unwrap_or(-1);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                (&filter.class_id, filter.date, &filter.student_id, &subject, limit),
                record_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Inclusive on both ends, oldest first.
    pub fn query_range(
        &self,
        student_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>> {
        if start > end {
            return Err(AttendanceError::validation("startDate must not be after endDate"));
        }
        let sql = format!(
            "SELECT {}
             FROM attendance_records r
             WHERE r.student_id = ? AND r.date >= ? AND r.date <= ?
             ORDER BY r.date ASC, r.class_id, r.subject_id",
            RECORD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map((student_id, start, end), record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Full history of one student, oldest first.
    pub fn student_history(&self, student_id: &str) -> Result<Vec<AttendanceRecord>> {
        let sql = format!(
            "SELECT {}
             FROM attendance_records r
             WHERE r.student_id = ?
             ORDER BY r.date ASC, r.class_id, r.subject_id",
            RECORD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([student_id], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Records of exactly one slot (the subject is matched, not wildcarded).
    pub fn records_for_slot(&self, slot: &SlotKey) -> Result<Vec<AttendanceRecord>> {
        let sql = format!(
            "SELECT {}
             FROM attendance_records r
             WHERE r.class_id = ? AND r.date = ? AND r.subject_id = ?",
            RECORD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map((&slot.class_id, slot.date, slot.subject_key()), record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Writes entries one row at a time with no wrapping transaction: a failing row never undoes
    /// the rows written before it.
    pub fn submit_batch(
        &self,
        slot: &SlotKey,
        marked_by: &str,
        entries: &[BatchEntry],
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in entries {
            // A repeated student would overwrite the mark written a moment earlier.
            if !seen.insert(entry.student_id.as_str()) {
                tracing::warn!(
                    student_id = %entry.student_id,
                    class_id = %slot.class_id,
                    date = %slot.date,
                    "duplicate attendance row skipped"
                );
                outcome.failures.push(RowFailure {
                    student_id: entry.student_id.clone(),
                    code: "bad_params".to_string(),
                    error: "duplicate studentId in batch".to_string(),
                });
                continue;
            }
            let write = AttendanceWrite {
                student_id: entry.student_id.clone(),
                class_id: slot.class_id.clone(),
                subject_id: slot.subject_id.clone(),
                date: slot.date,
                status: entry.status,
                marked_by: marked_by.to_string(),
                photo: entry.photo.clone(),
                notes: entry.notes.clone(),
            };
            match self.upsert(&write) {
                Ok(_) => outcome.written += 1,
                Err(e) => {
                    tracing::warn!(
                        student_id = %entry.student_id,
                        class_id = %slot.class_id,
                        date = %slot.date,
                        code = e.code(),
                        "attendance row failed: {}",
                        e
                    );
                    outcome.failures.push(RowFailure {
                        student_id: entry.student_id.clone(),
                        code: e.code().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        outcome
    }

    /// Record counts per (student, class, status), optionally narrowed to a class and date range.
    pub fn status_counts(
        &self,
        class_id: Option<&str>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<(String, String, AttendanceStatus, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT student_id, class_id, status, COUNT(*)
             FROM attendance_records
             WHERE (?1 IS NULL OR class_id = ?1)
               AND (?2 IS NULL OR date >= ?2)
               AND (?3 IS NULL OR date <= ?3)
             GROUP BY student_id, class_id, status",
        )?;
        let rows = stmt
            .query_map((class_id, start, end), |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::db;
    use crate::roster::{create_class, create_student, NewStudent};
    use rusqlite::Connection;

    pub fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::init_schema(&conn).expect("schema");
        conn
    }

    /// Creates a class with the given last names (first name "Sam"), roster order preserved.
    pub fn class_with_students(conn: &Connection, names: &[&str]) -> (String, Vec<String>) {
        let class_id = create_class(conn, "Homeroom").expect("class");
        let ids = names
            .iter()
            .map(|last| {
                create_student(
                    conn,
                    &NewStudent {
                        class_id: &class_id,
                        last_name: last,
                        first_name: "Sam",
                        student_no: None,
                        active: true,
                    },
                )
                .expect("student")
            })
            .collect();
        (class_id, ids)
    }
}
