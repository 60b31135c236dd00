use crate::error::{AttendanceError, Result};
use crate::roster::{RosterProvider, RosterStudent, SqliteRoster};
use crate::store::{
    normalize_subject, AttendanceFilter, AttendanceRecord, AttendanceStatus, AttendanceStore,
};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Two-decimal rounding used for every attendance percentage.
pub fn round_off_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// `present / total * 100`, rounded. An empty denominator yields 0, never NaN.
pub fn attendance_percentage(present: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round_off_2_decimals(100.0 * present as f64 / total as f64)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusTally {
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub excused: usize,
}

impl StatusTally {
    pub fn add(&mut self, status: AttendanceStatus, n: usize) {
        match status {
            AttendanceStatus::Present => self.present += n,
            AttendanceStatus::Absent => self.absent += n,
            AttendanceStatus::Late => self.late += n,
            AttendanceStatus::Excused => self.excused += n,
        }
    }

    pub fn total(&self) -> usize {
        self.present + self.absent + self.late + self.excused
    }

    pub fn percentage(&self) -> f64 {
        attendance_percentage(self.present, self.total())
    }
}

impl<'a> FromIterator<&'a AttendanceRecord> for StatusTally {
    fn from_iter<I: IntoIterator<Item = &'a AttendanceRecord>>(iter: I) -> Self {
        let mut tally = StatusTally::default();
        for r in iter {
            tally.add(r.status, 1);
        }
        tally
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    pub date: NaiveDate,
    pub class_id: Option<String>,
    pub subject_id: Option<String>,
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub excused: usize,
    pub not_marked: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeSummary {
    pub student_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_days: usize,
    pub present_days: usize,
    pub absent_days: usize,
    pub late_days: usize,
    pub excused_days: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyBucket {
    pub month: String,
    pub total_days: usize,
    pub present_days: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassPerformanceRow {
    pub student_id: String,
    pub class_id: String,
    pub name: String,
    pub roll_number: Option<String>,
    pub total_days: usize,
    pub present_days: usize,
    pub absent_days: usize,
    pub late_days: usize,
    pub excused_days: usize,
    pub percentage: f64,
}

fn roster_for(roster: &SqliteRoster<'_>, class_id: Option<&str>) -> Result<Vec<RosterStudent>> {
    match class_id {
        Some(class_id) => {
            if !roster.class_exists(class_id)? {
                return Err(AttendanceError::not_found("class not found"));
            }
            roster.enrolled_students(class_id)
        }
        None => roster.all_enrolled_students(),
    }
}

fn ensure_student(roster: &SqliteRoster<'_>, student_id: &str) -> Result<()> {
    if student_id.trim().is_empty() {
        return Err(AttendanceError::validation("missing studentId"));
    }
    if !roster.student_exists(student_id)? {
        return Err(AttendanceError::not_found("student not found"));
    }
    Ok(())
}

/// Enrolled students left-joined to the day's records; anyone without a record is `not_marked`.
///
/// Without a subject, a student with records for several subjects that day counts once, by the
/// most recently updated record.
pub fn daily_summary(
    conn: &Connection,
    date: NaiveDate,
    class_id: Option<&str>,
    subject_id: Option<&str>,
) -> Result<DailySummary> {
    let roster = SqliteRoster::new(conn);
    let students = roster_for(&roster, class_id)?;
    let subject_id = normalize_subject(subject_id);
    let records = AttendanceStore::new(conn).query_by_filter(&AttendanceFilter {
        class_id: class_id.map(str::to_string),
        date: Some(date),
        subject_id: subject_id.clone(),
        ..Default::default()
    })?;

    let mut latest: HashMap<(&str, &str), &AttendanceRecord> = HashMap::new();
    for r in &records {
        let key = (r.student_id.as_str(), r.class_id.as_str());
        let newer = latest
            .get(&key)
            .map_or(true, |prev| r.updated_at > prev.updated_at);
        if newer {
            latest.insert(key, r);
        }
    }

    let mut tally = StatusTally::default();
    let mut not_marked = 0;
    for s in &students {
        match latest.get(&(s.student_id.as_str(), s.class_id.as_str())) {
            Some(r) => tally.add(r.status, 1),
            None => not_marked += 1,
        }
    }

    Ok(DailySummary {
        date,
        class_id: class_id.map(str::to_string),
        subject_id,
        present: tally.present,
        absent: tally.absent,
        late: tally.late,
        excused: tally.excused,
        not_marked,
        total: students.len(),
    })
}

pub fn range_summary(
    conn: &Connection,
    student_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<RangeSummary> {
    ensure_student(&SqliteRoster::new(conn), student_id)?;
    let records = AttendanceStore::new(conn).query_range(student_id, start, end)?;
    let tally: StatusTally = records.iter().collect();
    Ok(RangeSummary {
        student_id: student_id.to_string(),
        start_date: start,
        end_date: end,
        total_days: tally.total(),
        present_days: tally.present,
        absent_days: tally.absent,
        late_days: tally.late,
        excused_days: tally.excused,
        percentage: tally.percentage(),
    })
}

/// Per-month buckets of the student's whole history, most recent month first.
pub fn monthly_breakdown(conn: &Connection, student_id: &str) -> Result<Vec<MonthlyBucket>> {
    ensure_student(&SqliteRoster::new(conn), student_id)?;
    let records = AttendanceStore::new(conn).student_history(student_id)?;

    let mut months: BTreeMap<String, StatusTally> = BTreeMap::new();
    for r in &records {
        months
            .entry(r.date.format("%Y-%m").to_string())
            .or_default()
            .add(r.status, 1);
    }

    Ok(months
        .into_iter()
        .rev()
        .map(|(month, tally)| MonthlyBucket {
            month,
            total_days: tally.total(),
            present_days: tally.present,
            percentage: tally.percentage(),
        })
        .collect())
}

/// One row per enrolled student, sorted by name. Students with nothing recorded in range still
/// appear, at 0%.
pub fn class_performance(
    conn: &Connection,
    class_id: Option<&str>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<Vec<ClassPerformanceRow>> {
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(AttendanceError::validation(
                "startDate must not be after endDate",
            ));
        }
    }
    let roster = SqliteRoster::new(conn);
    let students = roster_for(&roster, class_id)?;

    let mut tallies: HashMap<(String, String), StatusTally> = HashMap::new();
    for (student_id, row_class_id, status, n) in
        AttendanceStore::new(conn).status_counts(class_id, start, end)?
    {
        tallies
            .entry((student_id, row_class_id))
            .or_default()
            .add(status, usize::try_from(n).unwrap_or(0));
    }

    let mut rows: Vec<ClassPerformanceRow> = students
        .into_iter()
        .map(|s| {
            let tally = tallies
                .get(&(s.student_id.clone(), s.class_id.clone()))
                .copied()
                .unwrap_or_default();
            ClassPerformanceRow {
                student_id: s.student_id,
                class_id: s.class_id,
                name: s.name,
                roll_number: s.roll_number,
                total_days: tally.total(),
                present_days: tally.present,
                absent_days: tally.absent,
                late_days: tally.late,
                excused_days: tally.excused,
                percentage: tally.percentage(),
            }
        })
        .collect();
    rows.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then_with(|| a.class_id.cmp(&b.class_id))
            .then_with(|| a.student_id.cmp(&b.student_id))
    });
    Ok(rows)
}

pub fn student_history(
    conn: &Connection,
    student_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<AttendanceRecord>> {
    ensure_student(&SqliteRoster::new(conn), student_id)?;
    AttendanceStore::new(conn).query_range(student_id, start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{class_with_students, conn};
    use crate::store::{parse_date, AttendanceWrite};

    fn day(s: &str) -> NaiveDate {
        parse_date(s).expect("date")
    }

    fn record(conn: &Connection, student: &str, class: &str, date: &str, status: AttendanceStatus) {
        AttendanceStore::new(conn)
            .upsert(&AttendanceWrite {
                student_id: student.to_string(),
                class_id: class.to_string(),
                subject_id: None,
                date: day(date),
                status,
                marked_by: "t1".to_string(),
                photo: None,
                notes: None,
            })
            .expect("upsert");
    }

    #[test]
    fn percentage_guards_zero_and_rounds_to_two_places() {
        assert_eq!(attendance_percentage(0, 0), 0.0);
        assert_eq!(attendance_percentage(1, 3), 33.33);
        assert_eq!(attendance_percentage(2, 3), 66.67);
        assert_eq!(attendance_percentage(5, 5), 100.0);
        assert!(!StatusTally::default().percentage().is_nan());
    }

    #[test]
    fn daily_summary_counts_unmarked_against_the_roster() {
        let conn = conn();
        let (class_id, s) = class_with_students(&conn, &["A", "B", "C", "D", "E"]);
        record(&conn, &s[0], &class_id, "2024-09-02", AttendanceStatus::Present);
        record(&conn, &s[1], &class_id, "2024-09-02", AttendanceStatus::Absent);
        record(&conn, &s[2], &class_id, "2024-09-03", AttendanceStatus::Present);

        let sum = daily_summary(&conn, day("2024-09-02"), Some(&class_id), None).expect("summary");
        assert_eq!(sum.present, 1);
        assert_eq!(sum.absent, 1);
        assert_eq!(sum.not_marked, 3);
        assert_eq!(sum.total, 5);
        assert_eq!(
            sum.present + sum.absent + sum.late + sum.excused + sum.not_marked,
            sum.total
        );

        let empty = daily_summary(&conn, day("2024-09-09"), None, None).expect("summary");
        assert_eq!(empty.not_marked, 5);
        assert!(daily_summary(&conn, day("2024-09-09"), Some("ghost"), None).is_err());
    }

    #[test]
    fn daily_summary_counts_each_student_once_across_subjects() {
        let conn = conn();
        let (class_id, s) = class_with_students(&conn, &["A", "B"]);
        let store = AttendanceStore::new(&conn);
        for (subject, status) in [
            ("math", AttendanceStatus::Absent),
            ("art", AttendanceStatus::Late),
        ] {
            store
                .upsert(&AttendanceWrite {
                    student_id: s[0].clone(),
                    class_id: class_id.clone(),
                    subject_id: Some(subject.to_string()),
                    date: day("2024-09-02"),
                    status,
                    marked_by: "t1".to_string(),
                    photo: None,
                    notes: None,
                })
                .expect("upsert");
        }

        let any = daily_summary(&conn, day("2024-09-02"), Some(&class_id), None).expect("summary");
        assert_eq!(any.total, 2);
        assert_eq!(any.absent + any.late, 1);
        assert_eq!(any.not_marked, 1);

        let math = daily_summary(&conn, day("2024-09-02"), Some(&class_id), Some("math"))
            .expect("summary");
        assert_eq!(math.absent, 1);
        assert_eq!(math.late, 0);
    }

    #[test]
    fn range_summary_with_no_records_is_zero_percent() {
        let conn = conn();
        let (class_id, s) = class_with_students(&conn, &["A"]);
        record(&conn, &s[0], &class_id, "2024-01-10", AttendanceStatus::Present);

        let sum = range_summary(&conn, &s[0], day("2024-02-01"), day("2024-02-29")).expect("range");
        assert_eq!(sum.total_days, 0);
        assert_eq!(sum.percentage, 0.0);

        let sum = range_summary(&conn, &s[0], day("2024-01-01"), day("2024-01-31")).expect("range");
        assert_eq!(sum.total_days, 1);
        assert_eq!(sum.percentage, 100.0);

        assert_eq!(
            range_summary(&conn, "ghost", day("2024-01-01"), day("2024-01-31"))
                .expect_err("unknown")
                .code(),
            "not_found"
        );
    }

    #[test]
    fn monthly_breakdown_buckets_months_independently() {
        let conn = conn();
        let (class_id, s) = class_with_students(&conn, &["A"]);
        record(&conn, &s[0], &class_id, "2024-01-08", AttendanceStatus::Present);
        record(&conn, &s[0], &class_id, "2024-01-09", AttendanceStatus::Absent);
        record(&conn, &s[0], &class_id, "2024-01-10", AttendanceStatus::Present);
        record(&conn, &s[0], &class_id, "2024-02-01", AttendanceStatus::Late);

        let months = monthly_breakdown(&conn, &s[0]).expect("monthly");
        assert_eq!(
            months,
            vec![
                MonthlyBucket {
                    month: "2024-02".to_string(),
                    total_days: 1,
                    present_days: 0,
                    percentage: 0.0,
                },
                MonthlyBucket {
                    month: "2024-01".to_string(),
                    total_days: 3,
                    present_days: 2,
                    percentage: 66.67,
                },
            ]
        );
    }

    #[test]
    fn class_performance_keeps_students_without_records() {
        let conn = conn();
        let (class_id, s) = class_with_students(&conn, &["Young", "Adams", "Moss"]);
        record(&conn, &s[0], &class_id, "2024-03-01", AttendanceStatus::Present);
        record(&conn, &s[0], &class_id, "2024-03-02", AttendanceStatus::Excused);
        record(&conn, &s[1], &class_id, "2024-04-01", AttendanceStatus::Present);

        let rows = class_performance(
            &conn,
            Some(&class_id),
            Some(day("2024-03-01")),
            Some(day("2024-03-31")),
        )
        .expect("performance");
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Adams, Sam", "Moss, Sam", "Young, Sam"]);
        assert_eq!(rows[0].total_days, 0);
        assert_eq!(rows[0].percentage, 0.0);
        assert_eq!(rows[2].total_days, 2);
        assert_eq!(rows[2].excused_days, 1);
        assert_eq!(rows[2].percentage, 50.0);

        let all_time = class_performance(&conn, None, None, None).expect("performance");
        assert_eq!(all_time[0].total_days, 1);
        assert!(
            class_performance(&conn, None, Some(day("2024-05-01")), Some(day("2024-04-01")))
                .is_err()
        );
    }
}
