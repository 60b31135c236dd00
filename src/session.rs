use crate::config::FinalizePolicy;
use crate::error::{AttendanceError, Result};
use crate::roster::{RosterProvider, RosterStudent, SqliteRoster};
use crate::store::{AttendanceStatus, AttendanceStore, BatchEntry, BatchOutcome, SlotKey};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Loaded,
    Editing,
    Submitted,
    Finalized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mark {
    pub status: AttendanceStatus,
    pub photo: Option<String>,
    pub notes: Option<String>,
}

impl Mark {
    fn new(status: AttendanceStatus, photo: Option<String>, notes: Option<String>) -> Self {
        // Blank notes and the store's empty default must compare equal.
        Self {
            status,
            photo,
            notes: notes.filter(|n| !n.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone)]
struct WorkingSlot {
    student: RosterStudent,
    current: Option<Mark>,
    saved: Option<Mark>,
}

impl WorkingSlot {
    fn is_dirty(&self) -> bool {
        self.current != self.saved
    }
}

/// One teacher's marking pass over a class roster for a single day (and optional subject).
///
/// The working set is positional: one slot per roster student, so re-marking a student always
/// overwrites that student's slot. `saved` mirrors what the store last acknowledged, which is
/// what makes a mark "unsaved".
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    actor_id: String,
    slot: SlotKey,
    state: SessionState,
    started_at: DateTime<Utc>,
    slots: Vec<WorkingSlot>,
    index: HashMap<String, usize>,
    cursor: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStudent {
    pub student_id: String,
    pub name: String,
    pub roll_number: Option<String>,
    pub status: Option<AttendanceStatus>,
    pub photo: Option<String>,
    pub notes: Option<String>,
    pub unsaved: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub actor_id: String,
    pub class_id: String,
    pub date: NaiveDate,
    pub subject_id: Option<String>,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub current_student_id: Option<String>,
    pub marked: usize,
    pub unmarked: usize,
    pub unsaved: usize,
    pub students: Vec<SessionStudent>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeOutcome {
    pub discarded: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted: Option<BatchOutcome>,
}

impl Session {
    /// Loads the active roster and whatever the store already holds for the slot. Reopening a
    /// slot after a submit therefore reconstructs the submitted marks.
    pub fn start(conn: &Connection, actor_id: &str, slot: SlotKey) -> Result<Session> {
        let actor_id = actor_id.trim();
        if actor_id.is_empty() {
            return Err(AttendanceError::validation("missing actorId"));
        }
        let roster = SqliteRoster::new(conn);
        if !roster.class_exists(&slot.class_id)? {
            return Err(AttendanceError::not_found("class not found"));
        }
        let students = roster.enrolled_students(&slot.class_id)?;

        let mut existing: HashMap<String, Mark> = AttendanceStore::new(conn)
            .records_for_slot(&slot)?
            .into_iter()
            .map(|r| {
                let notes = if r.notes.is_empty() { None } else { Some(r.notes) };
                (r.student_id, Mark::new(r.status, r.photo, notes))
            })
            .collect();

        let mut index = HashMap::with_capacity(students.len());
        let slots: Vec<WorkingSlot> = students
            .into_iter()
            .enumerate()
            .map(|(i, student)| {
                index.insert(student.student_id.clone(), i);
                let saved = existing.remove(&student.student_id);
                WorkingSlot {
                    student,
                    current: saved.clone(),
                    saved,
                }
            })
            .collect();

        let mut session = Session {
            id: Uuid::new_v4().to_string(),
            actor_id: actor_id.to_string(),
            slot,
            state: SessionState::Loaded,
            started_at: Utc::now(),
            slots,
            index,
            cursor: None,
        };
        session.cursor = session.next_unmarked(0);
        tracing::info!(
            session_id = %session.id,
            class_id = %session.slot.class_id,
            date = %session.slot.date,
            subject_id = session.slot.subject_id.as_deref().unwrap_or(""),
            roster = session.slots.len(),
            previously_marked = session.marked_count(),
            "attendance session started"
        );
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Student under the guided cursor; `None` once everyone is marked.
    pub fn current(&self) -> Option<&RosterStudent> {
        self.cursor.map(|i| &self.slots[i].student)
    }

    #[cfg(test)]
    pub fn status_of(&self, student_id: &str) -> Option<AttendanceStatus> {
        let i = *self.index.get(student_id)?;
        self.slots[i].current.as_ref().map(|m| m.status)
    }

    pub fn marked_count(&self) -> usize {
        self.slots.iter().filter(|s| s.current.is_some()).count()
    }

    pub fn unsaved_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_dirty()).count()
    }

    pub fn mark_present(&mut self, student_id: &str, photo: Option<String>) -> Result<()> {
        self.mark(student_id, AttendanceStatus::Present, photo, None)
    }

    pub fn mark_absent(&mut self, student_id: &str, notes: Option<String>) -> Result<()> {
        self.mark(student_id, AttendanceStatus::Absent, None, notes)
    }

    /// Replaces the student's working mark wholesale and moves the cursor to the next unmarked
    /// student after them.
    pub fn mark(
        &mut self,
        student_id: &str,
        status: AttendanceStatus,
        photo: Option<String>,
        notes: Option<String>,
    ) -> Result<()> {
        self.ensure_open()?;
        let i = self.slot_index(student_id)?;
        self.slots[i].current = Some(Mark::new(status, photo, notes));
        self.state = SessionState::Editing;
        self.cursor = self.next_unmarked(i + 1);
        Ok(())
    }

    /// Stamps every still-unmarked student with `status`. Returns how many were stamped.
    pub fn mark_remaining(&mut self, status: AttendanceStatus) -> Result<usize> {
        self.ensure_open()?;
        let mut stamped = 0;
        for slot in self.slots.iter_mut().filter(|s| s.current.is_none()) {
            slot.current = Some(Mark::new(status, None, None));
            stamped += 1;
        }
        if stamped > 0 {
            self.state = SessionState::Editing;
        }
        self.cursor = None;
        Ok(stamped)
    }

    /// Drops the unsaved change for one student, restoring the last stored mark (or none).
    pub fn revert(&mut self, student_id: &str) -> Result<()> {
        self.ensure_open()?;
        let i = self.slot_index(student_id)?;
        let slot = &mut self.slots[i];
        slot.current = slot.saved.clone();
        if self.cursor.is_none() && self.slots[i].current.is_none() {
            self.cursor = Some(i);
        }
        Ok(())
    }

    /// Writes every marked slot, one upsert per student. Rows that fail keep their unsaved mark
    /// so a retry needs no re-capture. The session stays editable.
    pub fn submit(&mut self, conn: &Connection) -> Result<BatchOutcome> {
        self.ensure_open()?;
        let entries: Vec<BatchEntry> = self
            .slots
            .iter()
            .filter_map(|s| {
                s.current.as_ref().map(|m| BatchEntry {
                    student_id: s.student.student_id.clone(),
                    status: m.status,
                    photo: m.photo.clone(),
                    notes: m.notes.clone(),
                })
            })
            .collect();

        let outcome = AttendanceStore::new(conn).submit_batch(&self.slot, &self.actor_id, &entries);
        for slot in self.slots.iter_mut().filter(|s| s.current.is_some()) {
            let failed = outcome
                .failures
                .iter()
                .any(|f| f.student_id == slot.student.student_id);
            if !failed {
                slot.saved = slot.current.clone();
            }
        }
        self.state = SessionState::Submitted;
        tracing::info!(
            session_id = %self.id,
            written = outcome.written,
            failed = outcome.failures.len(),
            "attendance session submitted"
        );
        Ok(outcome)
    }

    /// Ends the session. What happens to unsaved marks is decided by `policy`.
    pub fn finalize(
        &mut self,
        conn: &Connection,
        policy: FinalizePolicy,
    ) -> Result<FinalizeOutcome> {
        self.ensure_open()?;
        let unsaved = self.unsaved_count();
        let mut outcome = FinalizeOutcome::default();
        if unsaved > 0 {
            match policy {
                FinalizePolicy::Refuse => {
                    return Err(AttendanceError::conflict(
                        "unsaved_marks",
                        format!("{} unsaved mark(s); submit before finalizing", unsaved),
                    ));
                }
                FinalizePolicy::Submit => {
                    let submitted = self.submit(conn)?;
                    if !submitted.is_complete() {
                        return Err(AttendanceError::conflict(
                            "unsaved_marks",
                            format!(
                                "{} row(s) failed to save; session left open",
                                submitted.failures.len()
                            ),
                        ));
                    }
                    outcome.submitted = Some(submitted);
                }
                FinalizePolicy::Discard => {
                    tracing::warn!(
                        session_id = %self.id,
                        discarded = unsaved,
                        "finalizing with unsaved marks"
                    );
                    outcome.discarded = unsaved;
                }
            }
        }
        self.state = SessionState::Finalized;
        self.cursor = None;
        tracing::info!(session_id = %self.id, "attendance session finalized");
        Ok(outcome)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let students: Vec<SessionStudent> = self
            .slots
            .iter()
            .map(|s| SessionStudent {
                student_id: s.student.student_id.clone(),
                name: s.student.name.clone(),
                roll_number: s.student.roll_number.clone(),
                status: s.current.as_ref().map(|m| m.status),
                photo: s.current.as_ref().and_then(|m| m.photo.clone()),
                notes: s.current.as_ref().and_then(|m| m.notes.clone()),
                unsaved: s.is_dirty(),
            })
            .collect();
        let marked = self.marked_count();
        SessionSnapshot {
            session_id: self.id.clone(),
            actor_id: self.actor_id.clone(),
            class_id: self.slot.class_id.clone(),
            date: self.slot.date,
            subject_id: self.slot.subject_id.clone(),
            state: self.state,
            started_at: self.started_at,
            current_student_id: self.current().map(|s| s.student_id.clone()),
            marked,
            unmarked: students.len() - marked,
            unsaved: self.unsaved_count(),
            students,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == SessionState::Finalized {
            return Err(AttendanceError::conflict(
                "session_finalized",
                "session already finalized",
            ));
        }
        Ok(())
    }

    fn slot_index(&self, student_id: &str) -> Result<usize> {
        self.index.get(student_id).copied().ok_or_else(|| {
            AttendanceError::not_found(format!("student not on session roster: {}", student_id))
        })
    }

    /// First unmarked slot at or after `from`, wrapping around the roster.
    fn next_unmarked(&self, from: usize) -> Option<usize> {
        let n = self.slots.len();
        (0..n)
            .map(|k| (from + k) % n)
            .find(|&i| self.slots[i].current.is_none())
    }
}
