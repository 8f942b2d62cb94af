//! Teaching assignments (upload authority grants)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AcademicContext, Term};

/// Grants upload authority for one subject in one classroom for one term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeacherSubjectAssignment {
    pub id: Uuid,
    pub teacher_id: i64,
    pub subject_id: i64,
    pub classroom_id: i64,
    pub session_id: i64,
    pub term: Term,
    pub created_at: DateTime<Utc>,
}

/// Grants upload authority for every subject of a classroom for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassTeacherAssignment {
    pub id: Uuid,
    pub teacher_id: i64,
    pub classroom_id: i64,
    pub session_id: i64,
    pub created_at: DateTime<Utc>,
}

/// All grants a teacher currently holds (the cached unit)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveAssignments {
    pub subject: Vec<TeacherSubjectAssignment>,
    pub class: Vec<ClassTeacherAssignment>,
}

impl ActiveAssignments {
    /// Union of independently scoped grants
    ///
    /// A class-teacher grant covers any subject of that classroom for the
    /// session; a subject grant covers only its exact tuple.
    pub fn grants(&self, subject_id: i64, classroom_id: i64, context: AcademicContext) -> bool {
        let class_grant = self
            .class
            .iter()
            .any(|a| a.classroom_id == classroom_id && a.session_id == context.session_id);

        class_grant
            || self.subject.iter().any(|a| {
                a.subject_id == subject_id
                    && a.classroom_id == classroom_id
                    && a.session_id == context.session_id
                    && a.term == context.term
            })
    }

    pub fn is_empty(&self) -> bool {
        self.subject.is_empty() && self.class.is_empty()
    }
}
