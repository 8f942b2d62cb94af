//! Data models for the lesson-note pipeline

pub mod academic;
pub mod actor;
pub mod assignment;
pub mod audit;
pub mod job;
pub mod lesson_note;
pub mod window;

pub use academic::{AcademicContext, SlotKey, Term, Week};
pub use actor::{Actor, Area, Role};
pub use assignment::{ActiveAssignments, ClassTeacherAssignment, TeacherSubjectAssignment};
pub use audit::AuditLogEntry;
pub use job::{Job, JobPayload, JobStatus};
pub use lesson_note::{DocumentMetadata, LessonNote, LessonNoteVersion, NewVersion, NoteStatus};
pub use window::SubmissionWindow;
