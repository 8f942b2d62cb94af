//! Academic calendar values
//!
//! Session and term are supplied by the calendar collaborator as an explicit
//! [`AcademicContext`]; nothing here looks up an "active" session.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Term within an academic session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Term {
    First,
    Second,
    Third,
}

impl Term {
    pub fn as_i64(self) -> i64 {
        match self {
            Term::First => 1,
            Term::Second => 2,
            Term::Third => 3,
        }
    }
}

impl TryFrom<i64> for Term {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Term::First),
            2 => Ok(Term::Second),
            3 => Ok(Term::Third),
            other => Err(format!("term must be 1, 2 or 3 (got {})", other)),
        }
    }
}

impl From<Term> for i64 {
    fn from(term: Term) -> i64 {
        term.as_i64()
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

/// Teaching week, fixed domain 1..=12
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Week(u8);

impl Week {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 12;

    pub fn new(value: i64) -> Result<Self, String> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&value) {
            Ok(Week(value as u8))
        } else {
            Err(format!(
                "week must be between {} and {} (got {})",
                Self::MIN,
                Self::MAX,
                value
            ))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Week {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Week::new(value)
    }
}

impl From<Week> for i64 {
    fn from(week: Week) -> i64 {
        week.0 as i64
    }
}

impl fmt::Display for Week {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session + term the caller is acting in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AcademicContext {
    pub session_id: i64,
    pub term: Term,
}

impl AcademicContext {
    pub fn new(session_id: i64, term: Term) -> Self {
        Self { session_id, term }
    }
}

/// The (teacher, subject, classroom, session, term, week) tuple that
/// identifies exactly one lesson note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub teacher_id: i64,
    pub subject_id: i64,
    pub classroom_id: i64,
    pub context: AcademicContext,
    pub week: Week,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_week_domain() {
        assert!(Week::new(0).is_err());
        assert!(Week::new(1).is_ok());
        assert!(Week::new(12).is_ok());
        assert!(Week::new(13).is_err());
    }

    #[test]
    fn test_week_deserialize_rejects_out_of_range() {
        assert!(serde_json::from_str::<Week>("7").is_ok());
        assert!(serde_json::from_str::<Week>("13").is_err());
    }

    #[test]
    fn test_term_roundtrip_through_integer() {
        for term in [Term::First, Term::Second, Term::Third] {
            assert_eq!(Term::try_from(term.as_i64()).unwrap(), term);
        }
        assert!(Term::try_from(4).is_err());
    }
}
