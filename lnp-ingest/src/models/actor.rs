//! Acting identities and capability checks
//!
//! Identity itself is established upstream; this module only knows the closed
//! set of roles and answers "may this actor do X" as pure functions.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Admin,
    Sudo,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Teacher => "teacher",
            Role::Admin => "admin",
            Role::Sudo => "sudo",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "teacher" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            "sudo" => Ok(Role::Sudo),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: i64,
    pub role: Role,
}

impl Actor {
    pub fn teacher(id: i64) -> Self {
        Self { id, role: Role::Teacher }
    }

    pub fn admin(id: i64) -> Self {
        Self { id, role: Role::Admin }
    }

    pub fn is_teacher(&self) -> bool {
        self.role == Role::Teacher
    }

    /// Review (approve/reject) capability
    pub fn can_approve(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Sudo)
    }

    pub fn can_access_area(&self, area: Area) -> bool {
        match area {
            Area::TeacherPortal => self.role == Role::Teacher,
            Area::ReviewQueue
            | Area::WindowManagement
            | Area::AssignmentManagement
            | Area::JobOperations => matches!(self.role, Role::Admin | Role::Sudo),
        }
    }
}

/// Protected areas of the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    TeacherPortal,
    ReviewQueue,
    WindowManagement,
    AssignmentManagement,
    JobOperations,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_admins_approve() {
        assert!(!Actor::teacher(1).can_approve());
        assert!(Actor::admin(2).can_approve());
        assert!(Actor { id: 3, role: Role::Sudo }.can_approve());
    }

    #[test]
    fn test_area_access() {
        let teacher = Actor::teacher(1);
        let admin = Actor::admin(2);
        assert!(teacher.can_access_area(Area::TeacherPortal));
        assert!(!teacher.can_access_area(Area::ReviewQueue));
        assert!(!teacher.can_access_area(Area::WindowManagement));
        assert!(admin.can_access_area(Area::ReviewQueue));
        assert!(!admin.can_access_area(Area::TeacherPortal));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("Teacher".parse::<Role>().unwrap(), Role::Teacher);
        assert_eq!(" sudo ".parse::<Role>().unwrap(), Role::Sudo);
        assert!("parent".parse::<Role>().is_err());
    }
}
