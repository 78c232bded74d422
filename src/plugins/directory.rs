//! Actor identity and permission checks.
//!
//! The coordinator only consumes [`AuthorizationContext`]. [`Directory`] is the
//! in-memory implementation built from `[directory]` in `accolade.toml`.

use crate::core::config::DirectoryConfig;
use crate::core::error::AccoladeError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The authenticated caller of a coordinator operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role_id: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, role_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role_id: role_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub id: String,
    pub user_id: String,
    pub student_number: String,
    pub program: String,
    pub advisor_id: Option<String>,
}

pub trait AuthorizationContext: Send + Sync {
    /// The student profile owned by `actor_id`, if any.
    fn resolve_student_profile(&self, actor_id: &str) -> Result<Option<StudentProfile>, AccoladeError>;

    fn has_permission(&self, role_id: &str, permission: &str) -> Result<bool, AccoladeError>;
}

#[derive(Debug, Clone, Default)]
pub struct Directory {
    users: BTreeMap<String, String>,
    students_by_user: BTreeMap<String, StudentProfile>,
    roles: BTreeMap<String, BTreeSet<String>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &DirectoryConfig) -> Self {
        let mut dir = Directory::new();
        for user in &config.users {
            dir = dir.with_user(&user.id, &user.role);
        }
        for s in &config.students {
            dir = dir.with_student(StudentProfile {
                id: s.id.clone(),
                user_id: s.user_id.clone(),
                student_number: s.student_number.clone(),
                program: s.program.clone(),
                advisor_id: s.advisor_id.clone(),
            });
        }
        for (role, permissions) in &config.roles {
            for permission in permissions {
                dir = dir.grant(role, permission);
            }
        }
        dir
    }

    pub fn with_user(mut self, user_id: &str, role_id: &str) -> Self {
        self.users.insert(user_id.to_string(), role_id.to_string());
        self
    }

    pub fn with_student(mut self, profile: StudentProfile) -> Self {
        self.students_by_user.insert(profile.user_id.clone(), profile);
        self
    }

    pub fn grant(mut self, role_id: &str, permission: &str) -> Self {
        self.roles
            .entry(role_id.to_string())
            .or_default()
            .insert(permission.to_string());
        self
    }

    /// Look up a user and return them as an actor with their configured role.
    pub fn actor(&self, user_id: &str) -> Result<Actor, AccoladeError> {
        self.users
            .get(user_id)
            .map(|role| Actor::new(user_id, role.as_str()))
            .ok_or_else(|| AccoladeError::NotFound(format!("user {}", user_id)))
    }
}

impl AuthorizationContext for Directory {
    fn resolve_student_profile(&self, actor_id: &str) -> Result<Option<StudentProfile>, AccoladeError> {
        Ok(self.students_by_user.get(actor_id).cloned())
    }

    fn has_permission(&self, role_id: &str, permission: &str) -> Result<bool, AccoladeError> {
        Ok(self
            .roles
            .get(role_id)
            .is_some_and(|granted| granted.contains(permission)))
    }
}
