//! Users and roles.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::grants::{GrantTrie, check_grants};
use crate::error::ValidationError;

/// A named bundle of grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub grants: Vec<String>,
}

impl Role {
    pub fn new(name: impl Into<String>, grants: Vec<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::MissingValue {
                field: "role.name".into(),
            });
        }
        Ok(Self { name, grants })
    }
}

/// A resolved identity with its roles loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub roles: Vec<Role>,
}

impl User {
    pub fn new(name: impl Into<String>, roles: Vec<Role>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::MissingValue {
                field: "user.name".into(),
            });
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            roles,
        })
    }

    /// Flattened union of every role's grants.
    pub fn grants(&self) -> Vec<String> {
        let mut grants: Vec<String> = self
            .roles
            .iter()
            .flat_map(|role| role.grants.iter().cloned())
            .collect();
        grants.sort();
        grants.dedup();
        grants
    }

    pub fn check_grants<S: AsRef<str>>(&self, required: &[S]) -> bool {
        check_grants(&GrantTrie::new(&self.grants()), required)
    }

    pub fn role_names(&self) -> Vec<&str> {
        self.roles.iter().map(|r| r.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str, grants: &[&str]) -> Role {
        Role::new(name, grants.iter().map(|g| g.to_string()).collect()).unwrap()
    }

    #[test]
    fn grants_are_flattened_and_deduplicated() {
        let user = User::new(
            "alice",
            vec![
                role("reader", &["repo:read", "dice:roll"]),
                role("writer", &["repo:write", "dice:roll"]),
            ],
        )
        .unwrap();
        assert_eq!(user.grants(), vec!["dice:roll", "repo:read", "repo:write"]);
        assert!(user.check_grants(&["repo:read", "repo:write"]));
        assert!(!user.check_grants(&["admin:write"]));
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(User::new("  ", vec![]).is_err());
        assert!(Role::new("", vec![]).is_err());
    }
}
