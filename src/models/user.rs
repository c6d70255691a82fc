use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::project::ExternalProject;

/// A registered user. `password` holds the salted hash, never the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub name: String,
}

/// Values for a user insert.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: String,
}

/// Partial update; `None` fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub name: Option<String>,
}

/// A user together with the external projects attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserWithProjects {
    pub user: User,
    pub projects: Vec<ExternalProject>,
}

/// Identity established by basic authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: i64,
    pub name: String,
}

impl From<&User> for AuthenticatedUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
        }
    }
}
