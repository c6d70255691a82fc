use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A project in an external system linked to a user, identified by
/// `(user_id, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ExternalProject {
    pub id: String,
    pub user_id: i64,
    pub name: String,
}
