use std::collections::HashMap;

use crate::auth::password::{hash_password, verify_password};
use anyhow::Context;
use crate::config::SeedUserSettings;
use crate::error::{AppError, Result};
use crate::models::{
    AuthenticatedUser, ExternalProject, NewUser, User, UserChanges, UserWithProjects,
};
use crate::observability::{get_metrics, mask_email};
use crate::repositories::{ProjectRepository, UserRepository};
use sqlx::PgConnection;

/// Input for creating a user.
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Partial user update; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Input for attaching an external project to a user.
#[derive(Debug, Clone)]
pub struct AddProject {
    pub id: String,
    pub name: String,
}

/// User and project management. Operations run on the connection they are
/// given, so callers decide the transaction boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserService;

impl UserService {
    /// Creates a new user, rejecting an email that is already registered.
    pub async fn create_user(&self, conn: &mut PgConnection, request: CreateUser) -> Result<UserWithProjects> {
        if UserRepository::find_by_email(&mut *conn, &request.email).await?.is_some() {
            return Err(AppError::DuplicateEmail(format!(
                "Email already exists: {}",
                request.email
            )));
        }

        let new_user = NewUser {
            email: request.email,
            password_hash: hash_off_thread(request.password).await?,
            name: request.name,
        };
        let user = UserRepository::insert(&mut *conn, &new_user).await?;

        get_metrics().record_user_created();
        tracing::info!(user_id = user.id, email = %mask_email(&user.email), "User created");

        Ok(UserWithProjects {
            user,
            projects: Vec::new(),
        })
    }

    pub async fn get_all_users(&self, conn: &mut PgConnection) -> Result<Vec<UserWithProjects>> {
        let users = UserRepository::list(&mut *conn).await?;
        let ids: Vec<i64> = users.iter().map(|u| u.id).collect();

        let mut projects_by_user: HashMap<i64, Vec<ExternalProject>> = HashMap::new();
        for project in ProjectRepository::list_for_users(&mut *conn, &ids).await? {
            projects_by_user.entry(project.user_id).or_default().push(project);
        }

        Ok(users
            .into_iter()
            .map(|user| {
                let projects = projects_by_user.remove(&user.id).unwrap_or_default();
                UserWithProjects { user, projects }
            })
            .collect())
    }

    pub async fn get_user_by_id(&self, conn: &mut PgConnection, user_id: i64) -> Result<UserWithProjects> {
        let user = Self::require_user(&mut *conn, user_id).await?;
        let projects = ProjectRepository::list_for_user(&mut *conn, user_id).await?;
        Ok(UserWithProjects { user, projects })
    }

    /// Updates the provided fields. The new email must not belong to another user.
    pub async fn update_user(
        &self,
        conn: &mut PgConnection,
        user_id: i64,
        request: UpdateUser,
    ) -> Result<UserWithProjects> {
        Self::require_user(&mut *conn, user_id).await?;

        if let Some(email) = &request.email {
            if let Some(existing) = UserRepository::find_by_email(&mut *conn, email).await? {
                if existing.id != user_id {
                    return Err(AppError::DuplicateEmail(format!("Email already exists: {}", email)));
                }
            }
        }

        let password_hash = match request.password {
            Some(password) => Some(hash_off_thread(password).await?),
            None => None,
        };
        let changes = UserChanges {
            email: request.email,
            password_hash,
            name: request.name,
        };
        let user = UserRepository::update(&mut *conn, user_id, &changes)
            .await?
            .ok_or_else(|| not_found(user_id))?;
        let projects = ProjectRepository::list_for_user(&mut *conn, user_id).await?;

        get_metrics().record_user_updated();
        tracing::info!(user_id, "User updated");

        Ok(UserWithProjects { user, projects })
    }

    pub async fn delete_user(&self, conn: &mut PgConnection, user_id: i64) -> Result<()> {
        if !UserRepository::delete(&mut *conn, user_id).await? {
            return Err(not_found(user_id));
        }
        tracing::info!(user_id, "User deleted");
        Ok(())
    }

    /// Attaches a project to the user; an existing project with the same id is renamed.
    pub async fn add_project_to_user(
        &self,
        conn: &mut PgConnection,
        user_id: i64,
        request: AddProject,
    ) -> Result<ExternalProject> {
        Self::require_user(&mut *conn, user_id).await?;

        let project = ProjectRepository::upsert(
            &mut *conn,
            &ExternalProject {
                id: request.id,
                user_id,
                name: request.name,
            },
        )
        .await?;

        get_metrics().record_project_added();
        tracing::info!(user_id, project_id = %project.id, "Project added to user");

        Ok(project)
    }

    pub async fn get_user_projects(&self, conn: &mut PgConnection, user_id: i64) -> Result<Vec<ExternalProject>> {
        Self::require_user(&mut *conn, user_id).await?;
        ProjectRepository::list_for_user(&mut *conn, user_id).await
    }

    /// Verifies basic auth credentials against the stored password hash.
    pub async fn authenticate(
        &self,
        conn: &mut PgConnection,
        name: &str,
        password: &str,
    ) -> Result<AuthenticatedUser> {
        let user = UserRepository::find_by_name(&mut *conn, name).await?;
        let verified = match &user {
            Some(user) => verify_off_thread(password.to_string(), user.password.clone()).await?,
            None => false,
        };

        match user {
            Some(user) if verified => Ok(AuthenticatedUser::from(&user)),
            _ => {
                get_metrics().record_login_failed();
                tracing::warn!("Failed basic auth attempt");
                Err(AppError::Unauthorized("Invalid credentials".to_string()))
            }
        }
    }

    /// Creates the configured seed user unless its email is already taken.
    /// Returns whether a user was created.
    pub async fn ensure_seed_user(&self, conn: &mut PgConnection, seed: &SeedUserSettings) -> Result<bool> {
        if UserRepository::find_by_email(&mut *conn, &seed.email).await?.is_some() {
            return Ok(false);
        }

        self.create_user(
            conn,
            CreateUser {
                name: seed.name.clone(),
                email: seed.email.clone(),
                password: seed.password.clone(),
            },
        )
        .await?;
        Ok(true)
    }

    async fn require_user(conn: &mut PgConnection, user_id: i64) -> Result<User> {
        UserRepository::find_by_id(conn, user_id)
            .await?
            .ok_or_else(|| not_found(user_id))
    }
}

// bcrypt is CPU bound, so it stays off the async workers.
async fn hash_off_thread(plain: String) -> Result<String> {
    let hashed = tokio::task::spawn_blocking(move || hash_password(&plain))
        .await
        .context("password hashing task failed")?
        .context("failed to hash password")?;
    Ok(hashed)
}

async fn verify_off_thread(plain: String, stored: String) -> Result<bool> {
    let verified = tokio::task::spawn_blocking(move || verify_password(&plain, &stored))
        .await
        .context("password verification task failed")?;
    Ok(verified)
}

fn not_found(user_id: i64) -> AppError {
    AppError::NotFound(format!("User not found with id: {}", user_id))
}
