use crate::error::{AppError, Result};
use crate::models::ExternalProject;
use sqlx::PgConnection;

/// Repository for `tb_user_external_project`.
pub struct ProjectRepository;

impl ProjectRepository {
    /// Inserts the project or renames the existing `(user_id, id)` entry.
    pub async fn upsert(conn: &mut PgConnection, project: &ExternalProject) -> Result<ExternalProject> {
        let row = sqlx::query_as::<_, ExternalProject>(
            r#"
            INSERT INTO tb_user_external_project (id, user_id, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, id) DO UPDATE SET name = EXCLUDED.name
            RETURNING id, user_id, name
            "#,
        )
        .bind(&project.id)
        .bind(project.user_id)
        .bind(&project.name)
        .fetch_one(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn list_for_user(conn: &mut PgConnection, user_id: i64) -> Result<Vec<ExternalProject>> {
        let rows = sqlx::query_as::<_, ExternalProject>(
            r#"
            SELECT id, user_id, name
            FROM tb_user_external_project
            WHERE user_id = $1
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    /// Loads the projects of several users in one query.
    pub async fn list_for_users(conn: &mut PgConnection, user_ids: &[i64]) -> Result<Vec<ExternalProject>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, ExternalProject>(
            r#"
            SELECT id, user_id, name
            FROM tb_user_external_project
            WHERE user_id = ANY($1)
            ORDER BY user_id, id
            "#,
        )
        .bind(user_ids)
        .fetch_all(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }
}
