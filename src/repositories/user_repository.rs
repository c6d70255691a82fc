use crate::error::{AppError, Result};
use crate::models::{NewUser, User, UserChanges};
use sqlx::PgConnection;

/// Repository for `tb_user`. Every method runs on the caller's connection so
/// it can take part in an open transaction.
pub struct UserRepository;

impl UserRepository {
    /// Inserts a user. A concurrent insert of the same email surfaces as
    /// [`AppError::DuplicateEmail`].
    pub async fn insert(conn: &mut PgConnection, user: &NewUser) -> Result<User> {
        let row = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO tb_user (email, password, name)
            VALUES ($1, $2, $3)
            RETURNING id, email, password, name
            "#,
        )
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.name)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| map_unique_violation(e, &user.email))?;

        Ok(row)
    }

    pub async fn find_by_id(conn: &mut PgConnection, id: i64) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password, name
            FROM tb_user
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn find_by_email(conn: &mut PgConnection, email: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password, name
            FROM tb_user
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Finds the login user by name. Names are not unique; the oldest wins.
    pub async fn find_by_name(conn: &mut PgConnection, name: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password, name
            FROM tb_user
            WHERE name = $1
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(name)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn list(conn: &mut PgConnection) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password, name
            FROM tb_user
            ORDER BY id
            "#,
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    /// Applies a partial update, returning `None` if the user does not exist.
    pub async fn update(conn: &mut PgConnection, id: i64, changes: &UserChanges) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(
            r#"
            UPDATE tb_user
            SET email = COALESCE($2, email),
                password = COALESCE($3, password),
                name = COALESCE($4, name)
            WHERE id = $1
            RETURNING id, email, password, name
            "#,
        )
        .bind(id)
        .bind(&changes.email)
        .bind(&changes.password_hash)
        .bind(&changes.name)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_unique_violation(e, changes.email.as_deref().unwrap_or_default()))?;

        Ok(row)
    }

    /// Deletes a user and, through the foreign key, its projects.
    pub async fn delete(conn: &mut PgConnection, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM tb_user
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}

fn map_unique_violation(err: sqlx::Error, email: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::DuplicateEmail(format!("Email already exists: {}", email))
        }
        _ => AppError::Database(err),
    }
}
