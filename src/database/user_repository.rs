//! User persistence

use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::models::{User, UserRole};

/// Fields captured at admin registration
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub employee_id: Option<String>,
    pub display_name: String,
    pub role: UserRole,
    pub department: Option<String>,
    pub password_hash: String,
}

pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new user. A duplicate email or employee id surfaces as
    /// `Conflict` via the unique indexes.
    pub async fn create(&self, user: NewUser) -> AppResult<User> {
        let created = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, employee_id, display_name, role, department, password_hash)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(&user.email)
        .bind(&user.employee_id)
        .bind(&user.display_name)
        .bind(user.role)
        .bind(&user.department)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    pub async fn find_by_id(&self, id: i64) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    /// Fetch a user or fail with `NotFound`
    pub async fn get(&self, id: i64) -> AppResult<User> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("user {id}")))
    }

    pub async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn list_all(&self) -> AppResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY display_name")
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    /// All Admin and Management users; extension requests notify this set
    pub async fn list_admins_and_management(&self) -> AppResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE role IN ('ADMIN', 'MANAGEMENT') ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    /// Fetch several users at once, skipping ids that no longer resolve.
    /// An empty input returns an empty Vec without touching the database.
    pub async fn get_many(&self, ids: &[i64]) -> AppResult<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let users = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }
}
