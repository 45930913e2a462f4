//! Repository for the `session_applications` table.

use sqlx::PgPool;

use crate::models::application::Application;

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, name, description, created_at";

/// Resolves application names to ids.
pub struct ApplicationRepo;

impl ApplicationRepo {
    /// Return the application with `name`, creating it on first use.
    ///
    /// The no-op `DO UPDATE` makes `RETURNING` yield the existing row when
    /// the name is already registered.
    pub async fn ensure(
        pool: &PgPool,
        name: &str,
        description: Option<&str>,
    ) -> Result<Application, sqlx::Error> {
        let query = format!(
            "INSERT INTO session_applications (name, description) VALUES ($1, $2) \
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Application>(&query)
            .bind(name)
            .bind(description)
            .fetch_one(pool)
            .await
    }

    /// Find an application by name.
    pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<Application>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM session_applications WHERE name = $1");
        sqlx::query_as::<_, Application>(&query)
            .bind(name)
            .fetch_optional(pool)
            .await
    }
}
