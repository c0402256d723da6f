//! Persisted run stamps for periodic work.
//!
//! The scheduler itself lives outside the core; this store only remembers
//! when a named task last ran and whether its interval has elapsed.

use sqlx::Row;
use tracing::instrument;

use crate::db::Database;

/// One task's interval configuration and last run.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct TaskInterval {
    pub task_name: String,
    pub interval_seconds: i64,
    pub last_run: i64,
}

/// Store over the `task_intervals` table.
#[derive(Debug, Clone)]
pub struct TaskIntervals {
    db: Database,
}

impl TaskIntervals {
    /// Creates a new store over the given database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Registers a task or updates its interval.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error` if the upsert fails.
    #[instrument(skip(self))]
    pub async fn register(&self, task_name: &str, interval_seconds: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"INSERT INTO task_intervals (task_name, interval_seconds, last_run)
              VALUES (?, ?, 0)
              ON CONFLICT(task_name) DO UPDATE SET interval_seconds = excluded.interval_seconds",
        )
        .bind(task_name)
        .bind(interval_seconds)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Stamps a task as run now.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error` if the update fails.
    #[instrument(skip(self))]
    pub async fn mark_run(&self, task_name: &str) -> Result<(), sqlx::Error> {
        sqlx::query(r"UPDATE task_intervals SET last_run = ? WHERE task_name = ?")
            .bind(Database::now())
            .bind(task_name)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Whether the task's interval has elapsed since its last run. Unknown
    /// tasks are due.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error` if the query fails.
    #[instrument(skip(self))]
    pub async fn is_due(&self, task_name: &str) -> Result<bool, sqlx::Error> {
        let row = sqlx::query(
            r"SELECT interval_seconds, last_run FROM task_intervals WHERE task_name = ?",
        )
        .bind(task_name)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(match row {
            Some(row) => {
                let interval: i64 = row.get("interval_seconds");
                let last_run: i64 = row.get("last_run");
                Database::now() >= last_run + interval
            }
            None => true,
        })
    }

    /// All registered tasks.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error` if the query fails.
    pub async fn list(&self) -> Result<Vec<TaskInterval>, sqlx::Error> {
        sqlx::query_as::<_, TaskInterval>(r"SELECT * FROM task_intervals ORDER BY task_name")
            .fetch_all(self.db.pool())
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_mark_and_due() {
        let db = Database::new_in_memory().await.unwrap();
        let tasks = TaskIntervals::new(db);

        assert!(tasks.is_due("refresh").await.unwrap());

        tasks.register("refresh", 3600).await.unwrap();
        assert!(tasks.is_due("refresh").await.unwrap());

        tasks.mark_run("refresh").await.unwrap();
        assert!(!tasks.is_due("refresh").await.unwrap());

        let all = tasks.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].task_name, "refresh");
    }
}
