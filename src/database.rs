use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

use crate::log_db_operation;
use crate::models::*;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to an in-memory database is a separate database.
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let db = Database { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                phase TEXT NOT NULL,
                grade TEXT NOT NULL,
                subjects TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        // No uniqueness constraint: regeneration deletes before inserting.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS calendar_entries (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                date TEXT NOT NULL,
                subject TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_calendar_entries_lookup ON calendar_entries (user_id, date, subject)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS goals (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                description TEXT NOT NULL,
                target_date TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        log_db_operation!(info, "migrate", "schema ready");
        Ok(())
    }

    // User operations
    pub async fn create_user(&self, request: &CreateUserRequest) -> Result<User> {
        let user = User {
            id: Uuid::new_v4(),
            name: request.name.trim().to_string(),
            phase: request.phase.trim().to_string(),
            grade: request.grade.trim().to_string(),
            subjects: request
                .subjects
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            created_at: now(),
        };

        sqlx::query(
            "INSERT INTO users (id, name, phase, grade, subjects, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(user.id.to_string())
        .bind(&user.name)
        .bind(&user.phase)
        .bind(&user.grade)
        .bind(serde_json::to_string(&user.subjects)?)
        .bind(timestamp(&user.created_at))
        .execute(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_user(&row)).transpose()
    }

    pub async fn get_user_by_name(&self, name: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE name = ?1")
            .bind(name.trim())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_user(&row)).transpose()
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY created_at ASC, rowid ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_user).collect()
    }

    // Calendar entry operations
    pub async fn find_entry(&self, user_id: Uuid, date: NaiveDate, subject: &str) -> Result<Option<CalendarEntry>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM calendar_entries
            WHERE user_id = ?1 AND date = ?2 AND subject = ?3
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(user_id.to_string())
        .bind(date.format(DATE_FORMAT).to_string())
        .bind(subject)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row_to_entry(&row)).transpose()
    }

    pub async fn insert_entry(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        subject: &str,
        content: &str,
    ) -> Result<CalendarEntry> {
        let entry = CalendarEntry {
            id: Uuid::new_v4(),
            user_id,
            date,
            subject: subject.to_string(),
            content: content.to_string(),
            created_at: now(),
        };

        sqlx::query(
            r#"
            INSERT INTO calendar_entries (id, user_id, date, subject, content, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.user_id.to_string())
        .bind(entry.date.format(DATE_FORMAT).to_string())
        .bind(&entry.subject)
        .bind(&entry.content)
        .bind(timestamp(&entry.created_at))
        .execute(&self.pool)
        .await?;

        log_db_operation!(debug, "insert_entry", entry_id = entry.id);
        Ok(entry)
    }

    pub async fn delete_entry(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM calendar_entries WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        log_db_operation!(debug, "delete_entry", entry_id = id);
        Ok(result.rows_affected() > 0)
    }

    /// The `limit` most recently created entries of a user, newest first.
    pub async fn recent_entries(&self, user_id: Uuid, limit: u32) -> Result<Vec<CalendarEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM calendar_entries
            WHERE user_id = ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2
            "#,
        )
        .bind(user_id.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        log_db_operation!(debug, "recent_entries", count = rows.len());
        rows.iter().map(row_to_entry).collect()
    }

    // Goal operations
    pub async fn active_goal(&self, user_id: Uuid) -> Result<Option<Goal>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM goals
            WHERE user_id = ?1 AND is_active = 1
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row_to_goal(&row)).transpose()
    }

    /// Store a new active goal, deactivating the user's previous ones.
    pub async fn set_goal(&self, user_id: Uuid, description: &str, target_date: &str) -> Result<Goal> {
        let goal = Goal {
            id: Uuid::new_v4(),
            user_id,
            description: description.trim().to_string(),
            target_date: target_date.trim().to_string(),
            is_active: true,
            created_at: now(),
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE goals SET is_active = 0 WHERE user_id = ?1 AND is_active = 1")
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO goals (id, user_id, description, target_date, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4, 1, ?5)
            "#,
        )
        .bind(goal.id.to_string())
        .bind(goal.user_id.to_string())
        .bind(&goal.description)
        .bind(&goal.target_date)
        .bind(timestamp(&goal.created_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(goal)
    }
}

/// Current time at the precision the database keeps.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid timestamp '{}'", value))?
        .with_timezone(&Utc))
}

fn row_to_user(row: &SqliteRow) -> Result<User> {
    let subjects: String = row.get("subjects");
    Ok(User {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        name: row.get("name"),
        phase: row.get("phase"),
        grade: row.get("grade"),
        subjects: serde_json::from_str(&subjects).unwrap_or_default(),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
    })
}

fn row_to_entry(row: &SqliteRow) -> Result<CalendarEntry> {
    Ok(CalendarEntry {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        user_id: Uuid::parse_str(&row.get::<String, _>("user_id"))?,
        date: NaiveDate::parse_from_str(&row.get::<String, _>("date"), DATE_FORMAT)?,
        subject: row.get("subject"),
        content: row.get("content"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
    })
}

fn row_to_goal(row: &SqliteRow) -> Result<Goal> {
    Ok(Goal {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        user_id: Uuid::parse_str(&row.get::<String, _>("user_id"))?,
        description: row.get("description"),
        target_date: row.get("target_date"),
        is_active: row.get::<i64, _>("is_active") != 0,
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
    })
}
