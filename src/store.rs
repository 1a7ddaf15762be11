use crate::{
    chat::Exchange,
    entity::{NewUser, User, UserChanges, UserId},
    error::{Error, Result},
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};
use std::{path::Path, str::FromStr};
use uuid::Uuid;

/// Persistence used by the server: credentials plus the write-only chat log.
///
/// Single-row operations only; the backing store provides atomicity.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Fails with [`Error::Conflict`] when the username or email is taken.
    async fn create_user(&self, user: &NewUser) -> Result<User>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>>;

    /// Returns `None` when no user has this id.
    async fn update_user(&self, id: UserId, changes: &UserChanges) -> Result<Option<User>>;

    async fn insert_exchange(&self, exchange: &Exchange) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect to the SQLite database at `database_url`, creating the file
    /// (and its directory) if needed.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        if let Some(parent) = database_file(database_url).and_then(Path::parent) {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)
            .context("Invalid DATABASE_URL")?
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        Ok(Self { pool })
    }

    /// Private in-memory database with the schema already applied.
    ///
    /// Every pooled connection to `:memory:` would open its own database, so
    /// the pool is pinned to one connection that is never recycled.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory SQLite database")?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                avatar_ref TEXT,
                created_at DATETIME NOT NULL
            );

            CREATE TABLE IF NOT EXISTS exchanges (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                user_message TEXT NOT NULL,
                bot_response TEXT NOT NULL,
                created_at DATETIME NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_exchanges_user_created ON exchanges(user_id, created_at DESC);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize database schema")?;

        Ok(())
    }

    pub async fn count_users(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| internal(e, "Failed to count users"))?;
        row.try_get("n")
            .map_err(|e| internal(e, "Failed to count users"))
    }

    /// Logged exchanges for one user, oldest first.
    pub async fn exchanges_for(&self, user_id: UserId) -> Result<Vec<Exchange>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, user_message, bot_response, created_at
            FROM exchanges
            WHERE user_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| internal(e, "Failed to fetch exchanges"))?;

        rows.iter()
            .map(exchange_from_row)
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| internal(e, "Failed to decode exchange"))
    }
}

#[async_trait]
impl Repository for Store {
    async fn create_user(&self, user: &NewUser) -> Result<User> {
        let created = User {
            id: UserId::new(),
            username: user.username.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            avatar_ref: None,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, avatar_ref, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(created.id.to_string())
        .bind(&created.username)
        .bind(&created.email)
        .bind(&created.password_hash)
        .bind(&created.avatar_ref)
        .bind(created.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "Failed to create user"))?;

        Ok(created)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, username, email, password_hash, avatar_ref, created_at
            FROM users
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| internal(e, "Failed to look up user by email"))?;

        row.as_ref()
            .map(user_from_row)
            .transpose()
            .map_err(|e| internal(e, "Failed to decode user"))
    }

    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, username, email, password_hash, avatar_ref, created_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| internal(e, "Failed to look up user by id"))?;

        row.as_ref()
            .map(user_from_row)
            .transpose()
            .map_err(|e| internal(e, "Failed to decode user"))
    }

    async fn update_user(&self, id: UserId, changes: &UserChanges) -> Result<Option<User>> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                username = COALESCE(?, username),
                email = COALESCE(?, email),
                avatar_ref = COALESCE(?, avatar_ref)
            WHERE id = ?
            "#,
        )
        .bind(&changes.username)
        .bind(&changes.email)
        .bind(&changes.avatar_ref)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "Failed to update user"))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.find_user_by_id(id).await
    }

    async fn insert_exchange(&self, exchange: &Exchange) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO exchanges (id, user_id, user_message, bot_response, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(exchange.id.to_string())
        .bind(exchange.user_id.to_string())
        .bind(&exchange.user_message)
        .bind(&exchange.bot_response)
        .bind(exchange.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| internal(e, "Failed to save exchange"))?;

        Ok(())
    }
}

/// Filesystem path named by a SQLite URL, if it names one.
fn database_file(url: &str) -> Option<&Path> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path.starts_with(":memory:") {
        None
    } else {
        Some(Path::new(path))
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid, sqlx::Error> {
    Uuid::parse_str(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn user_from_row(row: &SqliteRow) -> Result<User, sqlx::Error> {
    let id: String = row.try_get("id")?;
    Ok(User {
        id: UserId::from(parse_uuid(&id)?),
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        avatar_ref: row.try_get("avatar_ref")?,
        created_at: row.try_get("created_at")?,
    })
}

fn exchange_from_row(row: &SqliteRow) -> Result<Exchange, sqlx::Error> {
    let id: String = row.try_get("id")?;
    let user_id: String = row.try_get("user_id")?;
    Ok(Exchange {
        id: parse_uuid(&id)?,
        user_id: UserId::from(parse_uuid(&user_id)?),
        user_message: row.try_get("user_message")?,
        bot_response: row.try_get("bot_response")?,
        created_at: row.try_get("created_at")?,
    })
}

fn internal(err: sqlx::Error, context: &'static str) -> Error {
    Error::Internal(anyhow::Error::new(err).context(context))
}

fn write_error(err: sqlx::Error, context: &'static str) -> Error {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Error::Conflict("User already exists.".to_string())
        }
        _ => internal(err, context),
    }
}
