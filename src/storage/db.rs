use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Result, Row};

use crate::core::error::AppError;
use crate::storage::migrations::run_migrations;

/// A registered bot user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Internal row id
    pub id: i64,
    /// Telegram ID of the user, also the chat id of their private chat
    pub telegram_id: i64,
    /// Telegram username without `@`, if the user has one
    pub username: Option<String>,
    /// First and last name as shown in Telegram
    pub full_name: Option<String>,
    /// Phone number, only known after the user shared their contact
    pub phone_number: Option<String>,
    /// Interface language code: "uz", "en" or "ru"
    pub language: String,
    /// Registration time, UTC, `YYYY-MM-DD HH:MM:SS`
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    /// Name to show in admin messages: full name, then `@username`, then the id.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.full_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        if let Some(username) = self.username.as_deref() {
            return format!("@{}", username);
        }
        self.telegram_id.to_string()
    }
}

/// Aggregated registration numbers for the admin statistics page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserStats {
    pub total: i64,
    pub today: i64,
    pub last_7_days: i64,
    pub last_30_days: i64,
    pub with_phone: i64,
    pub with_username: i64,
}

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

const USER_COLUMNS: &str =
    "id, telegram_id, username, full_name, phone_number, language, created_at, updated_at";

/// Create a new database connection pool
///
/// Initializes a connection pool with up to 10 connections and applies the
/// embedded migrations on the first connection.
///
/// # Example
///
/// ```no_run
/// use kiuf_bot::storage::create_pool;
///
/// let pool = create_pool("kiuf_bot.db")?;
/// # Ok::<(), kiuf_bot::core::error::AppError>(())
/// ```
pub fn create_pool(database_path: &str) -> Result<DbPool, AppError> {
    let manager = SqliteConnectionManager::file(database_path);
    let pool = Pool::builder()
        .max_size(10) // Maximum 10 connections in the pool
        .build(manager)?;

    let mut conn = pool.get()?;
    run_migrations(&mut conn).map_err(|e| AppError::Migration(format!("{:#}", e)))?;

    Ok(pool)
}

/// Get a connection from the pool
///
/// The connection is returned to the pool when dropped.
pub fn get_connection(pool: &DbPool) -> Result<DbConnection, r2d2::Error> {
    pool.get()
}

fn user_from_row(row: &Row<'_>) -> Result<User> {
    Ok(User {
        id: row.get(0)?,
        telegram_id: row.get(1)?,
        username: row.get(2)?,
        full_name: row.get(3)?,
        phone_number: row.get(4)?,
        language: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Creates a user with the given interface language.
pub fn create_user(
    conn: &Connection,
    telegram_id: i64,
    username: Option<&str>,
    full_name: Option<&str>,
    language: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO users (telegram_id, username, full_name, language) VALUES (?1, ?2, ?3, ?4)",
        params![telegram_id, username, full_name, language],
    )?;
    Ok(())
}

/// Looks a user up by Telegram ID.
///
/// Returns `Ok(None)` when the user never pressed /start.
pub fn get_user(conn: &Connection, telegram_id: i64) -> Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE telegram_id = ?1", USER_COLUMNS),
        params![telegram_id],
        user_from_row,
    )
    .optional()
}

/// Returns the user and whether it was created by this call.
///
/// Existing users get their name and username refreshed when Telegram
/// reports different values.
pub fn get_or_create_user(
    conn: &Connection,
    telegram_id: i64,
    username: Option<&str>,
    full_name: Option<&str>,
) -> Result<(User, bool)> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO users (telegram_id, username, full_name) VALUES (?1, ?2, ?3)",
        params![telegram_id, username, full_name],
    )?;

    if inserted == 0 {
        update_user_profile(conn, telegram_id, username, full_name)?;
    }

    let user = get_user(conn, telegram_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
    Ok((user, inserted > 0))
}

/// Updates name and username if they changed. Returns true when a row was touched.
pub fn update_user_profile(
    conn: &Connection,
    telegram_id: i64,
    username: Option<&str>,
    full_name: Option<&str>,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE users SET username = ?2, full_name = ?3, updated_at = CURRENT_TIMESTAMP
         WHERE telegram_id = ?1 AND (username IS NOT ?2 OR full_name IS NOT ?3)",
        params![telegram_id, username, full_name],
    )?;
    Ok(changed > 0)
}

pub fn get_user_language(conn: &Connection, telegram_id: i64) -> Result<Option<String>> {
    conn.query_row(
        "SELECT language FROM users WHERE telegram_id = ?1",
        params![telegram_id],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_user_language(conn: &Connection, telegram_id: i64, language: &str) -> Result<()> {
    conn.execute(
        "UPDATE users SET language = ?2, updated_at = CURRENT_TIMESTAMP WHERE telegram_id = ?1",
        params![telegram_id, language],
    )?;
    Ok(())
}

/// Stores the phone number shared by the user. Returns false for unknown users.
pub fn set_user_phone(conn: &Connection, telegram_id: i64, phone_number: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE users SET phone_number = ?2, updated_at = CURRENT_TIMESTAMP WHERE telegram_id = ?1",
        params![telegram_id, phone_number],
    )?;
    Ok(changed > 0)
}

/// All users, oldest registration first.
pub fn get_all_users(conn: &Connection) -> Result<Vec<User>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM users ORDER BY id", USER_COLUMNS))?;
    let rows = stmt.query_map([], user_from_row)?;
    rows.collect()
}

/// The first `limit` users, oldest registration first.
pub fn get_users_page(conn: &Connection, limit: usize) -> Result<Vec<User>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(&format!("SELECT {} FROM users ORDER BY id LIMIT ?1", USER_COLUMNS))?;
    let rows = stmt.query_map(params![limit], user_from_row)?;
    rows.collect()
}

pub fn count_users(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
}

/// Telegram IDs of every user, used as broadcast recipients.
pub fn get_all_user_ids(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT telegram_id FROM users ORDER BY id")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

/// Registration statistics. Time windows are evaluated in UTC.
pub fn get_user_stats(conn: &Connection) -> Result<UserStats> {
    conn.query_row(
        "SELECT
            COUNT(*),
            COALESCE(SUM(CASE WHEN date(created_at) = date('now') THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN created_at >= datetime('now', '-7 days') THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN created_at >= datetime('now', '-30 days') THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN phone_number IS NOT NULL AND phone_number != '' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN username IS NOT NULL AND username != '' THEN 1 ELSE 0 END), 0)
         FROM users",
        [],
        |row| {
            Ok(UserStats {
                total: row.get(0)?,
                today: row.get(1)?,
                last_7_days: row.get(2)?,
                last_30_days: row.get(3)?,
                with_phone: row.get(4)?,
                with_username: row.get(5)?,
            })
        },
    )
}

/// Removes every user together with the recorded feedback threads.
/// Returns the number of deleted users.
pub fn delete_all_users(conn: &mut Connection) -> Result<usize> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM feedback_threads", [])?;
    let deleted = tx.execute("DELETE FROM users", [])?;
    tx.commit()?;
    Ok(deleted)
}

/// Remembers that a bot message in an admin chat belongs to `user_id`'s thread.
pub fn record_thread_message(conn: &Connection, chat_id: i64, message_id: i32, user_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO feedback_threads (chat_id, message_id, user_id) VALUES (?1, ?2, ?3)",
        params![chat_id, message_id, user_id],
    )?;
    Ok(())
}

/// Origin user of a recorded thread message, if any.
pub fn find_thread_user(conn: &Connection, chat_id: i64, message_id: i32) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT user_id FROM feedback_threads WHERE chat_id = ?1 AND message_id = ?2",
        params![chat_id, message_id],
        |row| row.get(0),
    )
    .optional()
}
