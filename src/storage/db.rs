//! SQLite persistence: users, download history, broadcast queue,
//! notifications, and the admin audit trail.
//!
//! All access goes through an r2d2 pool; every operation is a free function
//! taking a pooled connection so callers decide transaction boundaries.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Result};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// A bot user row.
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub is_admin: bool,
    pub is_banned: bool,
    pub downloads_count: i64,
    /// Total bytes of media delivered to this user
    pub storage_used: i64,
    pub join_date: String,
    pub last_activity: String,
}

/// One entry of a user's download history.
#[derive(Debug, Clone)]
pub struct DownloadRecord {
    pub id: i64,
    pub user_id: i64,
    pub url: String,
    pub format: String,
    pub title: Option<String>,
    pub file_size: Option<i64>,
    pub status: String,
    pub error_message: Option<String>,
    pub download_time: String,
    pub completion_time: Option<String>,
}

/// A queued broadcast message.
#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    pub id: i64,
    pub sender_id: i64,
    pub message_text: String,
    pub sent_count: i64,
    pub failed_count: i64,
}

/// Aggregate counters for the /gstats admin command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalStats {
    pub total_users: i64,
    /// Users active within the last day
    pub active_users: i64,
    pub successful_downloads: i64,
    pub failed_downloads: i64,
    pub total_storage_used: i64,
    pub avg_download_seconds: f64,
}

/// Create the connection pool and ensure the schema exists.
pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    let pool = Pool::builder().max_size(10).build(manager)?;

    let conn = pool.get()?;
    if let Err(e) = migrate_schema(&conn) {
        log::error!("Schema migration failed: {}", e);
    }
    Ok(pool)
}

/// In-memory pool for tests.
pub fn create_memory_pool() -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::memory();
    // single connection so every test statement sees the same database
    let pool = Pool::builder().max_size(1).build(manager)?;
    let conn = pool.get()?;
    if let Err(e) = migrate_schema(&conn) {
        log::error!("Schema migration failed: {}", e);
    }
    Ok(pool)
}

pub fn get_connection(pool: &DbPool) -> Result<DbConnection, r2d2::Error> {
    pool.get()
}

/// Create all tables idempotently.
fn migrate_schema(conn: &rusqlite::Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            user_id INTEGER PRIMARY KEY,
            username TEXT,
            first_name TEXT,
            is_admin INTEGER DEFAULT 0,
            is_banned INTEGER DEFAULT 0,
            join_date TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            last_activity TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            downloads_count INTEGER DEFAULT 0,
            storage_used INTEGER DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS downloads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            url TEXT NOT NULL,
            format TEXT NOT NULL,
            title TEXT,
            file_size INTEGER,
            status TEXT,
            download_time TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            completion_time TIMESTAMP,
            error_message TEXT,
            FOREIGN KEY (user_id) REFERENCES users(user_id)
        );
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id INTEGER NOT NULL,
            message_text TEXT NOT NULL,
            is_broadcast INTEGER DEFAULT 0,
            sent_count INTEGER DEFAULT 0,
            failed_count INTEGER DEFAULT 0,
            delivered_at TIMESTAMP,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (sender_id) REFERENCES users(user_id)
        );
        CREATE TABLE IF NOT EXISTS notifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            message TEXT NOT NULL,
            notification_type TEXT,
            is_read INTEGER DEFAULT 0,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            read_at TIMESTAMP,
            FOREIGN KEY (user_id) REFERENCES users(user_id)
        );
        CREATE TABLE IF NOT EXISTS admin_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            admin_id INTEGER NOT NULL,
            action TEXT NOT NULL,
            target_user_id INTEGER,
            details TEXT,
            timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (admin_id) REFERENCES users(user_id)
        );",
    )
}

fn row_to_user(row: &rusqlite::Row<'_>) -> Result<User> {
    Ok(User {
        user_id: row.get("user_id")?,
        username: row.get("username")?,
        first_name: row.get("first_name")?,
        is_admin: row.get::<_, i64>("is_admin")? != 0,
        is_banned: row.get::<_, i64>("is_banned")? != 0,
        downloads_count: row.get("downloads_count")?,
        storage_used: row.get("storage_used")?,
        join_date: row.get("join_date")?,
        last_activity: row.get("last_activity")?,
    })
}

// user operations

/// Insert the user if unseen, otherwise refresh username/first name.
pub fn upsert_user(
    conn: &rusqlite::Connection,
    user_id: i64,
    username: Option<&str>,
    first_name: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO users (user_id, username, first_name) VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET username = ?2, first_name = ?3",
        params![user_id, username, first_name],
    )?;
    Ok(())
}

pub fn get_user(conn: &rusqlite::Connection, user_id: i64) -> Result<Option<User>> {
    conn.query_row(
        "SELECT * FROM users WHERE user_id = ?1",
        params![user_id],
        row_to_user,
    )
    .optional()
}

pub fn get_all_users(conn: &rusqlite::Connection, include_banned: bool) -> Result<Vec<User>> {
    let sql = if include_banned {
        "SELECT * FROM users ORDER BY join_date"
    } else {
        "SELECT * FROM users WHERE is_banned = 0 ORDER BY join_date"
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], row_to_user)?;
    rows.collect()
}

pub fn ban_user(conn: &rusqlite::Connection, user_id: i64) -> Result<()> {
    conn.execute("UPDATE users SET is_banned = 1 WHERE user_id = ?1", params![user_id])?;
    Ok(())
}

pub fn unban_user(conn: &rusqlite::Connection, user_id: i64) -> Result<()> {
    conn.execute("UPDATE users SET is_banned = 0 WHERE user_id = ?1", params![user_id])?;
    Ok(())
}

pub fn make_admin(conn: &rusqlite::Connection, user_id: i64) -> Result<()> {
    conn.execute("UPDATE users SET is_admin = 1 WHERE user_id = ?1", params![user_id])?;
    Ok(())
}

pub fn remove_admin(conn: &rusqlite::Connection, user_id: i64) -> Result<()> {
    conn.execute("UPDATE users SET is_admin = 0 WHERE user_id = ?1", params![user_id])?;
    Ok(())
}

pub fn is_admin(conn: &rusqlite::Connection, user_id: i64) -> Result<bool> {
    Ok(get_user(conn, user_id)?.map(|u| u.is_admin).unwrap_or(false))
}

pub fn is_banned(conn: &rusqlite::Connection, user_id: i64) -> Result<bool> {
    Ok(get_user(conn, user_id)?.map(|u| u.is_banned).unwrap_or(false))
}

pub fn touch_activity(conn: &rusqlite::Connection, user_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE users SET last_activity = CURRENT_TIMESTAMP WHERE user_id = ?1",
        params![user_id],
    )?;
    Ok(())
}

// download history

/// Record a new download in `pending` state; returns its row id.
pub fn log_download(conn: &rusqlite::Connection, user_id: i64, url: &str, format: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO downloads (user_id, url, format, status) VALUES (?1, ?2, ?3, 'pending')",
        params![user_id, url, format],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Mark a download delivered and roll its size into the user's counters.
pub fn complete_download(
    conn: &rusqlite::Connection,
    download_id: i64,
    title: &str,
    file_size: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE downloads SET status = 'completed', completion_time = CURRENT_TIMESTAMP,
         title = ?2, file_size = ?3 WHERE id = ?1",
        params![download_id, title, file_size],
    )?;
    conn.execute(
        "UPDATE users SET downloads_count = downloads_count + 1,
         storage_used = storage_used + ?2
         WHERE user_id = (SELECT user_id FROM downloads WHERE id = ?1)",
        params![download_id, file_size],
    )?;
    Ok(())
}

pub fn fail_download(conn: &rusqlite::Connection, download_id: i64, error_message: &str) -> Result<()> {
    conn.execute(
        "UPDATE downloads SET status = 'failed', completion_time = CURRENT_TIMESTAMP,
         error_message = ?2 WHERE id = ?1",
        params![download_id, error_message],
    )?;
    Ok(())
}

pub fn get_user_downloads(
    conn: &rusqlite::Connection,
    user_id: i64,
    limit: i64,
) -> Result<Vec<DownloadRecord>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM downloads WHERE user_id = ?1 ORDER BY download_time DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![user_id, limit], |row| {
        Ok(DownloadRecord {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            url: row.get("url")?,
            format: row.get("format")?,
            title: row.get("title")?,
            file_size: row.get("file_size")?,
            status: row.get("status")?,
            error_message: row.get("error_message")?,
            download_time: row.get("download_time")?,
            completion_time: row.get("completion_time")?,
        })
    })?;
    rows.collect()
}

// broadcast queue

/// Enqueue a broadcast; picked up by the scheduler on its next tick.
pub fn queue_broadcast(conn: &rusqlite::Connection, sender_id: i64, text: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO messages (sender_id, message_text, is_broadcast) VALUES (?1, ?2, 1)",
        params![sender_id, text],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Broadcasts whose delivery pass has not run yet, oldest first.
/// A pass that reaches zero recipients still counts as delivered.
pub fn pending_broadcasts(conn: &rusqlite::Connection, limit: i64) -> Result<Vec<BroadcastMessage>> {
    let mut stmt = conn.prepare(
        "SELECT id, sender_id, message_text, sent_count, failed_count FROM messages
         WHERE is_broadcast = 1 AND delivered_at IS NULL
         ORDER BY created_at LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(BroadcastMessage {
            id: row.get(0)?,
            sender_id: row.get(1)?,
            message_text: row.get(2)?,
            sent_count: row.get(3)?,
            failed_count: row.get(4)?,
        })
    })?;
    rows.collect()
}

/// Record the result of a delivery pass and take the broadcast off the queue.
pub fn update_broadcast_status(
    conn: &rusqlite::Connection,
    message_id: i64,
    sent_count: i64,
    failed_count: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE messages SET sent_count = ?2, failed_count = ?3,
         delivered_at = CURRENT_TIMESTAMP WHERE id = ?1",
        params![message_id, sent_count, failed_count],
    )?;
    Ok(())
}

// notifications

pub fn add_notification(
    conn: &rusqlite::Connection,
    user_id: i64,
    message: &str,
    notification_type: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO notifications (user_id, message, notification_type) VALUES (?1, ?2, ?3)",
        params![user_id, message, notification_type],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn unread_notifications(conn: &rusqlite::Connection, user_id: i64) -> Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare(
        "SELECT id, message FROM notifications
         WHERE user_id = ?1 AND is_read = 0 ORDER BY created_at DESC",
    )?;
    let rows = stmt.query_map(params![user_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

pub fn mark_notification_read(conn: &rusqlite::Connection, notification_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE notifications SET is_read = 1, read_at = CURRENT_TIMESTAMP WHERE id = ?1",
        params![notification_id],
    )?;
    Ok(())
}

// admin audit trail

pub fn log_admin_action(
    conn: &rusqlite::Connection,
    admin_id: i64,
    action: &str,
    target_user_id: Option<i64>,
    details: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO admin_logs (admin_id, action, target_user_id, details) VALUES (?1, ?2, ?3, ?4)",
        params![admin_id, action, target_user_id, details],
    )?;
    Ok(())
}

// statistics

pub fn get_statistics(conn: &rusqlite::Connection) -> Result<GlobalStats> {
    let total_users: i64 =
        conn.query_row("SELECT COUNT(*) FROM users WHERE is_banned = 0", [], |r| r.get(0))?;
    let active_users: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE last_activity > datetime('now', '-1 day')",
        [],
        |r| r.get(0),
    )?;
    let successful_downloads: i64 = conn.query_row(
        "SELECT COUNT(*) FROM downloads WHERE status = 'completed'",
        [],
        |r| r.get(0),
    )?;
    let failed_downloads: i64 = conn.query_row(
        "SELECT COUNT(*) FROM downloads WHERE status = 'failed'",
        [],
        |r| r.get(0),
    )?;
    let total_storage_used: i64 =
        conn.query_row("SELECT COALESCE(SUM(storage_used), 0) FROM users", [], |r| r.get(0))?;
    let avg_download_seconds: f64 = conn.query_row(
        "SELECT COALESCE(AVG((julianday(completion_time) - julianday(download_time)) * 86400), 0)
         FROM downloads WHERE status = 'completed'",
        [],
        |r| r.get(0),
    )?;

    Ok(GlobalStats {
        total_users,
        active_users,
        successful_downloads,
        failed_downloads,
        total_storage_used,
        avg_download_seconds,
    })
}
