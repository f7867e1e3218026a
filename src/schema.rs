//! DDL for the `users` table the repository reads and writes.

/// Creates `users` if missing. `id` is assigned by SQLite on insert.
pub const USERS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL
)"#;
