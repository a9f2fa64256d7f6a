//! User management: create and list users.

use rusqlite::params;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::User;

/// Create a new user. Fails on a duplicate username (unique constraint).
pub fn create_user(db: &Database, username: &str, display_name: &str) -> Result<User> {
    let username = username.trim();
    if username.is_empty() {
        return Err(Error::Validation("username must not be empty".into()));
    }

    db.write(|conn| {
        conn.execute(
            "INSERT INTO users (username, display_name) VALUES (?1, ?2)",
            params![username, display_name],
        )?;
        let row = conn.query_row(
            "SELECT * FROM users WHERE id = ?1",
            [conn.last_insert_rowid()],
            User::from_row,
        )?;
        Ok(row)
    })
}

/// Get a user by id.
pub fn get_user(db: &Database, user_id: i64) -> Result<User> {
    db.read(|conn| {
        conn.query_row("SELECT * FROM users WHERE id = ?1", [user_id], User::from_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    Error::NotFound(format!("user {}", user_id))
                }
                other => other.into(),
            })
    })
}

/// Get a user by username.
pub fn get_user_by_username(db: &Database, username: &str) -> Result<User> {
    db.read(|conn| {
        conn.query_row(
            "SELECT * FROM users WHERE username = ?1",
            [username],
            User::from_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                Error::NotFound(format!("user '{}'", username))
            }
            other => other.into(),
        })
    })
}

/// List all users ordered by id.
pub fn list_users(db: &Database) -> Result<Vec<User>> {
    db.read(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM users ORDER BY id")?;
        let users = stmt
            .query_map([], User::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    })
}
