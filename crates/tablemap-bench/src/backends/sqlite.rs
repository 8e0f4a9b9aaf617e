//! Hand-written rusqlite backend, the baseline for the engine.

use rusqlite::{params, Connection, Row};

use super::USER_SCHEMA;
use crate::fixtures::{generate_users, Scale, User};

/// SQLite backend for benchmarks.
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Create an empty in-memory database with the `User` table.
    pub fn new() -> Self {
        let conn = Connection::open_in_memory().expect("Failed to open SQLite in-memory database");
        conn.execute_batch(USER_SCHEMA).expect("Failed to create schema");
        Self { conn }
    }

    /// Create a database populated at `scale`.
    pub fn with_scale(scale: Scale) -> Self {
        let backend = Self::new();
        backend.insert_users(&generate_users(scale.count()));
        backend
    }

    /// Insert users in one transaction with a cached prepared statement.
    pub fn insert_users(&self, users: &[User]) -> usize {
        let tx = self.conn.unchecked_transaction().expect("Failed to begin transaction");
        let mut inserted = 0;
        {
            let mut stmt = tx
                .prepare_cached(
                    r#"INSERT INTO "User" ("Name", "Email", "Age", "Status") VALUES (?1, ?2, ?3, ?4)"#,
                )
                .expect("Failed to prepare insert");
            for user in users {
                inserted += stmt
                    .execute(params![user.name, user.email, user.age, user.status])
                    .expect("Failed to insert user");
            }
        }
        tx.commit().expect("Failed to commit");
        inserted
    }

    pub fn scan_users(&self) -> Vec<User> {
        self.select(r#"SELECT "Id", "Name", "Email", "Age", "Status" FROM "User""#, params![])
    }

    pub fn scan_users_limit(&self, limit: usize) -> Vec<User> {
        self.select(
            r#"SELECT "Id", "Name", "Email", "Age", "Status" FROM "User" LIMIT ?1"#,
            params![limit as i64],
        )
    }

    pub fn filter_users_by_status(&self, status: &str) -> Vec<User> {
        self.select(
            r#"SELECT "Id", "Name", "Email", "Age", "Status" FROM "User" WHERE "Status" = ?1"#,
            params![status],
        )
    }

    pub fn filter_users_by_age_gt(&self, age: i32) -> Vec<User> {
        self.select(
            r#"SELECT "Id", "Name", "Email", "Age", "Status" FROM "User" WHERE "Age" > ?1"#,
            params![age],
        )
    }

    pub fn count_users(&self) -> u64 {
        self.conn
            .query_row(r#"SELECT COUNT(*) FROM "User""#, [], |row| row.get::<_, i64>(0))
            .expect("Failed to count users") as u64
    }

    pub fn delete_all(&self) -> usize {
        self.conn
            .execute(r#"DELETE FROM "User""#, [])
            .expect("Failed to delete users")
    }

    fn select(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Vec<User> {
        let mut stmt = self.conn.prepare_cached(sql).expect("Failed to prepare select");
        stmt.query_map(params, read_user)
            .expect("Failed to run select")
            .collect::<Result<_, _>>()
            .expect("Failed to read users")
    }
}

impl Default for SqliteBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn read_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        age: row.get(3)?,
        status: row.get(4)?,
    })
}
