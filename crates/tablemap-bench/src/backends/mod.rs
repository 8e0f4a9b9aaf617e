//! Database backends for comparison benchmarks.
//!
//! Both backends run the same workload over the same `User` table in an
//! in-memory SQLite database: one through the tablemap engine, one with
//! hand-written rusqlite.

mod sqlite;
mod tablemap;

pub use sqlite::SqliteBackend;
pub use tablemap::{SqliteConnection, TablemapBackend};

pub(crate) const USER_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS "User" (
        "Id" INTEGER PRIMARY KEY AUTOINCREMENT,
        "Name" TEXT NOT NULL,
        "Email" TEXT NOT NULL,
        "Age" INTEGER NOT NULL,
        "Status" TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_user_status ON "User"("Status");
    CREATE INDEX IF NOT EXISTS idx_user_age ON "User"("Age");
"#;
