//! tablemap Benchmark Suite
//!
//! Criterion benchmarks for the tablemap core.
//!
//! # Benchmark Categories
//!
//! - **Statement**: SQL building per dialect, batch chunking, merges
//! - **Accessor**: Accessor compilation, parameter extraction, row materialization
//! - **Cache**: Command-text cache hits vs rebuilds, result cache throughput
//! - **Comparison**: The engine over SQLite vs hand-written rusqlite

pub mod backends;
pub mod fixtures;

pub use backends::{SqliteBackend, SqliteConnection, TablemapBackend};
pub use fixtures::{generate_users, user_rows, Scale, User};
