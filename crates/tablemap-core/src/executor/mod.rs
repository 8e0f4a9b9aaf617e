//! Execution orchestration.
//!
//! [`Engine`] ties the resolver, statement builder, accessor cache and
//! caches together around a caller-supplied [`Connection`].

mod connection;
mod engine;
mod multi;

pub use connection::Connection;
pub use engine::Engine;
pub use multi::{MultiQuery, MultiResult};
