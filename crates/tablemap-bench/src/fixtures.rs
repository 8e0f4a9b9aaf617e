//! Test data generation for benchmarks.
//!
//! Generators are seeded so every run sees the same data.

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tablemap_core::catalog::{Entity, EntityDescriptor};
use tablemap_core::Row;
use tablemap_proto::{FieldType, ScalarType};

/// Scale factor for benchmark data generation.
#[derive(Clone, Copy, Debug, Default)]
pub enum Scale {
    /// Use for quick tests and development iteration.
    Tiny,
    Small,
    #[default]
    Medium,
    Large,
}

impl Scale {
    /// Number of users at this scale.
    pub fn count(&self) -> usize {
        match self {
            Scale::Tiny => 10,
            Scale::Small => 100,
            Scale::Medium => 2_000,
            Scale::Large => 50_000,
        }
    }
}

pub const STATUSES: [&str; 3] = ["active", "inactive", "banned"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub age: i32,
    pub status: String,
}

impl Entity for User {
    fn describe() -> EntityDescriptor<Self> {
        EntityDescriptor::new("User")
            .field(
                "Id",
                FieldType::scalar(ScalarType::Int64),
                |u: &User| u.id.into(),
                |u: &mut User, v| {
                    u.id = v.try_into()?;
                    Ok(())
                },
            )
            .field(
                "Name",
                FieldType::scalar(ScalarType::String),
                |u: &User| u.name.clone().into(),
                |u: &mut User, v| {
                    u.name = v.try_into()?;
                    Ok(())
                },
            )
            .field(
                "Email",
                FieldType::scalar(ScalarType::String),
                |u: &User| u.email.clone().into(),
                |u: &mut User, v| {
                    u.email = v.try_into()?;
                    Ok(())
                },
            )
            .field(
                "Age",
                FieldType::scalar(ScalarType::Int32),
                |u: &User| u.age.into(),
                |u: &mut User, v| {
                    u.age = v.try_into()?;
                    Ok(())
                },
            )
            .field(
                "Status",
                FieldType::scalar(ScalarType::String),
                |u: &User| u.status.clone().into(),
                |u: &mut User, v| {
                    u.status = v.try_into()?;
                    Ok(())
                },
            )
            .identity("Id")
    }
}

/// Generate `count` users with unset identities.
pub fn generate_users(count: usize) -> Vec<User> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count)
        .map(|i| {
            let name: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(8)
                .map(char::from)
                .collect();
            User {
                id: 0,
                email: format!("{}{i}@example.com", name.to_lowercase()),
                name,
                age: rng.gen_range(18..80),
                status: STATUSES[rng.gen_range(0..STATUSES.len())].to_string(),
            }
        })
        .collect()
}

/// Users rendered as driver rows, the way a connection would return them.
pub fn user_rows(users: &[User]) -> Vec<Row> {
    users
        .iter()
        .enumerate()
        .map(|(i, u)| {
            Row::with_capacity(5)
                .with("Id", i as i64 + 1)
                .with("Name", u.name.as_str())
                .with("Email", u.email.as_str())
                .with("Age", i64::from(u.age))
                .with("Status", u.status.as_str())
        })
        .collect()
}
