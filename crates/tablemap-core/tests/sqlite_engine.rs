//! End-to-end tests of the engine against an in-memory SQLite database.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{engine, engine_with, seed, Direction, Person, Setting, SqliteConnection};
use tablemap_core::executor::MultiQuery;
use tablemap_core::handler::IdentityHandler;
use tablemap_core::statement::{Aggregate, SelectOptions};
use tablemap_core::{EngineConfig, Error};
use tablemap_proto::{LogicalType, OrderField, QueryField, QueryGroup, ScalarType, Value};

fn by_name(name: &str) -> QueryGroup {
    QueryGroup::from(QueryField::eq("Name", name).unwrap())
}

fn names(people: &[Person]) -> Vec<&str> {
    people.iter().map(|p| p.name.as_str()).collect()
}

#[test]
fn test_insert_writes_back_identity() {
    let conn = SqliteConnection::open();
    let engine = engine();
    let people = seed(&engine, &conn);

    let ids: Vec<i64> = people.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);

    let cleo = engine.query_by_key::<Person>(&conn, 3i64).unwrap().unwrap();
    assert_eq!(cleo, people[2]);
    assert!(engine.query_by_key::<Person>(&conn, 99i64).unwrap().is_none());
}

#[test]
fn test_insert_without_identity_returns_key() {
    let conn = SqliteConnection::open();
    let engine = engine();

    let mut setting = Setting::new("theme", "dark");
    let key = engine.insert(&conn, &mut setting).unwrap();
    assert_eq!(key, Value::from("theme"));
}

#[test]
fn test_enum_stored_through_handler() {
    let conn = SqliteConnection::open();
    let engine = engine();
    seed(&engine, &conn);

    let mut stmt = conn
        .raw()
        .prepare(r#"SELECT "Direction" FROM "Person" ORDER BY "Id""#)
        .unwrap();
    let stored: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(stored, vec!["W", "E", "E", "W", "W"]);

    let filter = QueryGroup::from(QueryField::eq("Direction", "East").unwrap());
    let east = engine
        .query::<Person>(&conn, Some(&filter), &SelectOptions::new().order_by(OrderField::asc("Id")))
        .unwrap();
    assert_eq!(names(&east), vec!["Brian", "Cleo"]);
    assert!(east.iter().all(|p| p.direction == Direction::East));
}

#[test]
fn test_unknown_stored_variant_is_conversion_error() {
    let conn = SqliteConnection::open();
    let engine = engine();
    conn.raw()
        .execute(
            r#"INSERT INTO "Person" ("Name", "Direction", "Score") VALUES ('Zed', 'N', 0)"#,
            [],
        )
        .unwrap();

    let err = engine
        .query::<Person>(&conn, None, &SelectOptions::new())
        .unwrap_err();
    assert!(matches!(err, Error::Conversion { ref field, .. } if field == "Direction"));
}

#[test]
fn test_query_filters() {
    let conn = SqliteConnection::open();
    let engine = engine();
    seed(&engine, &conn);
    let by_name_asc = SelectOptions::new().order_by(OrderField::asc("Name"));

    let filter = QueryGroup::and([
        QueryField::like("Name", "A%").unwrap(),
        QueryField::ge("Age", 30).unwrap(),
    ]);
    let found = engine.query::<Person>(&conn, Some(&filter), &by_name_asc).unwrap();
    assert_eq!(names(&found), vec!["Ada", "Alan"]);

    let filter = QueryGroup::from(QueryField::in_values("Id", [1i64, 4]).unwrap());
    let found = engine.query::<Person>(&conn, Some(&filter), &by_name_asc).unwrap();
    assert_eq!(names(&found), vec!["Ada", "Dmitri"]);

    let filter = QueryGroup::from(QueryField::between("Score", 7.0, 9.0).unwrap());
    let found = engine.query::<Person>(&conn, Some(&filter), &by_name_asc).unwrap();
    assert_eq!(names(&found), vec!["Alan", "Brian", "Cleo"]);

    let filter = QueryGroup::from(QueryField::is_null("Age"));
    let found = engine.query::<Person>(&conn, Some(&filter), &by_name_asc).unwrap();
    assert_eq!(names(&found), vec!["Brian"]);
    assert_eq!(found[0].age, None);

    // West, and not older than 40.
    let filter = QueryGroup::and([QueryField::eq("Direction", "West").unwrap()])
        .with(QueryGroup::and([QueryField::gt("Age", 40).unwrap()]).negate());
    let found = engine.query::<Person>(&conn, Some(&filter), &by_name_asc).unwrap();
    assert_eq!(names(&found), vec!["Ada"]);
}

#[test]
fn test_top_and_projection() {
    let conn = SqliteConnection::open();
    let engine = engine();
    seed(&engine, &conn);

    let options = SelectOptions::new()
        .order_by(OrderField::desc("Score"))
        .top(2)
        .fields(["Id", "Name"]);
    let found = engine.query::<Person>(&conn, None, &options).unwrap();
    assert_eq!(names(&found), vec!["Ada", "Alan"]);
    // Unselected fields keep their defaults.
    assert_eq!(found[0].score, 0.0);
    assert_eq!(found[0].age, None);
}

#[test]
fn test_paged_query() {
    let conn = SqliteConnection::open();
    let engine = engine();
    seed(&engine, &conn);
    let order = [OrderField::asc("Id")];

    let page = |n| {
        engine
            .query_paged::<Person>(&conn, None, &order, n, 2)
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect::<Vec<_>>()
    };
    assert_eq!(page(0), vec![1, 2]);
    assert_eq!(page(1), vec![3, 4]);
    assert_eq!(page(2), vec![5]);
    assert!(page(3).is_empty());

    let err = engine
        .query_paged::<Person>(&conn, None, &[], 0, 2)
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn test_count_exists_aggregate() {
    let conn = SqliteConnection::open();
    let engine = engine();
    seed(&engine, &conn);

    assert_eq!(engine.count::<Person>(&conn, None).unwrap(), 5);
    let west = QueryGroup::from(QueryField::eq("Direction", "West").unwrap());
    assert_eq!(engine.count::<Person>(&conn, Some(&west)).unwrap(), 3);

    assert!(engine.exists::<Person>(&conn, Some(&by_name("Cleo"))).unwrap());
    assert!(!engine.exists::<Person>(&conn, Some(&by_name("Zed"))).unwrap());

    let oldest = engine
        .aggregate::<Person>(&conn, Aggregate::Max, Some("Age"), None)
        .unwrap();
    assert_eq!(oldest, Value::Int64(51));
    let lowest = engine
        .aggregate::<Person>(&conn, Aggregate::Min, Some("Score"), Some(&west))
        .unwrap();
    assert_eq!(lowest, Value::Float64(6.0));
}

#[test]
fn test_update_by_key() {
    let conn = SqliteConnection::open();
    let engine = engine();
    let people = seed(&engine, &conn);

    let mut brian = people[1].clone();
    brian.age = Some(30);
    brian.direction = Direction::West;
    assert_eq!(engine.update(&conn, &brian).unwrap(), 1);
    assert_eq!(engine.query_by_key::<Person>(&conn, brian.id).unwrap(), Some(brian.clone()));

    let mut renamed = brian.clone();
    renamed.name = "Bryan".into();
    renamed.score = 1.5;
    assert_eq!(engine.update_fields(&conn, &renamed, &["Score"]).unwrap(), 1);
    let stored = engine.query_by_key::<Person>(&conn, brian.id).unwrap().unwrap();
    assert_eq!(stored.name, "Brian");
    assert_eq!(stored.score, 1.5);

    let err = engine.update_fields(&conn, &renamed, &["Id"]).unwrap_err();
    assert!(matches!(err, Error::Mapping(_)));
}

#[test]
fn test_batch_insert_and_update_chunk() {
    let conn = SqliteConnection::open();
    let engine = engine_with(EngineConfig::default().batch_size(2));

    let people: Vec<Person> = (0..7)
        .map(|i| Person::new(&format!("P{i}"), Some(20 + i), Direction::East, f64::from(i)))
        .collect();
    let before = conn.round_trips();
    assert_eq!(engine.insert_all(&conn, &people).unwrap(), 7);
    assert_eq!(conn.round_trips() - before, 4);
    assert_eq!(engine.count::<Person>(&conn, None).unwrap(), 7);

    let mut stored = engine
        .query::<Person>(&conn, None, &SelectOptions::new().order_by(OrderField::asc("Id")))
        .unwrap();
    for person in &mut stored {
        person.score += 10.0;
    }
    assert_eq!(engine.update_all(&conn, &stored).unwrap(), 7);

    let reread = engine
        .query::<Person>(&conn, None, &SelectOptions::new().order_by(OrderField::asc("Id")))
        .unwrap();
    assert_eq!(reread, stored);
    assert!(engine.insert_all::<Person>(&conn, &[]).unwrap() == 0);
}

#[test]
fn test_delete_and_truncate() {
    let conn = SqliteConnection::open();
    let engine = engine();
    seed(&engine, &conn);

    let no_age = QueryGroup::from(QueryField::is_null("Age"));
    assert_eq!(engine.delete::<Person>(&conn, Some(&no_age)).unwrap(), 1);
    assert_eq!(engine.delete_by_key::<Person>(&conn, 1i64).unwrap(), 1);
    assert_eq!(engine.delete_by_key::<Person>(&conn, 1i64).unwrap(), 0);
    assert_eq!(engine.count::<Person>(&conn, None).unwrap(), 3);

    assert_eq!(engine.truncate::<Person>(&conn).unwrap(), 3);
    assert_eq!(engine.count::<Person>(&conn, None).unwrap(), 0);
}

#[test]
fn test_merge_inserts_then_updates() {
    let conn = SqliteConnection::open();
    let engine = engine();

    assert_eq!(engine.merge(&conn, &mut Setting::new("theme", "dark"), None).unwrap(), 1);
    assert_eq!(engine.merge(&conn, &mut Setting::new("theme", "light"), None).unwrap(), 1);

    let settings = engine.query::<Setting>(&conn, None, &SelectOptions::new()).unwrap();
    assert_eq!(settings, vec![Setting::new("theme", "light")]);

    let batch = vec![
        Setting::new("theme", "solarized"),
        Setting::new("lang", "en"),
        Setting::new("tz", "UTC"),
    ];
    assert_eq!(engine.merge_all(&conn, &batch, Some(&["Name"][..])).unwrap(), 3);
    assert_eq!(engine.count::<Setting>(&conn, None).unwrap(), 3);
    let theme = engine.query_by_key::<Setting>(&conn, "theme").unwrap().unwrap();
    assert_eq!(theme.value, "solarized");
}

#[test]
fn test_merge_by_identity_updates_existing_row() {
    let conn = SqliteConnection::open();
    let engine = engine();
    let people = seed(&engine, &conn);

    let mut ada = people[0].clone();
    ada.score = 10.0;
    assert_eq!(engine.merge(&conn, &mut ada, None).unwrap(), 1);
    assert_eq!(engine.count::<Person>(&conn, None).unwrap(), 5);
    assert_eq!(engine.query_by_key::<Person>(&conn, ada.id).unwrap(), Some(ada));
}

#[test]
fn test_merge_new_entities_by_identity() {
    let conn = SqliteConnection::open();
    let engine = engine();

    let mut ada = Person::new("Ada", Some(36), Direction::West, 9.5);
    let mut brian = Person::new("Brian", None, Direction::East, 7.0);
    assert_eq!(engine.merge(&conn, &mut ada, None).unwrap(), 1);
    assert_eq!(engine.merge(&conn, &mut brian, None).unwrap(), 1);

    assert_eq!(engine.count::<Person>(&conn, None).unwrap(), 2);
    assert_ne!(ada.id, 0);
    assert_ne!(brian.id, 0);
    assert_ne!(ada.id, brian.id);
    assert_eq!(engine.query_by_key::<Person>(&conn, ada.id).unwrap(), Some(ada.clone()));
    assert_eq!(engine.query_by_key::<Person>(&conn, brian.id).unwrap(), Some(brian.clone()));

    // Merging again updates the row it was written back to.
    let id = ada.id;
    ada.score = 1.5;
    assert_eq!(engine.merge(&conn, &mut ada, None).unwrap(), 1);
    assert_eq!(ada.id, id);
    assert_eq!(engine.count::<Person>(&conn, None).unwrap(), 2);
    assert_eq!(engine.query_by_key::<Person>(&conn, id).unwrap(), Some(ada));
}

#[test]
fn test_merge_all_new_entities_by_identity() {
    let conn = SqliteConnection::open();
    let engine = engine();
    let people = vec![
        Person::new("Ada", Some(36), Direction::West, 9.5),
        Person::new("Brian", None, Direction::East, 7.0),
        Person::new("Cleo", Some(24), Direction::East, 8.25),
    ];

    assert_eq!(engine.merge_all(&conn, &people, None).unwrap(), 3);
    let stored = engine
        .query::<Person>(&conn, None, &SelectOptions::new().order_by(OrderField::asc("Id")))
        .unwrap();
    assert_eq!(names(&stored), vec!["Ada", "Brian", "Cleo"]);
    assert_eq!(stored.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[test]
fn test_query_multiple() {
    let conn = SqliteConnection::open();
    let engine = engine();
    seed(&engine, &conn);
    engine.merge(&conn, &mut Setting::new("theme", "dark"), None).unwrap();

    let west = QueryGroup::from(QueryField::eq("Direction", "West").unwrap());
    let multi = MultiQuery::new()
        .select::<Person>(Some(west), SelectOptions::new().order_by(OrderField::asc("Id")))
        .select::<Setting>(None, SelectOptions::new());
    let result = engine.query_multiple(&conn, &multi).unwrap();

    assert_eq!(result.len(), 2);
    let people = result.read::<Person>(0).unwrap();
    assert_eq!(names(&people), vec!["Ada", "Dmitri", "Alan"]);
    assert_eq!(result.read::<Setting>(1).unwrap(), vec![Setting::new("theme", "dark")]);
    assert!(matches!(result.read::<Setting>(0), Err(Error::Mapping(_))));
    assert!(result.read::<Person>(2).is_err());
}

#[test]
fn test_query_cached_skips_connection() {
    let conn = SqliteConnection::open();
    let engine = engine();
    seed(&engine, &conn);
    let west = QueryGroup::from(QueryField::eq("Direction", "West").unwrap());
    let options = SelectOptions::new();

    let before = conn.round_trips();
    let first = engine
        .query_cached::<Person>(&conn, "people:west", Some(Duration::from_secs(60)), Some(&west), &options)
        .unwrap();
    let second = engine
        .query_cached::<Person>(&conn, "people:west", None, Some(&west), &options)
        .unwrap();

    assert_eq!(first.len(), 3);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(conn.round_trips() - before, 1);

    assert!(engine.result_cache().remove("people:west"));
    engine
        .query_cached::<Person>(&conn, "people:west", None, Some(&west), &options)
        .unwrap();
    assert_eq!(conn.round_trips() - before, 2);
}

#[test]
fn test_command_cache_rebinds_values() {
    let conn = SqliteConnection::open();
    let engine = engine();
    seed(&engine, &conn);

    let ada = engine.query::<Person>(&conn, Some(&by_name("Ada")), &SelectOptions::new()).unwrap();
    let cleo = engine.query::<Person>(&conn, Some(&by_name("Cleo")), &SelectOptions::new()).unwrap();

    assert_eq!(names(&ada), vec!["Ada"]);
    assert_eq!(names(&cleo), vec!["Cleo"]);
    assert_eq!(engine.command_cache().stats().hits(), 1);
    assert_eq!(engine.command_cache().len(), 1);
}

#[test]
fn test_command_cache_disabled() {
    let conn = SqliteConnection::open();
    let engine = engine_with(EngineConfig::default().enable_command_cache(false));
    seed(&engine, &conn);

    let cleo = engine.query::<Person>(&conn, Some(&by_name("Cleo")), &SelectOptions::new()).unwrap();
    assert_eq!(names(&cleo), vec!["Cleo"]);
    assert!(engine.command_cache().is_empty());
}

#[test]
fn test_query_dynamic_rows() {
    let conn = SqliteConnection::open();
    let engine = engine();
    seed(&engine, &conn);

    let filter = QueryGroup::from(QueryField::eq("Id", 2i64).unwrap());
    let rows = engine
        .query_dynamic::<Person>(&conn, Some(&filter), &SelectOptions::new().fields(["Name", "Direction"]))
        .unwrap();

    assert_eq!(rows.len(), 1);
    let columns: Vec<&str> = rows[0].column_names().collect();
    assert_eq!(columns, vec!["Name", "Direction"]);
    assert_eq!(rows[0].get("Direction"), Some(&Value::from("East")));
    assert_eq!(rows[0].get("name"), Some(&Value::from("Brian")));
}

#[test]
fn test_handler_registration_after_first_use() {
    let conn = SqliteConnection::open();
    let engine = engine();
    engine
        .handlers()
        .register_global(LogicalType::Scalar(ScalarType::Bool), Arc::new(IdentityHandler))
        .unwrap();
    seed(&engine, &conn);

    let err = engine
        .handlers()
        .register_global(LogicalType::Scalar(ScalarType::Int64), Arc::new(IdentityHandler))
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[test]
fn test_independent_engines_share_nothing() {
    let conn = SqliteConnection::open();
    let first = engine();
    let second = engine();
    seed(&first, &conn);

    assert_eq!(first.resolver().len(), 1);
    assert!(second.resolver().is_empty());
    assert!(second.accessors().is_empty());
}
