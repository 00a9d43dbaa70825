//! Integration tests for `PostgresManager` using the manager test harness.
//!
//! Invokes `manager_tests!` to validate the contract, then covers what the
//! relational backend adds: error translation, array filters, sorting across
//! a to-one relation, and foreign-key and association relations.
//!
//! # Requirements
//!
//! - Docker must be running (testcontainers launches a PostgreSQL container)
//! - Feature flag `postgres` must be enabled
//!
//! # Running
//!
//! ```sh
//! cargo test --features postgres --test postgres_tests -- --test-threads=1
//! ```
//!
//! # Test isolation
//!
//! All tests share a single PostgreSQL container (via `OnceLock`). Each test
//! creates a fresh `PgPool` and truncates tables before running.

#![cfg(feature = "postgres")]

#[macro_use]
mod manager_harness;

use manager_harness::*;
use potion::prelude::*;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::{Arc, OnceLock};
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;

const SCHEMA: &[&str] = &[
    "CREATE TABLE team (
        id SERIAL PRIMARY KEY,
        name TEXT NOT NULL
    )",
    "CREATE TABLE person (
        id SERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        age INTEGER CHECK (age >= 0),
        active BOOLEAN NOT NULL DEFAULT TRUE,
        email TEXT UNIQUE,
        tags TEXT[],
        team_id INTEGER REFERENCES team (id)
    )",
    "CREATE TABLE team_sponsor (
        team_id INTEGER NOT NULL REFERENCES team (id),
        person_id INTEGER NOT NULL REFERENCES person (id),
        PRIMARY KEY (team_id, person_id)
    )",
];

// ---------------------------------------------------------------------------
// Shared test environment (single container, fresh pool per test)
// ---------------------------------------------------------------------------

/// Holds the testcontainer handle (keeps it alive) and the connection URL.
struct PgTestEnv {
    _container: testcontainers::ContainerAsync<Postgres>,
    connection_url: String,
}

/// Initialized once per test binary; std `OnceLock` because the container
/// must outlive the runtime of each `#[tokio::test]`.
static TEST_ENV: OnceLock<PgTestEnv> = OnceLock::new();

async fn init_pg_env() -> &'static PgTestEnv {
    if let Some(env) = TEST_ENV.get() {
        return env;
    }

    let container = Postgres::default()
        .start()
        .await
        .expect("Failed to start PostgreSQL container, is Docker running?");

    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

    let pool = PgPool::connect(&url)
        .await
        .expect("Failed to connect to PostgreSQL");
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(&pool)
            .await
            .expect("Failed to create schema");
    }
    pool.close().await;

    let _ = TEST_ENV.set(PgTestEnv {
        _container: container,
        connection_url: url,
    });
    TEST_ENV.get().unwrap()
}

/// Fresh pool bound to the current tokio runtime, with empty tables
async fn pg_pool() -> PgPool {
    let env = init_pg_env().await;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(&env.connection_url)
        .await
        .expect("Failed to connect to PostgreSQL");
    sqlx::query("TRUNCATE team_sponsor, person, team RESTART IDENTITY CASCADE")
        .execute(&pool)
        .await
        .expect("Failed to truncate tables");
    pool
}

// ---------------------------------------------------------------------------
// Factory helpers
// ---------------------------------------------------------------------------

fn person_meta() -> ResourceMeta {
    ResourceMeta::new("person").relation(
        "team",
        RelationConfig::ToOne {
            target: "team".into(),
            column: "team_id".into(),
        },
    )
}

fn team_meta() -> ResourceMeta {
    ResourceMeta::new("team")
        .relation(
            "members",
            RelationConfig::ForeignKey {
                target: "person".into(),
                column: "team_id".into(),
            },
        )
        .relation(
            "sponsors",
            RelationConfig::Association {
                target: "person".into(),
                table: "team_sponsor".into(),
                parent_column: "team_id".into(),
                child_column: "person_id".into(),
            },
        )
}

async fn clean_person_manager() -> PostgresManager {
    PostgresManager::register(pg_pool().await, person_meta())
        .await
        .expect("Failed to register person manager")
}

manager_tests!(clean_person_manager().await);

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_register_introspects_columns() {
    let manager = clean_person_manager().await;

    assert_eq!(manager.id_attribute(), "id");
    let tags = manager.fields().iter().find(|f| f.name == "tags").unwrap();
    assert_eq!(tags.field_type, FieldType::Array);
    assert_eq!(tags.item_type, Some(FieldType::String));

    let name = manager.fields().iter().find(|f| f.name == "name").unwrap();
    assert!(name.required);
    assert!(!name.nullable);

    let id = manager.fields().iter().find(|f| f.name == "id").unwrap();
    assert_eq!(id.io, FieldIo::Read);
    assert!(!id.required);

    assert!(manager.filters().get("name$icontains").is_some());
    assert!(manager.filters().get("tags$contains").is_some());
}

#[tokio::test]
async fn test_register_unknown_table_fails() {
    let result = PostgresManager::register(pg_pool().await, ResourceMeta::new("nope")).await;
    assert!(matches!(result, Err(ManagerError::Config(_))));
}

// ---------------------------------------------------------------------------
// Error translation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_unique_violation_is_duplicate_key() {
    let manager = clean_person_manager().await;
    let mut ann = person("Ann", 31, true);
    ann.insert("email".into(), json!("ann@example.com"));

    manager.create(ann.clone(), true).await.unwrap();
    let result = manager.create(ann, true).await;

    match result {
        Err(ManagerError::DuplicateKey { resource, detail }) => {
            assert_eq!(resource, "person");
            assert!(detail.contains("ann@example.com"), "detail was {}", detail);
        }
        other => panic!("expected DuplicateKey, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rejected_writes_emit_no_after_signals() {
    let (hooks, log) = signal_log();
    let manager = clean_person_manager().await.with_hooks(hooks);
    let mut ann = person("Ann", 31, true);
    ann.insert("email".into(), json!("ann@example.com"));
    let created = manager.create(ann.clone(), true).await.unwrap();
    log.lock().unwrap().clear();

    let result = manager.create(ann, true).await;
    assert!(matches!(result, Err(ManagerError::DuplicateKey { .. })));

    let result = manager.update(&created, item!({"age": -5}), true).await;
    assert!(matches!(result, Err(ManagerError::BackendConflict { .. })));

    manager.begin().await.unwrap();
    let result = manager.create(person("Bob", -1, true), false).await;
    assert!(matches!(result, Err(ManagerError::BackendConflict { .. })));

    assert_eq!(
        *log.lock().unwrap(),
        vec![Signal::BeforeCreate, Signal::BeforeUpdate, Signal::BeforeCreate]
    );
    assert!(after_signals(&log).is_empty());
}

#[tokio::test]
async fn test_check_violation_is_backend_conflict_with_debug_info() {
    let manager = PostgresManager::register(pg_pool().await, person_meta().debug(true))
        .await
        .unwrap();

    let result = manager.create(person("Ann", -1, true), true).await;
    match result {
        Err(ManagerError::BackendConflict { debug_info, .. }) => {
            let debug_info = debug_info.expect("debug mode should attach the statement");
            assert!(debug_info["statement"].as_str().unwrap().starts_with("INSERT"));
        }
        other => panic!("expected BackendConflict, got {:?}", other),
    }
}

#[tokio::test]
async fn test_conflict_without_debug_hides_statement() {
    let manager = clean_person_manager().await;
    let result = manager.create(person("Ann", -1, true), true).await;
    assert!(matches!(
        result,
        Err(ManagerError::BackendConflict {
            debug_info: None,
            ..
        })
    ));
}

#[tokio::test]
async fn test_unconvertible_id_is_not_found() {
    let manager = clean_person_manager().await;
    let result = manager.read(&json!("not-a-number")).await;
    assert!(matches!(result, Err(ManagerError::ItemNotFound { .. })));

    seed_people(&manager).await;
    assert_eq!(manager.read(&json!("2")).await.unwrap()["name"], json!("Bob"));
}

#[tokio::test]
async fn test_failed_staged_write_rolls_back_session() {
    let manager = clean_person_manager().await;
    manager.begin().await.unwrap();
    manager.create(person("Ann", 31, true), false).await.unwrap();

    let result = manager.create(person("Bob", -1, true), false).await;
    assert!(matches!(result, Err(ManagerError::BackendConflict { .. })));

    manager.commit().await.unwrap();
    assert!(manager.instances(&[], &[]).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_string_and_array_filters() {
    let manager = clean_person_manager().await;
    let mut ann = person("Ann_a%", 20, true);
    ann.insert("tags".into(), json!(["red", "blue"]));
    manager.create(ann, true).await.unwrap();
    seed_people(&manager).await;

    // pattern characters match literally
    let where_ = conditions(&manager, json!({"name": {"$contains": "_a%"}}));
    let found = manager.instances(&where_, &[]).await.unwrap();
    assert_eq!(names(&found), vec!["Ann_a%"]);

    let where_ = conditions(&manager, json!({"name": {"$istartswith": "an"}}));
    let found = manager.instances(&where_, &[SortKey::asc("name")]).await.unwrap();
    assert_eq!(names(&found), vec!["Ann", "Ann_a%"]);

    let where_ = conditions(&manager, json!({"tags": {"$contains": "blue"}}));
    let found = manager.instances(&where_, &[]).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["tags"], json!(["red", "blue"]));

    let where_ = conditions(&manager, json!({"age": {"$ne": 20}}));
    let found = manager.instances(&where_, &[SortKey::asc("age")]).await.unwrap();
    assert_eq!(names(&found), vec!["Bob", "Cid"]);
}

#[tokio::test]
async fn test_sort_across_to_one_relation() {
    let pool = pg_pool().await;
    let teams = PostgresManager::register(pool.clone(), team_meta()).await.unwrap();
    let people = PostgresManager::register(pool, person_meta()).await.unwrap();

    let zebras = teams.create(item!({"name": "zebras"}), true).await.unwrap();
    let ants = teams.create(item!({"name": "ants"}), true).await.unwrap();
    let seeded = seed_people(&people).await;

    people
        .update(&seeded[0], item!({"team_id": zebras["id"]}), true)
        .await
        .unwrap();
    people
        .update(&seeded[1], item!({"team_id": ants["id"]}), true)
        .await
        .unwrap();

    let sort = [SortKey::asc("team.name")];
    let found = people.instances(&[], &sort).await.unwrap();
    // people without a team sort first
    assert_eq!(names(&found), vec!["Cid", "Bob", "Ann"]);

    let result = people.instances(&[], &[SortKey::asc("league.name")]).await;
    assert!(matches!(result, Err(ManagerError::Validation { .. })));
}

// ---------------------------------------------------------------------------
// Relations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_foreign_key_relation() {
    let pool = pg_pool().await;
    let teams = Arc::new(PostgresManager::register(pool.clone(), team_meta()).await.unwrap());
    let people = Arc::new(PostgresManager::register(pool, person_meta()).await.unwrap());
    let members = PostgresRelation::new(teams.clone(), "members", people.clone()).unwrap();

    let mut red = teams.create(item!({"name": "red"}), true).await.unwrap();
    let mut blue = teams.create(item!({"name": "blue"}), true).await.unwrap();
    let seeded = seed_people(people.as_ref()).await;

    members.add(&mut red, &seeded[0]).await.unwrap();
    members.add(&mut red, &seeded[2]).await.unwrap();
    members.add(&mut blue, &seeded[1]).await.unwrap();

    let page = members.instances(&mut red, 1, 10).await.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(names(&page.items), vec!["Ann", "Cid"]);

    // removing from the wrong parent leaves the child alone
    members.remove(&mut blue, &seeded[0]).await.unwrap();
    assert_eq!(members.instances(&mut red, 1, 10).await.unwrap().total, 2);

    members.remove(&mut red, &seeded[0]).await.unwrap();
    let page = members.instances(&mut red, 1, 10).await.unwrap();
    assert_eq!(names(&page.items), vec!["Cid"]);

    // a child that no longer exists cannot be added
    people.delete(&seeded[1]).await.unwrap();
    let result = members.add(&mut red, &seeded[1]).await;
    assert!(matches!(result, Err(ManagerError::ItemNotFound { .. })));
}

#[tokio::test]
async fn test_association_relation() {
    let pool = pg_pool().await;
    let teams = Arc::new(PostgresManager::register(pool.clone(), team_meta()).await.unwrap());
    let people = Arc::new(PostgresManager::register(pool, person_meta()).await.unwrap());
    let sponsors = PostgresRelation::new(teams.clone(), "sponsors", people.clone()).unwrap();

    let mut red = teams.create(item!({"name": "red"}), true).await.unwrap();
    let seeded = seed_people(people.as_ref()).await;

    sponsors.add(&mut red, &seeded[1]).await.unwrap();
    sponsors.add(&mut red, &seeded[2]).await.unwrap();
    // adding an existing pair is a no-op
    sponsors.add(&mut red, &seeded[1]).await.unwrap();

    let page = sponsors.instances(&mut red, 1, 1).await.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(names(&page.items), vec!["Bob"]);

    sponsors.remove(&mut red, &seeded[1]).await.unwrap();
    sponsors.remove(&mut red, &seeded[1]).await.unwrap();
    let page = sponsors.instances(&mut red, 1, 10).await.unwrap();
    assert_eq!(names(&page.items), vec!["Cid"]);
}

#[tokio::test]
async fn test_relation_requires_to_many_config() {
    let pool = pg_pool().await;
    let teams = Arc::new(PostgresManager::register(pool.clone(), team_meta()).await.unwrap());
    let people = Arc::new(PostgresManager::register(pool, person_meta()).await.unwrap());

    let result = PostgresRelation::new(people.clone(), "team", teams.clone());
    assert!(matches!(result, Err(ManagerError::Config(_))));
}
