//! Shared test harness for manager backend testing
//!
//! Every backend is tested against a `person` resource with the same shape:
//!
//! | column   | type    |
//! |----------|---------|
//! | `id`     | backend-assigned (integer or uuid) |
//! | `name`   | string  |
//! | `age`    | integer |
//! | `active` | boolean |
//!
//! # Usage
//!
//! From any integration test file in `tests/`:
//! ```rust,ignore
//! #[macro_use]
//! mod manager_harness;
//! use manager_harness::*;
//!
//! manager_tests!(
//!     MemoryManager::new("person").with_fields(person_fields(), &FiltersExpression::All(true))
//! );
//! ```

#![allow(dead_code)]

#[macro_use]
mod manager_tests;

use potion::prelude::*;
use std::sync::{Arc, Mutex};

/// Field declarations matching the `person` table of every backend
pub fn person_fields() -> Vec<Field> {
    vec![
        Field::new("id", FieldType::Integer).io(FieldIo::Read),
        Field::new("name", FieldType::String),
        Field::new("age", FieldType::Integer).nullable(true),
        Field::new("active", FieldType::Boolean),
    ]
}

pub fn person(name: &str, age: i64, active: bool) -> Item {
    item!({"name": name, "age": age, "active": active})
}

/// Create the three people most tests filter on
pub async fn seed_people(manager: &dyn Manager) -> Vec<Item> {
    let mut created = Vec::new();
    for (name, age, active) in [("Ann", 20, true), ("Bob", 30, false), ("Cid", 40, true)] {
        created.push(
            manager
                .create(person(name, age, active), true)
                .await
                .expect("Failed to seed person"),
        );
    }
    created
}

/// Resolve a `where` object through the manager's registry
pub fn conditions(manager: &dyn Manager, where_: Value) -> Vec<Condition> {
    manager
        .filters()
        .conditions(&where_)
        .expect("where clause should resolve")
}

/// Names of the items, in order
pub fn names(items: &[Item]) -> Vec<String> {
    items
        .iter()
        .map(|item| item["name"].as_str().unwrap_or_default().to_string())
        .collect()
}

/// Hooks recording every signal they see, in order
pub fn signal_log() -> (Hooks, Arc<Mutex<Vec<Signal>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let hooks = Hooks::new().on_any(move |event| {
        sink.lock().unwrap().push(event.signal);
    });
    (hooks, log)
}

/// After-signals among the recorded ones
pub fn after_signals(log: &Mutex<Vec<Signal>>) -> Vec<Signal> {
    log.lock()
        .unwrap()
        .iter()
        .copied()
        .filter(|signal| signal.is_after())
        .collect()
}
