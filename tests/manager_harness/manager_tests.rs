//! Macro-generated test suite for `Manager` contract validation.
//!
//! The `manager_tests!` macro generates a test module that validates any
//! `Manager` implementation over the `person` resource: CRUD, filtering,
//! sorting, pagination and staged writes.
//!
//! # Generated Tests
//!
//! ## CRUD
//! - `test_create_and_read` - create then read back by id
//! - `test_read_deleted_is_not_found` - read after delete fails with `ItemNotFound`
//! - `test_update_persists_changes` - changed fields are visible on read
//! - `test_delete_twice_is_not_found` - second delete fails with `ItemNotFound`
//!
//! ## Queries
//! - `test_instances_filter_by_range` - `$gte` / `$lt` restrict the result
//! - `test_instances_filter_by_equality` - bare values compare for equality
//! - `test_conditions_are_conjunctive` - several conditions keep the intersection
//! - `test_empty_in_matches_nothing` - `$in: []` short-circuits
//! - `test_sorted_pagination` - page windows follow the sort order
//! - `test_page_past_the_end_is_empty` - total survives an empty page
//! - `test_first` - first match, or `ItemNotFound`
//!
//! ## Sessions
//! - `test_staged_create_applies_on_commit`
//! - `test_begin_discards_staged_create`
//!
//! ## Signals
//! - `test_failed_writes_emit_no_after_signals` - update/delete of a missing item

/// Generate a full `Manager` conformance test suite.
///
/// `$factory` must evaluate to a fresh, empty manager of the `person`
/// resource. It is re-evaluated for each test.
macro_rules! manager_tests {
    ($factory:expr) => {
        mod manager_contract_tests {
            use super::*;
            use potion::prelude::*;

            // ==================================================================
            // CRUD
            // ==================================================================

            #[tokio::test]
            async fn test_create_and_read() {
                let manager = $factory;
                let created = manager.create(person("Ann", 31, true), true).await.unwrap();

                let id = created[manager.id_attribute()].clone();
                assert!(!id.is_null(), "create should assign an id");
                assert_eq!(created["name"], json!("Ann"));

                let read = manager.read(&id).await.unwrap();
                assert_eq!(read["name"], json!("Ann"));
                assert_eq!(read["age"], json!(31));
                assert_eq!(read["active"], json!(true));
            }

            #[tokio::test]
            async fn test_read_deleted_is_not_found() {
                let manager = $factory;
                let created = manager.create(person("Ann", 31, true), true).await.unwrap();
                let id = created[manager.id_attribute()].clone();

                manager.delete(&created).await.unwrap();

                let result = manager.read(&id).await;
                assert!(
                    matches!(result, Err(ManagerError::ItemNotFound { .. })),
                    "expected ItemNotFound, got {:?}",
                    result
                );
            }

            #[tokio::test]
            async fn test_update_persists_changes() {
                let manager = $factory;
                let created = manager.create(person("Ann", 31, true), true).await.unwrap();
                let id = created[manager.id_attribute()].clone();

                let updated = manager
                    .update(&created, item!({"age": 32, "name": "Ann"}), true)
                    .await
                    .unwrap();
                assert_eq!(updated["age"], json!(32));

                let read = manager.read(&id).await.unwrap();
                assert_eq!(read["age"], json!(32));
                assert_eq!(read["name"], json!("Ann"));
            }

            #[tokio::test]
            async fn test_delete_twice_is_not_found() {
                let manager = $factory;
                let created = manager.create(person("Ann", 31, true), true).await.unwrap();

                manager.delete(&created).await.unwrap();
                let result = manager.delete(&created).await;
                assert!(matches!(result, Err(ManagerError::ItemNotFound { .. })));
            }

            // ==================================================================
            // Queries
            // ==================================================================

            #[tokio::test]
            async fn test_instances_filter_by_range() {
                let manager = $factory;
                seed_people(&manager).await;

                let where_ = conditions(&manager, json!({"age": {"$gte": 30}}));
                let found = manager.instances(&where_, &[SortKey::asc("age")]).await.unwrap();
                assert_eq!(names(&found), vec!["Bob", "Cid"]);

                let where_ = conditions(&manager, json!({"age": {"$lt": 30}}));
                let found = manager.instances(&where_, &[]).await.unwrap();
                assert_eq!(names(&found), vec!["Ann"]);
            }

            #[tokio::test]
            async fn test_instances_filter_by_equality() {
                let manager = $factory;
                seed_people(&manager).await;

                let where_ = conditions(&manager, json!({"active": true}));
                let found = manager.instances(&where_, &[SortKey::asc("name")]).await.unwrap();
                assert_eq!(names(&found), vec!["Ann", "Cid"]);

                let where_ = conditions(&manager, json!({"name": "Bob"}));
                let found = manager.instances(&where_, &[]).await.unwrap();
                assert_eq!(found.len(), 1);
                assert_eq!(found[0]["age"], json!(30));
            }

            #[tokio::test]
            async fn test_conditions_are_conjunctive() {
                let manager = $factory;
                seed_people(&manager).await;
                manager.create(person("Dee", 50, false), true).await.unwrap();

                let where_ = conditions(&manager, json!({"active": true, "age": {"$gte": 30}}));
                let found = manager.instances(&where_, &[SortKey::asc("name")]).await.unwrap();
                assert_eq!(names(&found), vec!["Cid"]);

                let where_ = conditions(&manager, json!({"active": false, "age": {"$lt": 50}}));
                let found = manager.instances(&where_, &[]).await.unwrap();
                assert_eq!(names(&found), vec!["Bob"]);

                let where_ = conditions(&manager, json!({"active": false, "age": {"$lt": 30}}));
                assert!(manager.instances(&where_, &[]).await.unwrap().is_empty());
            }

            #[tokio::test]
            async fn test_empty_in_matches_nothing() {
                let manager = $factory;
                seed_people(&manager).await;

                let where_ = conditions(&manager, json!({"age": {"$in": []}}));
                assert!(manager.instances(&where_, &[]).await.unwrap().is_empty());

                let page = manager.paginated_instances(1, 10, &where_, &[]).await.unwrap();
                assert_eq!(page.total, 0);
                assert!(page.items.is_empty());
            }

            #[tokio::test]
            async fn test_sorted_pagination() {
                let manager = $factory;
                seed_people(&manager).await;

                let sort = [SortKey::desc("age")];
                let page = manager.paginated_instances(1, 2, &[], &sort).await.unwrap();
                assert_eq!(page.total, 3);
                assert_eq!(page.pages(), 2);
                assert!(page.has_next());
                assert_eq!(names(&page.items), vec!["Cid", "Bob"]);

                let page = manager.paginated_instances(2, 2, &[], &sort).await.unwrap();
                assert_eq!(page.total, 3);
                assert!(!page.has_next());
                assert_eq!(names(&page.items), vec!["Ann"]);
            }

            #[tokio::test]
            async fn test_page_past_the_end_is_empty() {
                let manager = $factory;
                seed_people(&manager).await;

                let page = manager.paginated_instances(5, 2, &[], &[]).await.unwrap();
                assert!(page.items.is_empty());
                assert_eq!(page.total, 3);
                assert_eq!(page.page, 5);
            }

            #[tokio::test]
            async fn test_first() {
                let manager = $factory;
                seed_people(&manager).await;

                let where_ = conditions(&manager, json!({"age": {"$gt": 20}}));
                let first = manager.first(&where_, &[SortKey::asc("age")]).await.unwrap();
                assert_eq!(first["name"], json!("Bob"));

                let where_ = conditions(&manager, json!({"age": {"$gt": 99}}));
                let result = manager.first(&where_, &[]).await;
                assert!(matches!(result, Err(ManagerError::ItemNotFound { .. })));
            }

            // ==================================================================
            // Sessions
            // ==================================================================

            #[tokio::test]
            async fn test_staged_create_applies_on_commit() {
                let manager = $factory;
                manager.begin().await.unwrap();
                manager.create(person("Ann", 31, true), false).await.unwrap();

                assert!(manager.instances(&[], &[]).await.unwrap().is_empty());

                manager.commit().await.unwrap();
                let all = manager.instances(&[], &[]).await.unwrap();
                assert_eq!(names(&all), vec!["Ann"]);
            }

            #[tokio::test]
            async fn test_failed_writes_emit_no_after_signals() {
                let (hooks, log) = signal_log();
                let manager = $factory.with_hooks(hooks);
                let created = manager.create(person("Ann", 31, true), true).await.unwrap();
                manager.delete(&created).await.unwrap();
                log.lock().unwrap().clear();

                let result = manager.update(&created, item!({"age": 32}), true).await;
                assert!(
                    matches!(result, Err(ManagerError::ItemNotFound { .. })),
                    "got {:?}",
                    result
                );
                // an update with nothing to change still needs the item
                let result = manager.update(&created, item!({"age": 31}), true).await;
                assert!(
                    matches!(result, Err(ManagerError::ItemNotFound { .. })),
                    "got {:?}",
                    result
                );
                let result = manager.delete(&created).await;
                assert!(
                    matches!(result, Err(ManagerError::ItemNotFound { .. })),
                    "got {:?}",
                    result
                );

                assert!(after_signals(&log).is_empty(), "got {:?}", log.lock().unwrap());
            }

            #[tokio::test]
            async fn test_begin_discards_staged_create() {
                let manager = $factory;
                manager.begin().await.unwrap();
                manager.create(person("Ann", 31, true), false).await.unwrap();

                manager.begin().await.unwrap();
                manager.commit().await.unwrap();
                assert!(manager.instances(&[], &[]).await.unwrap().is_empty());
            }
        }
    };
}
