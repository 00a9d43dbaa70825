//! In-memory manager for testing and development
//!
//! Items live in an insertion-ordered map behind a `RwLock`, so a manager can
//! be shared across tasks through an `Arc`. Writes made with `commit = false`
//! are appended to a pending log and only reach the map on `commit()`.

use crate::config::{RelationConfig, ResourceMeta};
use crate::core::error::{ManagerError, ManagerResult, display_id};
use crate::core::events::{Hooks, LifecycleEvent, Signal};
use crate::core::field::Field;
use crate::core::filter::Condition;
use crate::core::manager::{Item, Manager, Relation, SortKey, sort_items};
use crate::core::query::Pagination;
use crate::core::registry::{DEFAULT_FILTERS, FilterRegistry, FiltersExpression};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct MemoryState {
    id_sequence: i64,
    /// Live items keyed by their rendered id
    items: IndexMap<String, Item>,
    /// Staged writes, applied in order on commit
    session: Vec<(String, Item)>,
}

/// In-memory manager
///
/// Ids are sequential integers starting at 1. Lookups accept the id either
/// as a JSON number or as its string form.
#[derive(Debug)]
pub struct MemoryManager {
    resource: String,
    id_attribute: String,
    fields: Vec<Field>,
    filters: FilterRegistry,
    hooks: Hooks,
    relations: BTreeMap<String, RelationConfig>,
    state: RwLock<MemoryState>,
}

impl MemoryManager {
    /// Create a manager without filterable fields
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            id_attribute: "id".to_string(),
            fields: Vec::new(),
            filters: FilterRegistry::default(),
            hooks: Hooks::default(),
            relations: BTreeMap::new(),
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Create a manager from resource configuration
    ///
    /// Fields excluded by the configuration are dropped, the others get
    /// their io mode from the read-only/write-only lists.
    pub fn from_meta(meta: &ResourceMeta, fields: Vec<Field>) -> Self {
        let fields = fields
            .into_iter()
            .filter(|field| meta.includes(&field.name))
            .map(|field| {
                let io = meta.field_io(&field.name);
                field.io(io)
            })
            .collect();

        let mut manager = Self::new(&meta.name).with_fields(fields, &meta.filters);
        if let Some(id_attribute) = &meta.id_attribute {
            manager.id_attribute = id_attribute.clone();
        }
        manager.relations = meta.relations.clone();
        manager
    }

    pub fn with_id_attribute(mut self, id_attribute: impl Into<String>) -> Self {
        self.id_attribute = id_attribute.into();
        self
    }

    /// Declare the resource fields and build the filter registry
    pub fn with_fields(mut self, fields: Vec<Field>, filters: &FiltersExpression) -> Self {
        self.filters = FilterRegistry::build(&fields, filters, &DEFAULT_FILTERS);
        self.fields = fields;
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Number of committed items
    pub fn len(&self) -> ManagerResult<usize> {
        Ok(self.read_state()?.items.len())
    }

    pub fn is_empty(&self) -> ManagerResult<bool> {
        Ok(self.len()? == 0)
    }

    fn read_state(&self) -> ManagerResult<std::sync::RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|e| ManagerError::Backend(format!("Failed to acquire read lock: {}", e)))
    }

    fn write_state(&self) -> ManagerResult<std::sync::RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|e| ManagerError::Backend(format!("Failed to acquire write lock: {}", e)))
    }

    fn item_key(&self, item: &Item) -> ManagerResult<String> {
        item.get(&self.id_attribute)
            .filter(|id| !id.is_null())
            .map(display_id)
            .ok_or_else(|| ManagerError::validation(&self.id_attribute, "item has no id"))
    }

    fn store(&self, key: String, item: Item, commit: bool) -> ManagerResult<()> {
        let mut state = self.write_state()?;
        if commit {
            state.items.insert(key, item);
        } else {
            state.session.push((key, item));
        }
        Ok(())
    }

    /// Set one attribute of a committed item without firing signals
    ///
    /// Used by relations, which keep their collection on the parent item.
    /// Other attributes of the stored item are left alone.
    fn write_attribute(&self, item: &Item, attribute: &str, value: Value) -> ManagerResult<()> {
        let key = self.item_key(item)?;
        let mut state = self.write_state()?;
        if let Some(stored) = state.items.get_mut(&key) {
            stored.insert(attribute.to_string(), value);
        }
        Ok(())
    }

    fn emit(&self, signal: Signal, item: &Item) {
        self.hooks
            .emit(LifecycleEvent::new(signal, &self.resource, item));
    }
}

#[async_trait]
impl Manager for MemoryManager {
    fn resource(&self) -> &str {
        &self.resource
    }

    fn id_attribute(&self) -> &str {
        &self.id_attribute
    }

    fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    async fn create(&self, properties: Item, commit: bool) -> ManagerResult<Item> {
        let id = {
            let mut state = self.write_state()?;
            state.id_sequence += 1;
            state.id_sequence
        };

        let mut item = Item::new();
        item.insert(self.id_attribute.clone(), Value::from(id));
        item.extend(properties);
        let key = self.item_key(&item)?;

        self.emit(Signal::BeforeCreate, &item);
        self.store(key.clone(), item.clone(), commit)?;
        tracing::debug!(resource = %self.resource, id = %key, commit, "created item");
        self.emit(Signal::AfterCreate, &item);

        Ok(item)
    }

    async fn read(&self, id: &Value) -> ManagerResult<Item> {
        let state = self.read_state()?;
        state
            .items
            .get(&display_id(id))
            .cloned()
            .ok_or_else(|| ManagerError::not_found(&self.resource, id))
    }

    async fn update(&self, item: &Item, changes: Item, commit: bool) -> ManagerResult<Item> {
        let key = self.item_key(item)?;
        {
            let state = self.read_state()?;
            let staged = state.session.iter().any(|(k, _)| *k == key);
            if !state.items.contains_key(&key) && !staged {
                return Err(ManagerError::ItemNotFound {
                    resource: self.resource.clone(),
                    id: key,
                });
            }
        }

        let actual: Item = changes
            .into_iter()
            .filter(|(k, v)| item.get(k) != Some(v))
            .collect();

        let mut updated = item.clone();
        updated.extend(actual.clone());

        self.hooks.emit(
            LifecycleEvent::new(Signal::BeforeUpdate, &self.resource, item).with_changes(&actual),
        );
        self.store(key.clone(), updated.clone(), commit)?;
        tracing::debug!(
            resource = %self.resource,
            id = %key,
            changed = actual.len(),
            commit,
            "updated item"
        );
        self.hooks.emit(
            LifecycleEvent::new(Signal::AfterUpdate, &self.resource, &updated)
                .with_changes(&actual),
        );

        Ok(updated)
    }

    async fn delete(&self, item: &Item) -> ManagerResult<()> {
        let key = self.item_key(item)?;
        if !self.read_state()?.items.contains_key(&key) {
            return Err(ManagerError::ItemNotFound {
                resource: self.resource.clone(),
                id: key,
            });
        }

        self.emit(Signal::BeforeDelete, item);
        {
            let mut state = self.write_state()?;
            state.items.shift_remove(&key);
            // a staged write must not bring the item back on commit
            state.session.retain(|(k, _)| *k != key);
        }
        tracing::debug!(resource = %self.resource, id = %key, "deleted item");
        self.emit(Signal::AfterDelete, item);

        Ok(())
    }

    async fn instances(&self, where_: &[Condition], sort: &[SortKey]) -> ManagerResult<Vec<Item>> {
        if where_.iter().any(Condition::matches_nothing) {
            return Ok(Vec::new());
        }

        let mut items: Vec<Item> = {
            let state = self.read_state()?;
            state
                .items
                .values()
                .filter(|item| where_.iter().all(|condition| condition.matches(item)))
                .cloned()
                .collect()
        };

        sort_items(&mut items, sort);
        Ok(items)
    }

    async fn paginated_instances(
        &self,
        page: usize,
        per_page: usize,
        where_: &[Condition],
        sort: &[SortKey],
    ) -> ManagerResult<Pagination<Item>> {
        let items = self.instances(where_, sort).await?;
        Ok(Pagination::from_list(items, page, per_page))
    }

    async fn commit(&self) -> ManagerResult<()> {
        let mut state = self.write_state()?;
        let session = std::mem::take(&mut state.session);
        let count = session.len();
        for (key, item) in session {
            state.items.insert(key, item);
        }
        tracing::debug!(resource = %self.resource, writes = count, "committed session");
        Ok(())
    }

    async fn begin(&self) -> ManagerResult<()> {
        self.write_state()?.session.clear();
        Ok(())
    }
}

/// To-many relation whose collection is a list of child ids on the parent
///
/// The list behaves as a set. Ids whose child can no longer be read are
/// pruned from the parent when the relation is listed.
pub struct MemoryRelation {
    parent: Arc<MemoryManager>,
    attribute: String,
    target: Arc<dyn Manager>,
}

impl MemoryRelation {
    pub fn new(
        parent: Arc<MemoryManager>,
        attribute: impl Into<String>,
        target: Arc<dyn Manager>,
    ) -> Self {
        Self {
            parent,
            attribute: attribute.into(),
            target,
        }
    }

    /// Build the relation declared as `attribute` in the parent's configuration
    pub fn declared(
        parent: Arc<MemoryManager>,
        attribute: impl Into<String>,
        target: Arc<dyn Manager>,
    ) -> ManagerResult<Self> {
        let attribute = attribute.into();
        let declared = match parent.relations.get(&attribute) {
            Some(RelationConfig::Collection { target }) => target.clone(),
            _ => {
                return Err(ManagerError::Config(format!(
                    "'{}' is not a collection relation of '{}'",
                    attribute, parent.resource
                )));
            }
        };
        if declared != target.resource() {
            return Err(ManagerError::Config(format!(
                "relation '{}' of '{}' targets '{}', not '{}'",
                attribute,
                parent.resource,
                declared,
                target.resource()
            )));
        }
        Ok(Self::new(parent, attribute, target))
    }

    fn collection(&self, item: &Item) -> Vec<Value> {
        match item.get(&self.attribute) {
            Some(Value::Array(ids)) => ids.clone(),
            _ => Vec::new(),
        }
    }

    fn child_id(&self, child: &Item) -> ManagerResult<Value> {
        child
            .get(self.target.id_attribute())
            .filter(|id| !id.is_null())
            .cloned()
            .ok_or_else(|| ManagerError::validation(&self.attribute, "child item has no id"))
    }

    fn emit(&self, signal: Signal, item: &Item, child: &Item) {
        self.parent.hooks.emit(
            LifecycleEvent::new(signal, &self.parent.resource, item)
                .with_relation(&self.attribute, child),
        );
    }

    fn save(&self, item: &mut Item, ids: Vec<Value>) -> ManagerResult<()> {
        let ids = Value::Array(ids);
        self.parent.write_attribute(item, &self.attribute, ids.clone())?;
        item.insert(self.attribute.clone(), ids);
        Ok(())
    }
}

#[async_trait]
impl Relation for MemoryRelation {
    fn attribute(&self) -> &str {
        &self.attribute
    }

    async fn instances(
        &self,
        item: &mut Item,
        page: usize,
        per_page: usize,
    ) -> ManagerResult<Pagination<Item>> {
        let ids = self.collection(item);
        let count = ids.len();
        let mut kept = Vec::with_capacity(ids.len());
        let mut children = Vec::with_capacity(ids.len());

        for id in ids {
            match self.target.read(&id).await {
                Ok(child) => {
                    children.push(child);
                    kept.push(id);
                }
                Err(ManagerError::ItemNotFound { .. }) => {
                    tracing::warn!(
                        resource = %self.parent.resource,
                        attribute = %self.attribute,
                        id = %display_id(&id),
                        "pruning dangling relation id"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        if kept.len() != count {
            self.save(item, kept)?;
        }

        Ok(Pagination::from_list(children, page, per_page))
    }

    async fn add(&self, item: &mut Item, child: &Item) -> ManagerResult<()> {
        let child_id = self.child_id(child)?;

        self.emit(Signal::BeforeAddToRelation, item, child);
        let mut ids = self.collection(item);
        if !ids.contains(&child_id) {
            ids.push(child_id);
        }
        self.save(item, ids)?;
        self.emit(Signal::AfterAddToRelation, item, child);

        Ok(())
    }

    async fn remove(&self, item: &mut Item, child: &Item) -> ManagerResult<()> {
        let child_id = self.child_id(child)?;

        self.emit(Signal::BeforeRemoveFromRelation, item, child);
        let mut ids = self.collection(item);
        ids.retain(|id| *id != child_id);
        self.save(item, ids)?;
        self.emit(Signal::AfterRemoveFromRelation, item, child);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::FieldType;
    use serde_json::json;
    use std::sync::Mutex;

    fn props(value: Value) -> Item {
        value.as_object().cloned().unwrap()
    }

    fn user_manager() -> MemoryManager {
        MemoryManager::new("user").with_fields(
            vec![
                Field::new("first", FieldType::String),
                Field::new("last", FieldType::String),
                Field::new("age", FieldType::Integer).nullable(true),
            ],
            &FiltersExpression::All(true),
        )
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() {
        let manager = user_manager();
        let a = manager.create(props(json!({"first": "A"})), true).await.unwrap();
        let b = manager.create(props(json!({"first": "B"})), true).await.unwrap();
        assert_eq!(a["id"], json!(1));
        assert_eq!(b["id"], json!(2));
        assert_eq!(manager.len().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_read_accepts_numeric_string() {
        let manager = user_manager();
        manager.create(props(json!({"first": "A"})), true).await.unwrap();
        assert_eq!(manager.read(&json!("1")).await.unwrap()["first"], "A");
        assert!(matches!(
            manager.read(&json!(9)).await,
            Err(ManagerError::ItemNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_does_not_mutate_input() {
        let manager = user_manager();
        let item = manager.create(props(json!({"first": "A", "age": 1})), true).await.unwrap();
        let updated = manager
            .update(&item, props(json!({"age": 2})), true)
            .await
            .unwrap();
        assert_eq!(item["age"], json!(1));
        assert_eq!(updated["age"], json!(2));
        assert_eq!(manager.read(&json!(1)).await.unwrap()["age"], json!(2));
    }

    #[tokio::test]
    async fn test_update_reports_only_actual_changes() {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);
        let manager = user_manager().with_hooks(Hooks::new().on(Signal::AfterUpdate, move |event| {
            sink.lock().unwrap().push(event.changes.clone().unwrap());
        }));

        let item = manager.create(props(json!({"first": "A", "age": 1})), true).await.unwrap();
        manager
            .update(&item, props(json!({"first": "A", "age": 5})), true)
            .await
            .unwrap();

        let changes = changes.lock().unwrap();
        assert_eq!(changes[0], props(json!({"age": 5})));
    }

    #[tokio::test]
    async fn test_delete_absent_is_not_found() {
        let manager = user_manager();
        let item = manager.create(Item::new(), true).await.unwrap();
        manager.delete(&item).await.unwrap();
        assert!(matches!(
            manager.delete(&item).await,
            Err(ManagerError::ItemNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_staged_writes_apply_on_commit_last_write_wins() {
        let manager = user_manager();
        let item = manager.create(props(json!({"first": "A"})), false).await.unwrap();
        assert!(manager.read(&item["id"]).await.is_err());

        manager.update(&item, props(json!({"first": "B"})), false).await.unwrap();
        manager.update(&item, props(json!({"first": "C"})), false).await.unwrap();
        manager.commit().await.unwrap();

        assert_eq!(manager.read(&item["id"]).await.unwrap()["first"], "C");
    }

    #[tokio::test]
    async fn test_begin_discards_staged_writes() {
        let manager = user_manager();
        manager.create(props(json!({"first": "A"})), false).await.unwrap();
        manager.begin().await.unwrap();
        manager.commit().await.unwrap();
        assert!(manager.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_instances_filters_and_sorts() {
        let manager = user_manager();
        let people = [("Jane", "Doe", 32), ("Joe", "Bloggs", 25), ("John", "Doe", 41)];
        for (first, last, age) in people {
            manager
                .create(props(json!({"first": first, "last": last, "age": age})), true)
                .await
                .unwrap();
        }

        let where_ = manager
            .filters()
            .conditions(&json!({"last": "Doe"}))
            .unwrap();
        let items = manager
            .instances(&where_, &[SortKey::desc("age")])
            .await
            .unwrap();
        let names: Vec<_> = items.iter().map(|i| i["first"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["John", "Jane"]);

        let empty_in = manager.filters().conditions(&json!({"last": {"$in": []}})).unwrap();
        assert!(manager.instances(&empty_in, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_from_meta_applies_io_and_filters() {
        let mut meta = ResourceMeta::new("user").id_attribute("pk");
        meta.read_only_fields = vec!["first".into()];
        meta.exclude_fields = vec!["age".into()];
        let manager = MemoryManager::from_meta(
            &meta,
            vec![
                Field::new("first", FieldType::String),
                Field::new("age", FieldType::Integer),
            ],
        );

        assert_eq!(manager.id_attribute(), "pk");
        assert_eq!(manager.fields().len(), 1);
        assert_eq!(manager.fields()[0].io, crate::core::field::FieldIo::Read);
        assert!(manager.filters().get("age").is_none());

        let item = manager.create(Item::new(), true).await.unwrap();
        assert_eq!(item["pk"], json!(1));
    }

    #[tokio::test]
    async fn test_relation_add_remove_and_prune() {
        let users = Arc::new(user_manager());
        let relation = MemoryRelation::new(
            Arc::clone(&users),
            "children",
            Arc::clone(&users) as Arc<dyn Manager>,
        );

        let mut parent = users.create(props(json!({"first": "P"})), true).await.unwrap();
        let a = users.create(props(json!({"first": "A"})), true).await.unwrap();
        let b = users.create(props(json!({"first": "B"})), true).await.unwrap();

        relation.add(&mut parent, &a).await.unwrap();
        relation.add(&mut parent, &a).await.unwrap();
        relation.add(&mut parent, &b).await.unwrap();
        assert_eq!(parent["children"], json!([2, 3]));

        users.delete(&a).await.unwrap();
        let page = relation.instances(&mut parent, 1, 20).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0]["first"], "B");
        assert_eq!(parent["children"], json!([3]));
        assert_eq!(users.read(&json!(1)).await.unwrap()["children"], json!([3]));

        relation.remove(&mut parent, &a).await.unwrap();
        relation.remove(&mut parent, &b).await.unwrap();
        assert_eq!(parent["children"], json!([]));
    }

    #[tokio::test]
    async fn test_relation_signals_carry_child() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let users = Arc::new(user_manager().with_hooks(Hooks::new().on_any(move |event| {
            if event.attribute.is_some() {
                let child_id = event.child.as_ref().unwrap()["id"].clone();
                sink.lock().unwrap().push((event.signal, child_id));
            }
        })));
        let target: Arc<dyn Manager> = users.clone();
        let relation = MemoryRelation::new(Arc::clone(&users), "children", target);

        let mut parent = users.create(Item::new(), true).await.unwrap();
        let child = users.create(Item::new(), true).await.unwrap();
        relation.add(&mut parent, &child).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (Signal::BeforeAddToRelation, json!(2)),
                (Signal::AfterAddToRelation, json!(2)),
            ]
        );
    }
}
