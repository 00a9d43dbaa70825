//! ScyllaDB manager using the scylla-rust CQL driver.
//!
//! Provides `ScyllaManager` and `ScyllaRelation` over an existing table of a
//! ScyllaDB/Cassandra keyspace. The table layout is read from
//! `system_schema.columns` at registration.
//!
//! # Feature flag
//!
//! This module is gated behind the `scylladb` feature flag:
//! ```toml
//! [dependencies]
//! potion-rs = { version = "0.1", features = ["scylladb"] }
//! ```
//!
//! # Query model
//!
//! Restrictions are pushed down with `ALLOW FILTERING`. CQL cannot order by
//! regular columns, so matching rows are sorted and paginated client-side.
//! Every write is a lightweight transaction (`IF NOT EXISTS` / `IF EXISTS`),
//! which is how duplicates and missing rows are detected.

use crate::config::{RelationConfig, ResourceMeta};
use crate::core::error::{ManagerError, ManagerResult};
use crate::core::events::{Hooks, LifecycleEvent, Signal};
use crate::core::field::{Field, FieldIo, FieldType, FieldValue};
use crate::core::filter::Condition;
use crate::core::manager::{Item, Manager, Relation, SortKey, sort_items};
use crate::core::query::Pagination;
use crate::core::registry::FilterRegistry;
use crate::storage::cql::{self, CQL_FILTERS, CqlExpr};
use async_trait::async_trait;
use scylla::client::session::Session;
use scylla::errors::{DbError, ExecutionError, RequestAttemptError};
use scylla::response::query_result::QueryResult;
use scylla::value::{CqlValue, Row};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ScyllaManager
// ---------------------------------------------------------------------------

const COLUMNS_QUERY: &str = "SELECT column_name, kind, type FROM system_schema.columns \
     WHERE keyspace_name = ? AND table_name = ?";

/// Manager for one table of a ScyllaDB keyspace
///
/// # Example
///
/// ```rust,ignore
/// use potion::storage::ScyllaManager;
///
/// let session = Arc::new(SessionBuilder::new().known_node("127.0.0.1:9042").build().await?);
/// let users = ScyllaManager::register(session, "app", ResourceMeta::new("user")).await?;
/// let adults = users.filters().conditions(&json!({"age": {"$gte": 18}}))?;
/// let adults = users.instances(&adults, &[]).await?;
/// ```
pub struct ScyllaManager {
    session: Arc<Session>,
    keyspace: String,
    meta: ResourceMeta,
    id_column: String,
    fields: Vec<Field>,
    filters: FilterRegistry,
    hooks: Hooks,
    /// Statements staged by `commit = false` writes
    pending: Mutex<Vec<CqlExpr>>,
}

impl ScyllaManager {
    /// Introspect `keyspace.table` and build the manager
    ///
    /// The partition key becomes the id unless the configuration names one.
    pub async fn register(
        session: Arc<Session>,
        keyspace: impl Into<String>,
        meta: ResourceMeta,
    ) -> ManagerResult<Self> {
        let keyspace = keyspace.into();
        let table = meta.table_name().to_string();

        let result = session
            .query_unpaged(COLUMNS_QUERY, (&keyspace, &table))
            .await
            .map_err(|e| ManagerError::Config(format!("Failed to introspect '{}': {}", table, e)))?;
        let rows_result = result
            .into_rows_result()
            .map_err(|e| ManagerError::Config(format!("Failed to parse result: {}", e)))?;
        let columns: Vec<(String, String, String)> = rows_result
            .rows()
            .map_err(|e| ManagerError::Config(format!("Failed to deserialize rows: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ManagerError::Config(format!("Failed to collect rows: {}", e)))?;
        if columns.is_empty() {
            return Err(ManagerError::Config(format!(
                "table '{}.{}' has no columns",
                keyspace, table
            )));
        }

        let id_column = match &meta.id_attribute {
            Some(id) => id.clone(),
            None => columns
                .iter()
                .find(|(_, kind, _)| kind == "partition_key")
                .map(|(name, _, _)| name.clone())
                .ok_or_else(|| {
                    ManagerError::Config(format!("table '{}' has no partition key", table))
                })?,
        };

        let mut fields = Vec::with_capacity(columns.len());
        for (name, _kind, native) in &columns {
            if *name != id_column && !meta.includes(name) {
                continue;
            }
            let (field_type, item_type) = cql::field_type(native)?;
            let io = if *name == id_column {
                FieldIo::Read
            } else {
                meta.field_io(name)
            };
            let mut field = Field::new(name, field_type)
                .io(io)
                .nullable(*name != id_column);
            if let Some(item_type) = item_type {
                field = field.items(item_type);
            }
            fields.push(field);
        }
        // schema rows are ordered by column name; keep the id first
        fields.sort_by_key(|f| f.name != id_column);

        if !fields.iter().any(|f| f.name == id_column) {
            return Err(ManagerError::Config(format!(
                "id column '{}' not found in table '{}'",
                id_column, table
            )));
        }

        let filters = FilterRegistry::build(&fields, &meta.filters, &CQL_FILTERS);

        tracing::info!(
            resource = %meta.name,
            keyspace = %keyspace,
            table = %table,
            columns = fields.len(),
            "registered scylladb manager"
        );

        Ok(Self {
            session,
            keyspace,
            meta,
            id_column,
            fields,
            filters,
            hooks: Hooks::default(),
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    fn table(&self) -> &str {
        self.meta.table_name()
    }

    fn field(&self, name: &str) -> ManagerResult<&Field> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| ManagerError::validation(name, "unknown field"))
    }

    fn id_field(&self) -> ManagerResult<&Field> {
        self.field(&self.id_column)
    }

    fn id_value(&self, id: &Value) -> ManagerResult<FieldValue> {
        let field = self.id_field()?;
        let parsed = match (field.field_type, id) {
            (FieldType::Integer, Value::String(s)) => {
                s.parse::<i64>().ok().map(FieldValue::Integer)
            }
            _ => field.convert(id).ok().filter(|v| !v.is_null()),
        };
        parsed.ok_or_else(|| ManagerError::not_found(&self.meta.name, id))
    }

    fn item_id(&self, item: &Item) -> ManagerResult<FieldValue> {
        let id = item
            .get(&self.id_column)
            .ok_or_else(|| ManagerError::validation(&self.id_column, "item has no id"))?;
        self.id_value(id)
    }

    fn column_values(&self, properties: &Item) -> ManagerResult<Vec<(String, FieldValue)>> {
        properties
            .iter()
            .map(|(name, raw)| {
                let field = self.field(name)?;
                let value = match (field.field_type, raw) {
                    (FieldType::Array, Value::Array(items)) => FieldValue::Array(
                        items
                            .iter()
                            .map(|item| field.convert_item(item))
                            .collect::<ManagerResult<_>>()?,
                    ),
                    _ => field.convert(raw)?,
                };
                Ok((field.attribute.clone(), value))
            })
            .collect()
    }

    fn translate(&self, error: ExecutionError, expr: &CqlExpr) -> ManagerError {
        match &error {
            ExecutionError::LastAttemptError(RequestAttemptError::DbError(
                DbError::Invalid | DbError::AlreadyExists { .. },
                message,
            )) => {
                tracing::debug!(resource = %self.meta.name, error = %message, "statement rejected");
                ManagerError::BackendConflict {
                    resource: self.meta.name.clone(),
                    debug_info: self.meta.debug.then(|| expr.debug_info()),
                }
            }
            _ => ManagerError::Backend(error.to_string()),
        }
    }

    async fn run(&self, expr: &CqlExpr) -> ManagerResult<QueryResult> {
        self.session
            .query_unpaged(expr.cql.clone(), expr.values.clone())
            .await
            .map_err(|e| self.translate(e, expr))
    }

    async fn fetch_items(&self, expr: &CqlExpr) -> ManagerResult<Vec<Item>> {
        let rows_result = self
            .run(expr)
            .await?
            .into_rows_result()
            .map_err(|e| ManagerError::Backend(format!("Failed to parse result: {}", e)))?;
        let rows: Vec<(String,)> = rows_result
            .rows()
            .map_err(|e| ManagerError::Backend(format!("Failed to deserialize rows: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ManagerError::Backend(format!("Failed to collect rows: {}", e)))?;

        rows.into_iter()
            .map(|(data,)| match serde_json::from_str(&data) {
                Ok(Value::Object(item)) => Ok(item),
                Ok(other) => Err(ManagerError::Backend(format!("unexpected row: {}", other))),
                Err(e) => Err(ManagerError::Backend(format!("Failed to decode row: {}", e))),
            })
            .collect()
    }

    /// Run a conditional write and report whether it was applied
    async fn run_lwt(&self, expr: &CqlExpr) -> ManagerResult<bool> {
        tracing::debug!(resource = %self.meta.name, statement = %expr.cql, "executing write");
        let rows_result = self
            .run(expr)
            .await?
            .into_rows_result()
            .map_err(|e| ManagerError::Backend(format!("Failed to parse result: {}", e)))?;
        let row = rows_result
            .maybe_first_row::<Row>()
            .map_err(|e| ManagerError::Backend(format!("Failed to deserialize row: {}", e)))?;
        match row.as_ref().and_then(|r| r.columns.first()) {
            Some(Some(CqlValue::Boolean(applied))) => Ok(*applied),
            _ => Err(ManagerError::Backend("missing [applied] column".to_string())),
        }
    }

    async fn duplicate(&self, id: &FieldValue) -> ManagerError {
        let existing = match cql::select_by_id(&self.keyspace, self.table(), &self.id_column, id) {
            Ok(expr) => self.fetch_items(&expr).await.ok().and_then(|rows| rows.into_iter().next()),
            Err(_) => None,
        };
        let detail = match existing {
            Some(row) => format!(
                "Key ({})=({}) already exists: {}",
                self.id_column,
                id.to_json(),
                Value::Object(row)
            ),
            None => format!("Key ({})=({}) already exists", self.id_column, id.to_json()),
        };
        ManagerError::DuplicateKey {
            resource: self.meta.name.clone(),
            detail,
        }
    }

    fn emit(&self, event: LifecycleEvent) {
        self.hooks.emit(event);
    }
}

#[async_trait]
impl Manager for ScyllaManager {
    fn resource(&self) -> &str {
        &self.meta.name
    }

    fn id_attribute(&self) -> &str {
        &self.id_column
    }

    fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    async fn create(&self, mut properties: Item, commit: bool) -> ManagerResult<Item> {
        if !properties.contains_key(&self.id_column) {
            match self.id_field()?.field_type {
                FieldType::Uuid => {
                    let id = Value::String(Uuid::new_v4().to_string());
                    properties.insert(self.id_column.clone(), id);
                }
                _ => return Err(ManagerError::validation(&self.id_column, "id is required")),
            }
        }
        let id = self.item_id(&properties)?;
        let values = self.column_values(&properties)?;
        let expr = cql::insert(&self.keyspace, self.table(), &values)?;

        self.emit(LifecycleEvent::new(Signal::BeforeCreate, &self.meta.name, &properties));
        let item = if commit {
            if !self.run_lwt(&expr).await? {
                return Err(self.duplicate(&id).await);
            }
            self.read(&id.to_json()).await?
        } else {
            self.pending.lock().await.push(expr);
            properties
        };
        self.emit(LifecycleEvent::new(Signal::AfterCreate, &self.meta.name, &item));

        Ok(item)
    }

    async fn read(&self, id: &Value) -> ManagerResult<Item> {
        let id_value = self.id_value(id)?;
        let expr = cql::select_by_id(&self.keyspace, self.table(), &self.id_column, &id_value)?;
        self.fetch_items(&expr)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ManagerError::not_found(&self.meta.name, id))
    }

    async fn update(&self, item: &Item, changes: Item, commit: bool) -> ManagerResult<Item> {
        let id = self.item_id(item)?;
        let actual: Item = changes
            .into_iter()
            .filter(|(k, v)| item.get(k) != Some(v))
            .collect();
        if actual.contains_key(&self.id_column) {
            return Err(ManagerError::validation(&self.id_column, "primary key cannot change"));
        }
        if actual.is_empty() {
            // nothing to write, but the row still has to exist
            self.read(&id.to_json()).await?;
        }

        self.emit(
            LifecycleEvent::new(Signal::BeforeUpdate, &self.meta.name, item).with_changes(&actual),
        );
        let mut updated = item.clone();
        if !actual.is_empty() {
            let values = self.column_values(&actual)?;
            let expr = cql::update(&self.keyspace, self.table(), &self.id_column, &id, &values)?;
            if commit {
                if !self.run_lwt(&expr).await? {
                    return Err(ManagerError::not_found(&self.meta.name, &id.to_json()));
                }
            } else {
                self.pending.lock().await.push(expr);
            }
            updated.extend(actual.clone());
        }
        self.emit(
            LifecycleEvent::new(Signal::AfterUpdate, &self.meta.name, &updated)
                .with_changes(&actual),
        );

        Ok(updated)
    }

    async fn delete(&self, item: &Item) -> ManagerResult<()> {
        let id = self.item_id(item)?;
        let expr = cql::delete(&self.keyspace, self.table(), &self.id_column, &id)?;

        self.emit(LifecycleEvent::new(Signal::BeforeDelete, &self.meta.name, item));
        if !self.run_lwt(&expr).await? {
            return Err(ManagerError::not_found(&self.meta.name, &id.to_json()));
        }
        self.emit(LifecycleEvent::new(Signal::AfterDelete, &self.meta.name, item));

        Ok(())
    }

    async fn instances(&self, where_: &[Condition], sort: &[SortKey]) -> ManagerResult<Vec<Item>> {
        let Some(expr) = cql::select(&self.keyspace, self.table(), where_, None)? else {
            return Ok(Vec::new());
        };
        let mut items = self.fetch_items(&expr).await?;

        let mut keys = sort.to_vec();
        keys.push(SortKey::asc(&self.id_column));
        sort_items(&mut items, &keys);
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
        tracing::debug!(
            resource = %self.meta.name,
            total = items.len(),
            page,
            per_page,
            "paginating client-side"
        );
        Ok(Pagination::from_list(items, page, per_page))
    }

    async fn commit(&self) -> ManagerResult<()> {
        let pending = std::mem::take(&mut *self.pending.lock().await);
        for expr in &pending {
            if !self.run_lwt(expr).await? {
                return Err(ManagerError::BackendConflict {
                    resource: self.meta.name.clone(),
                    debug_info: self.meta.debug.then(|| expr.debug_info()),
                });
            }
        }
        if !pending.is_empty() {
            tracing::debug!(
                resource = %self.meta.name,
                statements = pending.len(),
                "committed session"
            );
        }
        Ok(())
    }

    async fn begin(&self) -> ManagerResult<()> {
        self.pending.lock().await.clear();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScyllaRelation
// ---------------------------------------------------------------------------

/// To-many relation stored as a parent-id column on the target table
pub struct ScyllaRelation {
    parent: Arc<ScyllaManager>,
    attribute: String,
    target: Arc<ScyllaManager>,
    column: String,
}

impl ScyllaRelation {
    pub fn new(
        parent: Arc<ScyllaManager>,
        attribute: impl Into<String>,
        target: Arc<ScyllaManager>,
    ) -> ManagerResult<Self> {
        let attribute = attribute.into();
        let column = match parent.meta.relations.get(&attribute) {
            Some(RelationConfig::ForeignKey { column, .. }) => column.clone(),
            _ => {
                return Err(ManagerError::Config(format!(
                    "'{}' is not a foreign-key relation of '{}'",
                    attribute, parent.meta.name
                )));
            }
        };
        target.field(&column)?;

        Ok(Self {
            parent,
            attribute,
            target,
            column,
        })
    }

    fn emit(&self, signal: Signal, item: &Item, child: &Item) {
        self.parent.emit(
            LifecycleEvent::new(signal, &self.parent.meta.name, item)
                .with_relation(&self.attribute, child),
        );
    }
}

#[async_trait]
impl Relation for ScyllaRelation {
    fn attribute(&self) -> &str {
        &self.attribute
    }

    async fn instances(
        &self,
        item: &mut Item,
        page: usize,
        per_page: usize,
    ) -> ManagerResult<Pagination<Item>> {
        let parent_id = self.parent.item_id(item)?;
        let target = &self.target;
        let Some(expr) = cql::select(
            &target.keyspace,
            target.table(),
            &[],
            Some((&self.column, &parent_id)),
        )?
        else {
            return Ok(Pagination::from_list(Vec::new(), page, per_page));
        };

        let mut children = target.fetch_items(&expr).await?;
        sort_items(&mut children, &[SortKey::asc(&target.id_column)]);
        Ok(Pagination::from_list(children, page, per_page))
    }

    async fn add(&self, item: &mut Item, child: &Item) -> ManagerResult<()> {
        let parent_id = self.parent.item_id(item)?;
        let child_id = self.target.item_id(child)?;
        let target = &self.target;
        let expr = cql::update(
            &target.keyspace,
            target.table(),
            &target.id_column,
            &child_id,
            &[(self.column.clone(), parent_id)],
        )?;

        self.emit(Signal::BeforeAddToRelation, item, child);
        if !target.run_lwt(&expr).await? {
            return Err(ManagerError::not_found(&target.meta.name, &child_id.to_json()));
        }
        self.emit(Signal::AfterAddToRelation, item, child);
        Ok(())
    }

    async fn remove(&self, item: &mut Item, child: &Item) -> ManagerResult<()> {
        let parent_id = self.parent.item_id(item)?;
        let child_id = self.target.item_id(child)?;
        let target = &self.target;
        let expr = cql::clear_reference(
            &target.keyspace,
            target.table(),
            &target.id_column,
            &child_id,
            &self.column,
            &parent_id,
        )?;

        self.emit(Signal::BeforeRemoveFromRelation, item, child);
        // not applied when the child was not related
        target.run_lwt(&expr).await?;
        self.emit(Signal::AfterRemoveFromRelation, item, child);
        Ok(())
    }
}
