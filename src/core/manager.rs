//! Manager and relation traits shared by every backend

use crate::core::error::ManagerResult;
use crate::core::events::Hooks;
use crate::core::field::FieldValue;
use crate::core::filter::Condition;
use crate::core::query::Pagination;
use crate::core::registry::FilterRegistry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// One record of a resource's collection
pub type Item = Map<String, Value>;

/// Look up an attribute, following `a.b` paths into nested objects
pub fn get_value<'a>(item: &'a Item, attribute: &str) -> Option<&'a Value> {
    if let Some(value) = item.get(attribute) {
        return Some(value);
    }
    let mut parts = attribute.split('.');
    let mut current = item.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// A sort instruction: resource field, backend attribute and direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub attribute: String,
    #[serde(default)]
    pub descending: bool,
}

impl SortKey {
    pub fn new(field: impl Into<String>, descending: bool) -> Self {
        let field = field.into();
        Self {
            attribute: field.clone(),
            field,
            descending,
        }
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = attribute.into();
        self
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, false)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, true)
    }
}

/// Stable client-side sort; the first key is the primary one
///
/// Keys are applied last to first so that earlier keys win. Missing and null
/// values sort before everything else.
pub fn sort_items(items: &mut [Item], sort: &[SortKey]) {
    for key in sort.iter().rev() {
        items.sort_by(|a, b| {
            let a = get_value(a, &key.attribute).map_or(FieldValue::Null, FieldValue::from_json);
            let b = get_value(b, &key.attribute).map_or(FieldValue::Null, FieldValue::from_json);
            let ordering = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
            if key.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }
}

/// CRUD and query façade for one resource on one backend
///
/// Implementations translate backend failures into
/// [`ManagerError`](crate::core::error::ManagerError) and fire lifecycle
/// signals through their [`Hooks`] around every successful mutation.
#[async_trait]
pub trait Manager: Send + Sync {
    /// Resource name used in errors and signals
    fn resource(&self) -> &str;

    /// Attribute holding the item id
    fn id_attribute(&self) -> &str;

    /// Filters available for `where` clauses on this resource
    fn filters(&self) -> &FilterRegistry;

    /// Lifecycle callbacks fired by this manager
    fn hooks(&self) -> &Hooks;

    /// Create an item; with `commit = false` the write is staged until `commit()`
    async fn create(&self, properties: Item, commit: bool) -> ManagerResult<Item>;

    /// Exact lookup by id
    async fn read(&self, id: &Value) -> ManagerResult<Item>;

    /// Apply `changes` on top of `item` and return the merged record
    async fn update(&self, item: &Item, changes: Item, commit: bool) -> ManagerResult<Item>;

    /// Remove an item
    async fn delete(&self, item: &Item) -> ManagerResult<()>;

    /// All items matching every condition, in sort order
    async fn instances(&self, where_: &[Condition], sort: &[SortKey]) -> ManagerResult<Vec<Item>>;

    /// One page of `instances` plus the total count
    async fn paginated_instances(
        &self,
        page: usize,
        per_page: usize,
        where_: &[Condition],
        sort: &[SortKey],
    ) -> ManagerResult<Pagination<Item>>;

    /// Apply staged writes
    async fn commit(&self) -> ManagerResult<()>;

    /// Discard staged writes and start a new session
    async fn begin(&self) -> ManagerResult<()>;

    /// First matching item, or `ItemNotFound`
    async fn first(&self, where_: &[Condition], sort: &[SortKey]) -> ManagerResult<Item> {
        let page = self.paginated_instances(1, 1, where_, sort).await?;
        page.items.into_iter().next().ok_or_else(|| {
            crate::core::error::ManagerError::ItemNotFound {
                resource: self.resource().to_string(),
                id: "<first>".to_string(),
            }
        })
    }

    /// Read then delete
    async fn delete_by_id(&self, id: &Value) -> ManagerResult<()> {
        let item = self.read(id).await?;
        self.delete(&item).await
    }
}

/// To-many association between a parent item and the items of another resource
#[async_trait]
pub trait Relation: Send + Sync {
    /// Attribute on the parent holding the association
    fn attribute(&self) -> &str;

    /// One page of the related items
    ///
    /// Takes the parent mutably because some backends keep the collection
    /// on the parent item itself.
    async fn instances(
        &self,
        item: &mut Item,
        page: usize,
        per_page: usize,
    ) -> ManagerResult<Pagination<Item>>;

    /// Associate `child` with `item`
    async fn add(&self, item: &mut Item, child: &Item) -> ManagerResult<()>;

    /// Dissociate `child` from `item`; absent children are ignored
    async fn remove(&self, item: &mut Item, child: &Item) -> ManagerResult<()>;
}
