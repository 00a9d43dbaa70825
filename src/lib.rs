//! # Potion-RS
//!
//! Resource managers for building filterable, paginated REST resources over
//! several storage backends.
//!
//! ## Features
//!
//! - **One manager contract**: create, read, update, delete, filtered and
//!   sorted listing, pagination and staged writes, whatever the backend
//! - **Filter registry**: per-field comparators (`$lt`, `$in`, `$icontains`,
//!   ...) derived from field types and the backend's capabilities
//! - **Relations**: to-many associations with add/remove and paging
//! - **Lifecycle signals**: before/after hooks around every mutation, with an
//!   optional broadcast bus
//! - **Typed errors**: `ItemNotFound`, `DuplicateKey`, `BackendConflict` and
//!   friends, independent of the driver in use
//! - **Configuration-Based**: resources described in YAML
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use potion::prelude::*;
//!
//! let users = MemoryManager::new("user").with_fields(
//!     vec![
//!         Field::new("name", FieldType::String),
//!         Field::new("age", FieldType::Integer),
//!     ],
//!     &FiltersExpression::All(true),
//! );
//!
//! users.create(item!({"name": "Ann", "age": 31}), true).await?;
//!
//! let where_ = users.filters().conditions(&json!({"age": {"$gte": 18}}))?;
//! let page = users
//!     .paginated_instances(1, 20, &where_, &[SortKey::asc("name")])
//!     .await?;
//! println!("{} adults", page.total);
//! ```

#[macro_use]
mod macros;

pub mod config;
pub mod core;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        error::{ManagerError, ManagerResult},
        events::{EventBus, EventEnvelope, Hooks, LifecycleEvent, Signal},
        field::{Field, FieldIo, FieldType, FieldValue},
        filter::{Comparator, Condition, Filter},
        manager::{Item, Manager, Relation, SortKey},
        query::{Pagination, PaginationMeta, Query},
        registry::{DEFAULT_FILTERS, FieldFilters, FilterRegistry, FilterTable, FiltersExpression},
    };

    // === Storage ===
    pub use crate::storage::{MemoryManager, MemoryRelation};
    #[cfg(feature = "postgres")]
    pub use crate::storage::{PostgresManager, PostgresRelation};
    #[cfg(feature = "scylladb")]
    pub use crate::storage::{ScyllaManager, ScyllaRelation};

    // === Config ===
    pub use crate::config::{PotionConfig, RelationConfig, ResourceMeta};

    // === Macros ===
    pub use crate::item;

    // === External dependencies ===
    pub use async_trait::async_trait;
    pub use serde_json::{Value, json};
}
