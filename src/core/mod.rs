//! Core module containing the backend-agnostic traits and types

pub mod error;
pub mod events;
pub mod field;
pub mod filter;
pub mod manager;
pub mod query;
pub mod registry;

pub use error::{ManagerError, ManagerResult};
pub use events::{EventBus, Hooks, LifecycleEvent, Signal};
pub use field::{Field, FieldIo, FieldType, FieldValue};
pub use filter::{Comparator, Condition, Filter};
pub use manager::{Item, Manager, Relation, SortKey};
pub use query::{Pagination, PaginationMeta, Query};
pub use registry::{DEFAULT_FILTERS, FilterRegistry, FilterTable, FiltersExpression};
