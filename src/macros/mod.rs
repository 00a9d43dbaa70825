//! Macros for reducing boilerplate when building items

/// Build an [`Item`](crate::core::manager::Item) from a JSON object literal
///
/// # Example
/// ```rust,ignore
/// let item = item!({"name": "Ann", "age": 31});
/// manager.create(item, true).await?;
/// ```
#[macro_export]
macro_rules! item {
    ({ $($body:tt)* }) => {
        match ::serde_json::json!({ $($body)* }) {
            ::serde_json::Value::Object(map) => map,
            _ => unreachable!("a JSON object literal is always an object"),
        }
    };
}
