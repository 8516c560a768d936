//! Stored field values.
//!
//! An outbound field may hold its value directly or a producer that is only
//! run when the packet is transformed for sending.

use crate::error::Result;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Lazily evaluated field value
pub type Producer = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

#[derive(Clone)]
pub enum FieldValue {
    Literal(Value),
    Deferred(Producer),
}

impl FieldValue {
    /// Wrap an async producer as a deferred value
    pub fn deferred<F, Fut>(producer: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        FieldValue::Deferred(Arc::new(move || Box::pin(producer())))
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, FieldValue::Deferred(_))
    }

    /// The literal value, if any
    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            FieldValue::Literal(value) => Some(value),
            FieldValue::Deferred(_) => None,
        }
    }

    /// Resolve to a concrete value, running the producer if deferred
    pub async fn resolve(&self) -> Result<Value> {
        match self {
            FieldValue::Literal(value) => Ok(value.clone()),
            FieldValue::Deferred(producer) => producer().await,
        }
    }
}

impl Default for FieldValue {
    fn default() -> Self {
        FieldValue::Literal(Value::Null)
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Literal(value)
    }
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            FieldValue::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_deferred_runs_only_on_resolve() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let value = FieldValue::deferred(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(json!("abc123"))
            }
        });

        assert!(value.is_deferred());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(value.resolve().await.unwrap(), json!("abc123"));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_literal_resolves_to_itself() {
        let value = FieldValue::from(json!(3));
        assert_eq!(value.as_literal(), Some(&json!(3)));
        assert_eq!(value.resolve().await.unwrap(), json!(3));
    }
}
