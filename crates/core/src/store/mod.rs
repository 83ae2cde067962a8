//! Document store interface.
//!
//! The production document store is an external collaborator. The engine talks to it only
//! through [`DocumentStore`]: point reads, filtered queries, and live listeners that deliver
//! the full current result set every time matching data changes.
//!
//! Listeners are modelled as an owned pair: a channel of snapshots and a [`Cancel`] handle.
//! Whoever holds the handle is responsible for calling it exactly once; in practice that is
//! always a [`SubscriptionManager`](crate::subscription::SubscriptionManager).

pub mod memory;

pub use memory::InMemoryStore;

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// A raw record as held by the store: an id plus untyped field data.
///
/// Raw documents never travel past the record decoders in [`crate::records`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Returns a top-level field of the document, if present.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}

/// Comparison applied by a [`Filter`].
#[derive(Clone, Debug, PartialEq)]
pub enum FilterOp {
    Eq(Value),
    /// Field equals one of a finite set of values. Stores cap the set's size; see
    /// [`DocumentStore::max_in_values`].
    In(Vec<Value>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// A collection query: all filters must match.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op: FilterOp::Eq(value.into()),
        });
        self
    }

    pub fn where_in(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op: FilterOp::In(values),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    /// Largest "in" set used by any filter of this query.
    pub fn in_cardinality(&self) -> usize {
        self.filters
            .iter()
            .map(|f| match &f.op {
                FilterOp::In(values) => values.len(),
                FilterOp::Eq(_) => 0,
            })
            .max()
            .unwrap_or(0)
    }
}

/// One change notification: the full current result set, or a stream error.
pub type Snapshot = Result<Vec<Document>, StoreError>;

/// Releases a live listener. Must be invoked at most once.
pub type Cancel = Box<dyn FnOnce() -> Result<(), StoreError> + Send + 'static>;

/// A live listener returned by [`DocumentStore::listen`].
///
/// The first snapshot is delivered as soon as the listener is established. Snapshots for one
/// listener arrive in the order the store emits them.
pub struct Listener {
    pub events: mpsc::UnboundedReceiver<Snapshot>,
    pub cancel: Cancel,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Maximum number of values accepted by a single [`FilterOp::In`].
    fn max_in_values(&self) -> usize;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    async fn listen(&self, query: &Query) -> Result<Listener, StoreError>;

    /// Listen to a single document. Each snapshot holds zero or one documents.
    async fn listen_document(&self, collection: &str, id: &str) -> Result<Listener, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn in_cardinality_reports_largest_set() {
        let query = Query::collection("baselineData")
            .where_eq("site", "north")
            .where_in("patientId", vec![json!("a"), json!("b"), json!("c")]);
        assert_eq!(query.in_cardinality(), 3);
        assert_eq!(Query::collection("patients").in_cardinality(), 0);
    }

    #[test]
    fn document_field_reads_top_level_values() {
        let doc = Document::new("b1", json!({"patientId": "p1", "hba1c": 8.1}));
        assert_eq!(doc.field("patientId"), Some(&json!("p1")));
        assert!(doc.field("missing").is_none());
    }
}
