//! In-memory [`DocumentStore`].
//!
//! Used by the CLI, the REST runner and the tests. It behaves like the remote store the
//! engine is written against:
//!
//! - listeners receive the full matching result set immediately and after every write to
//!   their collection,
//! - "in" filters larger than [`InMemoryStore::max_in_values`] are rejected,
//! - documents missing the `order_by` field are excluded from ordered queries.
//!
//! Faults can be injected per collection so degradation paths can be exercised.
//!
//! ## Seed format
//!
//! ```text
//! {
//!   "patients":     { "<id>": { ...fields } },
//!   "baselineData": { "<id>": { "patientId": "<patient id>", ... } },
//!   "followUpData": { "<id>": { "patientId": "<patient id>", ... } }
//! }
//! ```

use super::{Cancel, Direction, Document, DocumentStore, Filter, FilterOp, Listener, Query, Snapshot};
use crate::constants::DEFAULT_IN_FILTER_LIMIT;
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;

type Collections = BTreeMap<String, BTreeMap<String, Value>>;

/// Thread-safe in-memory document store with live listeners.
#[derive(Clone)]
pub struct InMemoryStore {
    shared: Arc<Mutex<Inner>>,
    max_in_values: usize,
}

#[derive(Default)]
struct Inner {
    collections: Collections,
    listeners: Vec<Slot>,
    next_listener_id: u64,
    query_faults: HashMap<String, StoreError>,
    listen_faults: HashMap<String, StoreError>,
    queries_served: usize,
}

struct Slot {
    id: u64,
    target: Target,
    tx: mpsc::UnboundedSender<Snapshot>,
}

enum Target {
    Query(Query),
    Document { collection: String, id: String },
}

impl Target {
    fn collection(&self) -> &str {
        match self {
            Target::Query(query) => &query.collection,
            Target::Document { collection, .. } => collection,
        }
    }

    fn evaluate(&self, collections: &Collections) -> Vec<Document> {
        match self {
            Target::Query(query) => run_query(collections, query),
            Target::Document { collection, id } => collections
                .get(collection)
                .and_then(|docs| docs.get(id))
                .map(|data| vec![Document::new(id.clone(), data.clone())])
                .unwrap_or_default(),
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_max_in_values(DEFAULT_IN_FILTER_LIMIT)
    }

    /// Creates an empty store that rejects "in" filters with more than `max_in_values`
    /// values.
    pub fn with_max_in_values(max_in_values: usize) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Inner::default())),
            max_in_values: max_in_values.max(1),
        }
    }

    /// Builds a store from seed JSON (see the module docs for the layout).
    pub fn from_seed_json(json: &str) -> Result<Self, StoreError> {
        let collections: Collections = serde_json::from_str(json)
            .map_err(|e| StoreError::Seed(format!("seed is not a collection map: {e}")))?;

        let store = Self::new();
        store.lock().collections = collections;
        Ok(store)
    }

    /// Reads and parses a seed file.
    pub fn from_seed_file(path: &Path) -> Result<Self, StoreError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Seed(format!("{}: {e}", path.display())))?;
        let store = Self::from_seed_json(&json)?;
        tracing::info!(path = %path.display(), documents = store.document_count(), "seeded in-memory store");
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates or replaces a document and notifies listeners on its collection.
    pub fn set(&self, collection: &str, id: &str, data: Value) {
        let mut inner = self.lock();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);
        notify(&mut inner, collection);
    }

    /// Inserts a document under a freshly allocated id and returns the id.
    pub fn add(&self, collection: &str, data: Value) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.set(collection, &id, data);
        id
    }

    /// Removes a document. Returns whether it existed.
    pub fn delete(&self, collection: &str, id: &str) -> bool {
        let mut inner = self.lock();
        let removed = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some();
        if removed {
            notify(&mut inner, collection);
        }
        removed
    }

    /// Makes every subsequent `get`/`query` on `collection` fail with `error`.
    pub fn fail_queries(&self, collection: &str, error: StoreError) {
        self.lock()
            .query_faults
            .insert(collection.to_string(), error);
    }

    /// Makes every subsequent `listen` on `collection` fail with `error`.
    pub fn fail_listens(&self, collection: &str, error: StoreError) {
        self.lock()
            .listen_faults
            .insert(collection.to_string(), error);
    }

    pub fn clear_faults(&self) {
        let mut inner = self.lock();
        inner.query_faults.clear();
        inner.listen_faults.clear();
    }

    /// Delivers `error` to every live listener on `collection`.
    pub fn emit_error(&self, collection: &str, error: StoreError) {
        let inner = self.lock();
        for slot in inner
            .listeners
            .iter()
            .filter(|slot| slot.target.collection() == collection)
        {
            let _ = slot.tx.send(Err(error.clone()));
        }
    }

    /// Number of `get`/`query` calls answered so far.
    pub fn queries_served(&self) -> usize {
        self.lock().queries_served
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn document_count(&self) -> usize {
        self.lock().collections.values().map(BTreeMap::len).sum()
    }

    fn register(&self, target: Target) -> Result<Listener, StoreError> {
        let mut inner = self.lock();
        if let Some(error) = inner.listen_faults.get(target.collection()) {
            return Err(error.clone());
        }

        let (tx, events) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(target.evaluate(&inner.collections)));

        inner.next_listener_id += 1;
        let id = inner.next_listener_id;
        tracing::debug!(listener = id, collection = target.collection(), "listener registered");
        inner.listeners.push(Slot { id, target, tx });

        Ok(Listener {
            events,
            cancel: cancel_for(Arc::downgrade(&self.shared), id),
        })
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn cancel_for(shared: Weak<Mutex<Inner>>, id: u64) -> Cancel {
    Box::new(move || {
        // A store that has already been dropped has no listeners left to release.
        if let Some(shared) = shared.upgrade() {
            let mut inner = shared.lock().unwrap_or_else(PoisonError::into_inner);
            inner.listeners.retain(|slot| slot.id != id);
            tracing::debug!(listener = id, "listener released");
        }
        Ok(())
    })
}

fn notify(inner: &mut Inner, collection: &str) {
    let Inner {
        collections,
        listeners,
        ..
    } = inner;

    // Listeners whose receiver is gone are pruned.
    listeners.retain(|slot| {
        if slot.target.collection() != collection {
            return true;
        }
        slot.tx.send(Ok(slot.target.evaluate(collections))).is_ok()
    });
}

fn run_query(collections: &Collections, query: &Query) -> Vec<Document> {
    let Some(docs) = collections.get(&query.collection) else {
        return Vec::new();
    };

    let mut matched: Vec<Document> = docs
        .iter()
        .filter(|(_, data)| query.filters.iter().all(|f| filter_matches(f, data)))
        .map(|(id, data)| Document::new(id.clone(), data.clone()))
        .collect();

    if let Some((field, direction)) = &query.order_by {
        matched.retain(|doc| doc.field(field).is_some());
        matched.sort_by(|a, b| {
            let ordering = compare_values(a.field(field), b.field(field));
            match direction {
                Direction::Ascending => ordering,
                Direction::Descending => ordering.reverse(),
            }
        });
    }

    matched
}

fn filter_matches(filter: &Filter, data: &Value) -> bool {
    let Some(value) = data.get(&filter.field) else {
        return false;
    };
    match &filter.op {
        FilterOp::Eq(expected) => value == expected,
        FilterOp::In(values) => values.contains(value),
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    fn max_in_values(&self) -> usize {
        self.max_in_values
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let mut inner = self.lock();
        if let Some(error) = inner.query_faults.get(collection) {
            return Err(error.clone());
        }
        inner.queries_served += 1;
        Ok(inner
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| Document::new(id, data.clone())))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let mut inner = self.lock();
        if let Some(error) = inner.query_faults.get(&query.collection) {
            return Err(error.clone());
        }
        let cardinality = query.in_cardinality();
        if cardinality > self.max_in_values {
            return Err(StoreError::InvalidQuery(format!(
                "'in' filter supports at most {} values, got {cardinality}",
                self.max_in_values
            )));
        }
        inner.queries_served += 1;
        Ok(run_query(&inner.collections, query))
    }

    async fn listen(&self, query: &Query) -> Result<Listener, StoreError> {
        if query.in_cardinality() > self.max_in_values {
            return Err(StoreError::InvalidQuery(format!(
                "'in' filter supports at most {} values",
                self.max_in_values
            )));
        }
        self.register(Target::Query(query.clone()))
    }

    async fn listen_document(&self, collection: &str, id: &str) -> Result<Listener, StoreError> {
        self.register(Target::Document {
            collection: collection.to_string(),
            id: id.to_string(),
        })
    }
}
