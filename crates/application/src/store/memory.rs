//! 内存实现的文档存储（用于测试和演示）
//!
//! 行为对齐远程文档数据库：写入后同步通知匹配集合的所有订阅者，
//! 缺少排序字段的文档不会出现在排序查询中。可以按操作注入故障，
//! 并统计每种操作的调用次数。

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use domain::{Document, Fields};
use serde_json::Value;
use tokio::sync::mpsc;

use super::{
    Cursor, Direction, DocumentStore, FieldUpdate, Filter, ListenerRegistration, Query, Snapshot,
    StoreError, StoreResult, Subscription,
};

/// 可注入故障、可计数的存储操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Query,
    Subscribe,
    GetDocument,
    SetDocument,
    UpdateField,
    DeleteDocument,
}

type Collections = HashMap<String, BTreeMap<String, Fields>>;

struct Listener {
    query: Query,
    sender: mpsc::UnboundedSender<StoreResult<Snapshot>>,
}

#[derive(Default)]
struct StoreState {
    collections: Collections,
    listeners: HashMap<u64, Listener>,
    next_listener_id: u64,
    failing: HashSet<StoreOperation>,
    calls: HashMap<StoreOperation, usize>,
}

impl StoreState {
    fn begin(&mut self, operation: StoreOperation) -> StoreResult<()> {
        *self.calls.entry(operation).or_insert(0) += 1;
        if self.failing.contains(&operation) {
            return Err(StoreError::unavailable(format!(
                "injected failure on {operation:?}"
            )));
        }
        Ok(())
    }

    fn notify(&mut self, collection: &str) {
        let updates: Vec<(u64, Snapshot)> = self
            .listeners
            .iter()
            .filter(|(_, listener)| listener.query.collection == collection)
            .map(|(id, listener)| (*id, evaluate(&self.collections, &listener.query)))
            .collect();

        for (id, snapshot) in updates {
            let closed = self
                .listeners
                .get(&id)
                .map(|listener| listener.sender.send(Ok(snapshot)).is_err())
                .unwrap_or(false);
            if closed {
                self.listeners.remove(&id);
            }
        }
    }
}

/// 内存文档存储
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 之后的该类操作全部失败，直到调用 `recover`
    pub fn fail_on(&self, operation: StoreOperation) {
        self.lock().failing.insert(operation);
    }

    pub fn recover(&self, operation: StoreOperation) {
        self.lock().failing.remove(&operation);
    }

    pub fn call_count(&self, operation: StoreOperation) -> usize {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// 直接读取文档，不计入调用次数
    pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
        self.lock()
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document::new(id, fields.clone()))
    }

    pub fn count(&self, collection: &str) -> usize {
        self.lock()
            .collections
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn query(&self, query: &Query) -> StoreResult<Snapshot> {
        let mut state = self.lock();
        state.begin(StoreOperation::Query)?;
        Ok(evaluate(&state.collections, query))
    }

    async fn subscribe(&self, query: &Query) -> StoreResult<Subscription> {
        let mut state = self.lock();
        state.begin(StoreOperation::Subscribe)?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let initial = evaluate(&state.collections, query);
        // 接收端就在本函数内，首个快照不会发送失败
        let _ = sender.send(Ok(initial));

        let listener_id = state.next_listener_id;
        state.next_listener_id += 1;
        state.listeners.insert(
            listener_id,
            Listener {
                query: query.clone(),
                sender,
            },
        );

        let weak = Arc::downgrade(&self.state);
        let registration = ListenerRegistration::new(move || {
            if let Some(state) = weak.upgrade() {
                state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .listeners
                    .remove(&listener_id);
            }
        });

        Ok(Subscription {
            snapshots: receiver,
            registration,
        })
    }

    async fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let mut state = self.lock();
        state.begin(StoreOperation::GetDocument)?;
        Ok(state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document::new(id, fields.clone())))
    }

    async fn set_document(
        &self,
        collection: &str,
        document: Document,
        merge: bool,
    ) -> StoreResult<()> {
        let mut state = self.lock();
        state.begin(StoreOperation::SetDocument)?;

        let docs = state.collections.entry(collection.to_owned()).or_default();
        match docs.get_mut(&document.id) {
            Some(existing) if merge => existing.extend(document.fields),
            _ => {
                docs.insert(document.id, document.fields);
            }
        }

        state.notify(collection);
        Ok(())
    }

    async fn update_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        update: FieldUpdate,
    ) -> StoreResult<()> {
        let mut state = self.lock();
        state.begin(StoreOperation::UpdateField)?;

        let fields = state
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StoreError::not_found(collection, id))?;

        match update {
            FieldUpdate::Set(value) => {
                fields.insert(field.to_owned(), value);
            }
            FieldUpdate::Increment(delta) => {
                let current = match fields.get(field) {
                    None | Some(Value::Null) => 0,
                    Some(value) => value.as_i64().ok_or_else(|| StoreError::InvalidField {
                        field: field.to_owned(),
                        message: "cannot increment a non-integer value".to_owned(),
                    })?,
                };
                fields.insert(field.to_owned(), Value::from(current + delta));
            }
        }

        state.notify(collection);
        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> StoreResult<()> {
        let mut state = self.lock();
        state.begin(StoreOperation::DeleteDocument)?;

        let removed = state
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some();
        if removed {
            state.notify(collection);
        }
        Ok(())
    }
}

fn evaluate(collections: &Collections, query: &Query) -> Snapshot {
    let Some(docs) = collections.get(&query.collection) else {
        return Snapshot::default();
    };

    let mut matched: Vec<Document> = docs
        .iter()
        .filter(|(_, fields)| query.filters.iter().all(|filter| matches(fields, filter)))
        .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
        .collect();

    match &query.order_by {
        Some(order) => {
            matched.retain(|doc| doc.fields.contains_key(&order.field));
            matched.sort_by(|a, b| directed(order.direction, compare_docs(a, b, &order.field)));
            if let Some(cursor) = &query.start_after {
                matched.retain(|doc| {
                    directed(order.direction, compare_to_cursor(doc, cursor, &order.field))
                        == Ordering::Greater
                });
            }
        }
        None => {
            if let Some(cursor) = &query.start_after {
                matched.retain(|doc| doc.id > cursor.document_id);
            }
        }
    }

    if let Some(limit) = query.limit {
        matched.truncate(limit);
    }

    Snapshot::new(matched)
}

fn matches(fields: &Fields, filter: &Filter) -> bool {
    match filter {
        Filter::Eq { field, value } => fields.get(field) == Some(value),
        Filter::In { field, values } => fields
            .get(field)
            .map(|actual| values.contains(actual))
            .unwrap_or(false),
    }
}

fn directed(direction: Direction, ordering: Ordering) -> Ordering {
    match direction {
        Direction::Ascending => ordering,
        Direction::Descending => ordering.reverse(),
    }
}

fn compare_docs(a: &Document, b: &Document, field: &str) -> Ordering {
    let left = a.get(field).unwrap_or(&Value::Null);
    let right = b.get(field).unwrap_or(&Value::Null);
    compare_values(left, right).then_with(|| a.id.cmp(&b.id))
}

fn compare_to_cursor(doc: &Document, cursor: &Cursor, field: &str) -> Ordering {
    let value = doc.get(field).unwrap_or(&Value::Null);
    compare_values(value, &cursor.order_value).then_with(|| doc.id.cmp(&cursor.document_id))
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}
