//! 远程文档存储端口
//!
//! 同步引擎只依赖这里定义的最小契约：一次性查询、带取消的变更订阅、
//! 单文档写入、字段更新（含原子自增）与删除。具体存储由外部提供。

pub mod memory;

use async_trait::async_trait;
use domain::{Document, DocumentEntity};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// 存储错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid field {field}: {message}")]
    InvalidField { field: String, message: String },
}

impl StoreError {
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// 查询过滤条件，多个条件之间为“与”关系
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { field: String, value: Value },
    In { field: String, values: Vec<Value> },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn any_of<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// 分页起点：排序字段值 + 文档ID
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub document_id: String,
    pub order_value: Value,
}

/// 集合查询
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    pub start_after: Option<Cursor>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
            start_after: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, cursor: Option<Cursor>) -> Self {
        self.start_after = cursor;
        self
    }
}

/// 某一时刻查询的完整结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub documents: Vec<Document>,
}

impl Snapshot {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// 解码全部文档，缺失必填字段的文档被丢弃
    pub fn decode<E: DocumentEntity>(&self) -> Vec<E> {
        self.documents
            .iter()
            .filter_map(|document| match E::from_document(document) {
                Ok(entity) => Some(entity),
                Err(err) => {
                    tracing::debug!(
                        kind = E::KIND,
                        document_id = %document.id,
                        error = %err,
                        "丢弃无法解码的文档"
                    );
                    None
                }
            })
            .collect()
    }

    /// 以最后一个文档构造分页起点
    pub fn cursor_after_last(&self, order_field: &str) -> Option<Cursor> {
        self.documents.iter().rev().find_map(|document| {
            document.get(order_field).map(|value| Cursor {
                document_id: document.id.clone(),
                order_value: value.clone(),
            })
        })
    }
}

/// 字段更新方式
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Set(Value),
    Increment(i64),
}

/// 订阅注册句柄，取消后存储不再推送新快照
pub struct ListenerRegistration {
    on_cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerRegistration {
    pub fn new(on_cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_cancel: Some(Box::new(on_cancel)),
        }
    }

    pub fn cancel(&mut self) {
        if let Some(on_cancel) = self.on_cancel.take() {
            on_cancel();
        }
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// 一个活跃的变更订阅：快照接收端 + 注册句柄
pub struct Subscription {
    pub snapshots: mpsc::UnboundedReceiver<StoreResult<Snapshot>>,
    pub registration: ListenerRegistration,
}

/// 远程文档存储
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 一次性查询
    async fn query(&self, query: &Query) -> StoreResult<Snapshot>;

    /// 订阅查询结果变化，建立时推送一次当前结果
    async fn subscribe(&self, query: &Query) -> StoreResult<Subscription>;

    /// 按ID读取单个文档
    async fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// 写入文档；`merge` 为真时只覆盖给出的字段
    async fn set_document(
        &self,
        collection: &str,
        document: Document,
        merge: bool,
    ) -> StoreResult<()>;

    /// 更新单个字段，文档不存在时返回 NotFound
    async fn update_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        update: FieldUpdate,
    ) -> StoreResult<()>;

    /// 删除文档，文档不存在时视为成功
    async fn delete_document(&self, collection: &str, id: &str) -> StoreResult<()>;
}
