//! 文档存储中的记录表示
//!
//! 远程存储以“集合 + 文档”的形式组织数据，文档字段为 JSON 对象。
//! 实体与文档之间的转换集中在这里，缺失必填字段的文档在解码时报错，
//! 由上层决定丢弃。

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::errors::{DomainError, DomainResult};

/// 文档字段集合
pub type Fields = Map<String, Value>;

/// 存储中的单个文档
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// 将可序列化的实体编码为文档字段
    pub fn encode<T: Serialize>(id: impl Into<String>, value: &T) -> DomainResult<Self> {
        let id = id.into();
        match serde_json::to_value(value) {
            Ok(Value::Object(fields)) => Ok(Self { id, fields }),
            Ok(other) => Err(DomainError::invalid_argument(
                "document",
                format!("expected object for {id}, got {other}"),
            )),
            Err(err) => Err(DomainError::invalid_argument("document", err.to_string())),
        }
    }

    /// 将文档字段解码为实体
    pub fn decode<T: DeserializeOwned>(&self, collection: &str) -> DomainResult<T> {
        serde_json::from_value(Value::Object(self.fields.clone()))
            .map_err(|err| DomainError::decode_failed(collection, &self.id, err.to_string()))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// 可与文档互相转换的实体
pub trait DocumentEntity: Sized {
    /// 日志中使用的实体名
    const KIND: &'static str;

    fn from_document(document: &Document) -> DomainResult<Self>;

    fn to_document(&self) -> DomainResult<Document>;
}
