//! 领域模型错误定义
//!
//! 定义了领域层可能出现的错误类型，提供清晰的错误上下文。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 参数不合法
    #[error("参数不合法: {field}: {message}")]
    InvalidArgument { field: String, message: String },

    /// 正文与图片同时为空
    #[error("内容为空: 正文和图片不能同时为空")]
    EmptyContent,

    /// 文档解码失败
    #[error("文档解码失败: {collection}/{id}: {reason}")]
    DecodeFailed {
        collection: String,
        id: String,
        reason: String,
    },

    /// 非法投票值
    #[error("非法投票值: {0}")]
    InvalidVoteValue(i64),
}

impl DomainError {
    /// 创建参数错误
    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 创建解码错误
    pub fn decode_failed(
        collection: impl Into<String>,
        id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::DecodeFailed {
            collection: collection.into(),
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
