//! 信息流同步与投票引擎的核心领域模型
//!
//! 包含帖子、评论、投票等核心实体，投票状态机，以及合并去重等纯函数规则。

pub mod document;
pub mod entities;
pub mod errors;
pub mod sync;
pub mod value_objects;

// 重新导出常用类型
pub use document::*;
pub use entities::*;
pub use errors::*;
pub use sync::*;
pub use value_objects::*;
