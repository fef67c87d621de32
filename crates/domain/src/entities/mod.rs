//! 领域实体定义
//!
//! 包含系统的核心实体：帖子、评论、投票、用户资料。

pub mod comment;
pub mod post;
pub mod user_profile;
pub mod vote;

// 重新导出核心实体
pub use comment::{Comment, CommentDraft};
pub use post::{normalize_tag, Post, PostDraft};
pub use user_profile::{Author, UserProfile};
pub use vote::{Votable, Vote, VoteDirection, VoteTransition, VoteValue};
