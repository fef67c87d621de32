//! 帖子实体定义
//!
//! `created_at` 是存储端时间戳，也是信息流唯一权威的排序键。

use serde::{Deserialize, Serialize};

use crate::document::{Document, DocumentEntity};
use crate::entities::user_profile::Author;
use crate::entities::vote::Votable;
use crate::errors::{DomainError, DomainResult};
use crate::sync::SyncEntity;
use crate::value_objects::{EntityRef, GeoPoint, ImageRef, PostId, Timestamp, UserId};

/// 标签最大长度
const MAX_TAG_LEN: usize = 32;

/// 作者提交的新帖子内容
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostDraft {
    pub body: String,
    pub image_ref: Option<ImageRef>,
    pub tag: Option<String>,
    pub geo: Option<GeoPoint>,
}

/// 帖子
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    #[serde(skip)]
    pub id: PostId,
    pub author_id: UserId,
    pub author_display_name: String,
    #[serde(default)]
    pub author_avatar_ref: Option<ImageRef>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: Timestamp,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub image_ref: Option<ImageRef>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub geo: Option<GeoPoint>,
    #[serde(default)]
    pub vote_count: i64,
}

impl Post {
    pub const FIELD_CREATED_AT: &'static str = "created_at";
    pub const FIELD_TAG: &'static str = "tag";
    pub const FIELD_VOTE_COUNT: &'static str = "vote_count";

    /// 由作者草稿构造帖子，票数从0开始
    pub fn compose(
        id: PostId,
        author: &Author,
        draft: PostDraft,
        created_at: Timestamp,
    ) -> DomainResult<Self> {
        let post = Self {
            id,
            author_id: author.id.clone(),
            author_display_name: author.display_name.clone(),
            author_avatar_ref: author.avatar_ref.clone(),
            created_at,
            body: draft.body.trim().to_owned(),
            image_ref: draft.image_ref,
            tag: normalize_tag(draft.tag)?,
            geo: draft.geo,
            vote_count: 0,
        };
        post.validate()?;
        Ok(post)
    }

    /// 正文和图片不能同时为空
    pub fn validate(&self) -> DomainResult<()> {
        if self.body.trim().is_empty() && self.image_ref.is_none() {
            return Err(DomainError::EmptyContent);
        }
        Ok(())
    }

    pub fn is_authored_by(&self, user_id: &UserId) -> bool {
        &self.author_id == user_id
    }

    pub fn retag(&mut self, tag: Option<String>) -> DomainResult<()> {
        self.tag = normalize_tag(tag)?;
        Ok(())
    }
}

/// 去除空白，空标签视为无标签
pub fn normalize_tag(tag: Option<String>) -> DomainResult<Option<String>> {
    match tag.map(|t| t.trim().to_owned()) {
        None => Ok(None),
        Some(t) if t.is_empty() => Ok(None),
        Some(t) if t.chars().count() > MAX_TAG_LEN => {
            Err(DomainError::invalid_argument("tag", "too long"))
        }
        Some(t) => Ok(Some(t)),
    }
}

impl DocumentEntity for Post {
    const KIND: &'static str = "post";

    fn from_document(document: &Document) -> DomainResult<Self> {
        let mut post: Post = document.decode("posts")?;
        post.id = PostId::new(document.id.clone());
        post.validate()?;
        Ok(post)
    }

    fn to_document(&self) -> DomainResult<Document> {
        Document::encode(self.id.as_str(), self)
    }
}

impl Votable for Post {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::post(&self.id)
    }

    fn author_id(&self) -> &UserId {
        &self.author_id
    }

    fn vote_count(&self) -> i64 {
        self.vote_count
    }

    fn apply_vote_delta(&mut self, delta: i64) {
        self.vote_count += delta;
    }
}

impl SyncEntity for Post {
    type Id = PostId;

    fn entity_id(&self) -> &PostId {
        &self.id
    }

    fn created_at(&self) -> Timestamp {
        self.created_at
    }
}
