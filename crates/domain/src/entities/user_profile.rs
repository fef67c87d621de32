//! 用户资料与作者信息

use serde::{Deserialize, Serialize};

use crate::document::{Document, DocumentEntity};
use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{ImageRef, UserId};

/// 内容作者，创建帖子或评论时从当前会话取得。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: UserId,
    pub display_name: String,
    pub avatar_ref: Option<ImageRef>,
}

impl Author {
    pub fn new(
        id: UserId,
        display_name: impl Into<String>,
        avatar_ref: Option<ImageRef>,
    ) -> DomainResult<Self> {
        let display_name = display_name.into().trim().to_owned();
        if id.as_str().is_empty() {
            return Err(DomainError::invalid_argument("author_id", "cannot be empty"));
        }
        if display_name.is_empty() {
            return Err(DomainError::invalid_argument(
                "author_display_name",
                "cannot be empty",
            ));
        }
        Ok(Self {
            id,
            display_name,
            avatar_ref,
        })
    }
}

/// 用户资料，`karma` 只随作者内容收到的投票变化。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(skip)]
    pub id: UserId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub avatar_ref: Option<ImageRef>,
    #[serde(default)]
    pub karma: i64,
}

impl UserProfile {
    pub const FIELD_KARMA: &'static str = "karma";

    pub fn new(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            avatar_ref: None,
            karma: 0,
        }
    }
}

impl DocumentEntity for UserProfile {
    const KIND: &'static str = "user";

    fn from_document(document: &Document) -> DomainResult<Self> {
        let mut profile: UserProfile = document.decode("users")?;
        profile.id = UserId::new(document.id.clone());
        Ok(profile)
    }

    fn to_document(&self) -> DomainResult<Document> {
        Document::encode(self.id.as_str(), self)
    }
}
