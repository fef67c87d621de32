//! 评论实体定义

use serde::{Deserialize, Serialize};

use crate::document::{Document, DocumentEntity};
use crate::entities::user_profile::Author;
use crate::entities::vote::Votable;
use crate::errors::{DomainError, DomainResult};
use crate::sync::SyncEntity;
use crate::value_objects::{CommentId, EntityRef, ImageRef, PostId, Timestamp, UserId};

/// 作者提交的新评论内容
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommentDraft {
    pub body: String,
    pub image_ref: Option<ImageRef>,
}

/// 评论，隶属于唯一的父帖子
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(skip)]
    pub id: CommentId,
    pub post_id: PostId,
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
    pub vote_count: i64,
}

impl Comment {
    pub const FIELD_POST_ID: &'static str = "post_id";
    pub const FIELD_CREATED_AT: &'static str = "created_at";
    pub const FIELD_VOTE_COUNT: &'static str = "vote_count";

    pub fn compose(
        id: CommentId,
        post_id: PostId,
        author: &Author,
        draft: CommentDraft,
        created_at: Timestamp,
    ) -> DomainResult<Self> {
        let comment = Self {
            id,
            post_id,
            author_id: author.id.clone(),
            author_display_name: author.display_name.clone(),
            author_avatar_ref: author.avatar_ref.clone(),
            created_at,
            body: draft.body.trim().to_owned(),
            image_ref: draft.image_ref,
            vote_count: 0,
        };
        comment.validate()?;
        Ok(comment)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.body.trim().is_empty() && self.image_ref.is_none() {
            return Err(DomainError::EmptyContent);
        }
        Ok(())
    }

    pub fn is_authored_by(&self, user_id: &UserId) -> bool {
        &self.author_id == user_id
    }
}

impl DocumentEntity for Comment {
    const KIND: &'static str = "comment";

    fn from_document(document: &Document) -> DomainResult<Self> {
        let mut comment: Comment = document.decode("comments")?;
        comment.id = CommentId::new(document.id.clone());
        comment.validate()?;
        Ok(comment)
    }

    fn to_document(&self) -> DomainResult<Document> {
        Document::encode(self.id.as_str(), self)
    }
}

impl Votable for Comment {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::comment(&self.id)
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

impl SyncEntity for Comment {
    type Id = CommentId;

    fn entity_id(&self) -> &CommentId {
        &self.id
    }

    fn created_at(&self) -> Timestamp {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn comment_keeps_parent_post() {
        let author = Author::new(UserId::new("u2"), "Bo", None).unwrap();
        let draft = CommentDraft {
            body: "nice".into(),
            image_ref: None,
        };
        let comment = Comment::compose(
            CommentId::new("c1"),
            PostId::new("p1"),
            &author,
            draft,
            Utc::now(),
        )
        .unwrap();

        let doc = comment.to_document().unwrap();
        assert_eq!(
            doc.get(Comment::FIELD_POST_ID),
            Some(&serde_json::json!("p1"))
        );
        assert_eq!(Comment::from_document(&doc).unwrap(), comment);
    }

    #[test]
    fn comment_without_author_fails_to_decode() {
        let mut fields = crate::document::Fields::new();
        fields.insert("post_id".into(), serde_json::json!("p1"));
        fields.insert("body".into(), serde_json::json!("x"));
        fields.insert("created_at".into(), serde_json::json!(1));
        let doc = Document::new("c1", fields);
        assert!(matches!(
            Comment::from_document(&doc),
            Err(DomainError::DecodeFailed { .. })
        ));
    }
}
