//! 评论串控制器
//!
//! 与信息流同步器相同的合并契约，作用于单个帖子的评论：按 `post_id`
//! 过滤，`created_at` 升序，不分页。

use std::sync::Arc;

use domain::{
    Comment, CommentDraft, CommentId, DocumentEntity, DomainError, EntityRef, PostId, SortOrder,
    VoteDirection, VoteValue,
};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{ApplicationError, ApplicationResult};
use crate::identity::current_author;
use crate::live::LiveList;
use crate::media::ImageUpload;
use crate::session::SyncContext;
use crate::store::{Direction, Filter, Query};
use crate::vote_ledger::VoteReceipt;

pub struct CommentStreamController {
    context: SyncContext,
    post_id: PostId,
    list: Arc<LiveList<Comment>>,
}

impl CommentStreamController {
    pub fn new(context: SyncContext, post_id: PostId) -> Self {
        Self {
            context,
            post_id,
            list: Arc::new(LiveList::new("comments", SortOrder::OldestFirst)),
        }
    }

    pub fn post_id(&self) -> &PostId {
        &self.post_id
    }

    fn live_query(&self) -> Query {
        Query::collection(&self.context.collections.comments)
            .filter(Filter::eq(Comment::FIELD_POST_ID, self.post_id.as_str()))
            .order_by(Comment::FIELD_CREATED_AT, Direction::Ascending)
    }

    pub async fn start_live_sync(&self) -> ApplicationResult<()> {
        self.list
            .start_live_sync(
                &self.context.store,
                self.live_query(),
                self.context.ledger.clone(),
            )
            .await
    }

    pub fn stop_live_sync(&self) {
        self.list.stop();
    }

    /// 乐观追加到列表末尾
    pub async fn insert_local(&self, comment: Comment) -> bool {
        self.list.insert_local(comment).await
    }

    pub async fn remove_local(&self, comment_id: &CommentId) -> bool {
        self.list.remove_local(comment_id).await
    }

    pub async fn comments(&self) -> Vec<Comment> {
        self.list.items().await
    }

    pub fn version(&self) -> u64 {
        self.list.version()
    }

    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.list.subscribe_changes()
    }

    /// 发表评论，带图片时分两步：先上传图片，再写入引用该图片的评论。
    ///
    /// 第一步失败则不会尝试第二步，调用方得到明确的 `UploadFailed`。
    /// 第二步失败时已上传的图片成为孤儿，不做清理。
    pub async fn create_comment(
        &self,
        body: impl Into<String>,
        image: Option<ImageUpload>,
    ) -> ApplicationResult<Comment> {
        let body = body.into();
        let author = current_author(self.context.identity.as_ref())?;
        if body.trim().is_empty() && image.is_none() {
            return Err(DomainError::EmptyContent.into());
        }

        let image_ref = match image {
            Some(upload) => Some(self.context.images.upload(upload).await.map_err(|err| {
                warn!(post_id = %self.post_id, "评论图片上传失败: {}", err);
                ApplicationError::UploadFailed(err)
            })?),
            None => None,
        };

        let comment = Comment::compose(
            CommentId::generate(),
            self.post_id.clone(),
            &author,
            CommentDraft { body, image_ref },
            self.context.clock.now(),
        )?;
        let document = comment.to_document()?;

        self.list.insert_local(comment.clone()).await;
        if let Err(err) = self
            .context
            .store
            .set_document(&self.context.collections.comments, document, false)
            .await
        {
            warn!(comment_id = %comment.id, post_id = %self.post_id, "写入评论失败: {}", err);
            self.list.remove_local(&comment.id).await;
            return Err(err.into());
        }

        info!("评论发表成功: {} ({})", comment.id, self.post_id);
        Ok(comment)
    }

    /// 删除评论，只有作者本人可以删除
    pub async fn delete_comment(&self, comment_id: &CommentId) -> ApplicationResult<()> {
        let user_id = self.context.identity.current_user_id();
        let comment = self.load_comment(comment_id).await?;
        if !comment.is_authored_by(&user_id) {
            return Err(ApplicationError::unauthorized(format!(
                "user {user_id} cannot delete comment {comment_id}"
            )));
        }

        self.context
            .store
            .delete_document(&self.context.collections.comments, comment_id.as_str())
            .await?;
        self.list.remove_local(comment_id).await;
        info!("用户 {} 删除评论 {}", user_id, comment_id);
        Ok(())
    }

    async fn load_comment(&self, comment_id: &CommentId) -> ApplicationResult<Comment> {
        if let Some(comment) = self.list.get(comment_id).await {
            return Ok(comment);
        }

        let document = self
            .context
            .store
            .get_document(&self.context.collections.comments, comment_id.as_str())
            .await?
            .ok_or_else(|| ApplicationError::not_found(format!("comment {comment_id}")))?;
        Ok(Comment::from_document(&document)?)
    }

    pub async fn vote(
        &self,
        comment_id: &CommentId,
        direction: VoteDirection,
    ) -> ApplicationResult<VoteReceipt> {
        self.list
            .vote(comment_id, direction, &self.context.ledger)
            .await
    }

    pub async fn my_vote(&self, comment_id: &CommentId) -> VoteValue {
        self.context
            .ledger
            .current_vote(&EntityRef::comment(comment_id))
            .await
    }

    pub fn dispose(&self) {
        self.list.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.list.is_disposed()
    }
}

impl Drop for CommentStreamController {
    fn drop(&mut self) {
        self.dispose();
    }
}
