//! 信息流同步器
//!
//! 维护一个按 `created_at` 降序、无重复的帖子列表，汇合冷启动分页、
//! 实时订阅与本地乐观插入三条数据路径。

use std::sync::Arc;

use domain::{
    normalize_tag, DocumentEntity, DomainError, EntityRef, GeoPoint, Post, PostDraft, PostId,
    SortOrder, VoteDirection, VoteValue,
};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ApplicationError, ApplicationResult};
use crate::identity::current_author;
use crate::live::LiveList;
use crate::media::ImageUpload;
use crate::session::SyncContext;
use crate::store::{Cursor, Direction, FieldUpdate, Filter, Query};
use crate::vote_ledger::VoteReceipt;

/// 分页游标：最后一个成功拉取的帖子
#[derive(Debug, Clone, PartialEq)]
pub struct FeedCursor(Cursor);

impl FeedCursor {
    pub fn post_id(&self) -> PostId {
        PostId::new(self.0.document_id.clone())
    }
}

/// 新帖子的内容，图片以原始字节提供，先上传再写入
#[derive(Debug, Clone, Default)]
pub struct PostComposition {
    pub body: String,
    pub image: Option<ImageUpload>,
    pub tag: Option<String>,
    pub geo: Option<GeoPoint>,
}

pub struct FeedSynchronizer {
    context: SyncContext,
    tag_filter: Option<String>,
    list: Arc<LiveList<Post>>,
    /// 保证同一时刻只有一个分页请求
    page_lock: tokio::sync::Mutex<()>,
}

impl FeedSynchronizer {
    pub fn new(context: SyncContext, tag_filter: Option<String>) -> Self {
        Self {
            context,
            tag_filter,
            list: Arc::new(LiveList::new("feed", SortOrder::NewestFirst)),
            page_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn tag_filter(&self) -> Option<&str> {
        self.tag_filter.as_deref()
    }

    fn base_query(&self) -> Query {
        let query = Query::collection(&self.context.collections.posts);
        let query = match &self.tag_filter {
            Some(tag) => query.filter(Filter::eq(Post::FIELD_TAG, tag.as_str())),
            None => query,
        };
        query.order_by(Post::FIELD_CREATED_AT, Direction::Descending)
    }

    /// 拆除已有订阅，然后订阅完整（或按标签过滤）的帖子查询
    pub async fn start_live_sync(&self) -> ApplicationResult<()> {
        self.list
            .start_live_sync(
                &self.context.store,
                self.base_query(),
                self.context.ledger.clone(),
            )
            .await
    }

    pub fn stop_live_sync(&self) {
        self.list.stop();
    }

    /// 拉取游标之后（更早）的最多 `page_size` 个帖子并追加到列表末尾。
    ///
    /// 返回新追加的条目数。空页不做任何修改；失败时游标保持不变。
    /// 请求期间列表被释放或重置时结果被丢弃。
    pub async fn fetch_next_page(&self, page_size: usize) -> ApplicationResult<usize> {
        if page_size == 0 {
            return Err(DomainError::invalid_argument("page_size", "must be greater than 0").into());
        }
        if self.list.is_disposed() {
            return Ok(0);
        }

        let _guard = self.page_lock.lock().await;
        let start = self.list.page_start().await;
        let query = self.base_query().limit(page_size).start_after(start.cursor);

        let snapshot = match self.context.store.query(&query).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(page_size, "拉取下一页失败，游标保持不变: {}", err);
                return Err(err.into());
            }
        };
        if snapshot.is_empty() {
            debug!("没有更多帖子");
            return Ok(0);
        }

        let next_cursor = snapshot.cursor_after_last(Post::FIELD_CREATED_AT);
        let page = snapshot.decode::<Post>();
        let entities: Vec<EntityRef> = page.iter().map(|post| EntityRef::post(&post.id)).collect();
        let Some(outcome) = self.list.append_page(start.epoch, page, next_cursor).await else {
            return Ok(0);
        };
        info!(
            appended = outcome.appended,
            confirmed = outcome.confirmed.len(),
            "信息流已翻页"
        );

        self.context.ledger.prime(&entities).await;
        Ok(outcome.appended)
    }

    pub async fn cursor(&self) -> Option<FeedCursor> {
        self.list.cursor().await.map(FeedCursor)
    }

    /// 乐观插入到列表最前；服务端副本到达后替换占位
    pub async fn insert_local(&self, post: Post) -> bool {
        self.list.insert_local(post).await
    }

    pub async fn remove_local(&self, post_id: &PostId) -> bool {
        self.list.remove_local(post_id).await
    }

    pub async fn posts(&self) -> Vec<Post> {
        self.list.items().await
    }

    pub async fn post(&self, post_id: &PostId) -> Option<Post> {
        self.list.get(post_id).await
    }

    /// 列表版本号，每次变化递增
    pub fn version(&self) -> u64 {
        self.list.version()
    }

    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.list.subscribe_changes()
    }

    pub async fn vote(
        &self,
        post_id: &PostId,
        direction: VoteDirection,
    ) -> ApplicationResult<VoteReceipt> {
        self.list
            .vote(post_id, direction, &self.context.ledger)
            .await
    }

    pub async fn my_vote(&self, post_id: &PostId) -> VoteValue {
        self.context
            .ledger
            .current_vote(&EntityRef::post(post_id))
            .await
    }

    /// 发帖：可选的图片先上传，成功后写入帖子文档并乐观插入。
    ///
    /// 图片上传失败时不写入任何文档；文档写入失败时撤回本地插入。
    pub async fn create_post(&self, composition: PostComposition) -> ApplicationResult<Post> {
        let author = current_author(self.context.identity.as_ref())?;
        if composition.body.trim().is_empty() && composition.image.is_none() {
            return Err(DomainError::EmptyContent.into());
        }
        let tag = normalize_tag(composition.tag)?;

        let image_ref = match composition.image {
            Some(upload) => Some(self.context.images.upload(upload).await.map_err(|err| {
                warn!(author_id = %author.id, "帖子图片上传失败: {}", err);
                ApplicationError::UploadFailed(err)
            })?),
            None => None,
        };

        let draft = PostDraft {
            body: composition.body,
            image_ref,
            tag,
            geo: composition.geo,
        };
        let post = Post::compose(PostId::generate(), &author, draft, self.context.clock.now())?;
        let document = post.to_document()?;

        self.list.insert_local(post.clone()).await;
        if let Err(err) = self
            .context
            .store
            .set_document(&self.context.collections.posts, document, false)
            .await
        {
            warn!(post_id = %post.id, "写入帖子失败: {}", err);
            self.list.remove_local(&post.id).await;
            return Err(err.into());
        }

        info!("帖子发布成功: {} by {}", post.id, author.id);
        Ok(post)
    }

    /// 删除帖子，只有作者本人可以删除
    pub async fn delete_post(&self, post_id: &PostId) -> ApplicationResult<()> {
        let user_id = self.context.identity.current_user_id();
        let post = self.load_post(post_id).await?;
        if !post.is_authored_by(&user_id) {
            return Err(ApplicationError::unauthorized(format!(
                "user {user_id} cannot delete post {post_id}"
            )));
        }

        self.context
            .store
            .delete_document(&self.context.collections.posts, post_id.as_str())
            .await?;
        self.list.remove_local(post_id).await;
        info!("用户 {} 删除帖子 {}", user_id, post_id);
        Ok(())
    }

    /// 修改标签，只有作者本人可以修改
    pub async fn update_tag(&self, post_id: &PostId, tag: Option<String>) -> ApplicationResult<()> {
        let user_id = self.context.identity.current_user_id();
        let mut post = self.load_post(post_id).await?;
        if !post.is_authored_by(&user_id) {
            return Err(ApplicationError::unauthorized(format!(
                "user {user_id} cannot edit post {post_id}"
            )));
        }

        post.retag(tag)?;
        let value = post.tag.clone().map(Value::from).unwrap_or(Value::Null);
        self.context
            .store
            .update_field(
                &self.context.collections.posts,
                post_id.as_str(),
                Post::FIELD_TAG,
                FieldUpdate::Set(value),
            )
            .await?;

        self.list
            .update_local(post_id, |item| item.tag = post.tag)
            .await;
        Ok(())
    }

    async fn load_post(&self, post_id: &PostId) -> ApplicationResult<Post> {
        if let Some(post) = self.list.get(post_id).await {
            return Ok(post);
        }

        let document = self
            .context
            .store
            .get_document(&self.context.collections.posts, post_id.as_str())
            .await?
            .ok_or_else(|| ApplicationError::not_found(format!("post {post_id}")))?;
        Ok(Post::from_document(&document)?)
    }

    /// 冷启动重置：清空列表与游标，作废进行中的分页，保留投票缓存
    pub async fn reset(&self) {
        self.list.stop();
        self.list.clear().await;
        info!("信息流已重置");
    }

    /// 停止同步，之后进行中的请求完成时都不再修改列表
    pub fn dispose(&self) {
        self.list.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.list.is_disposed()
    }
}

impl Drop for FeedSynchronizer {
    fn drop(&mut self) {
        self.dispose();
    }
}
