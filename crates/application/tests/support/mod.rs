//! 集成测试共用的会话装配与数据准备

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use application::media::memory::MemoryMediaStore;
use application::store::memory::MemoryDocumentStore;
use application::{
    CommentStreamController, DocumentStore, FeedSession, FeedSynchronizer, FieldUpdate,
    ImageCache, MediaStore, Query, SessionDependencies, Snapshot, StaticIdentity, SteppingClock,
    StoreResult, Subscription, VoteStateCache,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use config::AppConfig;
use domain::{
    Author, Comment, CommentDraft, CommentId, Document, DocumentEntity, Post, PostDraft, PostId,
    Timestamp, UserId, UserProfile,
};
use tokio::sync::{Notify, Semaphore};

pub fn at(ms: i64) -> Timestamp {
    Utc.timestamp_millis_opt(ms).unwrap()
}

/// 一个远程存储 + 一组共享缓存，可以为不同用户建立会话
pub struct Harness {
    pub store: MemoryDocumentStore,
    pub media: Arc<dyn MediaStore>,
    pub vote_cache: Arc<VoteStateCache>,
    pub image_cache: Arc<ImageCache>,
    pub config: AppConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_media(Arc::new(MemoryMediaStore::new()))
    }

    pub fn with_media(media: Arc<dyn MediaStore>) -> Self {
        Self {
            store: MemoryDocumentStore::new(),
            media,
            vote_cache: Arc::new(VoteStateCache::new()),
            image_cache: Arc::new(ImageCache::new()),
            config: AppConfig::default(),
        }
    }

    pub fn session(&self, user: &str) -> FeedSession {
        self.session_with_store(user, Arc::new(self.store.clone()))
    }

    /// 使用包装过的存储建立会话，数据仍落在同一个内存存储中
    pub fn session_with_store(&self, user: &str, store: Arc<dyn DocumentStore>) -> FeedSession {
        FeedSession::new(
            &self.config,
            SessionDependencies {
                store,
                media: self.media.clone(),
                identity: Arc::new(StaticIdentity::new(user, user.to_uppercase())),
                clock: Arc::new(SteppingClock::new(at(1_000_000), chrono::Duration::seconds(1))),
                vote_cache: self.vote_cache.clone(),
                image_cache: self.image_cache.clone(),
            },
        )
    }

    pub async fn seed_post(&self, id: &str, author: &str, created_ms: i64) -> Post {
        self.seed_post_with(id, author, created_ms, 0, None).await
    }

    pub async fn seed_post_with(
        &self,
        id: &str,
        author: &str,
        created_ms: i64,
        vote_count: i64,
        tag: Option<&str>,
    ) -> Post {
        let author = Author::new(UserId::new(author), author.to_uppercase(), None).unwrap();
        let draft = PostDraft {
            body: format!("post {id}"),
            tag: tag.map(str::to_owned),
            ..PostDraft::default()
        };
        let mut post = Post::compose(PostId::new(id), &author, draft, at(created_ms)).unwrap();
        post.vote_count = vote_count;
        self.store
            .set_document("posts", post.to_document().unwrap(), false)
            .await
            .unwrap();
        post
    }

    pub async fn seed_comment(&self, id: &str, post_id: &str, author: &str, created_ms: i64) -> Comment {
        let author = Author::new(UserId::new(author), author.to_uppercase(), None).unwrap();
        let draft = CommentDraft {
            body: format!("comment {id}"),
            image_ref: None,
        };
        let comment = Comment::compose(
            CommentId::new(id),
            PostId::new(post_id),
            &author,
            draft,
            at(created_ms),
        )
        .unwrap();
        self.store
            .set_document("comments", comment.to_document().unwrap(), false)
            .await
            .unwrap();
        comment
    }

    pub async fn seed_user(&self, id: &str, karma: i64) {
        let mut profile = UserProfile::new(UserId::new(id), id.to_uppercase());
        profile.karma = karma;
        self.store
            .set_document("users", profile.to_document().unwrap(), false)
            .await
            .unwrap();
    }

    pub fn stored_vote_count(&self, collection: &str, id: &str) -> i64 {
        self.store
            .document(collection, id)
            .and_then(|doc| doc.get("vote_count").and_then(|v| v.as_i64()))
            .unwrap_or(0)
    }
}

/// 等待实时同步任务把列表推进到期望状态
pub async fn wait_for_posts(
    feed: &FeedSynchronizer,
    check: impl Fn(&[Post]) -> bool,
) -> Vec<Post> {
    for _ in 0..200 {
        let posts = feed.posts().await;
        if check(&posts) {
            return posts;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("feed did not reach expected state: {:?}", feed.posts().await);
}

pub async fn wait_for_comments(
    controller: &CommentStreamController,
    check: impl Fn(&[Comment]) -> bool,
) -> Vec<Comment> {
    for _ in 0..200 {
        let comments = controller.comments().await;
        if check(&comments) {
            return comments;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "comment stream did not reach expected state: {:?}",
        controller.comments().await
    );
}

pub fn post_ids(posts: &[Post]) -> Vec<&str> {
    posts.iter().map(|post| post.id.as_str()).collect()
}

/// 可以让下一次帖子查询停在半途的存储，用于制造“请求进行中”的时序
pub struct GatedStore {
    inner: MemoryDocumentStore,
    armed: AtomicBool,
    entered: Notify,
    release: Semaphore,
}

impl GatedStore {
    pub fn new(inner: MemoryDocumentStore) -> Arc<Self> {
        Arc::new(Self {
            inner,
            armed: AtomicBool::new(false),
            entered: Notify::new(),
            release: Semaphore::new(0),
        })
    }

    /// 下一次帖子查询将阻塞，直到调用 `release`
    pub fn hold_next_query(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// 等待被拦住的查询开始
    pub async fn wait_until_held(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.add_permits(1);
    }
}

#[async_trait]
impl DocumentStore for GatedStore {
    async fn query(&self, query: &Query) -> StoreResult<Snapshot> {
        if query.collection == "posts" && self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            let _permit = self.release.acquire().await;
        }
        self.inner.query(query).await
    }

    async fn subscribe(&self, query: &Query) -> StoreResult<Subscription> {
        self.inner.subscribe(query).await
    }

    async fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        self.inner.get_document(collection, id).await
    }

    async fn set_document(
        &self,
        collection: &str,
        document: Document,
        merge: bool,
    ) -> StoreResult<()> {
        self.inner.set_document(collection, document, merge).await
    }

    async fn update_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        update: FieldUpdate,
    ) -> StoreResult<()> {
        self.inner.update_field(collection, id, field, update).await
    }

    async fn delete_document(&self, collection: &str, id: &str) -> StoreResult<()> {
        self.inner.delete_document(collection, id).await
    }
}
