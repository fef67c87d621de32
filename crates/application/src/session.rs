//! 会话装配
//!
//! 所有同步器与控制器都在会话内显式构造，依赖通过注入获得；
//! 图片缓存和投票状态缓存由会话持有并在它们之间共享。

use std::sync::Arc;

use config::{AppConfig, CollectionConfig};
use domain::PostId;

use crate::cache::{ImageCache, VoteStateCache};
use crate::clock::Clock;
use crate::comments::CommentStreamController;
use crate::feed::FeedSynchronizer;
use crate::identity::IdentityProvider;
use crate::media::{ImageLoader, MediaStore};
use crate::store::DocumentStore;
use crate::vote_ledger::VoteLedger;

/// 外部协作方与共享缓存
pub struct SessionDependencies {
    pub store: Arc<dyn DocumentStore>,
    pub media: Arc<dyn MediaStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub clock: Arc<dyn Clock>,
    pub vote_cache: Arc<VoteStateCache>,
    pub image_cache: Arc<ImageCache>,
}

/// 同步器与控制器共用的上下文
#[derive(Clone)]
pub struct SyncContext {
    pub store: Arc<dyn DocumentStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub clock: Arc<dyn Clock>,
    pub ledger: Arc<VoteLedger>,
    pub images: Arc<ImageLoader>,
    pub collections: CollectionConfig,
}

pub struct FeedSession {
    context: SyncContext,
    tag_filter: Option<String>,
    page_size: usize,
}

impl FeedSession {
    pub fn new(config: &AppConfig, deps: SessionDependencies) -> Self {
        let ledger = Arc::new(VoteLedger::new(
            deps.store.clone(),
            deps.identity.clone(),
            deps.vote_cache,
            config.collections.clone(),
            config.feed.vote_fetch_chunk_size,
        ));
        let images = Arc::new(ImageLoader::new(deps.media, deps.image_cache));

        Self {
            context: SyncContext {
                store: deps.store,
                identity: deps.identity,
                clock: deps.clock,
                ledger,
                images,
                collections: config.collections.clone(),
            },
            tag_filter: config.feed.tag_filter.clone(),
            page_size: config.feed.page_size as usize,
        }
    }

    /// 使用配置中的标签过滤
    pub fn feed(&self) -> FeedSynchronizer {
        FeedSynchronizer::new(self.context.clone(), self.tag_filter.clone())
    }

    pub fn feed_with_tag(&self, tag: Option<String>) -> FeedSynchronizer {
        FeedSynchronizer::new(self.context.clone(), tag)
    }

    pub fn comments(&self, post_id: PostId) -> CommentStreamController {
        CommentStreamController::new(self.context.clone(), post_id)
    }

    pub fn ledger(&self) -> Arc<VoteLedger> {
        self.context.ledger.clone()
    }

    pub fn images(&self) -> Arc<ImageLoader> {
        self.context.images.clone()
    }

    /// 配置的默认每页条数
    pub fn page_size(&self) -> usize {
        self.page_size
    }
}
