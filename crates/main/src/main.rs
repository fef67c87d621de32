//! 主应用程序入口
//!
//! 在内存存储上装配一个会话，演示信息流同步、评论与投票的完整流程。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use application::media::memory::MemoryMediaStore;
use application::store::memory::MemoryDocumentStore;
use application::{
    DocumentStore, FeedSession, ImageCache, ImageUpload, PostComposition, SessionDependencies,
    StaticIdentity, SystemClock, VoteStateCache,
};
use config::AppConfig;
use domain::{DocumentEntity, UserId, UserProfile, VoteDirection};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().unwrap_or_else(|err| {
        eprintln!("配置加载失败，使用默认配置: {err}");
        AppConfig::from_env_with_defaults()
    });

    // 初始化日志，RUST_LOG 优先于配置
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store = MemoryDocumentStore::new();
    let media = Arc::new(MemoryMediaStore::new());
    let vote_cache = Arc::new(VoteStateCache::new());
    let image_cache = Arc::new(ImageCache::new());

    for (id, name) in [("ann", "Ann"), ("bo", "Bo")] {
        let profile = UserProfile::new(UserId::new(id), name);
        store
            .set_document(&config.collections.users, profile.to_document()?, false)
            .await?;
    }

    let session_for = |user: &str, name: &str| {
        FeedSession::new(
            &config,
            SessionDependencies {
                store: Arc::new(store.clone()),
                media: media.clone(),
                identity: Arc::new(StaticIdentity::new(user, name)),
                clock: Arc::new(SystemClock),
                vote_cache: vote_cache.clone(),
                image_cache: image_cache.clone(),
            },
        )
    };

    // Ann 发帖
    let ann = session_for("ann", "Ann");
    let ann_feed = ann.feed();
    for (body, tag) in [("早上好", Some("daily")), ("今天的午饭", Some("food"))] {
        ann_feed
            .create_post(PostComposition {
                body: body.to_string(),
                tag: tag.map(str::to_string),
                ..PostComposition::default()
            })
            .await?;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let photo = ann_feed
        .create_post(PostComposition {
            body: "看看这张照片".to_string(),
            image: Some(ImageUpload::new(vec![0x89, 0x50, 0x4e, 0x47], "image/png")),
            ..PostComposition::default()
        })
        .await?;

    // Bo 打开信息流：冷启动分页 + 实时订阅
    let bo = session_for("bo", "Bo");
    let bo_feed = bo.feed();
    bo_feed.fetch_next_page(bo.page_size()).await?;
    bo_feed.start_live_sync().await?;

    bo_feed.vote(&photo.id, VoteDirection::Up).await?;
    bo_feed.vote(&photo.id, VoteDirection::Down).await?;

    let thread = bo.comments(photo.id.clone());
    thread.start_live_sync().await?;
    thread.create_comment("拍得真好", None).await?;

    let mut changes = bo_feed.subscribe_changes();
    ann_feed
        .create_post(PostComposition {
            body: "新帖子".to_string(),
            ..PostComposition::default()
        })
        .await?;
    tokio::time::timeout(Duration::from_secs(1), changes.changed())
        .await
        .context("等待信息流更新超时")??;

    for post in bo_feed.posts().await {
        tracing::info!(
            post_id = %post.id,
            votes = post.vote_count,
            tag = post.tag.as_deref().unwrap_or("-"),
            "{}: {}",
            post.author_display_name,
            post.body
        );
    }
    for comment in thread.comments().await {
        tracing::info!(comment_id = %comment.id, "{}: {}", comment.author_display_name, comment.body);
    }

    let image = photo.image_ref.context("照片帖子缺少图片")?;
    let bytes = bo.images().load(&image).await?;
    tracing::info!(image = %image, size = bytes.len(), "图片已从缓存加载");

    let karma = bo.ledger().reputation(&UserId::new("ann")).await?;
    tracing::info!("Ann 当前声望: {}", karma);

    thread.dispose();
    bo_feed.dispose();
    ann_feed.dispose();
    Ok(())
}
