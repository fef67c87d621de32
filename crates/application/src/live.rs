//! 实时同步列表
//!
//! 信息流与评论串共用的核心：一个按 `created_at` 排序、按 ID 去重的列表，
//! 汇合三条数据路径——实时快照、分页结果与本地乐观插入。
//!
//! 每次建立或拆除订阅都会递增 `generation`；快照处理任务在修改列表前
//! 先在锁内校验自己的代号，过期（已停止、已重新订阅或已释放）的快照不会
//! 产生任何修改。分页同理：`page_epoch` 与游标只在写锁内修改，
//! 重置之前发出的分页请求在锁内被识别并丢弃。

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use domain::{
    append_page, merge, remove_by_id, DocumentEntity, EntityRef, PageMerge, SortOrder, SyncEntity,
    Votable, VoteDirection,
};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ApplicationError, ApplicationResult};
use crate::store::{
    Cursor, DocumentStore, ListenerRegistration, Query, Snapshot, StoreResult, Subscription,
};
use crate::vote_ledger::{VoteLedger, VoteReceipt, VoteTarget};

struct ListState<E: SyncEntity> {
    items: Vec<E>,
    /// 尚未被服务端确认的乐观条目
    pending: HashSet<E::Id>,
    /// 最后一个成功追加的分页位置
    cursor: Option<Cursor>,
    /// 重置时递增，使进行中的分页结果作废
    page_epoch: u64,
}

/// 分页请求的起点：发出时的代号与游标
pub(crate) struct PageStart {
    pub(crate) epoch: u64,
    pub(crate) cursor: Option<Cursor>,
}

struct LiveTask {
    registration: ListenerRegistration,
    handle: JoinHandle<()>,
}

pub(crate) struct LiveList<E: SyncEntity> {
    name: &'static str,
    order: SortOrder,
    state: RwLock<ListState<E>>,
    generation: AtomicU64,
    disposed: AtomicBool,
    live_task: Mutex<Option<LiveTask>>,
    version: watch::Sender<u64>,
}

impl<E> LiveList<E>
where
    E: SyncEntity + DocumentEntity + Votable + Send + Sync + 'static,
    E::Id: fmt::Display + Send + Sync + 'static,
{
    pub(crate) fn new(name: &'static str, order: SortOrder) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            name,
            order,
            state: RwLock::new(ListState {
                items: Vec::new(),
                pending: HashSet::new(),
                cursor: None,
                page_epoch: 0,
            }),
            generation: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            live_task: Mutex::new(None),
            version,
        }
    }

    /// 拆除已有订阅后重新订阅。建立失败时保留原列表并返回错误。
    pub(crate) async fn start_live_sync(
        self: &Arc<Self>,
        store: &Arc<dyn DocumentStore>,
        query: Query,
        ledger: Arc<VoteLedger>,
    ) -> ApplicationResult<()> {
        if self.is_disposed() {
            debug!(list = self.name, "列表已释放，忽略实时同步请求");
            return Ok(());
        }

        self.stop();
        let generation = self.generation.load(Ordering::SeqCst);

        let Subscription {
            snapshots,
            registration,
        } = match store.subscribe(&query).await {
            Ok(subscription) => subscription,
            Err(err) => {
                error!(list = self.name, collection = %query.collection, "建立实时订阅失败: {}", err);
                return Err(err.into());
            }
        };

        let mut live_task = self.live_task.lock().unwrap_or_else(PoisonError::into_inner);
        // 等待订阅期间可能已被停止、重新订阅或释放
        if self.is_stale(generation) {
            debug!(list = self.name, generation, "订阅建立时已过期，直接取消");
            drop(registration);
            return Ok(());
        }

        let handle = tokio::spawn(Self::apply_snapshots(
            Arc::downgrade(self),
            generation,
            snapshots,
            ledger,
        ));
        *live_task = Some(LiveTask {
            registration,
            handle,
        });
        info!(list = self.name, collection = %query.collection, generation, "实时同步已启动");
        Ok(())
    }

    async fn apply_snapshots(
        weak: Weak<Self>,
        generation: u64,
        mut snapshots: mpsc::UnboundedReceiver<StoreResult<Snapshot>>,
        ledger: Arc<VoteLedger>,
    ) {
        while let Some(result) = snapshots.recv().await {
            let Some(list) = weak.upgrade() else {
                break;
            };

            match result {
                Ok(snapshot) => {
                    let items = snapshot.decode::<E>();
                    let entities: Vec<EntityRef> = items.iter().map(Votable::entity_ref).collect();
                    if !list.apply_snapshot(generation, items).await {
                        break;
                    }
                    ledger.prime(&entities).await;
                }
                Err(err) => {
                    warn!(list = list.name, generation, "实时快照出错: {}", err);
                }
            }
        }
    }

    /// 同步拆除订阅；没有订阅时为空操作
    pub(crate) fn stop(&self) {
        let task = {
            let mut live_task = self.live_task.lock().unwrap_or_else(PoisonError::into_inner);
            self.generation.fetch_add(1, Ordering::SeqCst);
            live_task.take()
        };

        if let Some(LiveTask {
            mut registration,
            handle,
        }) = task
        {
            registration.cancel();
            handle.abort();
            info!(list = self.name, "实时同步已停止");
        }
    }

    /// 以快照替换工作集。仍未确认的乐观条目保留并按时间归位。
    ///
    /// 代号过期时不做任何修改并返回 false。
    pub(crate) async fn apply_snapshot(&self, generation: u64, authoritative: Vec<E>) -> bool {
        let mut guard = self.state.write().await;
        if self.is_stale(generation) {
            debug!(list = self.name, generation, "丢弃过期快照");
            return false;
        }

        let state = &mut *guard;
        let confirmed: HashSet<&E::Id> = authoritative.iter().map(|item| item.entity_id()).collect();
        state.pending.retain(|id| !confirmed.contains(id));

        let placeholders: Vec<E> = state
            .items
            .iter()
            .filter(|item| state.pending.contains(item.entity_id()))
            .cloned()
            .collect();
        state.items = merge(&placeholders, &authoritative, self.order);
        debug!(
            list = self.name,
            generation,
            items = state.items.len(),
            pending = state.pending.len(),
            "已应用快照"
        );
        drop(guard);

        self.bump_version();
        true
    }

    pub(crate) async fn page_start(&self) -> PageStart {
        let state = self.state.read().await;
        PageStart {
            epoch: state.page_epoch,
            cursor: state.cursor.clone(),
        }
    }

    pub(crate) async fn cursor(&self) -> Option<Cursor> {
        self.state.read().await.cursor.clone()
    }

    /// 追加一页结果并推进游标，不重排已展示的条目。
    ///
    /// 列表已释放或在请求期间被重置时不做任何修改并返回 None。
    pub(crate) async fn append_page(
        &self,
        epoch: u64,
        page: Vec<E>,
        next_cursor: Option<Cursor>,
    ) -> Option<PageMerge<E::Id>> {
        let mut guard = self.state.write().await;
        if self.is_disposed() || guard.page_epoch != epoch {
            debug!(list = self.name, epoch, "分页结果已过期，丢弃");
            return None;
        }

        let state = &mut *guard;
        let changed = !page.is_empty();
        let outcome = append_page(&mut state.items, &mut state.pending, page);
        if next_cursor.is_some() {
            state.cursor = next_cursor;
        }
        drop(guard);

        if changed {
            self.bump_version();
        }
        Some(outcome)
    }

    /// 乐观插入；ID 已存在或列表已释放时忽略
    pub(crate) async fn insert_local(&self, item: E) -> bool {
        if self.is_disposed() {
            return false;
        }

        let mut state = self.state.write().await;
        let id = item.entity_id().clone();
        if state.items.iter().any(|existing| existing.entity_id() == &id) {
            return false;
        }

        match self.order {
            SortOrder::NewestFirst => state.items.insert(0, item),
            SortOrder::OldestFirst => state.items.push(item),
        }
        state.pending.insert(id);
        drop(state);

        self.bump_version();
        true
    }

    /// 移除条目；ID 不存在不是错误
    pub(crate) async fn remove_local(&self, id: &E::Id) -> bool {
        let mut state = self.state.write().await;
        state.pending.remove(id);
        let removed = remove_by_id(&mut state.items, id);
        drop(state);

        if removed {
            self.bump_version();
        }
        removed
    }

    /// 原位修改一个条目
    pub(crate) async fn update_local(&self, id: &E::Id, update: impl FnOnce(&mut E)) -> bool {
        let mut state = self.state.write().await;
        let Some(item) = state.items.iter_mut().find(|item| item.entity_id() == id) else {
            return false;
        };
        update(item);
        drop(state);

        self.bump_version();
        true
    }

    pub(crate) async fn get(&self, id: &E::Id) -> Option<E> {
        self.state
            .read()
            .await
            .items
            .iter()
            .find(|item| item.entity_id() == id)
            .cloned()
    }

    pub(crate) async fn items(&self) -> Vec<E> {
        self.state.read().await.items.clone()
    }

    /// 清空列表与游标，并作废所有进行中的分页
    pub(crate) async fn clear(&self) {
        let mut state = self.state.write().await;
        state.items.clear();
        state.pending.clear();
        state.cursor = None;
        state.page_epoch += 1;
        drop(state);

        self.bump_version();
    }

    /// 从列表中投票：缓存状态转换、本地票数乐观更新，然后写入远程
    pub(crate) async fn vote(
        &self,
        id: &E::Id,
        direction: VoteDirection,
        ledger: &VoteLedger,
    ) -> ApplicationResult<VoteReceipt> {
        let item = self
            .get(id)
            .await
            .ok_or_else(|| ApplicationError::not_found(format!("{} {}", E::KIND, id)))?;
        let target = VoteTarget::of(&item);

        let transition = ledger.begin_vote(&target.entity, direction).await?;
        self.update_local(id, |item| item.apply_vote_delta(transition.delta()))
            .await;

        Ok(ledger.apply_vote_delta(&target, transition).await)
    }

    /// 停止同步，之后所有回调都成为空操作
    pub(crate) fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.stop();
            debug!(list = self.name, "列表已释放");
        }
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn is_stale(&self, generation: u64) -> bool {
        self.is_disposed() || self.generation.load(Ordering::SeqCst) != generation
    }

    #[cfg(test)]
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub(crate) fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump_version(&self) {
        self.version.send_modify(|version| *version += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use domain::{Author, Post, PostDraft, PostId, UserId};

    fn post(id: &str, at: i64) -> Post {
        let author = Author::new(UserId::new("a"), "Ann", None).unwrap();
        let draft = PostDraft {
            body: format!("post {id}"),
            ..PostDraft::default()
        };
        Post::compose(
            PostId::new(id),
            &author,
            draft,
            Utc.timestamp_millis_opt(at).unwrap(),
        )
        .unwrap()
    }

    fn ids(posts: &[Post]) -> Vec<&str> {
        posts.iter().map(|p| p.id.as_str()).collect()
    }

    #[tokio::test]
    async fn stale_snapshot_is_ignored() {
        let list: LiveList<Post> = LiveList::new("feed", SortOrder::NewestFirst);
        let generation = list.generation();
        assert!(list.apply_snapshot(generation, vec![post("a", 1)]).await);
        let version = list.version();

        list.stop();
        assert!(!list.apply_snapshot(generation, vec![post("b", 2)]).await);
        assert_eq!(list.version(), version);
        assert_eq!(ids(&list.items().await), vec!["a"]);
    }

    #[tokio::test]
    async fn optimistic_insert_is_replaced_by_server_copy() {
        let list: LiveList<Post> = LiveList::new("feed", SortOrder::NewestFirst);
        let generation = list.generation();
        list.apply_snapshot(generation, vec![post("a", 10)]).await;

        let mut local = post("mine", 5);
        local.body = "local".into();
        assert!(list.insert_local(local).await);
        assert_eq!(ids(&list.items().await), vec!["mine", "a"]);

        let server = post("mine", 20);
        list.apply_snapshot(generation, vec![post("a", 10), server.clone()])
            .await;

        let items = list.items().await;
        assert_eq!(ids(&items), vec!["mine", "a"]);
        assert_eq!(items[0], server);
    }

    #[tokio::test]
    async fn unconfirmed_insert_survives_snapshot() {
        let list: LiveList<Post> = LiveList::new("feed", SortOrder::NewestFirst);
        let generation = list.generation();
        list.insert_local(post("mine", 15)).await;

        list.apply_snapshot(generation, vec![post("a", 20), post("b", 10)])
            .await;
        assert_eq!(ids(&list.items().await), vec!["a", "mine", "b"]);
    }

    #[tokio::test]
    async fn remove_missing_id_is_not_an_error() {
        let list: LiveList<Post> = LiveList::new("feed", SortOrder::NewestFirst);
        let version = list.version();
        assert!(!list.remove_local(&PostId::new("nope")).await);
        assert_eq!(list.version(), version);
    }

    fn cursor_at(id: &str, at: i64) -> Option<Cursor> {
        Some(Cursor {
            document_id: id.to_owned(),
            order_value: at.into(),
        })
    }

    #[tokio::test]
    async fn page_from_before_clear_is_discarded() {
        let list: LiveList<Post> = LiveList::new("feed", SortOrder::NewestFirst);
        let start = list.page_start().await;
        list.clear().await;
        let version = list.version();

        let outcome = list
            .append_page(start.epoch, vec![post("a", 1)], cursor_at("a", 1))
            .await;
        assert!(outcome.is_none());
        assert!(list.items().await.is_empty());
        assert_eq!(list.cursor().await, None);
        assert_eq!(list.version(), version);
    }

    #[tokio::test]
    async fn page_advances_cursor_only_when_current() {
        let list: LiveList<Post> = LiveList::new("feed", SortOrder::NewestFirst);
        let start = list.page_start().await;
        let outcome = list
            .append_page(start.epoch, vec![post("b", 2), post("a", 1)], cursor_at("a", 1))
            .await
            .unwrap();
        assert_eq!(outcome.appended, 2);
        assert_eq!(list.cursor().await, cursor_at("a", 1));

        list.dispose();
        let start = list.page_start().await;
        assert!(list
            .append_page(start.epoch, vec![post("c", 0)], cursor_at("c", 0))
            .await
            .is_none());
        assert_eq!(list.cursor().await, cursor_at("a", 1));
    }

    #[tokio::test]
    async fn disposed_list_rejects_inserts() {
        let list: LiveList<Post> = LiveList::new("feed", SortOrder::NewestFirst);
        list.dispose();
        assert!(!list.insert_local(post("a", 1)).await);
        assert!(list.is_stale(list.generation()));
    }
}
