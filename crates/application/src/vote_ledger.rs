//! 投票账本
//!
//! 维护当前用户对每个实体的投票状态（缓存在会话共享的 [`VoteStateCache`] 中），
//! 并把每次状态转换落实为三次相互独立的远程写入：投票记录、实体票数、作者声望。
//! 三次写入不构成事务，失败只记录日志，不回滚本地状态。

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use config::CollectionConfig;
use domain::{
    Comment, DocumentEntity, EntityKind, EntityRef, Post, UserId, UserProfile, Votable, Vote,
    VoteDirection, VoteTransition, VoteValue,
};
use tracing::{debug, info, warn};

use crate::cache::VoteStateCache;
use crate::error::{ApplicationError, ApplicationResult};
use crate::identity::IdentityProvider;
use crate::store::{DocumentStore, FieldUpdate, Filter, Query};

/// 投票目标：被投票的实体及其作者
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteTarget {
    pub entity: EntityRef,
    pub author_id: UserId,
}

impl VoteTarget {
    pub fn of(entity: &impl Votable) -> Self {
        Self {
            entity: entity.entity_ref(),
            author_id: entity.author_id().clone(),
        }
    }
}

/// 一次投票的远程写入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteReceipt {
    pub transition: VoteTransition,
    pub record_written: bool,
    pub count_updated: bool,
    pub reputation_updated: bool,
}

impl VoteReceipt {
    /// 三次写入是否全部成功
    pub fn is_complete(&self) -> bool {
        self.record_written && self.count_updated && self.reputation_updated
    }
}

pub struct VoteLedger {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    cache: Arc<VoteStateCache>,
    collections: CollectionConfig,
    fetch_chunk_size: usize,
}

impl VoteLedger {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        cache: Arc<VoteStateCache>,
        collections: CollectionConfig,
        fetch_chunk_size: usize,
    ) -> Self {
        Self {
            store,
            identity,
            cache,
            collections,
            fetch_chunk_size: fetch_chunk_size.max(1),
        }
    }

    /// 当前用户对实体的投票，未缓存时先拉取
    pub async fn current_vote(&self, entity: &EntityRef) -> VoteValue {
        let user_id = self.identity.current_user_id();
        if let Some(value) = self.cache.get(&user_id, entity) {
            return value;
        }
        self.prime(std::slice::from_ref(entity)).await;
        self.cache.get(&user_id, entity).unwrap_or_default()
    }

    /// 批量拉取当前用户对一组实体的投票记录并写入缓存。
    ///
    /// 只查询尚未缓存的实体；查到的记录与“确认没有投票”都会被缓存，
    /// 之后的读取直接命中缓存。查询失败时这些实体保持未缓存。
    pub async fn prime(&self, entities: &[EntityRef]) {
        let user_id = self.identity.current_user_id();

        for kind in [EntityKind::Post, EntityKind::Comment] {
            let missing: BTreeSet<&str> = entities
                .iter()
                .filter(|entity| entity.kind == kind && !self.cache.contains(&user_id, entity))
                .map(|entity| entity.id.as_str())
                .collect();
            if missing.is_empty() {
                continue;
            }

            let missing: Vec<&str> = missing.into_iter().collect();
            for chunk in missing.chunks(self.fetch_chunk_size) {
                self.prime_chunk(&user_id, kind, chunk).await;
            }
        }
    }

    async fn prime_chunk(&self, user_id: &UserId, kind: EntityKind, ids: &[&str]) {
        let query = Query::collection(&self.collections.votes)
            .filter(Filter::eq(Vote::FIELD_USER_ID, user_id.as_str()))
            .filter(Filter::eq(Vote::FIELD_ENTITY_KIND, kind.to_string()))
            .filter(Filter::any_of(Vote::FIELD_ENTITY_ID, ids.iter().copied()));

        let snapshot = match self.store.query(&query).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(user_id = %user_id, %kind, count = ids.len(), "拉取投票记录失败: {}", err);
                return;
            }
        };

        let found: HashMap<String, VoteValue> = snapshot
            .decode::<Vote>()
            .into_iter()
            .filter(|vote| &vote.user_id == user_id)
            .map(|vote| (vote.entity_id, vote.value))
            .collect();

        for id in ids {
            let entity = EntityRef {
                kind,
                id: (*id).to_owned(),
            };
            let value = found.get(*id).copied().unwrap_or_default();
            self.cache.put_if_absent(user_id, &entity, value);
        }
        debug!(
            user_id = %user_id,
            %kind,
            requested = ids.len(),
            found = found.len(),
            "投票状态已缓存"
        );
    }

    /// 在缓存上计算并应用状态转换（乐观更新）。
    ///
    /// 拉取投票记录失败、当前状态未知时返回错误，缓存保持不变。
    pub async fn begin_vote(
        &self,
        entity: &EntityRef,
        direction: VoteDirection,
    ) -> ApplicationResult<VoteTransition> {
        let user_id = self.identity.current_user_id();
        if !self.cache.contains(&user_id, entity) {
            self.prime(std::slice::from_ref(entity)).await;
        }
        self.cache
            .transition(&user_id, entity, direction)
            .ok_or_else(|| {
                warn!(user_id = %user_id, entity = %entity, "投票状态未知，拒绝投票");
                ApplicationError::VoteStateUnavailable(entity.to_string())
            })
    }

    /// 把一次状态转换写入远程：投票记录、实体票数、作者声望。
    ///
    /// 三次写入并发发出，各自独立成败；失败只记录日志。
    pub async fn apply_vote_delta(
        &self,
        target: &VoteTarget,
        transition: VoteTransition,
    ) -> VoteReceipt {
        let user_id = self.identity.current_user_id();
        let delta = transition.delta();
        let (entity_collection, count_field) = self.count_location(target.entity.kind);

        let (record, count, reputation) = futures::join!(
            self.write_vote_record(&user_id, &target.entity, transition),
            self.store.update_field(
                entity_collection,
                &target.entity.id,
                count_field,
                FieldUpdate::Increment(delta),
            ),
            self.store.update_field(
                &self.collections.users,
                target.author_id.as_str(),
                UserProfile::FIELD_KARMA,
                FieldUpdate::Increment(delta),
            ),
        );

        if let Err(err) = &record {
            warn!(entity = %target.entity, "写入投票记录失败: {}", err);
        }
        if let Err(err) = &count {
            warn!(entity = %target.entity, delta, "更新票数失败: {}", err);
        }
        if let Err(err) = &reputation {
            warn!(author_id = %target.author_id, delta, "更新作者声望失败: {}", err);
        }

        let receipt = VoteReceipt {
            transition,
            record_written: record.is_ok(),
            count_updated: count.is_ok(),
            reputation_updated: reputation.is_ok(),
        };

        if receipt.is_complete() {
            info!(
                user_id = %user_id,
                entity = %target.entity,
                from = transition.from.as_i64(),
                to = transition.to.as_i64(),
                "投票成功"
            );
        } else {
            warn!(
                entity = %target.entity,
                record = receipt.record_written,
                count = receipt.count_updated,
                reputation = receipt.reputation_updated,
                "投票写入不完整，远程数据可能不一致"
            );
        }

        receipt
    }

    /// 投票：状态转换 + 远程写入
    pub async fn cast_vote(
        &self,
        target: &VoteTarget,
        direction: VoteDirection,
    ) -> ApplicationResult<VoteReceipt> {
        let transition = self.begin_vote(&target.entity, direction).await?;
        Ok(self.apply_vote_delta(target, transition).await)
    }

    /// 读取用户声望，资料不存在时为 0
    pub async fn reputation(&self, user_id: &UserId) -> ApplicationResult<i64> {
        let document = self
            .store
            .get_document(&self.collections.users, user_id.as_str())
            .await?;
        match document {
            Some(document) => Ok(UserProfile::from_document(&document)?.karma),
            None => Ok(0),
        }
    }

    async fn write_vote_record(
        &self,
        user_id: &UserId,
        entity: &EntityRef,
        transition: VoteTransition,
    ) -> ApplicationResult<()> {
        if transition.clears_vote() {
            self.store
                .delete_document(&self.collections.votes, &Vote::document_id(user_id, entity))
                .await?;
        } else {
            let document = Vote::new(user_id.clone(), entity, transition.to).to_document()?;
            self.store
                .set_document(&self.collections.votes, document, false)
                .await?;
        }
        Ok(())
    }

    /// 实体所在集合及其票数字段
    fn count_location(&self, kind: EntityKind) -> (&str, &'static str) {
        match kind {
            EntityKind::Post => (&self.collections.posts, Post::FIELD_VOTE_COUNT),
            EntityKind::Comment => (&self.collections.comments, Comment::FIELD_VOTE_COUNT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentity;
    use crate::store::memory::{MemoryDocumentStore, StoreOperation};
    use domain::{Document, PostId};
    use serde_json::json;

    fn ledger(store: &MemoryDocumentStore, chunk: usize) -> (VoteLedger, Arc<VoteStateCache>) {
        let cache = Arc::new(VoteStateCache::new());
        let ledger = VoteLedger::new(
            Arc::new(store.clone()),
            Arc::new(StaticIdentity::new("voter", "Vee")),
            cache.clone(),
            CollectionConfig::default(),
            chunk,
        );
        (ledger, cache)
    }

    async fn seed(store: &MemoryDocumentStore, collection: &str, id: &str, fields: serde_json::Value) {
        let serde_json::Value::Object(fields) = fields else {
            panic!("fields must be an object");
        };
        store
            .set_document(collection, Document::new(id, fields), false)
            .await
            .unwrap();
    }

    fn target(post: &str) -> VoteTarget {
        VoteTarget {
            entity: EntityRef::post(&PostId::new(post)),
            author_id: UserId::new("author"),
        }
    }

    #[tokio::test]
    async fn prime_queries_in_chunks_and_caches_absence() {
        let store = MemoryDocumentStore::new();
        seed(
            &store,
            "votes",
            "voter_post_p2",
            json!({"user_id": "voter", "entity_kind": "post", "entity_id": "p2", "value": 1}),
        )
        .await;
        let (ledger, cache) = ledger(&store, 2);

        let entities: Vec<EntityRef> = ["p1", "p2", "p3"]
            .iter()
            .map(|id| EntityRef::post(&PostId::new(*id)))
            .collect();
        ledger.prime(&entities).await;

        assert_eq!(store.call_count(StoreOperation::Query), 2);
        let voter = UserId::new("voter");
        assert_eq!(cache.get(&voter, &entities[0]), Some(VoteValue::Neutral));
        assert_eq!(cache.get(&voter, &entities[1]), Some(VoteValue::Up));

        // 已缓存的实体不再查询
        ledger.prime(&entities).await;
        assert_eq!(store.call_count(StoreOperation::Query), 2);
    }

    #[tokio::test]
    async fn failed_prime_leaves_entities_uncached() {
        let store = MemoryDocumentStore::new();
        store.fail_on(StoreOperation::Query);
        let (ledger, cache) = ledger(&store, 30);

        let entity = EntityRef::post(&PostId::new("p1"));
        ledger.prime(std::slice::from_ref(&entity)).await;
        assert!(!cache.contains(&UserId::new("voter"), &entity));
    }

    #[tokio::test]
    async fn toggle_writes_and_removes_vote_record() {
        let store = MemoryDocumentStore::new();
        seed(&store, "posts", "p1", json!({"vote_count": 5})).await;
        seed(&store, "users", "author", json!({"karma": 10})).await;
        let (ledger, _) = ledger(&store, 30);

        let up = ledger.cast_vote(&target("p1"), VoteDirection::Up).await.unwrap();
        assert!(up.is_complete());
        assert_eq!(up.transition.to, VoteValue::Up);
        assert!(store.document("votes", "voter_post_p1").is_some());
        assert_eq!(
            store.document("posts", "p1").unwrap().get("vote_count"),
            Some(&json!(6))
        );

        let again = ledger.cast_vote(&target("p1"), VoteDirection::Up).await.unwrap();
        assert_eq!(again.transition.to, VoteValue::Neutral);
        assert!(store.document("votes", "voter_post_p1").is_none());
        assert_eq!(ledger.reputation(&UserId::new("author")).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn flip_applies_double_delta() {
        let store = MemoryDocumentStore::new();
        seed(&store, "posts", "p1", json!({"vote_count": 0})).await;
        seed(&store, "users", "author", json!({"karma": 0})).await;
        let (ledger, _) = ledger(&store, 30);

        ledger.cast_vote(&target("p1"), VoteDirection::Up).await.unwrap();
        let flip = ledger.cast_vote(&target("p1"), VoteDirection::Down).await.unwrap();

        assert_eq!(flip.transition.delta(), -2);
        assert_eq!(store.count("votes"), 1);
        assert_eq!(ledger.reputation(&UserId::new("author")).await.unwrap(), -1);
    }

    #[tokio::test]
    async fn failed_remote_write_keeps_local_state() {
        let store = MemoryDocumentStore::new();
        seed(&store, "posts", "p1", json!({"vote_count": 0})).await;
        seed(&store, "users", "author", json!({"karma": 0})).await;
        let (ledger, cache) = ledger(&store, 30);
        store.fail_on(StoreOperation::UpdateField);

        let receipt = ledger.cast_vote(&target("p1"), VoteDirection::Down).await.unwrap();

        assert!(receipt.record_written);
        assert!(!receipt.count_updated);
        assert!(!receipt.reputation_updated);
        assert_eq!(
            cache.get(&UserId::new("voter"), &target("p1").entity),
            Some(VoteValue::Down)
        );
    }

    #[tokio::test]
    async fn missing_profile_has_zero_reputation() {
        let store = MemoryDocumentStore::new();
        let (ledger, _) = ledger(&store, 30);
        assert_eq!(ledger.reputation(&UserId::new("nobody")).await.unwrap(), 0);
    }
}
