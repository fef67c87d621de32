//! 会话共享缓存
//!
//! 图片缓存与投票状态缓存都以显式注入的服务存在，由会话创建并在
//! 多个同步器/控制器之间共享。两者都没有过期策略，只会被显式覆盖。

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use domain::{EntityRef, ImageRef, UserId, VoteDirection, VoteTransition, VoteValue};

/// 图片缓存：远程引用 -> 图片字节，后写者胜
#[derive(Debug, Default)]
pub struct ImageCache {
    entries: RwLock<HashMap<ImageRef, Arc<Vec<u8>>>>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ImageRef) -> Option<Arc<Vec<u8>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn put(&self, key: ImageRef, bytes: Arc<Vec<u8>>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, bytes);
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 投票状态缓存：(用户, 实体) -> 已知投票值
///
/// 已缓存的 `Neutral` 表示“确认没有投票”，未缓存表示“尚未拉取”。
#[derive(Debug, Default)]
pub struct VoteStateCache {
    entries: RwLock<HashMap<(UserId, EntityRef), VoteValue>>,
}

impl VoteStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &UserId, entity: &EntityRef) -> Option<VoteValue> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(user_id.clone(), entity.clone()))
            .copied()
    }

    pub fn contains(&self, user_id: &UserId, entity: &EntityRef) -> bool {
        self.get(user_id, entity).is_some()
    }

    pub fn put(&self, user_id: &UserId, entity: &EntityRef, value: VoteValue) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((user_id.clone(), entity.clone()), value);
    }

    /// 仅在尚未缓存时写入，不覆盖本地已发生的投票
    pub fn put_if_absent(&self, user_id: &UserId, entity: &EntityRef, value: VoteValue) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((user_id.clone(), entity.clone()))
            .or_insert(value);
    }

    /// 在同一把锁内读取当前值、计算状态转换并写回。
    ///
    /// 未缓存的实体返回 None 且不做修改：未知状态不能当作未投票处理。
    pub fn transition(
        &self,
        user_id: &UserId,
        entity: &EntityRef,
        direction: VoteDirection,
    ) -> Option<VoteTransition> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let slot = entries.get_mut(&(user_id.clone(), entity.clone()))?;
        let transition = slot.cast(direction);
        *slot = transition.to;
        Some(transition)
    }
}
