//! 投票实体与投票状态机
//!
//! 每个 (用户, 实体) 至多一条投票记录，缺失等价于 0。
//! 同方向重复投票会撤销投票，反方向投票直接翻转，不经过中立状态。

use serde::{Deserialize, Serialize};

use crate::document::{Document, DocumentEntity};
use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{EntityKind, EntityRef, UserId};

/// 投票值 ∈ {-1, 0, +1}
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum VoteValue {
    Down,
    #[default]
    Neutral,
    Up,
}

/// 用户的投票动作方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteValue {
    pub fn as_i64(self) -> i64 {
        match self {
            VoteValue::Down => -1,
            VoteValue::Neutral => 0,
            VoteValue::Up => 1,
        }
    }

    /// 投票状态机：相同方向回到 0，否则直接切换到目标方向
    pub fn cast(self, direction: VoteDirection) -> VoteTransition {
        let desired = VoteValue::from(direction);
        let to = if self == desired {
            VoteValue::Neutral
        } else {
            desired
        };
        VoteTransition { from: self, to }
    }
}

impl From<VoteDirection> for VoteValue {
    fn from(direction: VoteDirection) -> Self {
        match direction {
            VoteDirection::Up => VoteValue::Up,
            VoteDirection::Down => VoteValue::Down,
        }
    }
}

impl TryFrom<i64> for VoteValue {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(VoteValue::Down),
            0 => Ok(VoteValue::Neutral),
            1 => Ok(VoteValue::Up),
            other => Err(DomainError::InvalidVoteValue(other)),
        }
    }
}

impl From<VoteValue> for i64 {
    fn from(value: VoteValue) -> Self {
        value.as_i64()
    }
}

/// 一次投票状态转换
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteTransition {
    pub from: VoteValue,
    pub to: VoteValue,
}

impl VoteTransition {
    /// 实体票数与作者声望的变化量
    pub fn delta(&self) -> i64 {
        self.to.as_i64() - self.from.as_i64()
    }

    /// 转换后是否应删除投票记录
    pub fn clears_vote(&self) -> bool {
        self.to == VoteValue::Neutral
    }
}

/// 可被投票的实体
pub trait Votable {
    fn entity_ref(&self) -> EntityRef;

    /// 票数变化同步计入该作者的声望
    fn author_id(&self) -> &UserId;

    fn vote_count(&self) -> i64;

    fn apply_vote_delta(&mut self, delta: i64);
}

/// 投票记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub user_id: UserId,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub value: VoteValue,
}

impl Vote {
    pub const FIELD_USER_ID: &'static str = "user_id";
    pub const FIELD_ENTITY_KIND: &'static str = "entity_kind";
    pub const FIELD_ENTITY_ID: &'static str = "entity_id";

    pub fn new(user_id: UserId, entity: &EntityRef, value: VoteValue) -> Self {
        Self {
            user_id,
            entity_kind: entity.kind,
            entity_id: entity.id.clone(),
            value,
        }
    }

    /// 文档ID由 (用户, 实体) 确定，保证每个用户对每个实体至多一条记录
    pub fn document_id(user_id: &UserId, entity: &EntityRef) -> String {
        format!("{}_{}_{}", user_id, entity.kind, entity.id)
    }

    pub fn entity(&self) -> EntityRef {
        EntityRef {
            kind: self.entity_kind,
            id: self.entity_id.clone(),
        }
    }
}

impl DocumentEntity for Vote {
    const KIND: &'static str = "vote";

    fn from_document(document: &Document) -> DomainResult<Self> {
        document.decode("votes")
    }

    fn to_document(&self) -> DomainResult<Document> {
        Document::encode(Self::document_id(&self.user_id, &self.entity()), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::PostId;

    #[test]
    fn same_direction_twice_clears_vote() {
        let first = VoteValue::Neutral.cast(VoteDirection::Up);
        assert_eq!(first.to, VoteValue::Up);
        assert_eq!(first.delta(), 1);

        let second = first.to.cast(VoteDirection::Up);
        assert_eq!(second.to, VoteValue::Neutral);
        assert_eq!(second.delta(), -1);
        assert!(second.clears_vote());
    }

    #[test]
    fn opposite_direction_flips_directly() {
        let flip = VoteValue::Up.cast(VoteDirection::Down);
        assert_eq!(flip.to, VoteValue::Down);
        assert_eq!(flip.delta(), -2);
    }

    #[test]
    fn net_delta_equals_final_state() {
        let actions = [
            VoteDirection::Up,
            VoteDirection::Up,
            VoteDirection::Down,
            VoteDirection::Up,
            VoteDirection::Down,
            VoteDirection::Down,
            VoteDirection::Down,
        ];
        let mut state = VoteValue::Neutral;
        let mut net = 0;
        for action in actions {
            let transition = state.cast(action);
            net += transition.delta();
            state = transition.to;
        }
        assert_eq!(net, state.as_i64());
    }

    #[test]
    fn vote_value_rejects_out_of_range() {
        assert_eq!(VoteValue::try_from(2), Err(DomainError::InvalidVoteValue(2)));
    }

    #[test]
    fn vote_document_id_is_deterministic() {
        let entity = EntityRef::post(&PostId::new("p1"));
        let vote = Vote::new(UserId::new("u1"), &entity, VoteValue::Down);
        let doc = vote.to_document().unwrap();
        assert_eq!(doc.id, "u1_post_p1");
        assert_eq!(doc.get("value"), Some(&serde_json::json!(-1)));
        assert_eq!(Vote::from_document(&doc).unwrap(), vote);
    }
}
