//! 列表合并与去重规则
//!
//! 分页结果、实时快照与本地乐观插入三条数据路径最终汇成一个按 `created_at`
//! 排序、按 ID 去重的列表。这里的函数都是纯函数，不依赖存储。

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

use crate::value_objects::Timestamp;

/// 可参与同步的实体
pub trait SyncEntity: Clone {
    type Id: Clone + Eq + Ord + Hash + fmt::Debug;

    fn entity_id(&self) -> &Self::Id;

    fn created_at(&self) -> Timestamp;
}

/// 列表排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// 信息流：最新在前
    NewestFirst,
    /// 评论串：最早在前
    OldestFirst,
}

impl SortOrder {
    /// 时间相同时按ID排序，保证结果确定
    pub fn compare<E: SyncEntity>(self, a: &E, b: &E) -> Ordering {
        let ordering = a
            .created_at()
            .cmp(&b.created_at())
            .then_with(|| a.entity_id().cmp(b.entity_id()));
        match self {
            SortOrder::NewestFirst => ordering.reverse(),
            SortOrder::OldestFirst => ordering,
        }
    }

    pub fn sort<E: SyncEntity>(self, items: &mut [E]) {
        items.sort_by(|a, b| self.compare(a, b));
    }
}

/// 合并本地未确认的条目与权威结果。
///
/// `local` 是尚未被服务端确认的乐观条目；ID 冲突时以 `authoritative` 为准，
/// 占位条目被丢弃。输出按 `order` 排序且不含重复 ID。
pub fn merge<E: SyncEntity>(local: &[E], authoritative: &[E], order: SortOrder) -> Vec<E> {
    let mut seen: HashSet<E::Id> = HashSet::with_capacity(local.len() + authoritative.len());
    let mut merged = Vec::with_capacity(local.len() + authoritative.len());

    for item in authoritative.iter().chain(local.iter()) {
        if seen.insert(item.entity_id().clone()) {
            merged.push(item.clone());
        }
    }

    order.sort(&mut merged);
    merged
}

/// 分页追加的结果
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageMerge<Id> {
    /// 新追加到末尾的条目数
    pub appended: usize,
    /// 被服务端副本替换掉的乐观占位条目
    pub confirmed: Vec<Id>,
}

/// 将一页结果追加到已有列表末尾，不重新排序已展示的条目。
///
/// - 已存在且已确认的 ID：原位置替换为服务端副本；
/// - 已存在且仍是乐观占位（在 `pending` 中）：移除占位，服务端副本按页内顺序追加；
/// - 其余条目按页内顺序追加。
pub fn append_page<E: SyncEntity>(
    existing: &mut Vec<E>,
    pending: &mut HashSet<E::Id>,
    page: Vec<E>,
) -> PageMerge<E::Id> {
    let mut outcome = PageMerge {
        appended: 0,
        confirmed: Vec::new(),
    };
    let mut page_seen: HashSet<E::Id> = HashSet::with_capacity(page.len());

    for item in page {
        let id = item.entity_id().clone();
        if !page_seen.insert(id.clone()) {
            continue;
        }

        if pending.remove(&id) {
            remove_by_id(existing, &id);
            outcome.confirmed.push(id);
            existing.push(item);
            outcome.appended += 1;
            continue;
        }

        match existing.iter_mut().find(|e| e.entity_id() == &id) {
            Some(slot) => *slot = item,
            None => {
                existing.push(item);
                outcome.appended += 1;
            }
        }
    }

    outcome
}

/// 按ID移除条目，ID不存在时返回 false
pub fn remove_by_id<E: SyncEntity>(items: &mut Vec<E>, id: &E::Id) -> bool {
    let before = items.len();
    items.retain(|item| item.entity_id() != id);
    items.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: String,
        at: i64,
        label: &'static str,
    }

    impl SyncEntity for Item {
        type Id = String;

        fn entity_id(&self) -> &String {
            &self.id
        }

        fn created_at(&self) -> Timestamp {
            Utc.timestamp_millis_opt(self.at).unwrap()
        }
    }

    fn item(id: &str, at: i64, label: &'static str) -> Item {
        Item {
            id: id.into(),
            at,
            label,
        }
    }

    fn ids(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn merge_prefers_authoritative_copy() {
        let local = vec![item("a", 100, "local")];
        let server = vec![item("b", 50, "server"), item("a", 90, "server")];

        let merged = merge(&local, &server, SortOrder::NewestFirst);

        assert_eq!(ids(&merged), vec!["a", "b"]);
        assert_eq!(merged[0].label, "server");
        assert_eq!(merged[0].at, 90);
    }

    #[test]
    fn merge_keeps_unconfirmed_local_items_in_time_order() {
        let local = vec![item("x", 75, "local")];
        let server = vec![item("a", 100, "server"), item("b", 50, "server")];

        let merged = merge(&local, &server, SortOrder::NewestFirst);
        assert_eq!(ids(&merged), vec!["a", "x", "b"]);

        let ascending = merge(&local, &server, SortOrder::OldestFirst);
        assert_eq!(ids(&ascending), vec!["b", "x", "a"]);
    }

    #[test]
    fn merge_drops_duplicates_inside_authoritative() {
        let server = vec![item("a", 10, "first"), item("a", 10, "second")];
        let merged = merge(&[], &server, SortOrder::NewestFirst);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].label, "first");
    }

    #[test]
    fn equal_timestamps_break_ties_by_id() {
        let server = vec![item("a", 10, ""), item("c", 10, ""), item("b", 10, "")];
        let merged = merge(&[], &server, SortOrder::NewestFirst);
        assert_eq!(ids(&merged), vec!["c", "b", "a"]);
    }

    #[test]
    fn append_page_does_not_reorder_existing() {
        let mut existing = vec![item("a", 100, ""), item("b", 90, "")];
        let mut pending = HashSet::new();

        let outcome = append_page(
            &mut existing,
            &mut pending,
            vec![item("c", 80, ""), item("b", 90, "fresh"), item("d", 70, "")],
        );

        assert_eq!(outcome.appended, 2);
        assert_eq!(ids(&existing), vec!["a", "b", "c", "d"]);
        assert_eq!(existing[1].label, "fresh");
    }

    #[test]
    fn append_page_replaces_optimistic_placeholder() {
        let mut existing = vec![item("tmp", 200, "local"), item("a", 100, "")];
        let mut pending: HashSet<String> = ["tmp".to_string()].into_iter().collect();

        let outcome = append_page(&mut existing, &mut pending, vec![item("tmp", 95, "server")]);

        assert_eq!(outcome.confirmed, vec!["tmp".to_string()]);
        assert!(pending.is_empty());
        assert_eq!(ids(&existing), vec!["a", "tmp"]);
        assert_eq!(existing[1].label, "server");
    }

    #[test]
    fn append_empty_page_is_noop() {
        let mut existing = vec![item("a", 100, "")];
        let mut pending = HashSet::new();
        let outcome = append_page(&mut existing, &mut pending, Vec::new());
        assert_eq!(outcome, PageMerge::default());
        assert_eq!(ids(&existing), vec!["a"]);
    }

    #[test]
    fn remove_missing_id_is_not_an_error() {
        let mut existing = vec![item("a", 1, "")];
        assert!(!remove_by_id(&mut existing, &"zzz".to_string()));
        assert!(remove_by_id(&mut existing, &"a".to_string()));
        assert!(existing.is_empty());
    }
}
