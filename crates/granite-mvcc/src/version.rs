//! Version-chain map.
//!
//! Maps each record id to the head of its undo-log chain. The map is two
//! levels deep, page id then slot offset, with a latch at each level so
//! readers of different pages never contend.

use std::collections::HashMap;
use std::sync::Arc;

use granite_common::types::{PageId, Rid};
use parking_lot::RwLock;

use crate::undo::UndoLink;

/// Per-page slot table guarded by its own latch.
#[derive(Debug, Default)]
struct PageVersionInfo {
    prev_link: RwLock<HashMap<u32, UndoLink>>,
}

/// Two-level map from record id to undo-chain head.
#[derive(Debug, Default)]
pub struct VersionMap {
    pages: RwLock<HashMap<PageId, Arc<PageVersionInfo>>>,
}

impl VersionMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// The chain head for `rid`, if any.
    pub fn undo_link(&self, rid: Rid) -> Option<UndoLink> {
        let pages = self.pages.read();
        let info = pages.get(&rid.page_id())?.clone();
        drop(pages);
        let slots = info.prev_link.read();
        slots.get(&rid.slot()).copied()
    }

    /// Replaces the chain head for `rid`. `None` clears the entry.
    pub fn update_undo_link(&self, rid: Rid, link: Option<UndoLink>) {
        let info = {
            let mut pages = self.pages.write();
            Arc::clone(pages.entry(rid.page_id()).or_default())
        };
        let mut slots = info.prev_link.write();
        match link {
            Some(link) => {
                slots.insert(rid.slot(), link);
            }
            None => {
                slots.remove(&rid.slot());
            }
        }
    }

    /// Drops every chain head on `page_id`.
    pub fn remove_page(&self, page_id: PageId) {
        self.pages.write().remove(&page_id);
    }

    /// Every (rid, head) pair currently tracked.
    ///
    /// Intended for garbage collection, which runs stop-the-world; the
    /// snapshot is not atomic across pages.
    pub fn all_links(&self) -> Vec<(Rid, UndoLink)> {
        let pages: Vec<(PageId, Arc<PageVersionInfo>)> = self
            .pages
            .read()
            .iter()
            .map(|(page_id, info)| (*page_id, Arc::clone(info)))
            .collect();

        let mut out = Vec::new();
        for (page_id, info) in pages {
            let slots = info.prev_link.read();
            for (slot, link) in slots.iter() {
                out.push((Rid::new(page_id, *slot), *link));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use granite_common::types::TxnId;
    use granite_common::TXN_START_ID;

    fn rid(page: u64, slot: u32) -> Rid {
        Rid::new(PageId::new(page), slot)
    }

    fn link(n: u64) -> UndoLink {
        UndoLink::new(TxnId::new(TXN_START_ID + n), 0)
    }

    #[test]
    fn test_missing_rid_has_no_link() {
        let map = VersionMap::new();
        assert_eq!(map.undo_link(rid(0, 0)), None);
    }

    #[test]
    fn test_update_and_read() {
        let map = VersionMap::new();
        map.update_undo_link(rid(1, 2), Some(link(1)));
        assert_eq!(map.undo_link(rid(1, 2)), Some(link(1)));
        assert_eq!(map.undo_link(rid(1, 3)), None);

        map.update_undo_link(rid(1, 2), Some(link(2)));
        assert_eq!(map.undo_link(rid(1, 2)), Some(link(2)));

        map.update_undo_link(rid(1, 2), None);
        assert_eq!(map.undo_link(rid(1, 2)), None);
    }

    #[test]
    fn test_remove_page_clears_slots() {
        let map = VersionMap::new();
        map.update_undo_link(rid(1, 0), Some(link(1)));
        map.update_undo_link(rid(1, 1), Some(link(2)));
        map.update_undo_link(rid(2, 0), Some(link(3)));

        map.remove_page(PageId::new(1));
        assert_eq!(map.undo_link(rid(1, 0)), None);
        assert_eq!(map.undo_link(rid(2, 0)), Some(link(3)));
    }

    #[test]
    fn test_all_links_snapshot() {
        let map = VersionMap::new();
        map.update_undo_link(rid(1, 0), Some(link(1)));
        map.update_undo_link(rid(2, 5), Some(link(2)));
        let mut links = map.all_links();
        links.sort_by_key(|(r, _)| (r.page_id(), r.slot()));
        assert_eq!(
            links,
            vec![(rid(1, 0), link(1)), (rid(2, 5), link(2))]
        );
    }

    #[test]
    fn test_concurrent_updates_on_distinct_pages() {
        let map = Arc::new(VersionMap::new());
        std::thread::scope(|s| {
            for page in 0..4u64 {
                let map = Arc::clone(&map);
                s.spawn(move || {
                    for slot in 0..64u32 {
                        map.update_undo_link(rid(page, slot), Some(link(page)));
                    }
                });
            }
        });
        assert_eq!(map.all_links().len(), 4 * 64);
    }
}
