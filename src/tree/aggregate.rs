use super::arena::{DirTree, EntryKind, NodeId};

/// Cached subtree aggregates for one directory.
///
/// Valid only while the owning directory's cache slot is `Some`: any child
/// insertion, removal or subtree mutation clears the slot on the directory
/// and every ancestor, and the next query recomputes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirSummary {
    /// Sum of file sizes in the subtree (directories contribute no bytes of their own)
    pub total_size: u64,
    /// Sum of file storage blocks in the subtree
    pub total_blocks: u64,
    /// Entries in the subtree, excluding the directory itself and dot entries
    pub total_items: u32,
    /// Real subdirectories in the subtree (dot entries don't count)
    pub total_sub_dirs: u32,
    /// Plain files in the subtree
    pub total_files: u32,
    /// Latest mtime in the subtree, at minimum the directory's own
    pub latest_mtime: i64,
}

impl DirTree {
    /// Total size in bytes of the subtree below `id` (a file reports its own size).
    pub fn total_size(&mut self, id: NodeId) -> u64 {
        if self.get(id).is_dir() {
            self.summary(id).total_size
        } else {
            self.get(id).size
        }
    }

    /// Total size in storage blocks of the subtree below `id`.
    pub fn total_blocks(&mut self, id: NodeId) -> u64 {
        if self.get(id).is_dir() {
            self.summary(id).total_blocks
        } else {
            self.get(id).blocks
        }
    }

    /// Total number of entries in the subtree below `id`, excluding `id` itself.
    pub fn total_items(&mut self, id: NodeId) -> u32 {
        if self.get(id).is_dir() {
            self.summary(id).total_items
        } else {
            0
        }
    }

    /// Total number of real subdirectories below `id`.
    pub fn total_sub_dirs(&mut self, id: NodeId) -> u32 {
        if self.get(id).is_dir() {
            self.summary(id).total_sub_dirs
        } else {
            0
        }
    }

    /// Total number of plain files below `id`.
    pub fn total_files(&mut self, id: NodeId) -> u32 {
        if self.get(id).is_dir() {
            self.summary(id).total_files
        } else {
            0
        }
    }

    /// Latest modification time in the subtree below `id`. An empty directory
    /// reports its own mtime.
    pub fn latest_mtime(&mut self, id: NodeId) -> i64 {
        if self.get(id).is_dir() {
            self.summary(id).latest_mtime
        } else {
            self.get(id).mtime
        }
    }

    /// Current aggregates for directory `id`, recomputing whatever part of the
    /// subtree is dirty. O(1) on a clean cache; one subtree walk otherwise,
    /// amortized over any number of preceding mutations.
    pub fn summary(&mut self, id: NodeId) -> DirSummary {
        if let Some(s) = self.dir(id).summary {
            return s;
        }

        // Dirty directories form an upward-closed set (dirtying always marks
        // every ancestor), so walking only dirty directories finds them all.
        // Collect in preorder, then fold in reverse: children before parents,
        // no recursion, so deep trees can't blow the stack.
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let d = self.dir(cur);
            if d.summary.is_some() {
                continue;
            }
            order.push(cur);
            stack.extend(d.dot_entry);
            for &child in &d.children {
                if self.get(child).is_dir() {
                    stack.push(child);
                }
            }
        }

        for &dir in order.iter().rev() {
            let s = self.fold_one(dir);
            self.dir_mut(dir).summary = Some(s);
        }

        self.dir(id).summary.expect("summary just recomputed")
    }

    /// Aggregate one directory from its direct children, whose summaries must
    /// already be current.
    fn fold_one(&self, id: NodeId) -> DirSummary {
        let own = self.get(id);
        let mut s = DirSummary {
            latest_mtime: own.mtime,
            ..DirSummary::default()
        };

        let d = self.dir(id);
        for &child in &d.children {
            let entry = self.get(child);
            match &entry.kind {
                EntryKind::File => {
                    s.total_size += entry.size;
                    s.total_blocks += entry.blocks;
                    s.total_items += 1;
                    s.total_files += 1;
                    s.latest_mtime = s.latest_mtime.max(entry.mtime);
                }
                EntryKind::Directory(cd) => {
                    // Excluded subtrees stay visible but count for nothing.
                    if cd.is_excluded {
                        continue;
                    }
                    let cs = cd.summary.expect("child summary current");
                    s.total_size += cs.total_size;
                    s.total_blocks += cs.total_blocks;
                    s.total_items += cs.total_items + 1;
                    s.total_sub_dirs += cs.total_sub_dirs + 1;
                    s.total_files += cs.total_files;
                    s.latest_mtime = s.latest_mtime.max(cs.latest_mtime);
                }
            }
        }

        // The dot entry is transparent: its contents count, it doesn't.
        if let Some(dot) = d.dot_entry {
            let dd = self.dir(dot);
            let ds = dd.summary.expect("dot entry summary current");
            s.total_size += ds.total_size;
            s.total_blocks += ds.total_blocks;
            s.total_items += ds.total_items;
            s.total_files += ds.total_files;
            if !dd.children.is_empty() {
                s.latest_mtime = s.latest_mtime.max(ds.latest_mtime);
            }
        }

        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::arena::Entry;

    fn file(name: &str, size: u64, mtime: i64) -> Entry {
        Entry::file(name, size, size.div_ceil(512), 0o100644, mtime)
    }

    fn dir(name: &str, mtime: i64) -> Entry {
        Entry::dir(name, 0o40755, mtime)
    }

    #[test]
    fn two_files_no_subdirs() {
        let mut tree = DirTree::new(dir("A", 50));
        let root = tree.root();
        tree.insert_child(root, file("a", 100, 60));
        tree.insert_child(root, file("b", 250, 70));
        tree.finalize_local(root);

        assert_eq!(tree.total_size(root), 350);
        assert_eq!(tree.total_files(root), 2);
        assert_eq!(tree.total_sub_dirs(root), 0);
        assert_eq!(tree.total_items(root), 2);
        assert_eq!(tree.latest_mtime(root), 70);
    }

    #[test]
    fn empty_dir_reports_own_mtime_and_zero_totals() {
        let mut tree = DirTree::new(dir("empty", 1234));
        let root = tree.root();
        tree.finalize_local(root);

        assert_eq!(tree.total_size(root), 0);
        assert_eq!(tree.total_items(root), 0);
        assert_eq!(tree.latest_mtime(root), 1234);
    }

    #[test]
    fn nested_totals_count_each_entry_once() {
        let mut tree = DirTree::new(dir("root", 1));
        let root = tree.root();
        let a = tree.insert_child(root, dir("a", 2));
        let b = tree.insert_child(a, dir("b", 3));
        tree.insert_child(a, file("f1", 10, 4));
        tree.insert_child(b, file("f2", 20, 9));
        tree.insert_child(root, file("f3", 5, 5));

        assert_eq!(tree.total_size(root), 35);
        assert_eq!(tree.total_files(root), 3);
        assert_eq!(tree.total_sub_dirs(root), 2);
        // 3 files + 2 dirs, dot entries not counted
        assert_eq!(tree.total_items(root), 5);
        assert_eq!(tree.latest_mtime(root), 9);

        // intermediate levels agree
        assert_eq!(tree.total_size(a), 30);
        assert_eq!(tree.total_sub_dirs(a), 1);
        assert_eq!(tree.total_items(a), 3);
    }

    #[test]
    fn accessors_are_idempotent_and_keep_cache_clean() {
        let mut tree = DirTree::new(dir("root", 1));
        let root = tree.root();
        tree.insert_child(root, file("f", 42, 2));

        let first = tree.summary(root);
        assert!(tree.get(root).dir_data().unwrap().summary.is_some());
        let second = tree.summary(root);
        assert_eq!(first, second);
        assert!(tree.get(root).dir_data().unwrap().summary.is_some());
    }

    #[test]
    fn insertion_dirties_every_ancestor() {
        let mut tree = DirTree::new(dir("root", 1));
        let root = tree.root();
        let a = tree.insert_child(root, dir("a", 1));
        let b = tree.insert_child(a, dir("b", 1));

        // populate caches
        assert_eq!(tree.total_items(root), 2);
        assert!(tree.get(a).dir_data().unwrap().summary.is_some());

        tree.insert_child(b, file("f", 1, 1));
        assert!(tree.get(root).dir_data().unwrap().summary.is_none());
        assert!(tree.get(a).dir_data().unwrap().summary.is_none());
        assert!(tree.get(b).dir_data().unwrap().summary.is_none());

        // the new child shows up exactly once at every level
        assert_eq!(tree.total_items(root), 3);
        assert_eq!(tree.total_items(a), 2);
        assert_eq!(tree.total_files(root), 1);
    }

    #[test]
    fn excluded_dir_contributes_nothing_but_stays_visible() {
        let mut tree = DirTree::new(dir("root", 1));
        let root = tree.root();
        let skipped = tree.insert_child(root, dir("skipped", 1));
        tree.insert_child(skipped, file("hidden", 1000, 99));
        tree.insert_child(root, file("seen", 10, 2));
        tree.set_excluded(skipped, true);

        assert_eq!(tree.total_size(root), 10);
        assert_eq!(tree.total_sub_dirs(root), 0);
        assert_eq!(tree.total_files(root), 1);
        assert_eq!(tree.latest_mtime(root), 2);
        assert!(tree.children(root).any(|c| c == skipped));
        assert!(tree.is_excluded(skipped));
    }

    #[test]
    fn detach_updates_ancestor_totals() {
        let mut tree = DirTree::new(dir("root", 1));
        let root = tree.root();
        let a = tree.insert_child(root, dir("a", 1));
        tree.insert_child(a, file("f", 500, 1));
        tree.insert_child(root, file("g", 7, 1));

        assert_eq!(tree.total_size(root), 507);
        tree.detach(a);
        assert_eq!(tree.total_size(root), 7);
        assert_eq!(tree.total_sub_dirs(root), 0);
    }

    #[test]
    fn clean_cache_matches_direct_child_sum() {
        let mut tree = DirTree::new(dir("root", 1));
        let root = tree.root();
        let a = tree.insert_child(root, dir("a", 1));
        tree.insert_child(a, file("f1", 11, 1));
        tree.insert_child(root, file("f2", 22, 1));
        tree.finalize_all(root);

        let total = tree.total_size(root);
        // direct children plus the dot entry (root keeps one: it has a subdir)
        let mut ids: Vec<_> = tree.children(root).collect();
        ids.extend(tree.dot_entry(root));
        let child_sum: u64 = ids.into_iter().map(|c| tree.total_size(c)).sum();
        assert_eq!(total, child_sum);
    }
}
