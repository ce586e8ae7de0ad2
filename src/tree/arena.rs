use compact_str::CompactString;

use super::aggregate::DirSummary;

/// Index into the arena slot table. Uses u32 to save memory (supports up to ~4 billion nodes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// State of a directory's own listing. Terminal states apply to the directory
/// itself; descendants may still be pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// Waiting in the read queue
    Queued,
    /// Listing in progress
    Reading,
    /// Listing finished OK
    Finished,
    /// Listing aborted on user request
    Aborted,
    /// Error while listing
    Error,
}

impl ReadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ReadState::Finished | ReadState::Aborted | ReadState::Error)
    }
}

/// One file-system entry. Directories carry extra state in `EntryKind::Directory`.
#[derive(Debug, Clone)]
pub struct Entry {
    /// File or directory name (not full path)
    pub name: CompactString,
    /// Size in bytes (directories report their subtree via the summary, not this field)
    pub size: u64,
    /// Size in 512-byte storage blocks
    pub blocks: u64,
    /// POSIX mode bits
    pub mode: u32,
    /// Last modification time, seconds since the epoch
    pub mtime: i64,
    /// Parent node index (None for root)
    pub parent: Option<NodeId>,
    pub kind: EntryKind,
}

#[derive(Debug, Clone)]
pub enum EntryKind {
    File,
    Directory(DirData),
}

/// Directory-only state: child handles, dot entry, flags, read bookkeeping
/// and the lazily cached subtree summary.
#[derive(Debug, Clone)]
pub struct DirData {
    /// Child handles. Order is unspecified; don't rely on it.
    pub children: Vec<NodeId>,
    /// Pseudo-child holding this directory's non-directory children
    pub dot_entry: Option<NodeId>,
    pub is_dot_entry: bool,
    pub is_mount_point: bool,
    pub is_excluded: bool,
    /// Read jobs still open anywhere in this subtree, self included
    pub pending_read_jobs: u32,
    pub read_state: ReadState,
    /// Cached subtree aggregates; `None` means dirty
    pub summary: Option<DirSummary>,
}

impl DirData {
    fn new(is_dot_entry: bool) -> Self {
        DirData {
            children: Vec::new(),
            dot_entry: None,
            is_dot_entry,
            is_mount_point: false,
            is_excluded: false,
            pending_read_jobs: 0,
            read_state: ReadState::Queued,
            summary: None,
        }
    }
}

impl Entry {
    /// Plain-file entry from stat attributes.
    pub fn file(name: &str, size: u64, blocks: u64, mode: u32, mtime: i64) -> Self {
        Entry {
            name: CompactString::new(name),
            size,
            blocks,
            mode,
            mtime,
            parent: None,
            kind: EntryKind::File,
        }
    }

    /// Directory entry from stat attributes. The directory's own byte size is
    /// not part of this model; subtree totals come from the summary.
    pub fn dir(name: &str, mode: u32, mtime: i64) -> Self {
        Entry {
            name: CompactString::new(name),
            size: 0,
            blocks: 0,
            mode,
            mtime,
            parent: None,
            kind: EntryKind::Directory(DirData::new(false)),
        }
    }

    fn dot_entry_for(parent_mode: u32) -> Self {
        Entry {
            name: CompactString::new("."),
            size: 0,
            blocks: 0,
            mode: parent_mode,
            mtime: 0,
            parent: None,
            kind: EntryKind::Directory(DirData::new(true)),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory(_))
    }

    pub fn dir_data(&self) -> Option<&DirData> {
        match &self.kind {
            EntryKind::Directory(d) => Some(d),
            EntryKind::File => None,
        }
    }

    pub fn dir_data_mut(&mut self) -> Option<&mut DirData> {
        match &mut self.kind {
            EntryKind::Directory(d) => Some(d),
            EntryKind::File => None,
        }
    }
}

/// The directory tree, stored as a flat arena of slots addressed by `NodeId`.
/// Detached subtrees release their slots to a free list for reuse.
///
/// The tree is `&mut`-owned by a single logical thread; scan results produced
/// on worker threads must be handed over (e.g. via a channel) and applied here.
pub struct DirTree {
    slots: Vec<Option<Entry>>,
    free: Vec<NodeId>,
    root: NodeId,
    live: usize,
}

impl DirTree {
    /// Create a tree from its root directory entry. The root gets a dot entry
    /// like every other directory.
    pub fn new(root: Entry) -> Self {
        assert!(root.is_dir(), "tree root must be a directory entry");
        let mut tree = DirTree {
            slots: vec![Some(root)],
            free: Vec::new(),
            root: NodeId(0),
            live: 1,
        };
        tree.attach_dot_entry(tree.root);
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of live nodes, dot entries included.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live <= 1
    }

    /// Get a node by ID. Panics on a stale (detached) handle.
    pub fn get(&self, id: NodeId) -> &Entry {
        self.slots[id.index()].as_ref().expect("stale NodeId")
    }

    /// Get a mutable node by ID. Panics on a stale (detached) handle.
    pub fn get_mut(&mut self, id: NodeId) -> &mut Entry {
        self.slots[id.index()].as_mut().expect("stale NodeId")
    }

    pub(crate) fn dir(&self, id: NodeId) -> &DirData {
        self.get(id).dir_data().expect("node is not a directory")
    }

    pub(crate) fn dir_mut(&mut self, id: NodeId) -> &mut DirData {
        self.get_mut(id)
            .dir_data_mut()
            .expect("node is not a directory")
    }

    fn alloc(&mut self, entry: Entry) -> NodeId {
        self.live += 1;
        match self.free.pop() {
            Some(id) => {
                self.slots[id.index()] = Some(entry);
                id
            }
            None => {
                let id = NodeId(self.slots.len() as u32);
                self.slots.push(Some(entry));
                id
            }
        }
    }

    fn attach_dot_entry(&mut self, parent: NodeId) -> NodeId {
        let dot = self.alloc(Entry::dot_entry_for(self.get(parent).mode));
        self.get_mut(dot).parent = Some(parent);
        self.dir_mut(parent).dot_entry = Some(dot);
        dot
    }

    /// Insert a new child under `parent` and return its handle.
    ///
    /// Plain files are routed into the parent's dot entry while one exists;
    /// directories always become direct children. New directories are created
    /// `Queued` with a dot entry of their own. Dirties `parent` and every
    /// ancestor up to the root.
    pub fn insert_child(&mut self, parent: NodeId, entry: Entry) -> NodeId {
        let is_dir = entry.is_dir();
        let attach_to = if is_dir {
            parent
        } else {
            self.dir(parent).dot_entry.unwrap_or(parent)
        };

        let id = self.alloc(entry);
        self.get_mut(id).parent = Some(attach_to);
        self.dir_mut(attach_to).children.push(id);
        if is_dir {
            self.attach_dot_entry(id);
        }

        self.mark_dirty_upward(attach_to);
        id
    }

    /// Iterate over the direct children of a directory (the dot entry is
    /// reached separately via `dot_entry`).
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.dir(id).children.iter().copied()
    }

    pub fn dot_entry(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).dir_data().and_then(|d| d.dot_entry)
    }

    pub fn is_dot_entry(&self, id: NodeId) -> bool {
        self.get(id).dir_data().is_some_and(|d| d.is_dot_entry)
    }

    pub fn is_mount_point(&self, id: NodeId) -> bool {
        self.get(id).dir_data().is_some_and(|d| d.is_mount_point)
    }

    pub fn set_mount_point(&mut self, id: NodeId, on: bool) {
        self.dir_mut(id).is_mount_point = on;
    }

    pub fn is_excluded(&self, id: NodeId) -> bool {
        self.get(id).dir_data().is_some_and(|d| d.is_excluded)
    }

    /// Mark a directory as skipped by exclusion policy. The node stays visible
    /// in the tree but contributes nothing to ancestor aggregates.
    pub fn set_excluded(&mut self, id: NodeId, on: bool) {
        self.dir_mut(id).is_excluded = on;
        self.mark_dirty_upward(id);
    }

    /// Invalidate the cached summary on `from` and every ancestor. Called on
    /// any structural or aggregate-relevant mutation in the subtree.
    pub(crate) fn mark_dirty_upward(&mut self, from: NodeId) {
        let mut cur = Some(from);
        while let Some(id) = cur {
            let entry = self.get_mut(id);
            if let Some(d) = entry.dir_data_mut() {
                d.summary = None;
            }
            cur = entry.parent;
        }
    }

    // ---- read-job bookkeeping ----

    /// Open read jobs anywhere in this subtree, self included. Zero for files.
    pub fn pending_read_jobs(&self, id: NodeId) -> u32 {
        self.get(id).dir_data().map_or(0, |d| d.pending_read_jobs)
    }

    pub fn read_state(&self, id: NodeId) -> ReadState {
        self.get(id)
            .dir_data()
            .map_or(ReadState::Finished, |d| d.read_state)
    }

    /// Set a directory's own read state. A terminal state is only ever
    /// replaced by `Error` (a late failure report), never rolled back.
    pub fn set_read_state(&mut self, id: NodeId, state: ReadState) {
        let d = self.dir_mut(id);
        if d.read_state.is_terminal() && state != ReadState::Error {
            return;
        }
        d.read_state = state;
    }

    /// A new read job was scheduled for this directory: count it here and in
    /// every ancestor, so any watched node reports "busy" in O(1).
    pub fn read_job_added(&mut self, id: NodeId) {
        self.walk_pending(id, 1);
    }

    /// A read job for this directory completed. Moves the node's own state to
    /// `Finished` unless it is already terminal, then drains the counters.
    pub fn read_job_finished(&mut self, id: NodeId) {
        self.set_read_state(id, ReadState::Finished);
        self.walk_pending(id, -1);
    }

    /// A read job for this directory was cancelled. Same counter bookkeeping
    /// as `read_job_finished`, but the node ends up `Aborted`.
    pub fn read_job_aborted(&mut self, id: NodeId) {
        self.set_read_state(id, ReadState::Aborted);
        self.walk_pending(id, -1);
    }

    fn walk_pending(&mut self, from: NodeId, delta: i64) {
        let mut cur = Some(from);
        while let Some(id) = cur {
            let entry = self.get_mut(id);
            let mut underflow = false;
            if let Some(d) = entry.dir_data_mut() {
                let next = d.pending_read_jobs as i64 + delta;
                if next < 0 {
                    d.pending_read_jobs = 0;
                    underflow = true;
                } else {
                    d.pending_read_jobs = next as u32;
                }
            }
            if underflow {
                tracing::warn!(
                    "read job counter underflow at '{}': finished before added",
                    entry.name
                );
            }
            cur = entry.parent;
        }
    }

    /// True while any read job in this subtree is still open.
    pub fn is_busy(&self, id: NodeId) -> bool {
        self.pending_read_jobs(id) > 0
    }

    /// True once this node's own listing reached a terminal state and no job
    /// remains open anywhere below it.
    pub fn is_finished(&self, id: NodeId) -> bool {
        !self.is_busy(id) && self.read_state(id).is_terminal()
    }

    // ---- removal ----

    /// Unlink a node from its parent and release its whole subtree.
    ///
    /// This is the only way to delete nodes: the owner detaches, the arena
    /// reclaims. Ancestor summaries are invalidated and any read jobs still
    /// open in the detached subtree are subtracted from ancestor counters so
    /// the rollup law keeps holding. The root cannot be detached.
    pub fn detach(&mut self, id: NodeId) {
        let parent = self.get(id).parent.expect("cannot detach the tree root");
        let open_jobs = self.pending_read_jobs(id);

        // Unlink: either the parent's dot-entry slot or its child list.
        let pd = self.dir_mut(parent);
        if pd.dot_entry == Some(id) {
            pd.dot_entry = None;
        } else {
            let pos = pd
                .children
                .iter()
                .position(|&c| c == id)
                .expect("node missing from its parent's child list");
            pd.children.swap_remove(pos);
        }

        if open_jobs > 0 {
            self.walk_pending(parent, -(open_jobs as i64));
        }
        self.mark_dirty_upward(parent);
        self.release_subtree(id);
    }

    fn release_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if let Some(d) = self.get(cur).dir_data() {
                stack.extend(d.children.iter().copied());
                stack.extend(d.dot_entry);
            }
            self.slots[cur.index()] = None;
            self.free.push(cur);
            self.live -= 1;
        }
    }

    // ---- dot-entry finalization ----

    /// Clean up this directory's dot entry once its own listing is done
    /// (descendants may still be reading).
    ///
    /// An empty dot entry is dropped. If the directory has no real
    /// subdirectory children there is nothing to separate files from, so the
    /// dot entry's children are merged up and the dot entry is dropped too.
    pub fn finalize_local(&mut self, id: NodeId) {
        let d = self.dir(id);
        let Some(dot) = d.dot_entry else {
            return;
        };

        if self.dir(dot).children.is_empty() {
            self.dir_mut(id).dot_entry = None;
            self.release_subtree(dot);
            self.mark_dirty_upward(id);
            return;
        }

        let has_subdir = self.dir(id).children.iter().any(|&c| self.get(c).is_dir());
        if has_subdir {
            return;
        }

        // No subdirectories: reparent the dot entry's files to the directory.
        let moved = std::mem::take(&mut self.dir_mut(dot).children);
        for &child in &moved {
            self.get_mut(child).parent = Some(id);
        }
        self.dir_mut(id).children.extend(moved);
        self.dir_mut(id).dot_entry = None;
        self.release_subtree(dot);
        self.mark_dirty_upward(id);
    }

    /// Apply `finalize_local` to this directory and every directory below it.
    /// Idempotent; meant to run once scanning globally completes.
    pub fn finalize_all(&mut self, id: NodeId) {
        let mut stack = vec![id];
        let mut dirs = Vec::new();
        while let Some(cur) = stack.pop() {
            if let Some(d) = self.get(cur).dir_data() {
                dirs.push(cur);
                stack.extend(d.children.iter().copied());
            }
        }
        for dir in dirs {
            self.finalize_local(dir);
        }
    }
}
