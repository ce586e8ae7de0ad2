pub mod aggregate;
pub mod arena;

pub use aggregate::DirSummary;
pub use arena::{DirTree, Entry, EntryKind, NodeId, ReadState};
