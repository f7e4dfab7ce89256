//! Node graph (spec §4.5): directories, files, and the id table.
//!
//! The controller exclusively owns the node id table; directory nodes own
//! only the name→id mapping, not the child nodes themselves. This breaks
//! potential ownership cycles and makes the table the single deletion
//! point (spec §3, "Ownership (design-level)").

use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::SystemTime;

use crate::lock::RwLock;
use crate::storage::Storage;

/// A monotonically increasing integer, unique within one filesystem
/// instance and never reused within its lifetime.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// A directory node: a name→id mapping plus timestamps.
pub struct DirNode {
    pub id: NodeId,
    pub children: HashMap<String, NodeId>,
    pub created_at: SystemTime,
    pub modified_at: SystemTime,
}

impl DirNode {
    pub fn new(id: NodeId) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            children: HashMap::new(),
            created_at: now,
            modified_at: now,
        }
    }
}

/// Mutable state guarded by [`FileNode`]'s own `std::sync::RwLock`,
/// distinct from the semantic, timeout-aware [`crate::lock::RwLock`] that
/// implements the open-mode admission policy (spec §4.3).
///
/// Handles synchronize *logical* access (which mode, whether a writer may
/// proceed) through `FileNode::lock`; this inner lock exists purely so that
/// two threads holding the logical read mode can touch `storage` without
/// data races, without serializing on the global tree lock.
pub struct FileInner {
    pub storage: Box<dyn Storage>,
    pub generation: u64,
    pub modified_at: SystemTime,
}

/// A file node: storage, its per-file admission lock, and a mutation
/// counter. Wrapped in [`Arc`] inside the node table so that a
/// [`crate::handle::FileHandle`] can keep operating on it after the global
/// tree lock has been released (spec §5: I/O through a handle synchronizes
/// only on the per-file lock).
pub struct FileNode {
    pub id: NodeId,
    pub inner: StdRwLock<FileInner>,
    pub lock: RwLock,
    pub created_at: SystemTime,
}

impl FileNode {
    pub fn new(id: NodeId, storage: Box<dyn Storage>) -> Arc<Self> {
        let now = SystemTime::now();
        Arc::new(Self {
            id,
            inner: StdRwLock::new(FileInner {
                storage,
                generation: 0,
                modified_at: now,
            }),
            lock: RwLock::new(),
            created_at: now,
        })
    }

    pub fn size(&self) -> u64 {
        self.inner.read().unwrap().storage.size()
    }

    pub fn quota_usage(&self) -> u64 {
        self.inner.read().unwrap().storage.quota_usage()
    }

    pub fn generation(&self) -> u64 {
        self.inner.read().unwrap().generation
    }

    pub fn modified_at(&self) -> SystemTime {
        self.inner.read().unwrap().modified_at
    }
}

/// A node in the graph: either a directory or a file.
pub enum Node {
    Dir(DirNode),
    File(Arc<FileNode>),
}

impl Node {
    pub fn id(&self) -> NodeId {
        match self {
            Node::Dir(d) => d.id,
            Node::File(f) => f.id,
        }
    }

    pub fn as_dir(&self) -> Option<&DirNode> {
        match self {
            Node::Dir(d) => Some(d),
            Node::File(_) => None,
        }
    }

    pub fn as_dir_mut(&mut self) -> Option<&mut DirNode> {
        match self {
            Node::Dir(d) => Some(d),
            Node::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&Arc<FileNode>> {
        match self {
            Node::File(f) => Some(f),
            Node::Dir(_) => None,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Dir(_))
    }

    pub fn created_at(&self) -> SystemTime {
        match self {
            Node::Dir(d) => d.created_at,
            Node::File(f) => f.created_at,
        }
    }

    pub fn modified_at(&self) -> SystemTime {
        match self {
            Node::Dir(d) => d.modified_at,
            Node::File(f) => f.modified_at(),
        }
    }
}
