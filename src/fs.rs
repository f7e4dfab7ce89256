//! Filesystem controller (spec §4.6): the public API. Holds the global tree
//! lock, orchestrates every structural operation, and implements
//! copy/import/export with rollback.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::ReentrantMutex;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::glob::fnmatch;
use crate::handle::{FileHandle, OpenMode};
use crate::node::{DirNode, FileNode, Node, NodeId};
use crate::path::{normalize, segments, split_parent_name};
use crate::quota::QuotaManager;
use crate::storage::{
    RandomAccessStorage, SequentialStorage, Storage, DEFAULT_CHUNK_OVERHEAD_ESTIMATE,
    DEFAULT_PROMOTION_HARD_LIMIT,
};

/// Storage representation policy for newly created files (spec §4.6).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DefaultStorage {
    /// Create sequential storage; allow promotion on the first non-tail write.
    Auto,
    /// Create sequential storage; forbid promotion (non-tail writes fail).
    Sequential,
    /// Create random-access storage from the start.
    RandomAccess,
}

/// Filesystem-wide configuration, fixed at construction time.
#[derive(Debug, Clone)]
pub struct Config {
    pub max_quota: u64,
    pub chunk_overhead_estimate: u64,
    pub promotion_hard_limit: u64,
    pub max_nodes: Option<usize>,
    pub default_storage: DefaultStorage,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_quota: 256 * 1024 * 1024,
            chunk_overhead_estimate: DEFAULT_CHUNK_OVERHEAD_ESTIMATE,
            promotion_hard_limit: DEFAULT_PROMOTION_HARD_LIMIT,
            max_nodes: None,
            default_storage: DefaultStorage::Auto,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder(Config::default())
    }
}

/// Fluent builder for [`Config`].
pub struct ConfigBuilder(Config);

impl ConfigBuilder {
    pub fn max_quota(mut self, value: u64) -> Self {
        self.0.max_quota = value;
        self
    }

    pub fn chunk_overhead_estimate(mut self, value: u64) -> Self {
        self.0.chunk_overhead_estimate = value;
        self
    }

    pub fn promotion_hard_limit(mut self, value: u64) -> Self {
        self.0.promotion_hard_limit = value;
        self
    }

    pub fn max_nodes(mut self, value: usize) -> Self {
        self.0.max_nodes = Some(value);
        self
    }

    pub fn default_storage(mut self, value: DefaultStorage) -> Self {
        self.0.default_storage = value;
        self
    }

    pub fn build(self) -> Config {
        self.0
    }
}

/// Metadata snapshot returned by [`Filesystem::stat`].
#[derive(Debug, Clone)]
pub struct Stat {
    pub size: u64,
    pub created_at: SystemTime,
    pub modified_at: SystemTime,
    pub generation: u64,
    pub is_dir: bool,
}

/// Aggregate filesystem statistics returned by [`Filesystem::stats`].
#[derive(Debug, Clone)]
pub struct Stats {
    pub used_bytes: u64,
    pub quota_bytes: u64,
    pub free_bytes: u64,
    pub file_count: usize,
    pub dir_count: usize,
    pub chunk_count: usize,
    pub overhead_per_chunk_estimate: u64,
}

struct Inner {
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
    root: NodeId,
}

impl Inner {
    fn alloc_id(&mut self, max_nodes: Option<usize>) -> Result<NodeId> {
        if let Some(limit) = max_nodes {
            if self.nodes.len() >= limit {
                return Err(Error::NodeLimitExceeded {
                    current: self.nodes.len(),
                    limit,
                });
            }
        }
        let id = NodeId(self.next_id);
        self.next_id += 1;
        Ok(id)
    }

    fn alloc_dir(&mut self, max_nodes: Option<usize>) -> Result<NodeId> {
        let id = self.alloc_id(max_nodes)?;
        self.nodes.insert(id, Node::Dir(DirNode::new(id)));
        Ok(id)
    }

    fn alloc_file(&mut self, storage: Box<dyn Storage>, max_nodes: Option<usize>) -> Result<Arc<FileNode>> {
        let id = self.alloc_id(max_nodes)?;
        let fnode = FileNode::new(id, storage);
        self.nodes.insert(id, Node::File(Arc::clone(&fnode)));
        Ok(fnode)
    }

    fn resolve(&self, npath: &str) -> Option<NodeId> {
        if npath == "/" {
            return Some(self.root);
        }
        let mut current = self.root;
        for part in segments(npath) {
            let dir = self.nodes.get(&current)?.as_dir()?;
            current = *dir.children.get(part)?;
        }
        Some(current)
    }

    fn resolve_parent_and_name(&self, npath: &str) -> Option<(NodeId, String)> {
        let (parent_path, name) = split_parent_name(npath);
        let parent = self.resolve(&parent_path)?;
        if !self.nodes.get(&parent)?.is_dir() {
            return None;
        }
        Some((parent, name.to_string()))
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn create_storage(config: &Config) -> Box<dyn Storage> {
    match config.default_storage {
        DefaultStorage::RandomAccess => Box::new(RandomAccessStorage::new()),
        DefaultStorage::Sequential => Box::new(SequentialStorage::new(
            config.chunk_overhead_estimate,
            config.promotion_hard_limit,
            false,
        )),
        DefaultStorage::Auto => Box::new(SequentialStorage::new(
            config.chunk_overhead_estimate,
            config.promotion_hard_limit,
            true,
        )),
    }
}

fn create_file(inner: &mut Inner, config: &Config, npath: &str) -> Result<Arc<FileNode>> {
    let (parent_path, _) = split_parent_name(npath);
    let (parent, name) = inner
        .resolve_parent_and_name(npath)
        .ok_or_else(|| Error::not_found(format!("parent directory does not exist: '{parent_path}'")))?;
    let storage = create_storage(config);
    let fnode = inner.alloc_file(storage, config.max_nodes)?;
    inner
        .nodes
        .get_mut(&parent)
        .unwrap()
        .as_dir_mut()
        .unwrap()
        .children
        .insert(name, fnode.id);
    Ok(fnode)
}

fn makedirs(inner: &mut Inner, config: &Config, npath: &str, created: &mut Vec<String>) -> Result<()> {
    let mut current = inner.root;
    let mut current_path = String::new();
    for part in segments(npath) {
        let next_path = format!("{current_path}/{part}");
        let existing_child = inner
            .nodes
            .get(&current)
            .and_then(Node::as_dir)
            .and_then(|d| d.children.get(part).copied());
        match existing_child {
            Some(child_id) => {
                if !inner.nodes.get(&child_id).unwrap().is_dir() {
                    return Err(Error::exists(format!(
                        "a file exists at path component: '{part}'"
                    )));
                }
                current = child_id;
            }
            None => {
                let new_id = inner.alloc_dir(config.max_nodes)?;
                inner
                    .nodes
                    .get_mut(&current)
                    .unwrap()
                    .as_dir_mut()
                    .unwrap()
                    .children
                    .insert(part.to_string(), new_id);
                current = new_id;
                created.push(next_path.clone());
            }
        }
        current_path = next_path;
    }
    Ok(())
}

fn ensure_parents(inner: &mut Inner, config: &Config, npath: &str, created: &mut Vec<String>) -> Result<()> {
    let (parent_path, _) = split_parent_name(npath);
    if inner.resolve(&parent_path).is_none() {
        makedirs(inner, config, &parent_path, created)?;
    }
    Ok(())
}

fn rollback_created_dirs(inner: &mut Inner, created: &[String]) {
    for dpath in created.iter().rev() {
        let Some(id) = inner.resolve(dpath) else { continue };
        let has_children = match inner.nodes.get(&id) {
            Some(Node::Dir(d)) => !d.children.is_empty(),
            _ => continue,
        };
        if has_children {
            continue;
        }
        let Some((parent, name)) = inner.resolve_parent_and_name(dpath) else { continue };
        let still_linked = inner
            .nodes
            .get(&parent)
            .and_then(Node::as_dir)
            .and_then(|d| d.children.get(&name).copied())
            == Some(id);
        if !still_linked {
            continue;
        }
        inner.nodes.get_mut(&parent).unwrap().as_dir_mut().unwrap().children.remove(&name);
        inner.nodes.remove(&id);
    }
}

fn assert_no_open_handles(inner: &Inner, id: NodeId, path_for_error: &str) -> Result<()> {
    match inner.nodes.get(&id).unwrap() {
        Node::File(f) => {
            if f.lock.is_locked() {
                return Err(Error::Blocking(format!("file is open: '{path_for_error}'")));
            }
            Ok(())
        }
        Node::Dir(d) => {
            for (name, &child_id) in &d.children {
                assert_no_open_handles(inner, child_id, &join_path(path_for_error, name))?;
            }
            Ok(())
        }
    }
}

fn calc_subtree_quota(inner: &Inner, id: NodeId) -> u64 {
    match inner.nodes.get(&id).unwrap() {
        Node::File(f) => f.quota_usage(),
        Node::Dir(d) => d.children.values().map(|&c| calc_subtree_quota(inner, c)).sum(),
    }
}

fn remove_subtree(inner: &mut Inner, id: NodeId) {
    if let Some(Node::Dir(d)) = inner.nodes.get(&id) {
        let children: Vec<NodeId> = d.children.values().copied().collect();
        for child in children {
            remove_subtree(inner, child);
        }
    }
    inner.nodes.remove(&id);
}

fn collect_files(inner: &Inner, id: NodeId, current_path: &str, out: &mut Vec<(String, Arc<FileNode>)>) {
    match inner.nodes.get(&id).unwrap() {
        Node::File(f) => out.push((current_path.to_string(), Arc::clone(f))),
        Node::Dir(d) => {
            for (name, &child_id) in &d.children {
                collect_files(inner, child_id, &join_path(current_path, name), out);
            }
        }
    }
}

fn deep_copy_subtree(
    inner: &mut Inner,
    config: &Config,
    id: NodeId,
    created: &mut Vec<NodeId>,
) -> Result<NodeId> {
    let is_dir = inner.nodes.get(&id).unwrap().is_dir();
    if is_dir {
        let new_id = inner.alloc_dir(config.max_nodes)?;
        created.push(new_id);
        let children: Vec<(String, NodeId)> = inner
            .nodes
            .get(&id)
            .unwrap()
            .as_dir()
            .unwrap()
            .children
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        for (name, child_id) in children {
            let new_child = deep_copy_subtree(inner, config, child_id, created)?;
            inner
                .nodes
                .get_mut(&new_id)
                .unwrap()
                .as_dir_mut()
                .unwrap()
                .children
                .insert(name, new_child);
        }
        Ok(new_id)
    } else {
        let fnode = match inner.nodes.get(&id).unwrap() {
            Node::File(f) => Arc::clone(f),
            Node::Dir(_) => unreachable!(),
        };
        fnode.lock.acquire_read(None)?;
        let data = fnode.inner.read().unwrap().storage.read_at(0, None);
        fnode.lock.release_read();
        let mut storage = create_storage(config);
        storage.bulk_load(&data);
        let new_fnode = inner.alloc_file(storage, config.max_nodes)?;
        created.push(new_fnode.id);
        Ok(new_fnode.id)
    }
}

fn preallocate_file(fnode: &FileNode, quota: &QuotaManager, target: u64) -> Result<()> {
    let current = fnode.size();
    if target <= current {
        return Ok(());
    }
    let mut inner = fnode.inner.write().unwrap();
    let zeros = vec![0u8; (target - current) as usize];
    let outcome = inner.storage.write_at(current, &zeros, quota)?;
    if let Some(successor) = outcome.successor {
        inner.storage = successor;
        quota.release(outcome.release_after);
    }
    inner.generation += 1;
    inner.modified_at = SystemTime::now();
    Ok(())
}

/// An in-process, heap-resident filesystem instance. The unit of
/// isolation: there is no process-wide singleton, and nothing it owns
/// outlives it (spec §9).
pub struct Filesystem {
    quota: Arc<QuotaManager>,
    tree: ReentrantMutex<RefCell<Inner>>,
    config: Config,
}

impl Default for Filesystem {
    fn default() -> Self {
        Self::new()
    }
}

impl Filesystem {
    /// Create a filesystem with default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default()).expect("default configuration never exceeds max_nodes")
    }

    /// Create a filesystem with explicit configuration. Fails only if
    /// `max_nodes` is configured low enough to reject the root directory
    /// itself (e.g. `0`).
    pub fn with_config(config: Config) -> Result<Self> {
        let mut inner = Inner {
            nodes: HashMap::new(),
            next_id: 0,
            root: NodeId(0),
        };
        let root_id = inner.alloc_dir(config.max_nodes)?;
        inner.root = root_id;
        Ok(Self {
            quota: Arc::new(QuotaManager::new(config.max_quota)),
            tree: ReentrantMutex::new(RefCell::new(inner)),
            config,
        })
    }

    /// `(maximum, used, free)` quota snapshot.
    pub fn quota_snapshot(&self) -> (u64, u64, u64) {
        self.quota.snapshot()
    }

    /// Open (or create) a file, returning a handle that holds the file's
    /// admission lock for its lifetime.
    pub fn open(
        &self,
        path: &str,
        mode: OpenMode,
        preallocate: u64,
        lock_timeout: Option<Duration>,
    ) -> Result<FileHandle> {
        let npath = normalize(path)?;
        let guard = self.tree.lock();
        let mut inner = guard.borrow_mut();

        let existing = inner.resolve(&npath);
        if let Some(id) = existing {
            if inner.nodes.get(&id).unwrap().is_dir() {
                return Err(Error::IsADirectory(path.to_string()));
            }
        }

        let mut created_new = false;
        let fnode: Arc<FileNode> = match mode {
            OpenMode::Read | OpenMode::ReadWrite => {
                let id = existing.ok_or_else(|| Error::not_found(path))?;
                match inner.nodes.get(&id).unwrap() {
                    Node::File(f) => Arc::clone(f),
                    Node::Dir(_) => unreachable!(),
                }
            }
            OpenMode::WriteTruncate | OpenMode::Append => match existing {
                None => {
                    created_new = true;
                    create_file(&mut inner, &self.config, &npath)?
                }
                Some(id) => match inner.nodes.get(&id).unwrap() {
                    Node::File(f) => Arc::clone(f),
                    Node::Dir(_) => unreachable!(),
                },
            },
            OpenMode::ExclusiveCreate => {
                if existing.is_some() {
                    return Err(Error::exists(path));
                }
                created_new = true;
                create_file(&mut inner, &self.config, &npath)?
            }
        };

        if mode.takes_write_lock() {
            fnode.lock.acquire_write(lock_timeout)?;
        } else {
            fnode.lock.acquire_read(lock_timeout)?;
        }

        if mode == OpenMode::WriteTruncate && existing.is_some() {
            let mut fi = fnode.inner.write().unwrap();
            if let Err(e) = fi.storage.truncate(0, &self.quota) {
                drop(fi);
                fnode.lock.release_write();
                return Err(e);
            }
            fi.generation += 1;
            fi.modified_at = SystemTime::now();
        }

        let mut handle = FileHandle::new(
            Arc::clone(&fnode),
            Arc::clone(&self.quota),
            mode,
            mode == OpenMode::Append,
        );

        if preallocate > 0 {
            if let Err(e) = preallocate_file(&fnode, &self.quota, preallocate) {
                handle.close();
                if created_new {
                    // Unlike the open() this was ported from, which leaves the
                    // node behind on a failed preallocate, a file this call
                    // itself created must not survive its own failure.
                    if let Some((parent, name)) = inner.resolve_parent_and_name(&npath) {
                        if let Some(dir) = inner.nodes.get_mut(&parent).and_then(Node::as_dir_mut) {
                            dir.children.remove(&name);
                        }
                    }
                    inner.nodes.remove(&fnode.id);
                }
                return Err(e);
            }
        }

        trace!(path = %npath, ?mode, "open");
        Ok(handle)
    }

    /// Create a directory, and any missing intermediate directories.
    pub fn mkdir(&self, path: &str, exist_ok: bool) -> Result<()> {
        let npath = normalize(path)?;
        let guard = self.tree.lock();
        let mut inner = guard.borrow_mut();
        if let Some(id) = inner.resolve(&npath) {
            return match inner.nodes.get(&id).unwrap() {
                Node::Dir(_) if exist_ok => Ok(()),
                Node::Dir(_) => Err(Error::exists(path)),
                Node::File(_) => Err(Error::exists(path)),
            };
        }
        let mut created = Vec::new();
        makedirs(&mut inner, &self.config, &npath, &mut created)?;
        debug!(path = %npath, "mkdir");
        Ok(())
    }

    /// Rename `src` to `dst` in place. Both must share the same parent
    /// directory semantics as `move`, but `rename` does not auto-create
    /// missing destination parents.
    pub fn rename(&self, src: &str, dst: &str) -> Result<()> {
        self.rename_or_move(src, dst, false)
    }

    /// Like [`rename`](Filesystem::rename), but auto-creates missing parent
    /// directories for `dst`.
    pub fn mv(&self, src: &str, dst: &str) -> Result<()> {
        self.rename_or_move(src, dst, true)
    }

    fn rename_or_move(&self, src: &str, dst: &str, auto_create_parents: bool) -> Result<()> {
        let nsrc = normalize(src)?;
        let ndst = normalize(dst)?;
        if nsrc == "/" {
            return Err(Error::InvalidArgument(
                "cannot rename or move the root directory".into(),
            ));
        }
        let guard = self.tree.lock();
        let mut inner = guard.borrow_mut();
        let src_id = inner.resolve(&nsrc).ok_or_else(|| Error::not_found(src))?;
        if inner.resolve(&ndst).is_some() {
            return Err(Error::exists(dst));
        }
        assert_no_open_handles(&inner, src_id, &nsrc)?;

        if auto_create_parents {
            let (dst_parent_path, _) = split_parent_name(&ndst);
            if inner.resolve(&dst_parent_path).is_none() {
                let mut created = Vec::new();
                makedirs(&mut inner, &self.config, &dst_parent_path, &mut created)?;
            }
        }

        let (dst_parent, dst_name) = inner.resolve_parent_and_name(&ndst).ok_or_else(|| {
            Error::not_found(format!("destination parent does not exist: '{dst}'"))
        })?;
        let (src_parent, src_name) = inner.resolve_parent_and_name(&nsrc).unwrap();

        inner
            .nodes
            .get_mut(&src_parent)
            .unwrap()
            .as_dir_mut()
            .unwrap()
            .children
            .remove(&src_name);
        inner
            .nodes
            .get_mut(&dst_parent)
            .unwrap()
            .as_dir_mut()
            .unwrap()
            .children
            .insert(dst_name, src_id);
        debug!(src = %nsrc, dst = %ndst, "rename/move");
        Ok(())
    }

    /// Remove a file. Fails if `path` is a directory or the file is open.
    pub fn remove(&self, path: &str) -> Result<()> {
        let npath = normalize(path)?;
        let guard = self.tree.lock();
        let mut inner = guard.borrow_mut();
        let id = inner.resolve(&npath).ok_or_else(|| Error::not_found(path))?;
        let size = match inner.nodes.get(&id).unwrap() {
            Node::Dir(_) => return Err(Error::IsADirectory(path.to_string())),
            Node::File(f) => {
                if f.lock.is_locked() {
                    return Err(Error::Blocking(format!("file is open: '{path}'")));
                }
                f.quota_usage()
            }
        };
        let (parent, name) = inner.resolve_parent_and_name(&npath).unwrap();
        inner.nodes.get_mut(&parent).unwrap().as_dir_mut().unwrap().children.remove(&name);
        inner.nodes.remove(&id);
        self.quota.release(size);
        debug!(path = %npath, "remove");
        Ok(())
    }

    /// Recursively remove a directory. Fails if any descendant file is open.
    pub fn rmtree(&self, path: &str) -> Result<()> {
        let npath = normalize(path)?;
        if npath == "/" {
            return Err(Error::InvalidArgument("cannot remove the root directory".into()));
        }
        let guard = self.tree.lock();
        let mut inner = guard.borrow_mut();
        let id = inner.resolve(&npath).ok_or_else(|| Error::not_found(path))?;
        if !inner.nodes.get(&id).unwrap().is_dir() {
            return Err(Error::NotADirectory(path.to_string()));
        }
        assert_no_open_handles(&inner, id, &npath)?;
        let total = calc_subtree_quota(&inner, id);
        if let Some((parent, name)) = inner.resolve_parent_and_name(&npath) {
            inner.nodes.get_mut(&parent).unwrap().as_dir_mut().unwrap().children.remove(&name);
        }
        remove_subtree(&mut inner, id);
        self.quota.release(total);
        debug!(path = %npath, "rmtree");
        Ok(())
    }

    /// Names of the direct children of a directory. Enumeration order is
    /// unspecified.
    pub fn listdir(&self, path: &str) -> Result<Vec<String>> {
        let npath = normalize(path)?;
        let guard = self.tree.lock();
        let inner = guard.borrow();
        let id = inner.resolve(&npath).ok_or_else(|| Error::not_found(path))?;
        let dir = inner
            .nodes
            .get(&id)
            .unwrap()
            .as_dir()
            .ok_or_else(|| Error::NotADirectory(path.to_string()))?;
        Ok(dir.children.keys().cloned().collect())
    }

    /// `true` iff `path` resolves to any node. Path-traversal errors coerce
    /// to `false` rather than propagating (spec §7).
    pub fn exists(&self, path: &str) -> bool {
        let Ok(npath) = normalize(path) else { return false };
        let guard = self.tree.lock();
        guard.borrow().resolve(&npath).is_some()
    }

    pub fn is_dir(&self, path: &str) -> bool {
        let Ok(npath) = normalize(path) else { return false };
        let guard = self.tree.lock();
        let inner = guard.borrow();
        inner.resolve(&npath).map(|id| inner.nodes.get(&id).unwrap().is_dir()).unwrap_or(false)
    }

    pub fn is_file(&self, path: &str) -> bool {
        let Ok(npath) = normalize(path) else { return false };
        let guard = self.tree.lock();
        let inner = guard.borrow();
        inner.resolve(&npath).map(|id| !inner.nodes.get(&id).unwrap().is_dir()).unwrap_or(false)
    }

    /// Metadata for a file or directory. Directories always report size 0
    /// and generation 0 (spec §9: whether directories should carry their
    /// own generation counter is left undecided by the source; we do not
    /// add one).
    pub fn stat(&self, path: &str) -> Result<Stat> {
        let npath = normalize(path)?;
        let guard = self.tree.lock();
        let inner = guard.borrow();
        let id = inner.resolve(&npath).ok_or_else(|| Error::not_found(path))?;
        Ok(match inner.nodes.get(&id).unwrap() {
            Node::Dir(d) => Stat {
                size: 0,
                created_at: d.created_at,
                modified_at: d.modified_at,
                generation: 0,
                is_dir: true,
            },
            Node::File(f) => Stat {
                size: f.size(),
                created_at: f.created_at,
                modified_at: f.modified_at(),
                generation: f.generation(),
                is_dir: false,
            },
        })
    }

    /// Aggregate statistics across the whole filesystem.
    pub fn stats(&self) -> Stats {
        let guard = self.tree.lock();
        let inner = guard.borrow();
        let mut file_count = 0;
        let mut dir_count = 0;
        let mut chunk_count = 0;
        for node in inner.nodes.values() {
            match node {
                Node::Dir(_) => dir_count += 1,
                Node::File(f) => {
                    file_count += 1;
                    if let Some(c) = f.inner.read().unwrap().storage.chunk_count() {
                        chunk_count += c;
                    }
                }
            }
        }
        let (quota_max, _used, quota_free) = self.quota.snapshot();
        Stats {
            used_bytes: quota_max - quota_free,
            quota_bytes: quota_max,
            free_bytes: quota_free,
            file_count,
            dir_count,
            chunk_count,
            overhead_per_chunk_estimate: self.config.chunk_overhead_estimate,
        }
    }

    /// Size in bytes of a file. Fails if `path` is a directory.
    pub fn get_size(&self, path: &str) -> Result<u64> {
        let npath = normalize(path)?;
        let guard = self.tree.lock();
        let inner = guard.borrow();
        let id = inner.resolve(&npath).ok_or_else(|| Error::not_found(path))?;
        match inner.nodes.get(&id).unwrap() {
            Node::Dir(_) => Err(Error::IsADirectory(path.to_string())),
            Node::File(f) => Ok(f.size()),
        }
    }

    /// Copy a file's contents out as an owned byte vector. Lives outside
    /// quota management: callers must be aware that this is extra process
    /// memory beyond the configured quota.
    pub fn export_as_bytes(&self, path: &str, max_size: Option<u64>) -> Result<Vec<u8>> {
        let npath = normalize(path)?;
        let fnode = {
            let guard = self.tree.lock();
            let inner = guard.borrow();
            let id = inner.resolve(&npath).ok_or_else(|| Error::not_found(path))?;
            match inner.nodes.get(&id).unwrap() {
                Node::Dir(_) => return Err(Error::IsADirectory(path.to_string())),
                Node::File(f) => Arc::clone(f),
            }
        };
        fnode.lock.acquire_read(None)?;
        let result = (|| {
            let inner = fnode.inner.read().unwrap();
            let size = inner.storage.size();
            if let Some(max) = max_size {
                if size > max {
                    return Err(Error::InvalidArgument(format!(
                        "file size {size} exceeds max_size={max}"
                    )));
                }
            }
            Ok(inner.storage.read_at(0, None))
        })();
        fnode.lock.release_read();
        result
    }

    /// Collect `(absolute_path, bytes)` pairs for every file under `prefix`.
    /// `only_dirty` filters to files with `generation > 0`.
    pub fn export_tree(&self, prefix: &str, only_dirty: bool) -> Result<Vec<(String, Vec<u8>)>> {
        let nprefix = normalize(prefix)?;
        let entries: Vec<(String, Arc<FileNode>)> = {
            let guard = self.tree.lock();
            let inner = guard.borrow();
            let mut out = Vec::new();
            if let Some(id) = inner.resolve(&nprefix) {
                collect_files(&inner, id, &nprefix, &mut out);
            }
            if only_dirty {
                out.retain(|(_, f)| f.generation() > 0);
            }
            out
        };
        let mut result = Vec::with_capacity(entries.len());
        for (path, fnode) in entries {
            fnode.lock.acquire_read(None)?;
            let data = fnode.inner.read().unwrap().storage.read_at(0, None);
            fnode.lock.release_read();
            result.push((path, data));
        }
        Ok(result)
    }

    /// Atomically overlay `tree` onto the filesystem. All-or-nothing: on
    /// failure, no new nodes, directories, or quota usage are left behind.
    pub fn import_tree(&self, tree: &HashMap<String, Vec<u8>>) -> Result<()> {
        if tree.is_empty() {
            return Ok(());
        }
        let guard = self.tree.lock();
        let mut inner = guard.borrow_mut();

        let mut normalized: Vec<(String, &Vec<u8>)> = Vec::with_capacity(tree.len());
        for (path, data) in tree {
            normalized.push((normalize(path)?, data));
        }

        for (npath, _) in &normalized {
            if let Some(id) = inner.resolve(npath) {
                if let Node::File(f) = inner.nodes.get(&id).unwrap() {
                    if f.lock.is_locked() {
                        return Err(Error::Blocking(format!("cannot import: file is open: '{npath}'")));
                    }
                }
            }
        }

        let mut old_quota: u64 = 0;
        let mut old_nodes: HashMap<String, Option<(NodeId, Arc<FileNode>)>> = HashMap::new();
        for (npath, _) in &normalized {
            match inner.resolve(npath) {
                Some(id) => match inner.nodes.get(&id).unwrap() {
                    Node::File(f) => {
                        old_quota += f.quota_usage();
                        old_nodes.insert(npath.clone(), Some((id, Arc::clone(f))));
                    }
                    Node::Dir(_) => {
                        old_nodes.insert(npath.clone(), None);
                    }
                },
                None => {
                    old_nodes.insert(npath.clone(), None);
                }
            }
        }

        let mut new_quota: u64 = 0;
        for (_, data) in &normalized {
            if !data.is_empty() {
                new_quota += data.len() as u64 + self.config.chunk_overhead_estimate;
            }
        }

        let net: i128 = new_quota as i128 - old_quota as i128;
        if net > 0 {
            let avail = self.quota.free();
            if net as u64 > avail {
                return Err(Error::QuotaExceeded {
                    requested: net as u64,
                    available: avail,
                });
            }
        }

        let mut written: Vec<String> = Vec::new();
        let mut new_ids: HashMap<String, NodeId> = HashMap::new();
        let mut created_dirs: Vec<String> = Vec::new();

        let op_result: Result<()> = (|| {
            for (npath, data) in &normalized {
                ensure_parents(&mut inner, &self.config, npath, &mut created_dirs)?;
                let mut storage = create_storage(&self.config);
                storage.bulk_load(data);
                let fnode = inner.alloc_file(storage, self.config.max_nodes)?;
                let (parent, name) = inner.resolve_parent_and_name(npath).unwrap();
                if let Some(Some((old_id, _))) = old_nodes.get(npath) {
                    inner.nodes.remove(old_id);
                }
                inner
                    .nodes
                    .get_mut(&parent)
                    .unwrap()
                    .as_dir_mut()
                    .unwrap()
                    .children
                    .insert(name, fnode.id);
                new_ids.insert(npath.clone(), fnode.id);
                written.push(npath.clone());
            }
            Ok(())
        })();

        if let Err(e) = op_result {
            for npath in &written {
                if let Some(&id) = new_ids.get(npath) {
                    inner.nodes.remove(&id);
                }
                if let Some((parent, name)) = inner.resolve_parent_and_name(npath) {
                    match old_nodes.get(npath) {
                        Some(Some((old_id, old_fnode))) => {
                            inner.nodes.insert(*old_id, Node::File(Arc::clone(old_fnode)));
                            if let Some(dir) = inner.nodes.get_mut(&parent).and_then(Node::as_dir_mut) {
                                dir.children.insert(name, *old_id);
                            }
                        }
                        _ => {
                            if let Some(dir) = inner.nodes.get_mut(&parent).and_then(Node::as_dir_mut) {
                                dir.children.remove(&name);
                            }
                        }
                    }
                }
            }
            rollback_created_dirs(&mut inner, &created_dirs);
            return Err(e);
        }

        if net > 0 {
            self.quota.force_reserve(net as u64);
        } else if net < 0 {
            self.quota.release((-net) as u64);
        }
        debug!(count = normalized.len(), "import_tree");
        Ok(())
    }

    /// Copy a single file.
    pub fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let nsrc = normalize(src)?;
        let ndst = normalize(dst)?;
        let guard = self.tree.lock();
        let mut inner = guard.borrow_mut();
        let src_id = inner.resolve(&nsrc).ok_or_else(|| Error::not_found(src))?;
        let src_fnode = match inner.nodes.get(&src_id).unwrap() {
            Node::Dir(_) => return Err(Error::IsADirectory(src.to_string())),
            Node::File(f) => Arc::clone(f),
        };
        if inner.resolve(&ndst).is_some() {
            return Err(Error::exists(dst));
        }
        src_fnode.lock.acquire_read(None)?;
        let data = src_fnode.inner.read().unwrap().storage.read_at(0, None);
        src_fnode.lock.release_read();

        let dst_fnode = create_file(&mut inner, &self.config, &ndst)?;
        if !data.is_empty() {
            let mut fi = dst_fnode.inner.write().unwrap();
            match fi.storage.write_at(0, &data, &self.quota) {
                Ok(outcome) => {
                    if let Some(successor) = outcome.successor {
                        fi.storage = successor;
                        self.quota.release(outcome.release_after);
                    }
                    fi.generation += 1;
                }
                Err(e) => {
                    drop(fi);
                    // Preserve atomicity (spec §4.6, invariant 8): undo the
                    // destination node the original implementation leaves behind
                    // on a failed write.
                    if let Some((parent, name)) = inner.resolve_parent_and_name(&ndst) {
                        if let Some(dir) = inner.nodes.get_mut(&parent).and_then(Node::as_dir_mut) {
                            dir.children.remove(&name);
                        }
                    }
                    inner.nodes.remove(&dst_fnode.id);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Deep-copy a directory subtree.
    pub fn copy_tree(&self, src: &str, dst: &str) -> Result<()> {
        let nsrc = normalize(src)?;
        let ndst = normalize(dst)?;
        let guard = self.tree.lock();
        let mut inner = guard.borrow_mut();
        let src_id = inner.resolve(&nsrc).ok_or_else(|| Error::not_found(src))?;
        if !inner.nodes.get(&src_id).unwrap().is_dir() {
            return Err(Error::NotADirectory(src.to_string()));
        }
        if inner.resolve(&ndst).is_some() {
            return Err(Error::exists(dst));
        }
        let (dst_parent, dst_name) = inner.resolve_parent_and_name(&ndst).ok_or_else(|| {
            Error::not_found(format!("destination parent does not exist: '{dst}'"))
        })?;

        let total_data = calc_subtree_quota(&inner, src_id);
        if total_data > 0 {
            let avail = self.quota.free();
            if total_data > avail {
                return Err(Error::QuotaExceeded {
                    requested: total_data,
                    available: avail,
                });
            }
        }

        let mut created_ids: Vec<NodeId> = Vec::new();
        let new_root = match deep_copy_subtree(&mut inner, &self.config, src_id, &mut created_ids) {
            Ok(id) => id,
            Err(e) => {
                for id in created_ids.into_iter().rev() {
                    inner.nodes.remove(&id);
                }
                return Err(e);
            }
        };
        inner
            .nodes
            .get_mut(&dst_parent)
            .unwrap()
            .as_dir_mut()
            .unwrap()
            .children
            .insert(dst_name, new_root);
        if total_data > 0 {
            self.quota.force_reserve(total_data);
        }
        Ok(())
    }

    fn walk_level(&self, dir_path: &str, dir_id: NodeId, out: &mut Vec<(String, Vec<String>, Vec<String>)>) {
        let snapshot: Vec<(String, NodeId)> = {
            let guard = self.tree.lock();
            let inner = guard.borrow();
            match inner.nodes.get(&dir_id).and_then(Node::as_dir) {
                Some(dir) => dir.children.iter().map(|(k, v)| (k.clone(), *v)).collect(),
                None => return,
            }
        };
        let mut dirnames = Vec::new();
        let mut filenames = Vec::new();
        let mut child_dirs = Vec::new();
        {
            let guard = self.tree.lock();
            let inner = guard.borrow();
            for (name, child_id) in &snapshot {
                match inner.nodes.get(child_id) {
                    Some(Node::Dir(_)) => {
                        dirnames.push(name.clone());
                        child_dirs.push((join_path(dir_path, name), *child_id));
                    }
                    Some(Node::File(_)) => filenames.push(name.clone()),
                    None => {}
                }
            }
        }
        out.push((dir_path.to_string(), dirnames, filenames));
        for (child_path, child_id) in child_dirs {
            self.walk_level(&child_path, child_id, out);
        }
    }

    /// Top-down recursive walk of a directory tree. Weak consistency (spec
    /// §5, §9): each visited directory's listing is a consistent snapshot,
    /// but a directory that disappears between levels is silently skipped.
    pub fn walk(&self, path: &str) -> Result<Vec<(String, Vec<String>, Vec<String>)>> {
        let npath = normalize(path)?;
        let id = {
            let guard = self.tree.lock();
            let inner = guard.borrow();
            let id = inner.resolve(&npath).ok_or_else(|| Error::not_found(path))?;
            if !inner.nodes.get(&id).unwrap().is_dir() {
                return Err(Error::NotADirectory(path.to_string()));
            }
            id
        };
        let mut out = Vec::new();
        self.walk_level(&npath, id, &mut out);
        Ok(out)
    }

    /// Shell-style glob supporting `*`, `?`, `[...]`, and `**` (spec §4.6).
    /// A relative pattern is rooted at `/`. Results are sorted.
    pub fn glob(&self, pattern: &str) -> Vec<String> {
        let converted = pattern.replace('\\', "/");
        let converted = if converted.starts_with('/') {
            converted
        } else {
            format!("/{converted}")
        };
        let parts: Vec<&str> = converted.split('/').filter(|s| !s.is_empty()).collect();
        let guard = self.tree.lock();
        let inner = guard.borrow();
        let mut results = Vec::new();
        self.glob_match(&inner, inner.root, "/", &parts, 0, &mut results);
        results.sort();
        results.dedup();
        results
    }

    fn glob_match(
        &self,
        inner: &Inner,
        node_id: NodeId,
        current_path: &str,
        parts: &[&str],
        idx: usize,
        results: &mut Vec<String>,
    ) {
        let Some(Node::Dir(dir)) = inner.nodes.get(&node_id) else { return };
        if idx >= parts.len() {
            return;
        }
        let part = parts[idx];
        let is_last = idx == parts.len() - 1;
        let snapshot: Vec<(String, NodeId)> = dir.children.iter().map(|(k, v)| (k.clone(), *v)).collect();

        if part == "**" {
            if idx + 1 < parts.len() {
                self.glob_match(inner, node_id, current_path, parts, idx + 1, results);
            } else {
                self.collect_all_paths(inner, node_id, current_path, results);
            }
            // Only recurse into subdirectories here: matches against the
            // current directory's own children (files included) are already
            // produced by the idx+1 call above, so a file arm here would
            // match every file in this directory a second time.
            for (name, child_id) in &snapshot {
                if let Some(Node::Dir(_)) = inner.nodes.get(child_id) {
                    let child_path = join_path(current_path, name);
                    self.glob_match(inner, *child_id, &child_path, parts, idx, results);
                }
            }
        } else {
            for (name, child_id) in &snapshot {
                if !fnmatch(name, part) {
                    continue;
                }
                let child_path = join_path(current_path, name);
                if is_last {
                    results.push(child_path);
                } else if let Some(Node::Dir(_)) = inner.nodes.get(child_id) {
                    self.glob_match(inner, *child_id, &child_path, parts, idx + 1, results);
                }
            }
        }
    }

    fn collect_all_paths(&self, inner: &Inner, node_id: NodeId, current_path: &str, results: &mut Vec<String>) {
        let Some(Node::Dir(dir)) = inner.nodes.get(&node_id) else { return };
        let snapshot: Vec<(String, NodeId)> = dir.children.iter().map(|(k, v)| (k.clone(), *v)).collect();
        for (name, child_id) in snapshot {
            let child_path = join_path(current_path, &name);
            results.push(child_path.clone());
            if let Some(Node::Dir(_)) = inner.nodes.get(&child_id) {
                self.collect_all_paths(inner, child_id, &child_path, results);
            }
        }
    }
}
