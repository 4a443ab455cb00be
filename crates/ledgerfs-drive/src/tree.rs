//! In-memory directory tree
//!
//! Nodes are keyed by [`ItemId`] in a `BTreeMap`, and directories index their
//! children by name, so iteration order (and therefore serialization) depends
//! only on the tree's contents.
//!
//! While a journal is open every node is saved before its first change, which
//! lets a caller undo a whole operation with [`FileTree::rollback`].

use std::collections::BTreeMap;

use bytes::Bytes;
use ledgerfs_core::{ContentLocator, ItemId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from tree operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("Item not found: {0}")]
    NotFound(ItemId),

    #[error("Item already exists: {0}")]
    AlreadyExists(ItemId),

    #[error("Not a directory: {0}")]
    NotADirectory(ItemId),

    #[error("Not a file: {0}")]
    NotAFile(ItemId),

    #[error("Name {name:?} already taken in {parent}")]
    NameTaken { parent: ItemId, name: String },

    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(ItemId),

    #[error("The root directory cannot be moved, renamed or removed")]
    RootImmutable,

    #[error("Placing {item} under {target} would create a cycle")]
    WouldCreateCycle { item: ItemId, target: ItemId },

    #[error("Invalid name: {0:?}")]
    InvalidName(String),
}

/// Content held by a file node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileContent {
    /// Bytes available in memory
    Inline(Bytes),
    /// Stored out of band, fetched on first read
    Deferred(ContentLocator),
}

impl FileContent {
    /// Empty inline content
    pub fn empty() -> Self {
        FileContent::Inline(Bytes::new())
    }

    /// Length of the content in bytes
    pub fn size(&self) -> u64 {
        match self {
            FileContent::Inline(data) => data.len() as u64,
            FileContent::Deferred(locator) => locator.size,
        }
    }
}

/// Directory or file payload of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Directory { children: BTreeMap<String, ItemId> },
    File { content: FileContent },
}

/// One node of the tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: ItemId,
    /// `None` only for the root
    pub parent: Option<ItemId>,
    pub name: String,
    pub kind: NodeKind,
}

impl TreeNode {
    fn root() -> Self {
        Self {
            id: ItemId::ROOT,
            parent: None,
            name: String::new(),
            kind: NodeKind::Directory {
                children: BTreeMap::new(),
            },
        }
    }

    /// Whether this node is a directory
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    /// File content, `None` for directories
    pub fn content(&self) -> Option<&FileContent> {
        match &self.kind {
            NodeKind::File { content } => Some(content),
            NodeKind::Directory { .. } => None,
        }
    }
}

/// Prior values of the nodes an operation touched
#[derive(Debug, Clone, Default)]
pub struct Journal {
    saved: BTreeMap<ItemId, Option<TreeNode>>,
}

impl Journal {
    /// Number of nodes the journal can restore
    pub fn len(&self) -> usize {
        self.saved.len()
    }

    /// Whether nothing was touched
    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }
}

/// Directory tree of one root
#[derive(Debug, Clone)]
pub struct FileTree {
    nodes: BTreeMap<ItemId, TreeNode>,
    journal: Option<Journal>,
}

impl Default for FileTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for FileTree {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
    }
}

impl Eq for FileTree {}

impl FileTree {
    /// Tree holding only the root directory
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(ItemId::ROOT, TreeNode::root());
        Self {
            nodes,
            journal: None,
        }
    }

    /// Rebuild a tree from its nodes
    pub fn from_nodes(nodes: BTreeMap<ItemId, TreeNode>) -> Result<Self, TreeError> {
        match nodes.get(&ItemId::ROOT) {
            Some(root) if root.is_dir() && root.parent.is_none() => {}
            _ => return Err(TreeError::NotFound(ItemId::ROOT)),
        }
        Ok(Self {
            nodes,
            journal: None,
        })
    }

    /// All nodes, ordered by id
    pub fn nodes(&self) -> &BTreeMap<ItemId, TreeNode> {
        &self.nodes
    }

    /// Number of nodes including the root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree holds nothing but the root
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Look up a node
    pub fn get(&self, id: ItemId) -> Option<&TreeNode> {
        self.nodes.get(&id)
    }

    /// Children of a directory, ordered by name
    pub fn children(&self, dir: ItemId) -> Result<Vec<&TreeNode>, TreeError> {
        let node = self.nodes.get(&dir).ok_or(TreeError::NotFound(dir))?;
        let NodeKind::Directory { children } = &node.kind else {
            return Err(TreeError::NotADirectory(dir));
        };
        Ok(children
            .values()
            .filter_map(|child| self.nodes.get(child))
            .collect())
    }

    /// Absolute path of a node, `/` for the root
    pub fn path_of(&self, id: ItemId) -> Option<String> {
        let mut segments = Vec::new();
        let mut current = self.nodes.get(&id)?;
        while let Some(parent) = current.parent {
            segments.push(current.name.as_str());
            current = self.nodes.get(&parent)?;
        }
        segments.reverse();
        Some(format!("/{}", segments.join("/")))
    }

    /// Find the node at an absolute path
    pub fn resolve_path(&self, path: &str) -> Option<ItemId> {
        let mut current = ItemId::ROOT;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let NodeKind::Directory { children } = &self.nodes.get(&current)?.kind else {
                return None;
            };
            current = *children.get(segment)?;
        }
        Some(current)
    }

    /// Create an empty directory
    pub fn create_directory(
        &mut self,
        id: ItemId,
        parent: ItemId,
        name: &str,
    ) -> Result<(), TreeError> {
        self.insert_child(
            parent,
            TreeNode {
                id,
                parent: Some(parent),
                name: name.to_string(),
                kind: NodeKind::Directory {
                    children: BTreeMap::new(),
                },
            },
        )
    }

    /// Create a file with initial content
    pub fn create_file(
        &mut self,
        id: ItemId,
        parent: ItemId,
        name: &str,
        content: FileContent,
    ) -> Result<(), TreeError> {
        self.insert_child(
            parent,
            TreeNode {
                id,
                parent: Some(parent),
                name: name.to_string(),
                kind: NodeKind::File { content },
            },
        )
    }

    /// Replace a file's content
    pub fn set_content(&mut self, id: ItemId, content: FileContent) -> Result<(), TreeError> {
        let node = self.nodes.get(&id).ok_or(TreeError::NotFound(id))?;
        if node.is_dir() {
            return Err(TreeError::NotAFile(id));
        }
        self.record(id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.kind = NodeKind::File { content };
        }
        Ok(())
    }

    /// Truncate a file to zero bytes
    pub fn clear_content(&mut self, id: ItemId) -> Result<(), TreeError> {
        self.set_content(id, FileContent::empty())
    }

    /// Move an item under another directory, keeping its name
    pub fn move_item(&mut self, id: ItemId, target_parent: ItemId) -> Result<(), TreeError> {
        if id.is_root() {
            return Err(TreeError::RootImmutable);
        }
        let node = self.nodes.get(&id).ok_or(TreeError::NotFound(id))?;
        let old_parent = node.parent.ok_or(TreeError::RootImmutable)?;
        let name = node.name.clone();
        if old_parent == target_parent {
            return Ok(());
        }
        if self.is_within(target_parent, id) {
            return Err(TreeError::WouldCreateCycle {
                item: id,
                target: target_parent,
            });
        }
        self.ensure_free(target_parent, &name)?;

        self.children_mut(old_parent)?.remove(&name);
        self.children_mut(target_parent)?.insert(name, id);
        self.record(id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = Some(target_parent);
        }
        Ok(())
    }

    /// Rename an item in place
    pub fn rename(&mut self, id: ItemId, new_name: &str) -> Result<(), TreeError> {
        if id.is_root() {
            return Err(TreeError::RootImmutable);
        }
        validate_name(new_name)?;
        let node = self.nodes.get(&id).ok_or(TreeError::NotFound(id))?;
        let parent = node.parent.ok_or(TreeError::RootImmutable)?;
        if node.name == new_name {
            return Ok(());
        }
        let old_name = node.name.clone();
        self.ensure_free(parent, new_name)?;

        let children = self.children_mut(parent)?;
        children.remove(&old_name);
        children.insert(new_name.to_string(), id);
        self.record(id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.name = new_name.to_string();
        }
        Ok(())
    }

    /// Deep-copy an item under `target_parent` as `name`
    ///
    /// The copy's root gets `new_id`; every descendant gets an id derived
    /// from `new_id` and the source descendant's id.
    pub fn copy_item(
        &mut self,
        source: ItemId,
        new_id: ItemId,
        target_parent: ItemId,
        name: &str,
    ) -> Result<(), TreeError> {
        validate_name(name)?;
        if !self.nodes.contains_key(&source) {
            return Err(TreeError::NotFound(source));
        }
        if self.is_within(target_parent, source) {
            return Err(TreeError::WouldCreateCycle {
                item: source,
                target: target_parent,
            });
        }
        self.ensure_free(target_parent, name)?;

        let subtree = self.subtree(source);
        let new_id_of = |old: ItemId| {
            if old == source {
                new_id
            } else {
                ItemId::derive(new_id, old)
            }
        };
        if let Some(taken) = subtree
            .iter()
            .map(|old| new_id_of(*old))
            .find(|id| self.nodes.contains_key(id))
        {
            return Err(TreeError::AlreadyExists(taken));
        }

        let copies: Vec<TreeNode> = subtree
            .iter()
            .filter_map(|old| self.nodes.get(old))
            .map(|node| {
                let kind = match &node.kind {
                    NodeKind::Directory { children } => NodeKind::Directory {
                        children: children
                            .iter()
                            .map(|(n, child)| (n.clone(), new_id_of(*child)))
                            .collect(),
                    },
                    file => file.clone(),
                };
                if node.id == source {
                    TreeNode {
                        id: new_id,
                        parent: Some(target_parent),
                        name: name.to_string(),
                        kind,
                    }
                } else {
                    TreeNode {
                        id: new_id_of(node.id),
                        parent: node.parent.map(new_id_of),
                        name: node.name.clone(),
                        kind,
                    }
                }
            })
            .collect();

        self.children_mut(target_parent)?
            .insert(name.to_string(), new_id);
        for node in copies {
            self.record(node.id);
            self.nodes.insert(node.id, node);
        }
        Ok(())
    }

    /// Remove an item; directories with children need `recursive`
    pub fn remove(&mut self, id: ItemId, recursive: bool) -> Result<(), TreeError> {
        if id.is_root() {
            return Err(TreeError::RootImmutable);
        }
        let node = self.nodes.get(&id).ok_or(TreeError::NotFound(id))?;
        if let NodeKind::Directory { children } = &node.kind
            && !children.is_empty()
            && !recursive
        {
            return Err(TreeError::DirectoryNotEmpty(id));
        }
        let parent = node.parent.ok_or(TreeError::RootImmutable)?;
        let name = node.name.clone();

        self.children_mut(parent)?.remove(&name);
        for doomed in self.subtree(id) {
            self.record(doomed);
            self.nodes.remove(&doomed);
        }
        Ok(())
    }

    /// Start saving nodes before they change
    pub(crate) fn begin_journal(&mut self) {
        self.journal = Some(Journal::default());
    }

    /// Stop journaling and return what was saved
    pub(crate) fn take_journal(&mut self) -> Journal {
        self.journal.take().unwrap_or_default()
    }

    /// Restore every node saved in `journal`
    pub(crate) fn rollback(&mut self, journal: Journal) {
        for (id, previous) in journal.saved {
            match previous {
                Some(node) => {
                    self.nodes.insert(id, node);
                }
                None => {
                    self.nodes.remove(&id);
                }
            }
        }
    }

    fn record(&mut self, id: ItemId) {
        let nodes = &self.nodes;
        if let Some(journal) = self.journal.as_mut() {
            journal
                .saved
                .entry(id)
                .or_insert_with(|| nodes.get(&id).cloned());
        }
    }

    fn insert_child(&mut self, parent: ItemId, node: TreeNode) -> Result<(), TreeError> {
        validate_name(&node.name)?;
        if self.nodes.contains_key(&node.id) {
            return Err(TreeError::AlreadyExists(node.id));
        }
        self.ensure_free(parent, &node.name)?;

        self.children_mut(parent)?.insert(node.name.clone(), node.id);
        self.record(node.id);
        self.nodes.insert(node.id, node);
        Ok(())
    }

    fn ensure_free(&self, dir: ItemId, name: &str) -> Result<(), TreeError> {
        let node = self.nodes.get(&dir).ok_or(TreeError::NotFound(dir))?;
        match &node.kind {
            NodeKind::Directory { children } if children.contains_key(name) => {
                Err(TreeError::NameTaken {
                    parent: dir,
                    name: name.to_string(),
                })
            }
            NodeKind::Directory { .. } => Ok(()),
            NodeKind::File { .. } => Err(TreeError::NotADirectory(dir)),
        }
    }

    fn children_mut(&mut self, dir: ItemId) -> Result<&mut BTreeMap<String, ItemId>, TreeError> {
        if !self.nodes.contains_key(&dir) {
            return Err(TreeError::NotFound(dir));
        }
        self.record(dir);
        match self.nodes.get_mut(&dir).map(|n| &mut n.kind) {
            Some(NodeKind::Directory { children }) => Ok(children),
            Some(NodeKind::File { .. }) => Err(TreeError::NotADirectory(dir)),
            None => Err(TreeError::NotFound(dir)),
        }
    }

    // Whether `id` is `ancestor` or lies beneath it
    fn is_within(&self, id: ItemId, ancestor: ItemId) -> bool {
        let mut current = Some(id);
        while let Some(cursor) = current {
            if cursor == ancestor {
                return true;
            }
            current = self.nodes.get(&cursor).and_then(|n| n.parent);
        }
        false
    }

    // `id` and all its descendants, parents before children
    fn subtree(&self, id: ItemId) -> Vec<ItemId> {
        let mut out = vec![id];
        let mut i = 0;
        while i < out.len() {
            if let Some(NodeKind::Directory { children }) = self.nodes.get(&out[i]).map(|n| &n.kind)
            {
                out.extend(children.values().copied());
            }
            i += 1;
        }
        out
    }
}

fn validate_name(name: &str) -> Result<(), TreeError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0')
    {
        return Err(TreeError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(data: &'static [u8]) -> FileContent {
        FileContent::Inline(Bytes::from_static(data))
    }

    fn sample() -> (FileTree, ItemId, ItemId) {
        let mut tree = FileTree::new();
        let docs = ItemId::generate();
        let readme = ItemId::generate();
        tree.create_directory(docs, ItemId::ROOT, "docs").unwrap();
        tree.create_file(readme, docs, "readme.md", file(b"hello"))
            .unwrap();
        (tree, docs, readme)
    }

    #[test]
    fn test_create_and_resolve() {
        let (tree, docs, readme) = sample();
        assert_eq!(tree.resolve_path("/docs/readme.md"), Some(readme));
        assert_eq!(tree.resolve_path("/docs"), Some(docs));
        assert_eq!(tree.resolve_path("/"), Some(ItemId::ROOT));
        assert_eq!(tree.path_of(readme).unwrap(), "/docs/readme.md");
        assert_eq!(tree.path_of(ItemId::ROOT).unwrap(), "/");
        assert_eq!(tree.children(docs).unwrap().len(), 1);
    }

    #[test]
    fn test_name_collision() {
        let (mut tree, docs, _) = sample();
        let err = tree
            .create_file(ItemId::generate(), docs, "readme.md", file(b""))
            .unwrap_err();
        assert!(matches!(err, TreeError::NameTaken { .. }));
    }

    #[test]
    fn test_invalid_names() {
        let mut tree = FileTree::new();
        for bad in ["", ".", "..", "a/b"] {
            assert!(matches!(
                tree.create_directory(ItemId::generate(), ItemId::ROOT, bad),
                Err(TreeError::InvalidName(_))
            ));
        }
    }

    #[test]
    fn test_file_is_not_a_parent() {
        let (mut tree, _, readme) = sample();
        assert_eq!(
            tree.create_directory(ItemId::generate(), readme, "x"),
            Err(TreeError::NotADirectory(readme))
        );
    }

    #[test]
    fn test_move_rejects_cycle() {
        let (mut tree, docs, _) = sample();
        let inner = ItemId::generate();
        tree.create_directory(inner, docs, "inner").unwrap();

        assert!(matches!(
            tree.move_item(docs, inner),
            Err(TreeError::WouldCreateCycle { .. })
        ));
        assert!(matches!(
            tree.move_item(docs, docs),
            Err(TreeError::WouldCreateCycle { .. })
        ));

        tree.move_item(inner, ItemId::ROOT).unwrap();
        assert_eq!(tree.resolve_path("/inner"), Some(inner));
        assert!(tree.resolve_path("/docs/inner").is_none());
    }

    #[test]
    fn test_rename() {
        let (mut tree, docs, readme) = sample();
        tree.rename(readme, "README").unwrap();
        assert_eq!(tree.resolve_path("/docs/README"), Some(readme));
        assert!(tree.resolve_path("/docs/readme.md").is_none());
        assert_eq!(tree.rename(ItemId::ROOT, "x"), Err(TreeError::RootImmutable));

        let other = ItemId::generate();
        tree.create_file(other, docs, "other", file(b"")).unwrap();
        assert!(matches!(
            tree.rename(other, "README"),
            Err(TreeError::NameTaken { .. })
        ));
    }

    #[test]
    fn test_copy_is_deep_and_deterministic() {
        let (mut tree, docs, readme) = sample();
        let copy = ItemId::generate();
        tree.copy_item(docs, copy, ItemId::ROOT, "docs-copy").unwrap();

        let copied_readme = tree.resolve_path("/docs-copy/readme.md").unwrap();
        assert_eq!(copied_readme, ItemId::derive(copy, readme));
        assert_eq!(tree.get(copied_readme).unwrap().parent, Some(copy));
        assert_eq!(tree.get(copied_readme).unwrap().content(), Some(&file(b"hello")));

        // Source untouched
        assert_eq!(tree.resolve_path("/docs/readme.md"), Some(readme));
    }

    #[test]
    fn test_copy_into_itself_rejected() {
        let (mut tree, docs, _) = sample();
        assert!(matches!(
            tree.copy_item(docs, ItemId::generate(), docs, "loop"),
            Err(TreeError::WouldCreateCycle { .. })
        ));
    }

    #[test]
    fn test_remove() {
        let (mut tree, docs, readme) = sample();
        assert_eq!(tree.remove(docs, false), Err(TreeError::DirectoryNotEmpty(docs)));
        assert_eq!(tree.remove(ItemId::ROOT, true), Err(TreeError::RootImmutable));

        tree.remove(docs, true).unwrap();
        assert!(tree.get(docs).is_none());
        assert!(tree.get(readme).is_none());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_rollback_restores_everything() {
        let (mut tree, docs, _) = sample();
        let before = tree.clone();

        tree.begin_journal();
        tree.copy_item(docs, ItemId::generate(), ItemId::ROOT, "copy")
            .unwrap();
        tree.remove(docs, true).unwrap();
        let journal = tree.take_journal();
        assert!(!journal.is_empty());

        tree.rollback(journal);
        assert_eq!(tree, before);
    }

    #[test]
    fn test_no_journal_outside_operations() {
        let (mut tree, _, readme) = sample();
        tree.set_content(readme, file(b"new")).unwrap();
        assert!(tree.take_journal().is_empty());
    }

    #[test]
    fn test_from_nodes_requires_root() {
        let (tree, _, _) = sample();
        let rebuilt = FileTree::from_nodes(tree.nodes().clone()).unwrap();
        assert_eq!(rebuilt, tree);

        assert!(FileTree::from_nodes(BTreeMap::new()).is_err());
    }
}
