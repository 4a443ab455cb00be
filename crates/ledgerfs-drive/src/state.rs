//! Materialized state of a root
//!
//! A [`FileTree`] plus the [`SequenceCounter`] of the last event applied to it.
//! Both local events (raw content) and network events (content locators) can
//! be applied; network content stored out of band is kept as a
//! [`FileContent::Deferred`] locator until someone reads the file.

use std::collections::BTreeMap;

use bytes::Bytes;
use ledgerfs_core::{ContentLocator, DriveEvent, ItemId};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{DriveError, DriveResult};
use crate::sequence::SequenceCounter;
use crate::tree::{FileContent, FileTree, Journal, TreeNode};

/// Event content that can be stored in a file node
pub trait IntoFileContent: Clone {
    fn into_file_content(self) -> FileContent;
}

impl IntoFileContent for Bytes {
    fn into_file_content(self) -> FileContent {
        FileContent::Inline(self)
    }
}

impl IntoFileContent for ContentLocator {
    fn into_file_content(self) -> FileContent {
        if self.is_indirect {
            FileContent::Deferred(self)
        } else {
            FileContent::Inline(self.payload)
        }
    }
}

/// What a caller sees of one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDescriptor {
    pub id: ItemId,
    pub parent: Option<ItemId>,
    pub name: String,
    pub is_dir: bool,
    /// Content length for files
    pub size: Option<u64>,
}

impl From<&TreeNode> for ItemDescriptor {
    fn from(node: &TreeNode) -> Self {
        Self {
            id: node.id,
            parent: node.parent,
            name: node.name.clone(),
            is_dir: node.is_dir(),
            size: node.content().map(FileContent::size),
        }
    }
}

/// Serialized form of a [`MaterializedState`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateImage {
    pub last_applied: Option<u64>,
    pub nodes: BTreeMap<ItemId, TreeNode>,
}

/// Everything needed to take back one applied event
#[derive(Debug)]
pub struct Undo {
    journal: Journal,
    last_applied: Option<u64>,
}

/// In-memory tree of a root, advanced strictly in sequence order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializedState {
    tree: FileTree,
    counter: SequenceCounter,
}

impl MaterializedState {
    /// Empty state, nothing applied
    pub fn new() -> Self {
        Self::default()
    }

    /// The directory tree
    pub fn tree(&self) -> &FileTree {
        &self.tree
    }

    /// Last applied sequence number
    pub fn last_applied(&self) -> Option<u64> {
        self.counter.last_applied()
    }

    /// The number the next event must carry
    pub fn next_sequence(&self) -> u64 {
        self.counter.next()
    }

    /// Describe one item
    pub fn describe(&self, id: ItemId) -> Option<ItemDescriptor> {
        self.tree.get(id).map(ItemDescriptor::from)
    }

    /// Apply one event
    ///
    /// Fails with [`DriveError::SequenceGap`] unless the event directly
    /// follows the last applied one. A failed apply leaves the state as it
    /// was. Returns the item the event targeted.
    pub fn apply<C: IntoFileContent>(&mut self, event: &DriveEvent<C>) -> DriveResult<ItemId> {
        self.apply_journaled(event).map(|(item, _)| item)
    }

    /// Apply one event and keep what is needed to undo it
    pub fn apply_journaled<C: IntoFileContent>(
        &mut self,
        event: &DriveEvent<C>,
    ) -> DriveResult<(ItemId, Undo)> {
        let n = event.sequence_nr();
        if !self.counter.is_valid_successor(n) {
            return Err(DriveError::SequenceGap {
                expected: self.counter.next(),
                got: n,
            });
        }

        let last_applied = self.counter.last_applied();
        self.tree.begin_journal();
        let result = self.dispatch(event);
        let journal = self.tree.take_journal();

        match result {
            Ok(item) => {
                self.counter.advance(n)?;
                trace!(seq = n, kind = %event.kind(), item = %item, "Applied event");
                Ok((
                    item,
                    Undo {
                        journal,
                        last_applied,
                    },
                ))
            }
            Err(e) => {
                self.tree.rollback(journal);
                Err(e)
            }
        }
    }

    /// Take back an event applied with [`Self::apply_journaled`]
    ///
    /// Only valid for the most recently applied event.
    pub fn rollback(&mut self, undo: Undo) {
        self.tree.rollback(undo.journal);
        self.counter = SequenceCounter::new(undo.last_applied);
    }

    /// Apply events in order, stopping at the first failure
    ///
    /// Returns how many events were applied.
    pub fn materialize<'a, C, I>(&mut self, events: I) -> DriveResult<usize>
    where
        C: IntoFileContent + 'a,
        I: IntoIterator<Item = &'a DriveEvent<C>>,
    {
        let mut applied = 0;
        for event in events {
            self.apply(event)?;
            applied += 1;
        }
        Ok(applied)
    }

    fn dispatch<C: IntoFileContent>(&mut self, event: &DriveEvent<C>) -> DriveResult<ItemId> {
        match event {
            DriveEvent::FileItemCreated {
                item_id,
                parent_id,
                name,
                content,
                ..
            } => {
                self.tree.create_file(
                    *item_id,
                    *parent_id,
                    name,
                    content.clone().into_file_content(),
                )?;
                Ok(*item_id)
            }
            DriveEvent::FileContentSet {
                item_id, content, ..
            } => {
                self.tree
                    .set_content(*item_id, content.clone().into_file_content())?;
                Ok(*item_id)
            }
            DriveEvent::FileContentCleared { item_id, .. } => {
                self.tree.clear_content(*item_id)?;
                Ok(*item_id)
            }
            DriveEvent::ItemCopied {
                source_id,
                new_id,
                target_parent_id,
                name,
                ..
            } => {
                self.tree
                    .copy_item(*source_id, *new_id, *target_parent_id, name)?;
                Ok(*new_id)
            }
            DriveEvent::ItemMoved {
                item_id,
                target_parent_id,
                ..
            } => {
                self.tree.move_item(*item_id, *target_parent_id)?;
                Ok(*item_id)
            }
            DriveEvent::DirectoryItemCreated {
                item_id,
                parent_id,
                name,
                ..
            } => {
                self.tree.create_directory(*item_id, *parent_id, name)?;
                Ok(*item_id)
            }
            DriveEvent::ItemRemoved {
                item_id, recursive, ..
            } => {
                self.tree.remove(*item_id, *recursive)?;
                Ok(*item_id)
            }
            DriveEvent::ItemRenamed {
                item_id, new_name, ..
            } => {
                self.tree.rename(*item_id, new_name)?;
                Ok(*item_id)
            }
        }
    }

    /// Snapshot image of this state
    pub fn image(&self) -> StateImage {
        StateImage {
            last_applied: self.counter.last_applied(),
            nodes: self.tree.nodes().clone(),
        }
    }

    /// Rebuild a state from its image
    pub fn from_image(image: StateImage) -> DriveResult<Self> {
        Ok(Self {
            tree: FileTree::from_nodes(image.nodes)?,
            counter: SequenceCounter::new(image.last_applied),
        })
    }

    /// Postcard encoding of [`Self::image`]
    pub fn to_bytes(&self) -> DriveResult<Bytes> {
        Ok(Bytes::from(postcard::to_allocvec(&self.image())?))
    }

    /// Inverse of [`Self::to_bytes`]
    pub fn from_bytes(data: &[u8]) -> DriveResult<Self> {
        Self::from_image(postcard::from_bytes(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerfs_core::LocalEvent;

    fn mkdir(seq: u64, id: ItemId, name: &str) -> LocalEvent {
        LocalEvent::DirectoryItemCreated {
            sequence_nr: seq,
            item_id: id,
            parent_id: ItemId::ROOT,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_apply_in_order() {
        let mut state = MaterializedState::new();
        let a = ItemId::generate();
        assert_eq!(state.apply(&mkdir(0, a, "a")).unwrap(), a);
        assert_eq!(state.last_applied(), Some(0));
        assert_eq!(state.next_sequence(), 1);
        assert!(state.describe(a).unwrap().is_dir);
    }

    #[test]
    fn test_gap_and_duplicate_rejected() {
        let mut state = MaterializedState::new();
        state.apply(&mkdir(0, ItemId::generate(), "a")).unwrap();

        let dup = state.apply(&mkdir(0, ItemId::generate(), "b"));
        assert!(matches!(dup, Err(DriveError::SequenceGap { expected: 1, got: 0 })));
        let gap = state.apply(&mkdir(2, ItemId::generate(), "b"));
        assert!(matches!(gap, Err(DriveError::SequenceGap { expected: 1, got: 2 })));
        assert_eq!(state.last_applied(), Some(0));
    }

    #[test]
    fn test_failed_apply_changes_nothing() {
        let mut state = MaterializedState::new();
        state.apply(&mkdir(0, ItemId::generate(), "a")).unwrap();
        let before = state.clone();

        let clash = state.apply(&mkdir(1, ItemId::generate(), "a"));
        assert!(matches!(clash, Err(DriveError::Tree(_))));
        assert_eq!(state, before);
    }

    #[test]
    fn test_rollback_undoes_applied_event() {
        let mut state = MaterializedState::new();
        let dir = ItemId::generate();
        state.apply(&mkdir(0, dir, "a")).unwrap();
        let before = state.clone();

        let event = LocalEvent::ItemRemoved {
            sequence_nr: 1,
            item_id: dir,
            recursive: true,
        };
        let (_, undo) = state.apply_journaled(&event).unwrap();
        assert!(state.describe(dir).is_none());

        state.rollback(undo);
        assert_eq!(state, before);
        assert_eq!(state.next_sequence(), 1);
    }

    #[test]
    fn test_indirect_network_content_is_deferred() {
        let mut state = MaterializedState::new();
        let file = ItemId::generate();
        let locator = ContentLocator::indirect([7; 32], 50_000, Bytes::from_static(b"map"));
        let event = DriveEvent::FileItemCreated {
            sequence_nr: 0,
            item_id: file,
            parent_id: ItemId::ROOT,
            name: "big.bin".to_string(),
            content: locator.clone(),
        };
        state.apply(&event).unwrap();

        let node = state.tree().get(file).unwrap();
        assert_eq!(node.content(), Some(&FileContent::Deferred(locator)));
        assert_eq!(state.describe(file).unwrap().size, Some(50_000));
    }

    #[test]
    fn test_materialize_stops_at_failure() {
        let mut state = MaterializedState::new();
        let events = vec![
            mkdir(0, ItemId::generate(), "a"),
            mkdir(1, ItemId::generate(), "b"),
            mkdir(3, ItemId::generate(), "c"),
        ];
        assert!(state.materialize(&events).is_err());
        assert_eq!(state.last_applied(), Some(1));
    }

    #[test]
    fn test_image_roundtrip() {
        let mut state = MaterializedState::new();
        state.apply(&mkdir(0, ItemId::generate(), "a")).unwrap();
        let bytes = state.to_bytes().unwrap();
        assert_eq!(MaterializedState::from_bytes(&bytes).unwrap(), state);
    }
}
