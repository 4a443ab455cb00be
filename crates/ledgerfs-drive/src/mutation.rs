//! Mutation requests
//!
//! What an adapter asks for, before the root assigns it a sequence number
//! and fresh item ids.

use bytes::Bytes;
use ledgerfs_core::{ItemId, LocalEvent};

/// A change to a root's tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateDirectory {
        parent: ItemId,
        name: String,
    },
    CreateFile {
        parent: ItemId,
        name: String,
        content: Bytes,
    },
    SetContent {
        item: ItemId,
        content: Bytes,
    },
    ClearContent {
        item: ItemId,
    },
    Copy {
        source: ItemId,
        target_parent: ItemId,
        name: String,
    },
    Move {
        item: ItemId,
        target_parent: ItemId,
    },
    Remove {
        item: ItemId,
        recursive: bool,
    },
    Rename {
        item: ItemId,
        new_name: String,
    },
}

impl Mutation {
    /// The event recording this mutation as number `sequence_nr`
    ///
    /// Creations and copies get a new random item id.
    pub fn into_event(self, sequence_nr: u64) -> LocalEvent {
        match self {
            Mutation::CreateDirectory { parent, name } => LocalEvent::DirectoryItemCreated {
                sequence_nr,
                item_id: ItemId::generate(),
                parent_id: parent,
                name,
            },
            Mutation::CreateFile {
                parent,
                name,
                content,
            } => LocalEvent::FileItemCreated {
                sequence_nr,
                item_id: ItemId::generate(),
                parent_id: parent,
                name,
                content,
            },
            Mutation::SetContent { item, content } => LocalEvent::FileContentSet {
                sequence_nr,
                item_id: item,
                content,
            },
            Mutation::ClearContent { item } => LocalEvent::FileContentCleared {
                sequence_nr,
                item_id: item,
            },
            Mutation::Copy {
                source,
                target_parent,
                name,
            } => LocalEvent::ItemCopied {
                sequence_nr,
                source_id: source,
                new_id: ItemId::generate(),
                target_parent_id: target_parent,
                name,
            },
            Mutation::Move {
                item,
                target_parent,
            } => LocalEvent::ItemMoved {
                sequence_nr,
                item_id: item,
                target_parent_id: target_parent,
            },
            Mutation::Remove { item, recursive } => LocalEvent::ItemRemoved {
                sequence_nr,
                item_id: item,
                recursive,
            },
            Mutation::Rename { item, new_name } => LocalEvent::ItemRenamed {
                sequence_nr,
                item_id: item,
                new_name,
            },
        }
    }
}

/// What a committed mutation produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationReceipt {
    pub sequence_nr: u64,
    /// Created or changed item
    pub item: ItemId,
}
