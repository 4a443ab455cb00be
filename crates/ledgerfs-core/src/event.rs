//! Drive events
//!
//! Every mutation of a drive is one [`DriveEvent`]. The content type is a
//! parameter: locally queued events carry raw bytes ([`LocalEvent`]), events
//! on the remote log carry a [`ContentLocator`] ([`NetworkEvent`]).

use std::fmt::Display;
use std::future::Future;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::content::ContentLocator;
use crate::ids::ItemId;

/// A single drive mutation, numbered by its per-root sequence number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveEvent<C> {
    /// A file was created under `parent_id` with initial content
    FileItemCreated {
        sequence_nr: u64,
        item_id: ItemId,
        parent_id: ItemId,
        name: String,
        content: C,
    },
    /// A file's content was replaced
    FileContentSet {
        sequence_nr: u64,
        item_id: ItemId,
        content: C,
    },
    /// A file's content was truncated to nothing
    FileContentCleared { sequence_nr: u64, item_id: ItemId },
    /// An item (and its subtree) was copied under `target_parent_id`
    ItemCopied {
        sequence_nr: u64,
        source_id: ItemId,
        new_id: ItemId,
        target_parent_id: ItemId,
        name: String,
    },
    /// An item was moved under a new parent, keeping its name
    ItemMoved {
        sequence_nr: u64,
        item_id: ItemId,
        target_parent_id: ItemId,
    },
    /// A directory was created under `parent_id`
    DirectoryItemCreated {
        sequence_nr: u64,
        item_id: ItemId,
        parent_id: ItemId,
        name: String,
    },
    /// An item was removed; directories with children need `recursive`
    ItemRemoved {
        sequence_nr: u64,
        item_id: ItemId,
        recursive: bool,
    },
    /// An item was renamed in place
    ItemRenamed {
        sequence_nr: u64,
        item_id: ItemId,
        new_name: String,
    },
}

/// Event as queued locally: content embedded as raw bytes
pub type LocalEvent = DriveEvent<Bytes>;

/// Event as stored on the remote log: content behind a locator
pub type NetworkEvent = DriveEvent<ContentLocator>;

/// Discriminant of a [`DriveEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    FileItemCreated,
    FileContentSet,
    FileContentCleared,
    ItemCopied,
    ItemMoved,
    DirectoryItemCreated,
    ItemRemoved,
    ItemRenamed,
}

impl Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventKind::FileItemCreated => "file_item_created",
            EventKind::FileContentSet => "file_content_set",
            EventKind::FileContentCleared => "file_content_cleared",
            EventKind::ItemCopied => "item_copied",
            EventKind::ItemMoved => "item_moved",
            EventKind::DirectoryItemCreated => "directory_item_created",
            EventKind::ItemRemoved => "item_removed",
            EventKind::ItemRenamed => "item_renamed",
        };
        write!(f, "{}", name)
    }
}

impl<C> DriveEvent<C> {
    /// The event's per-root sequence number
    pub fn sequence_nr(&self) -> u64 {
        match self {
            DriveEvent::FileItemCreated { sequence_nr, .. }
            | DriveEvent::FileContentSet { sequence_nr, .. }
            | DriveEvent::FileContentCleared { sequence_nr, .. }
            | DriveEvent::ItemCopied { sequence_nr, .. }
            | DriveEvent::ItemMoved { sequence_nr, .. }
            | DriveEvent::DirectoryItemCreated { sequence_nr, .. }
            | DriveEvent::ItemRemoved { sequence_nr, .. }
            | DriveEvent::ItemRenamed { sequence_nr, .. } => *sequence_nr,
        }
    }

    /// Return the same event renumbered to `n`
    pub fn with_sequence_nr(mut self, n: u64) -> Self {
        match &mut self {
            DriveEvent::FileItemCreated { sequence_nr, .. }
            | DriveEvent::FileContentSet { sequence_nr, .. }
            | DriveEvent::FileContentCleared { sequence_nr, .. }
            | DriveEvent::ItemCopied { sequence_nr, .. }
            | DriveEvent::ItemMoved { sequence_nr, .. }
            | DriveEvent::DirectoryItemCreated { sequence_nr, .. }
            | DriveEvent::ItemRemoved { sequence_nr, .. }
            | DriveEvent::ItemRenamed { sequence_nr, .. } => *sequence_nr = n,
        }
        self
    }

    /// The event's kind
    pub fn kind(&self) -> EventKind {
        match self {
            DriveEvent::FileItemCreated { .. } => EventKind::FileItemCreated,
            DriveEvent::FileContentSet { .. } => EventKind::FileContentSet,
            DriveEvent::FileContentCleared { .. } => EventKind::FileContentCleared,
            DriveEvent::ItemCopied { .. } => EventKind::ItemCopied,
            DriveEvent::ItemMoved { .. } => EventKind::ItemMoved,
            DriveEvent::DirectoryItemCreated { .. } => EventKind::DirectoryItemCreated,
            DriveEvent::ItemRemoved { .. } => EventKind::ItemRemoved,
            DriveEvent::ItemRenamed { .. } => EventKind::ItemRenamed,
        }
    }

    /// The item this event creates or mutates
    pub fn target_item(&self) -> ItemId {
        match self {
            DriveEvent::FileItemCreated { item_id, .. }
            | DriveEvent::FileContentSet { item_id, .. }
            | DriveEvent::FileContentCleared { item_id, .. }
            | DriveEvent::ItemMoved { item_id, .. }
            | DriveEvent::DirectoryItemCreated { item_id, .. }
            | DriveEvent::ItemRemoved { item_id, .. }
            | DriveEvent::ItemRenamed { item_id, .. } => *item_id,
            DriveEvent::ItemCopied { new_id, .. } => *new_id,
        }
    }

    /// Every pre-existing item this event depends on
    ///
    /// Ids the event itself creates are not included.
    pub fn referenced_items(&self) -> Vec<ItemId> {
        match self {
            DriveEvent::FileItemCreated { parent_id, .. }
            | DriveEvent::DirectoryItemCreated { parent_id, .. } => vec![*parent_id],
            DriveEvent::FileContentSet { item_id, .. }
            | DriveEvent::FileContentCleared { item_id, .. }
            | DriveEvent::ItemRemoved { item_id, .. }
            | DriveEvent::ItemRenamed { item_id, .. } => vec![*item_id],
            DriveEvent::ItemCopied {
                source_id,
                target_parent_id,
                ..
            } => vec![*source_id, *target_parent_id],
            DriveEvent::ItemMoved {
                item_id,
                target_parent_id,
                ..
            } => vec![*item_id, *target_parent_id],
        }
    }

    /// Content carried by the event, if any
    pub fn content(&self) -> Option<&C> {
        match self {
            DriveEvent::FileItemCreated { content, .. }
            | DriveEvent::FileContentSet { content, .. } => Some(content),
            _ => None,
        }
    }

    /// Convert the content representation
    pub fn map_content<D>(self, f: impl FnOnce(C) -> D) -> DriveEvent<D> {
        match self.try_map_content(|c| Ok::<D, std::convert::Infallible>(f(c))) {
            Ok(event) => event,
            Err(never) => match never {},
        }
    }

    /// Convert the content representation with a fallible function
    pub fn try_map_content<D, E>(
        self,
        f: impl FnOnce(C) -> Result<D, E>,
    ) -> Result<DriveEvent<D>, E> {
        Ok(match self {
            DriveEvent::FileItemCreated {
                sequence_nr,
                item_id,
                parent_id,
                name,
                content,
            } => DriveEvent::FileItemCreated {
                sequence_nr,
                item_id,
                parent_id,
                name,
                content: f(content)?,
            },
            DriveEvent::FileContentSet {
                sequence_nr,
                item_id,
                content,
            } => DriveEvent::FileContentSet {
                sequence_nr,
                item_id,
                content: f(content)?,
            },
            other => other.retype(),
        })
    }

    /// Convert the content representation with an async fallible function
    pub async fn map_content_async<D, E, F, Fut>(self, f: F) -> Result<DriveEvent<D>, E>
    where
        F: FnOnce(C) -> Fut,
        Fut: Future<Output = Result<D, E>>,
    {
        Ok(match self {
            DriveEvent::FileItemCreated {
                sequence_nr,
                item_id,
                parent_id,
                name,
                content,
            } => DriveEvent::FileItemCreated {
                sequence_nr,
                item_id,
                parent_id,
                name,
                content: f(content).await?,
            },
            DriveEvent::FileContentSet {
                sequence_nr,
                item_id,
                content,
            } => DriveEvent::FileContentSet {
                sequence_nr,
                item_id,
                content: f(content).await?,
            },
            other => other.retype(),
        })
    }

    // Only valid for the content-free variants.
    fn retype<D>(self) -> DriveEvent<D> {
        match self {
            DriveEvent::FileContentCleared {
                sequence_nr,
                item_id,
            } => DriveEvent::FileContentCleared {
                sequence_nr,
                item_id,
            },
            DriveEvent::ItemCopied {
                sequence_nr,
                source_id,
                new_id,
                target_parent_id,
                name,
            } => DriveEvent::ItemCopied {
                sequence_nr,
                source_id,
                new_id,
                target_parent_id,
                name,
            },
            DriveEvent::ItemMoved {
                sequence_nr,
                item_id,
                target_parent_id,
            } => DriveEvent::ItemMoved {
                sequence_nr,
                item_id,
                target_parent_id,
            },
            DriveEvent::DirectoryItemCreated {
                sequence_nr,
                item_id,
                parent_id,
                name,
            } => DriveEvent::DirectoryItemCreated {
                sequence_nr,
                item_id,
                parent_id,
                name,
            },
            DriveEvent::ItemRemoved {
                sequence_nr,
                item_id,
                recursive,
            } => DriveEvent::ItemRemoved {
                sequence_nr,
                item_id,
                recursive,
            },
            DriveEvent::ItemRenamed {
                sequence_nr,
                item_id,
                new_name,
            } => DriveEvent::ItemRenamed {
                sequence_nr,
                item_id,
                new_name,
            },
            DriveEvent::FileItemCreated { .. } | DriveEvent::FileContentSet { .. } => {
                unreachable!("content-bearing events are mapped explicitly")
            }
        }
    }
}
