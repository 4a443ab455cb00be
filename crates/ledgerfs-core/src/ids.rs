//! Root and item identifiers

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One logical mounted drive
///
/// Identified by the schema/volume/mount-point triple. The key doubles as the
/// name of the remote event stream; the file stem names the local WAL store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RootId {
    /// Storage schema (e.g. "ledger")
    pub schema: String,
    /// Volume name
    pub volume: String,
    /// Mount point the adapter exposes the drive at
    pub mount_point: String,
}

impl RootId {
    /// Create a new root id
    pub fn new(
        schema: impl Into<String>,
        volume: impl Into<String>,
        mount_point: impl Into<String>,
    ) -> Self {
        Self {
            schema: schema.into(),
            volume: volume.into(),
            mount_point: mount_point.into(),
        }
    }

    /// Parse a `schema/volume/mount_point` key
    ///
    /// The mount point may itself contain slashes.
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.splitn(3, '/');
        let schema = parts.next().filter(|s| !s.is_empty())?;
        let volume = parts.next().filter(|s| !s.is_empty())?;
        let mount_point = parts.next().filter(|s| !s.is_empty())?;
        Some(Self::new(schema, volume, mount_point))
    }

    /// Stable textual key, also used as the remote stream name
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.schema, self.volume, self.mount_point)
    }

    /// Name of the remote stream holding snapshot records
    pub fn snapshot_stream(&self) -> String {
        format!("{}#snapshots", self.key())
    }

    /// Filesystem-safe stem for per-root local files
    pub fn file_stem(&self) -> String {
        self.key()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
}

impl Display for RootId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Identity of a file or directory within a root
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub Uuid);

impl ItemId {
    /// The root directory of every drive
    pub const ROOT: ItemId = ItemId(Uuid::nil());

    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Derive the id of `source` inside a copy rooted at `copy_root`
    ///
    /// Deterministic so that replaying an `ItemCopied` event always yields
    /// the same descendant ids.
    pub fn derive(copy_root: ItemId, source: ItemId) -> Self {
        Self(Uuid::new_v5(&copy_root.0, source.0.as_bytes()))
    }

    /// Whether this is the root directory id
    pub fn is_root(&self) -> bool {
        *self == Self::ROOT
    }

    /// Short display form (first 8 hex chars)
    pub fn short(&self) -> String {
        hex::encode(&self.0.as_bytes()[..4])
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ItemId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_key_and_stem() {
        let root = RootId::new("ledger", "vol1", "/mnt/drive");
        assert_eq!(root.key(), "ledger/vol1//mnt/drive");
        assert_eq!(root.file_stem(), "ledger_vol1__mnt_drive");
        assert_eq!(root.snapshot_stream(), "ledger/vol1//mnt/drive#snapshots");
    }

    #[test]
    fn test_root_parse() {
        let root = RootId::parse("ledger/vol1/mnt/drive").unwrap();
        assert_eq!(root.schema, "ledger");
        assert_eq!(root.volume, "vol1");
        assert_eq!(root.mount_point, "mnt/drive");
        assert!(RootId::parse("ledger/vol1").is_none());
        assert!(RootId::parse("//x").is_none());
    }

    #[test]
    fn test_derived_ids_are_deterministic() {
        let copy_root = ItemId::generate();
        let source = ItemId::generate();
        assert_eq!(
            ItemId::derive(copy_root, source),
            ItemId::derive(copy_root, source)
        );
        assert_ne!(ItemId::derive(copy_root, source), source);
    }

    #[test]
    fn test_root_item() {
        assert!(ItemId::ROOT.is_root());
        assert!(!ItemId::generate().is_root());
    }
}
