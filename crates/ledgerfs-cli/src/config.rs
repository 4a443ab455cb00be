use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use ledgerfs_core::RootId;
use ledgerfs_crypto::{DriveKey, derive_drive_key};
use ledgerfs_drive::DriveConfig;

#[derive(Parser)]
#[command(name = "ledgerfs", about = "Inspect and operate ledgerfs drives")]
pub struct Cli {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Where the drive keeps its data and how it is sealed
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Directory holding the remote log and blob store
    #[arg(long, global = true, default_value = "./ledgerfs-remote")]
    pub remote: PathBuf,

    /// Directory holding the local queues
    #[arg(long, global = true, default_value = "./ledgerfs-data")]
    pub storage: PathBuf,

    /// Drive key (hex-encoded 32 bytes)
    #[arg(long, global = true, env = "LEDGERFS_KEY", conflicts_with = "passphrase")]
    pub key: Option<String>,

    /// Derive the drive key from a passphrase
    #[arg(long, global = true, env = "LEDGERFS_PASSPHRASE")]
    pub passphrase: Option<String>,
}

impl StoreArgs {
    /// Drive configuration for these directories
    pub fn drive_config(&self) -> DriveConfig {
        DriveConfig::with_storage_dir(&self.storage).with_min_delay(Duration::from_millis(200))
    }

    /// The key given on the command line
    ///
    /// A passphrase is salted with the volume name, so each volume gets its
    /// own key.
    pub fn drive_key(&self, root: &RootId) -> anyhow::Result<DriveKey> {
        match (&self.key, &self.passphrase) {
            (Some(hex_key), _) => Ok(DriveKey::from_hex(hex_key)?),
            (None, Some(passphrase)) => {
                let salt = format!("ledgerfs/{}", root.volume);
                Ok(derive_drive_key(passphrase.as_bytes(), salt.as_bytes())?)
            }
            (None, None) => anyhow::bail!("A drive key is required (--key or --passphrase)"),
        }
    }
}

fn parse_root(s: &str) -> Result<RootId, String> {
    RootId::parse(s).ok_or_else(|| format!("expected schema/volume/mount_point, got {:?}", s))
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a random drive key
    Keygen,
    /// List queue rows of a root that are not uploaded yet
    Pending {
        #[arg(value_parser = parse_root)]
        root: RootId,
    },
    /// Delete uploaded rows from a root's queue
    Cleanup {
        #[arg(value_parser = parse_root)]
        root: RootId,
    },
    /// Rebuild a root from the remote and print its tree
    Replay {
        #[arg(value_parser = parse_root)]
        root: RootId,
    },
    /// Publish a snapshot of a root
    Snapshot {
        #[arg(value_parser = parse_root)]
        root: RootId,
    },
    /// Create a directory
    Mkdir {
        #[arg(value_parser = parse_root)]
        root: RootId,
        /// Absolute path of the new directory
        path: String,
        /// Seconds to wait for the upload
        #[arg(long, default_value_t = 30)]
        wait: u64,
    },
    /// Store a local file in the drive
    Put {
        #[arg(value_parser = parse_root)]
        root: RootId,
        /// Local file to read
        source: PathBuf,
        /// Absolute path in the drive
        path: String,
        /// Seconds to wait for the upload
        #[arg(long, default_value_t = 30)]
        wait: u64,
    },
    /// Print a file of the drive
    Cat {
        #[arg(value_parser = parse_root)]
        root: RootId,
        /// Absolute path in the drive
        path: String,
    },
}

/// Split an absolute path into its parent path and last segment
pub fn split_path(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    let (parent, name) = trimmed.rsplit_once('/')?;
    if name.is_empty() {
        return None;
    }
    Some((if parent.is_empty() { "/" } else { parent }, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("/a/b.txt"), Some(("/a", "b.txt")));
        assert_eq!(split_path("/top"), Some(("/", "top")));
        assert_eq!(split_path("/dir/"), Some(("/", "dir")));
        assert_eq!(split_path("/"), None);
        assert_eq!(split_path("relative"), None);
    }

    #[test]
    fn test_parse_root() {
        let root = parse_root("ledger/vol/home/user").unwrap();
        assert_eq!(root.mount_point, "home/user");
        assert!(parse_root("ledger").is_err());
    }

    #[test]
    fn test_key_sources() {
        let root = RootId::new("ledger", "vol", "m");
        let mut args = StoreArgs {
            remote: PathBuf::from("r"),
            storage: PathBuf::from("s"),
            key: None,
            passphrase: None,
        };
        assert!(args.drive_key(&root).is_err());

        args.key = Some(hex::encode([7u8; 32]));
        assert_eq!(args.drive_key(&root).unwrap().as_bytes(), &[7u8; 32]);
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "ledgerfs",
            "--remote",
            "/tmp/r",
            "put",
            "ledger/vol/m",
            "notes.txt",
            "/docs/notes.txt",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Put { wait: 30, .. }));
        assert_eq!(cli.store.remote, PathBuf::from("/tmp/r"));
    }
}
