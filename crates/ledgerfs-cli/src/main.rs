mod config;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use ledgerfs_core::{ItemId, LocalEvent, RootId};
use ledgerfs_crypto::DriveKey;
use ledgerfs_drive::{
    Collaborators, ContentIndirection, Drive, DriveConfig, EventCodec, MaterializedState,
    Mutation, NetworkEventService, SnapshotManager,
};
use ledgerfs_logging::{LedgerSubscriberBuilder, LogConfig};
use ledgerfs_storage::{
    DurableQueue, FileRemoteLog, FileRemoteLogConfig, FsBlobStore, FsBlobStoreConfig, QueueConfig,
};
use serde_json::json;
use tracing::warn;

use crate::config::{Cli, Command, StoreArgs, split_path};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = LedgerSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .with_level(&cli.log_level)
        .init();

    match &cli.command {
        Command::Keygen => {
            let key = DriveKey::generate();
            println!("{}", hex::encode(key.as_bytes()));
        }

        Command::Pending { root } => {
            let queue = open_queue(&cli.store, root)?;
            let codec = cli.store.drive_key(root).ok().map(EventCodec::new);
            let mut rows = Vec::new();
            for entry in queue.pending_entries()? {
                let event = codec
                    .as_ref()
                    .and_then(|c| c.open::<LocalEvent>(&entry.encrypted_payload).ok());
                rows.push(json!({
                    "sequence_nr": entry.sequence_nr,
                    "bytes": entry.encrypted_payload.len(),
                    "kind": event.as_ref().map(|e| e.kind().to_string()),
                    "item": event.as_ref().map(|e| e.target_item().to_string()),
                }));
            }
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("No pending rows");
            } else {
                for row in &rows {
                    println!(
                        "{:>8}  {:<24} {}",
                        row["sequence_nr"],
                        row["kind"].as_str().unwrap_or("(sealed)"),
                        row["item"].as_str().unwrap_or("")
                    );
                }
            }
        }

        Command::Cleanup { root } => {
            let queue = open_queue(&cli.store, root)?;
            let removed = queue.cleanup_persisted()?;
            if cli.json {
                println!("{}", json!({ "removed": removed }));
            } else {
                println!("Removed {} persisted rows", removed);
            }
        }

        Command::Replay { root } => {
            let config = cli.store.drive_config();
            let collaborators = open_remote(&cli.store, root).await?;
            let state = snapshots(&config, &collaborators, root).restore().await?;
            print_tree(&state, cli.json)?;
        }

        Command::Snapshot { root } => {
            let config = cli.store.drive_config();
            let collaborators = open_remote(&cli.store, root).await?;
            let snapshot = snapshots(&config, &collaborators, root).take().await?;
            match snapshot {
                Some(s) if cli.json => println!(
                    "{}",
                    json!({ "sequence_nr": s.sequence_nr, "bytes": s.serialized_state.len() })
                ),
                Some(s) => println!(
                    "Snapshot at sequence {} ({} bytes)",
                    s.sequence_nr,
                    s.serialized_state.len()
                ),
                None => println!("Nothing to snapshot"),
            }
        }

        Command::Mkdir { root, path, wait } => {
            let (drive, ctx) = mount(&cli.store, root).await?;
            let (parent, name) = split_path(path).context("Expected an absolute path")?;
            let parent = ctx
                .resolve_path(parent)
                .with_context(|| format!("No such directory: {}", parent))?;
            let receipt = ctx.mutate(Mutation::CreateDirectory {
                parent,
                name: name.to_string(),
            })?;
            finish(&drive, &ctx, *wait).await?;
            println!("{} (sequence {})", receipt.item, receipt.sequence_nr);
        }

        Command::Put {
            root,
            source,
            path,
            wait,
        } => {
            let content = tokio::fs::read(source)
                .await
                .with_context(|| format!("Reading {}", source.display()))?;
            let (drive, ctx) = mount(&cli.store, root).await?;
            let (parent, name) = split_path(path).context("Expected an absolute path")?;
            let parent = ctx
                .resolve_path(parent)
                .with_context(|| format!("No such directory: {}", parent))?;

            // Overwrite in place when the file exists
            let existing = ctx.list(parent)?.into_iter().find(|d| d.name == name);
            let item = match existing {
                Some(file) if !file.is_dir => {
                    ctx.mutate(Mutation::SetContent {
                        item: file.id,
                        content: Bytes::from(content),
                    })?;
                    file.id
                }
                Some(_) => anyhow::bail!("{} is a directory", path),
                None => ctx.write_file(parent, name, Bytes::from(content)).await?,
            };
            finish(&drive, &ctx, *wait).await?;
            println!("{}", item);
        }

        Command::Cat { root, path } => {
            let (drive, ctx) = mount(&cli.store, root).await?;
            let item = ctx
                .resolve_path(path)
                .with_context(|| format!("No such file: {}", path))?;
            let content = ctx.read(item).await?;
            std::io::stdout().write_all(&content)?;
            drop(ctx);
            drive.shutdown().await;
        }
    }

    Ok(())
}

fn open_queue(store: &StoreArgs, root: &RootId) -> anyhow::Result<DurableQueue> {
    let config = QueueConfig::for_root(&store.storage, &root.file_stem());
    DurableQueue::open(config).with_context(|| format!("Opening queue of {}", root))
}

async fn open_remote(store: &StoreArgs, root: &RootId) -> anyhow::Result<Collaborators> {
    let log = FileRemoteLog::new(FileRemoteLogConfig::new(store.remote.join("log"))).await?;
    let blobs = FsBlobStore::new(FsBlobStoreConfig::new(store.remote.join("blobs"))).await?;
    Ok(Collaborators::new(
        Arc::new(blobs),
        Arc::new(log),
        store.drive_key(root)?,
    ))
}

fn snapshots(config: &DriveConfig, collaborators: &Collaborators, root: &RootId) -> SnapshotManager {
    let codec = EventCodec::new(collaborators.key.clone());
    let indirection = ContentIndirection::new(
        collaborators.blobs.clone(),
        codec.clone(),
        config.indirection_threshold,
        config.chunk_size,
    );
    let network = NetworkEventService::new(
        collaborators.log.clone(),
        indirection.clone(),
        codec.clone(),
        root.key(),
        config.read_page_size,
    );
    SnapshotManager::new(
        collaborators.log.clone(),
        network,
        indirection,
        codec,
        root.snapshot_stream(),
    )
}

async fn mount(
    store: &StoreArgs,
    root: &RootId,
) -> anyhow::Result<(Drive, Arc<ledgerfs_drive::RootContext>)> {
    let collaborators = open_remote(store, root).await?;
    let drive = Drive::new(store.drive_config(), collaborators);
    let ctx = drive.require(root).await?;
    Ok((drive, ctx))
}

/// Wait for the upload, then unmount
async fn finish(
    drive: &Drive,
    ctx: &ledgerfs_drive::RootContext,
    wait_secs: u64,
) -> anyhow::Result<()> {
    if !ctx.wait_drained(Duration::from_secs(wait_secs)).await? {
        warn!(
            pending = ctx.pending()?.len(),
            "Upload not finished, rows stay queued for the next run"
        );
    }
    drive.shutdown().await;
    Ok(())
}

fn print_tree(state: &MaterializedState, as_json: bool) -> anyhow::Result<()> {
    let tree = state.tree();
    let mut rows = Vec::new();
    let mut stack = vec![ItemId::ROOT];
    while let Some(dir) = stack.pop() {
        let children = tree.children(dir)?;
        for child in children.into_iter().rev() {
            let path = tree.path_of(child.id).unwrap_or_default();
            let size = child.content().map(|c| c.size());
            rows.push((path, child.id, child.is_dir(), size));
            if child.is_dir() {
                stack.push(child.id);
            }
        }
    }
    rows.sort_by(|a, b| a.0.cmp(&b.0));

    if as_json {
        let items: Vec<_> = rows
            .iter()
            .map(|(path, id, is_dir, size)| {
                json!({ "path": path, "id": id.to_string(), "is_dir": is_dir, "size": size })
            })
            .collect();
        let out = json!({ "last_applied": state.last_applied(), "items": items });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("# last applied: {:?}", state.last_applied());
        for (path, _, is_dir, size) in rows {
            match size {
                Some(size) if !is_dir => println!("{:>10}  {}", size, path),
                _ => println!("{:>10}  {}/", "-", path),
            }
        }
    }
    Ok(())
}
