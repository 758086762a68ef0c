//! `aigent memory ...` subcommands: read-only inspection plus an emergency
//! wipe of the long-term event log. Operates directly on a `MemoryManager`
//! loaded from the same event-log path the agent itself uses, rather than
//! going through a running agent, so it works whether or not anything else
//! is live. Grounded on `aigent-runtime`'s `memory_cmds.rs` stats/wipe shape,
//! narrowed to the three tiers this memory manager defines.

use std::path::Path;

use anyhow::Result;
use clap::Subcommand;

use core_memory::{MemoryManager, MemoryTier};

#[derive(Debug, Subcommand)]
pub enum MemoryCommands {
    /// Prints per-tier item counts for the persisted long-term memory.
    Stats,
    /// Prints every persisted long-term item, most recently touched last.
    Show,
    /// Deletes the persisted long-term event log. Short/working tiers are
    /// always ephemeral and have nothing to wipe.
    Wipe {
        #[arg(long)]
        yes: bool,
    },
}

pub async fn run(command: MemoryCommands, memory_path: &Path) -> Result<()> {
    match command {
        MemoryCommands::Stats => {
            let manager = MemoryManager::with_event_log(memory_path).await?;
            let stats = manager.stats();
            println!("long-term memory at {}", memory_path.display());
            println!("  total:   {}", stats.total);
            println!("  short:   {}", stats.short);
            println!("  working: {}", stats.working);
            println!("  long:    {}", stats.long);
        }
        MemoryCommands::Show => {
            let manager = MemoryManager::with_event_log(memory_path).await?;
            for entry in manager.entries_by_tier(MemoryTier::Long) {
                println!("[{}] {}", entry.last_touched.to_rfc3339(), entry.content);
            }
        }
        MemoryCommands::Wipe { yes } => {
            if !yes {
                anyhow::bail!("refusing to wipe {} without --yes", memory_path.display());
            }
            match tokio::fs::remove_file(memory_path).await {
                Ok(()) => println!("wiped {}", memory_path.display()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    println!("{} does not exist, nothing to wipe", memory_path.display());
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
    Ok(())
}
