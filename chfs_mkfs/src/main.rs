//! `chfs_mkfs`: format a fresh block device image, or inspect a
//! directory extent's payload for debugging.
//!
//! Mirrors the teacher's `mkfs/src/main.rs` (format a fresh image,
//! then a handful of inspection helpers), upgraded to a `clap`-derived
//! CLI since this corpus reaches for `clap` for userspace tools rather
//! than hand-rolling `env::args()` parsing.

use std::{path::PathBuf, process::ExitCode};

use chfs_block::{BlockManager, FileBlockDevice};
use chfs_client::dirent;
use chfs_inode::InodeManager;
use chfs_types::{Inum, DEFAULT_BLOCK_NUM, DEFAULT_INODE_NUM};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chfs_mkfs", about = "Format and inspect chfs images")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Formats a fresh image file.
    Format {
        image: PathBuf,
        #[arg(long, default_value_t = DEFAULT_BLOCK_NUM)]
        blocks: u32,
        #[arg(long, default_value_t = DEFAULT_INODE_NUM)]
        inodes: u32,
    },
    /// Lists the entries of a directory extent, for debugging.
    Ls {
        image: PathBuf,
        dir_extent_id: u32,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Format {
            image,
            blocks,
            inodes,
        } => format(&image, blocks, inodes),
        Command::Ls {
            image,
            dir_extent_id,
        } => ls(&image, dir_extent_id),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("chfs_mkfs: {e}");
            ExitCode::FAILURE
        }
    }
}

fn format(image: &std::path::Path, blocks: u32, inodes: u32) -> anyhow::Result<()> {
    let device = FileBlockDevice::open(image, blocks)?;
    let mgr = BlockManager::format(device, inodes)?;
    log::info!(
        "formatted {} ({} blocks, {} inodes)",
        image.display(),
        mgr.superblock().nblocks,
        mgr.superblock().ninodes
    );
    Ok(())
}

fn ls(image: &std::path::Path, dir_extent_id: u32) -> anyhow::Result<()> {
    let device = FileBlockDevice::open_existing(image)?;
    let mgr = BlockManager::open(device)?;
    let inodes = InodeManager::new(mgr);
    let payload = inodes.read_file(Inum(dir_extent_id));
    for (name, inum) in dirent::parse(&payload) {
        println!("{inum}\t{name}");
    }
    Ok(())
}
