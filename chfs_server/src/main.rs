//! `chfs_server`: recovers a device + log directory, wires up a
//! single-replica consensus stand-in, and runs a smoke sequence.
//!
//! Stands in for the out-of-scope RPC front-end (spec.md §1) the way
//! the teacher's `mkfs` stands alone without the kernel: there is no
//! network listener here, just a demonstration that the whole stack
//! (block device -> inode manager -> persister -> extent service ->
//! replicated wrapper -> client) recovers and operates end to end.

use std::{path::PathBuf, sync::Arc};

use chfs_block::{BlockManager, FileBlockDevice};
use chfs_client::FsClient;
use chfs_extent::ExtentService;
use chfs_inode::InodeManager;
use chfs_rsm::{ReplicatedClient, ReplicatedExtentService, SingleNodeLog};
use chfs_types::{DEFAULT_BLOCK_NUM, DEFAULT_INODE_NUM};
use clap::Parser;

#[derive(Parser)]
#[command(name = "chfs_server", about = "Run a single-node chfs instance")]
struct Cli {
    /// Directory holding the block image and write-ahead log.
    #[arg(long, default_value = "./chfs-data")]
    dir: PathBuf,
    #[arg(long, default_value_t = DEFAULT_BLOCK_NUM)]
    blocks: u32,
    #[arg(long, default_value_t = DEFAULT_INODE_NUM)]
    inodes: u32,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.dir)?;
    let image_path = cli.dir.join("device.img");

    let fresh = !image_path.exists();
    let device = FileBlockDevice::open(&image_path, cli.blocks)?;
    let block_mgr = if fresh {
        log::info!("formatting fresh device at {}", image_path.display());
        BlockManager::format(device, cli.inodes)?
    } else {
        BlockManager::open(device)?
    };
    let inode_mgr = InodeManager::new(block_mgr);

    let extent = ExtentService::open(inode_mgr, &cli.dir)?;
    let rsm = Arc::new(ReplicatedExtentService::new(extent));
    let log = SingleNodeLog::new(rsm);
    let client = FsClient::new(ReplicatedClient::new(log));

    log::info!("chfs ready at {}", cli.dir.display());
    run_smoke_sequence(&client)
}

fn run_smoke_sequence(
    client: &FsClient<ReplicatedClient<SingleNodeLog<ExtentService<FileBlockDevice>>>>,
) -> anyhow::Result<()> {
    const NAME: &str = "hello.txt";
    let id = match client.lookup(1, NAME)? {
        Some(id) => id,
        None => client.create(1, NAME, 0o644)?,
    };
    client.write(id, 13, 0, b"hello, chfs!\n")?;
    let content = client.read(id, 64, 0)?;
    print!("{}", String::from_utf8_lossy(&content));
    Ok(())
}
