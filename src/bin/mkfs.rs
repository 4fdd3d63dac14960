//! Thin CLI wrapper around [`imagefs::Filesystem::open_or_create`]: creates
//! and formats a fresh image file, or just prints the root directory's
//! stat if one already exists at the given path.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use imagefs::{Filesystem, ImageOptions};
use log::error;

#[derive(Parser)]
#[command(about = "Create and format a single-image filesystem")]
struct Args {
    /// Path of the image file to create (or open, if it already exists).
    image: PathBuf,

    /// Total size of the image, in bytes.
    #[arg(long, default_value_t = imagefs::ImageOptions::default().image_size)]
    size: u64,

    /// Number of inode-table blocks, bounding how many inodes the image
    /// can ever hold.
    #[arg(long, default_value_t = imagefs::ImageOptions::default().inode_table_blocks)]
    inode_blocks: u32,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let opts = ImageOptions {
        image_size: args.size,
        inode_table_blocks: args.inode_blocks,
        ..ImageOptions::default()
    };

    match Filesystem::open_or_create(&args.image, &opts) {
        Ok(fs) => {
            let st = fs.stat("/").expect("root directory must exist after formatting");
            println!("{}: root inode {}, mode {:#o}", args.image.display(), st.ino, st.mode);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("failed to open {}: {e}", args.image.display());
            ExitCode::FAILURE
        }
    }
}
