#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use bfs::{CreateOptions, Filesystem, Mode};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "bfs", about = "BoxFS — a filesystem in a box file")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a fresh container file.
    Mkfs {
        /// Path of the container to create.
        image: PathBuf,
        /// Inode table slots.
        #[arg(long, default_value_t = 512)]
        inodes: u32,
        /// Data-region blocks (4096 bytes each, at most 32768).
        #[arg(long, default_value_t = 4096)]
        blocks: u32,
    },
    /// Show container geometry and usage counters.
    Info {
        image: PathBuf,
    },
    /// List a directory.
    Ls {
        image: PathBuf,
        /// Absolute path inside the container.
        #[arg(default_value = "/")]
        path: PathBuf,
    },
    /// Print a file's contents to stdout.
    Cat {
        image: PathBuf,
        path: PathBuf,
    },
    /// Write stdin into a file (created if missing, truncated otherwise).
    Write {
        image: PathBuf,
        path: PathBuf,
    },
    /// Create a directory.
    Mkdir {
        image: PathBuf,
        path: PathBuf,
    },
    /// Copy a file or directory tree inside the container.
    Cp {
        image: PathBuf,
        src: PathBuf,
        dest: PathBuf,
    },
    /// Move a file or directory tree inside the container.
    Mv {
        image: PathBuf,
        src: PathBuf,
        dest: PathBuf,
    },
    /// Remove a file or directory tree.
    Rm {
        image: PathBuf,
        path: PathBuf,
    },
    /// Recursively import a host file or directory into the container.
    Import {
        image: PathBuf,
        /// Host path to import from.
        host_src: PathBuf,
        /// Absolute destination path inside the container.
        dest: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Mkfs {
            image,
            inodes,
            blocks,
        } => cmd_mkfs(&image, inodes, blocks),
        Command::Info { image } => cmd_info(&image),
        Command::Ls { image, path } => cmd_ls(&image, &path),
        Command::Cat { image, path } => cmd_cat(&image, &path),
        Command::Write { image, path } => cmd_write(&image, &path),
        Command::Mkdir { image, path } => cmd_mkdir(&image, &path),
        Command::Cp { image, src, dest } => cmd_cp(&image, &src, &dest),
        Command::Mv { image, src, dest } => cmd_mv(&image, &src, &dest),
        Command::Rm { image, path } => cmd_rm(&image, &path),
        Command::Import {
            image,
            host_src,
            dest,
        } => cmd_import(&image, &host_src, &dest),
    }
}

// ── Command handlers ────────────────────────────────────────────────────────

fn open_image(image: &Path) -> Result<Filesystem> {
    Filesystem::open(image).with_context(|| format!("opening container {}", image.display()))
}

fn cmd_mkfs(image: &Path, inodes: u32, blocks: u32) -> Result<()> {
    let fs = Filesystem::create(
        image,
        CreateOptions {
            inode_count: inodes,
            max_data_blocks: blocks,
            ..Default::default()
        },
    )
    .with_context(|| format!("creating container {}", image.display()))?;
    fs.close()?;
    println!("created {image} ({inodes} inodes, {blocks} blocks)", image = image.display());
    Ok(())
}

fn cmd_info(image: &Path) -> Result<()> {
    let fs = open_image(image)?;
    let stats = fs.stats()?;
    println!("container:    {}", image.display());
    println!(
        "data blocks:  {} used / {} total",
        stats.total_blocks - stats.free_blocks,
        stats.total_blocks
    );
    println!(
        "page cache:   {} resident, {} hits, {} misses, {} evictions",
        stats.cache.resident, stats.cache.hits, stats.cache.misses, stats.cache.evictions
    );
    Ok(())
}

fn cmd_ls(image: &Path, path: &Path) -> Result<()> {
    let fs = open_image(image)?;
    for child in fs.read_dir(path)? {
        let meta = fs.metadata(&child)?;
        let marker = if meta.is_dir { "d" } else { "-" };
        println!("{marker} {:>9}  {}", meta.size, child.display());
    }
    Ok(())
}

fn cmd_cat(image: &Path, path: &Path) -> Result<()> {
    use std::io::Write as _;

    let fs = open_image(image)?;
    let mut handle = fs.open_path(path, Mode::ReadOnly)?;
    let mut buf = vec![0_u8; 64 * 1024];
    loop {
        let n = handle.read(&mut buf)?;
        if n == 0 {
            break;
        }
        std::io::stdout().write_all(&buf[..n])?;
    }
    Ok(())
}

fn cmd_write(image: &Path, path: &Path) -> Result<()> {
    let fs = open_image(image)?;
    let mut handle = fs.open_with(path, Mode::ReadWrite, true)?;
    handle.truncate()?;

    let mut stdin = std::io::stdin().lock();
    let mut buf = vec![0_u8; 64 * 1024];
    let mut total = 0_u64;
    loop {
        let n = stdin.read(&mut buf)?;
        if n == 0 {
            break;
        }
        handle.write(&buf[..n])?;
        total += n as u64;
    }
    handle.close()?;
    fs.close()?;
    println!("wrote {total} bytes to {}", path.display());
    Ok(())
}

fn cmd_mkdir(image: &Path, path: &Path) -> Result<()> {
    let fs = open_image(image)?;
    fs.make_dir(path)?;
    fs.close()?;
    Ok(())
}

fn cmd_cp(image: &Path, src: &Path, dest: &Path) -> Result<()> {
    let fs = open_image(image)?;
    fs.copy(src, dest)?;
    fs.close()?;
    Ok(())
}

fn cmd_mv(image: &Path, src: &Path, dest: &Path) -> Result<()> {
    let fs = open_image(image)?;
    fs.rename(src, dest)?;
    fs.close()?;
    Ok(())
}

fn cmd_rm(image: &Path, path: &Path) -> Result<()> {
    let fs = open_image(image)?;
    fs.remove(path)?;
    fs.close()?;
    Ok(())
}

fn cmd_import(image: &Path, host_src: &Path, dest: &Path) -> Result<()> {
    let fs = open_image(image)?;
    let count = import_tree(&fs, host_src, dest)
        .with_context(|| format!("importing {}", host_src.display()))?;
    fs.close()?;
    println!("imported {count} entries under {}", dest.display());
    Ok(())
}

/// Recursively copy a host file or directory into the container.
fn import_tree(fs: &Filesystem, host_src: &Path, dest: &Path) -> Result<u64> {
    let meta = std::fs::metadata(host_src)
        .with_context(|| format!("reading host path {}", host_src.display()))?;

    if meta.is_file() {
        let body = std::fs::read(host_src)?;
        let mut handle = fs.open_with(dest, Mode::ReadWrite, true)?;
        handle.truncate()?;
        handle.write(&body)?;
        handle.close()?;
        debug!(event = "import_file", dest = %dest.display(), bytes = body.len());
        return Ok(1);
    }

    if meta.is_dir() {
        fs.make_dir(dest)?;
        let mut count = 1;
        for entry in std::fs::read_dir(host_src)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                bail!("host name is not valid UTF-8: {:?}", entry.path());
            };
            count += import_tree(fs, &entry.path(), &dest.join(name))?;
        }
        return Ok(count);
    }

    bail!("unsupported host file type: {}", host_src.display());
}
