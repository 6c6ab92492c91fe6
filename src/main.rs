//! `gsdutil`: inspect and manipulate GSD files from the command line.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::*;

use gsd::{ElementType, GsdFile, OpenMode};

#[derive(Parser)]
#[command(name = "gsdutil", about = "Inspect and manipulate GSD trajectory files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new, empty GSD file.
    Create {
        path: PathBuf,
        #[arg(long, default_value = "gsdutil")]
        application: String,
        #[arg(long, default_value = "none")]
        schema: String,
        #[arg(long, default_value_t = 0)]
        schema_version: u32,
    },
    /// Print header metadata and frame count.
    Info { path: PathBuf },
    /// List chunk names interned in the file.
    Ls { path: PathBuf },
    /// Dump a chunk's raw bytes to stdout.
    Cat {
        path: PathBuf,
        #[arg(long)]
        frame: u64,
        #[arg(long)]
        name: String,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Create {
            path,
            application,
            schema,
            schema_version,
        } => create(&path, &application, &schema, schema_version),
        Command::Info { path } => info(&path),
        Command::Ls { path } => ls(&path),
        Command::Cat { path, frame, name } => cat(&path, frame, &name),
    }
}

fn create(path: &PathBuf, application: &str, schema: &str, schema_version: u32) -> Result<()> {
    GsdFile::create(path, application, schema, schema_version)
        .with_context(|| format!("creating {}", path.display()))?;
    info!("created {}", path.display());
    Ok(())
}

fn info(path: &PathBuf) -> Result<()> {
    let f = GsdFile::open(path, OpenMode::ReadOnly)
        .with_context(|| format!("opening {}", path.display()))?;
    println!("application:    {}", f.application());
    println!("schema:         {}", f.schema());
    println!("schema_version: {}", f.schema_version());
    println!("format_version: {}.{}", f.version().major(), f.version().minor());
    println!("nframes:        {}", f.nframes());
    Ok(())
}

fn ls(path: &PathBuf) -> Result<()> {
    let f = GsdFile::open(path, OpenMode::ReadOnly)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut previous = None;
    while let Some((id, name)) = f.find_matching_chunk_name("", previous)? {
        println!("{}", name);
        previous = Some(id);
    }
    Ok(())
}

fn cat(path: &PathBuf, frame: u64, name: &str) -> Result<()> {
    let mut f = GsdFile::open(path, OpenMode::ReadOnly)
        .with_context(|| format!("opening {}", path.display()))?;
    let entry = match f.find_chunk(frame, name)? {
        Some(e) => e,
        None => bail!("no chunk named '{}' at frame {}", name, frame),
    };
    let elem = ElementType::from_tag(entry.type_tag)
        .with_context(|| format!("unknown element type tag {}", entry.type_tag))?;
    debug!(
        "reading chunk '{}' frame={} N={} M={} type={:?}",
        name, frame, entry.n, entry.m, elem
    );
    let mut buf = vec![0u8; entry.payload_size() as usize];
    f.read_chunk(&entry, &mut buf)?;
    std::io::stdout().write_all(&buf)?;
    Ok(())
}
