//! SegStore CLI
//!
//! Command-line interface for inspecting and editing a filesystem-backed
//! segment store.

use std::io::Write;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use segstore::{storage_factory, RollingPolicy, Storage, StorageConfig, StorageError};
use thiserror::Error;
use tracing_subscriber::{fmt, EnvFilter};

/// SegStore CLI
#[derive(Parser, Debug)]
#[command(name = "segstore-cli")]
#[command(about = "CLI for a filesystem-backed segment store")]
#[command(version)]
struct Args {
    /// Root directory of the chunk store
    #[arg(short, long, default_value = "./segstore_data")]
    root: String,

    /// Worker threads
    #[arg(short, long, default_value = "2")]
    workers: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a segment
    Create {
        name: String,

        /// Maximum chunk size in bytes
        #[arg(long)]
        rollover: Option<u64>,
    },

    /// Append data at the end of a segment
    Append { name: String, data: String },

    /// Read a range of a segment (whole readable range by default)
    Read {
        name: String,

        #[arg(long)]
        offset: Option<u64>,

        #[arg(long)]
        length: Option<u64>,
    },

    /// Seal a segment
    Seal { name: String },

    /// Concatenate sealed sources onto a target
    Concat {
        target: String,
        sources: Vec<String>,
    },

    /// Truncate a segment at an offset
    Truncate { name: String, offset: u64 },

    /// Delete a segment
    Delete { name: String },

    /// Show segment info
    Info { name: String },
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    let config = StorageConfig::builder()
        .filesystem_root(&args.root)
        .worker_threads(args.workers)
        .build();
    let storage = storage_factory(config).create_storage_adapter();

    if let Err(e) = run(storage.as_ref(), args.command) {
        tracing::error!("Command failed: {}", e);
        std::process::exit(1);
    }
}

/// Failures a command can report
#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

fn run(storage: &dyn Storage, command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Create { name, rollover } => {
            match rollover {
                Some(size) => storage
                    .create_with_policy(&name, RollingPolicy::new(size))
                    .wait()?,
                None => storage.create(&name).wait()?,
            };
            println!("created {}", name);
        }
        Commands::Append { name, data } => {
            let handle = storage.open_write(&name).wait()?;
            let info = storage.get_info(&name).wait()?;
            storage
                .write(&handle, info.length, Bytes::from(data.into_bytes()))
                .wait()?;
            let info = storage.get_info(&name).wait()?;
            println!("{} length {}", name, info.length);
        }
        Commands::Read {
            name,
            offset,
            length,
        } => {
            let handle = storage.open_read(&name).wait()?;
            let info = storage.get_info(&name).wait()?;
            let offset = offset.unwrap_or(info.start_offset);
            let length = length.unwrap_or_else(|| info.length.saturating_sub(offset));
            let data = storage.read(&handle, offset, length).wait()?;

            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&data)?;
            stdout.flush()?;
        }
        Commands::Seal { name } => {
            let handle = storage.open_write(&name).wait()?;
            storage.seal(&handle).wait()?;
            println!("sealed {}", name);
        }
        Commands::Concat { target, sources } => {
            let target_handle = storage.open_write(&target).wait()?;
            let mut handles = Vec::with_capacity(sources.len());
            for source in &sources {
                handles.push(storage.open_read(source).wait()?);
            }
            storage.concat(&target_handle, &handles).wait()?;
            println!("concatenated {} segment(s) into {}", handles.len(), target);
        }
        Commands::Truncate { name, offset } => {
            let handle = storage.open_write(&name).wait()?;
            storage.truncate(&handle, offset).wait()?;
            println!("truncated {} at {}", name, offset);
        }
        Commands::Delete { name } => {
            let handle = storage.open_write(&name).wait()?;
            storage.delete(&handle).wait()?;
            println!("deleted {}", name);
        }
        Commands::Info { name } => {
            let info = storage.get_info(&name).wait()?;
            println!("name:         {}", info.name);
            println!("length:       {}", info.length);
            println!("start offset: {}", info.start_offset);
            println!("sealed:       {}", info.sealed);
            println!("chunks:       {}", info.chunk_count);
        }
    }
    Ok(())
}
