//! Command-line uploader: splits a file into chunks, negotiates a manifest,
//! uploads whatever the server is missing, and verifies the result.

mod uploader;

use std::path::PathBuf;

use clap::Parser;
use sureroute_protocol::{DEFAULT_CHUNK_SIZE, Priority};
use tracing_subscriber::EnvFilter;

use crate::uploader::{SendOptions, generate_sample};

/// Send a file to a SureRoute server.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// File to send.
    #[arg(long, default_value = "./sample.data")]
    file: PathBuf,

    /// Base URL of the transfer server.
    #[arg(long, default_value = "http://localhost:4000")]
    backend: String,

    /// Chunk size in bytes.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,

    /// Parallel chunk uploads.
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Transfer priority: high, medium, or low.
    #[arg(long, default_value_t = Priority::Medium)]
    priority: Priority,

    /// Resume an existing transfer instead of starting a new one.
    #[arg(long)]
    transfer_id: Option<String>,

    /// Generate a sample file of this many MiB if `--file` doesn't exist.
    #[arg(long)]
    generate_mb: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if !args.file.exists() {
        match args.generate_mb {
            Some(mb) => {
                generate_sample(&args.file, mb)?;
                tracing::info!(path = %args.file.display(), mb, "generated sample file");
            }
            None => anyhow::bail!("{} does not exist (use --generate-mb)", args.file.display()),
        }
    }

    let opts = SendOptions {
        file: args.file,
        backend: args.backend.trim_end_matches('/').to_string(),
        chunk_size: args.chunk_size,
        concurrency: args.concurrency.max(1),
        priority: args.priority,
        transfer_id: args.transfer_id,
    };

    let done = uploader::send_file(&opts).await?;
    tracing::info!(
        path = %done.assembled_path,
        checksum = %done.checksum,
        "transfer complete, checksum verified"
    );
    Ok(())
}
