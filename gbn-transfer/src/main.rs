//! Entry point for `gbn-transfer`.
//!
//! Parses CLI arguments and dispatches into either **server** mode or one of
//! the client requests.  All protocol work is delegated to library modules;
//! `main.rs` owns only process setup (logging, argument parsing, reporting).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use gbn_transfer::config::{
    ServerConfig, TransferConfig, DEFAULT_MAX_RETRIES, DEFAULT_WINDOW,
};
use gbn_transfer::packet::MAX_PAYLOAD;
use gbn_transfer::session::{Client, Server};

/// File transfer over UDP with a Go-Back-N reliable transport.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    transfer: TransferArgs,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Args)]
struct TransferArgs {
    /// Maximum DATA packets in flight.
    #[arg(long, default_value_t = DEFAULT_WINDOW)]
    window: usize,
    /// Milliseconds to wait for an ACK before resending the window.
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,
    /// Consecutive timeouts before the sender gives up.
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    retries: u32,
    /// Payload bytes per DATA packet.
    #[arg(long, default_value_t = MAX_PAYLOAD)]
    chunk_size: usize,
    /// Milliseconds of silence before the receiver gives up
    /// (default: timeout × (retries + 1)).
    #[arg(long)]
    idle_timeout_ms: Option<u64>,
}

impl TransferArgs {
    fn to_config(&self) -> TransferConfig {
        let config = TransferConfig::new(
            self.window,
            Duration::from_millis(self.timeout_ms),
            self.retries,
        )
        .with_chunk_size(self.chunk_size);
        match self.idle_timeout_ms {
            Some(ms) => config.with_idle_timeout(Duration::from_millis(ms)),
            None => config,
        }
    }
}

#[derive(Subcommand)]
enum Mode {
    /// Serve a storage directory.
    Serve {
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:5005")]
        bind: SocketAddr,
        /// Directory holding the served files.
        #[arg(short, long, default_value = "server_files")]
        dir: PathBuf,
    },
    /// List the files stored on a server.
    List {
        #[arg(short, long)]
        server: SocketAddr,
    },
    /// Upload a local file.
    Upload {
        #[arg(short, long)]
        server: SocketAddr,
        /// File to send.
        path: PathBuf,
    },
    /// Download a file from the server.
    Download {
        #[arg(short, long)]
        server: SocketAddr,
        /// Name of the file on the server.
        name: String,
        /// Destination directory.
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let transfer = cli.transfer.to_config();

    match cli.mode {
        Mode::Serve { bind, dir } => {
            let server = Server::bind(ServerConfig {
                bind,
                storage_dir: dir,
                transfer,
            })
            .await
            .context("starting server")?;
            server.run().await.context("server socket failed")?;
        }
        Mode::List { server } => {
            let mut client = Client::connect(server, transfer).await?;
            let names = client.list().await.context("listing files")?;
            if names.is_empty() {
                println!("No files available on the server.");
            }
            for name in names {
                println!("{name}");
            }
        }
        Mode::Upload { server, path } => {
            let mut client = Client::connect(server, transfer).await?;
            let report = client
                .upload(&path)
                .await
                .with_context(|| format!("uploading {}", path.display()))?;
            println!(
                "Uploaded {} ({} bytes, {} datagrams, {} timeouts)",
                path.display(),
                report.bytes,
                report.datagrams_sent,
                report.timeouts
            );
        }
        Mode::Download { server, name, out } => {
            let mut client = Client::connect(server, transfer).await?;
            let (dest, report) = client
                .download(&name, &out)
                .await
                .with_context(|| format!("downloading {name}"))?;
            println!("Saved {} ({} bytes)", dest.display(), report.bytes);
        }
    }

    Ok(())
}
