//! GBN Sender - one-shot file sender
//!
//! Reads a file (or stdin) and transfers it to a gbn-receiver over UDP using
//! a Go-Back-N sliding window.

use anyhow::Context;
use clap::Parser;
use gbn::driver::{run_with_progress, DriverConfig};
use gbn_cli::{display_compact_stats, display_transfer_summary, init_logging, Config, SenderConfig};
use gbn_crypto::DigestAlgorithm;
use gbn_io::GbnSocket;
use gbn_protocol::Sender;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "gbn-sender")]
#[command(about = "Go-Back-N file sender", long_about = None)]
struct Args {
    /// Input file, or '-' for stdin
    #[arg(short, long)]
    input: Option<String>,

    /// Configuration file (TOML, [sender] section)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Receiver host
    #[arg(long)]
    host: Option<String>,

    /// Receiver data port
    #[arg(long)]
    data_port: Option<u16>,

    /// Local port for acknowledgments
    #[arg(long)]
    ack_port: Option<u16>,

    /// Data bytes per packet
    #[arg(short = 's', long)]
    chunk_size: Option<usize>,

    /// Window size in packets
    #[arg(short, long)]
    window: Option<usize>,

    /// Transmission ID
    #[arg(long)]
    id: Option<u16>,

    /// Retransmit timeout in milliseconds
    #[arg(long)]
    retransmit_ms: Option<u64>,

    /// Retransmissions without progress before giving up
    #[arg(long)]
    max_retransmits: Option<u32>,

    /// Digest algorithm (sha256, sha384, sha512)
    #[arg(long)]
    digest: Option<DigestAlgorithm>,

    /// Digest bytes carried in the trailer
    #[arg(long)]
    digest_len: Option<usize>,

    /// Name announced to the receiver (defaults to the input file name)
    #[arg(long)]
    name: Option<String>,

    /// Statistics interval in seconds (0 disables)
    #[arg(long)]
    stats: Option<u64>,

    /// Write an example configuration file and exit
    #[arg(long, value_name = "PATH")]
    example_config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(&self, config: &mut SenderConfig) {
        if let Some(input) = &self.input {
            config.input = input.clone();
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.data_port {
            config.data_port = port;
        }
        if let Some(port) = self.ack_port {
            config.ack_port = port;
        }
        if let Some(size) = self.chunk_size {
            config.chunk_size = size;
        }
        if let Some(window) = self.window {
            config.window_size = window;
        }
        if let Some(id) = self.id {
            config.transmission_id = id;
        }
        if let Some(ms) = self.retransmit_ms {
            config.retransmit_timeout_ms = ms;
        }
        if let Some(max) = self.max_retransmits {
            config.max_retransmits = max;
        }
        if let Some(algorithm) = self.digest {
            config.digest.algorithm = algorithm;
        }
        if let Some(len) = self.digest_len {
            config.digest.len = len;
        }
        if let Some(secs) = self.stats {
            config.stats_interval_secs = secs;
        }
    }
}

fn read_input(input: &str) -> anyhow::Result<Vec<u8>> {
    let mut data = Vec::new();
    if input == "-" {
        io::stdin()
            .read_to_end(&mut data)
            .context("reading stdin")?;
    } else {
        data = fs::read(input).with_context(|| format!("reading {}", input))?;
    }
    Ok(data)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Some(path) = &args.example_config {
        Config::example_sender().to_file(path)?;
        tracing::info!("Wrote example configuration to {}", path.display());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?
            .sender
            .ok_or_else(|| anyhow::anyhow!("{} has no [sender] section", path.display()))?,
        None => SenderConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    let payload = read_input(&config.input)?;
    let name = match &args.name {
        Some(name) => name.clone(),
        None if config.input == "-" => String::new(),
        None => Path::new(&config.input)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };

    let digest = config.digest.build()?;
    let mut sender = Sender::new(
        config.transmission_id,
        &payload,
        name.as_bytes(),
        &config.arq(),
        &digest,
    )?;

    let peer = config.receiver_addr()?;
    let socket = GbnSocket::bind(config.bind_addr()?)?;
    tracing::info!(
        "GBN Sender: {} ({} bytes, {} packets) to {}, window {}, acks on {}",
        if name.is_empty() { "<stdin>" } else { name.as_str() },
        payload.len(),
        sender.packet_count(),
        peer,
        config.window_size,
        socket.as_udp_socket().local_addr()?
    );

    let driver = DriverConfig {
        idle_timeout: None,
        progress_interval: config.stats_interval(),
    };
    let show_progress = driver.progress_interval.is_some();
    let result = run_with_progress(&mut sender, &socket, peer, &driver, |stats| {
        if show_progress {
            display_compact_stats(stats)
        }
    });

    display_transfer_summary("TRANSFER SUMMARY (sender)", sender.stats());
    result?;

    tracing::info!("Transfer complete");
    Ok(())
}
