//! GBN Receiver - one-shot file receiver
//!
//! Receives one transfer from a gbn-sender, verifies its digest, and writes
//! the payload to a file or stdout.

use anyhow::Context;
use clap::Parser;
use gbn::driver::{run_with_progress, DriverConfig};
use gbn_cli::{display_compact_stats, display_transfer_summary, init_logging, Config, ReceiverConfig};
use gbn_crypto::DigestAlgorithm;
use gbn_io::GbnSocket;
use gbn_protocol::{Receiver, ReceiverOutcome};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Output name when the sender announced none
const FALLBACK_OUTPUT: &str = "received.bin";

#[derive(Parser, Debug)]
#[command(name = "gbn-receiver")]
#[command(about = "Go-Back-N file receiver", long_about = None)]
struct Args {
    /// Output file, '-' for stdout (defaults to the name sent by the sender)
    #[arg(short, long)]
    output: Option<String>,

    /// Configuration file (TOML, [receiver] section)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sender host, where acknowledgments go
    #[arg(long)]
    host: Option<String>,

    /// Local data port
    #[arg(long)]
    data_port: Option<u16>,

    /// Sender acknowledgment port
    #[arg(long)]
    ack_port: Option<u16>,

    /// Data bytes per packet
    #[arg(short = 's', long)]
    chunk_size: Option<usize>,

    /// Window size in packets
    #[arg(short, long)]
    window: Option<usize>,

    /// Debounce timeout in milliseconds
    #[arg(long)]
    standby_ms: Option<u64>,

    /// Give up after this many seconds without traffic (0 waits forever)
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Digest algorithm (sha256, sha384, sha512)
    #[arg(long)]
    digest: Option<DigestAlgorithm>,

    /// Digest bytes carried in the trailer
    #[arg(long)]
    digest_len: Option<usize>,

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
    fn apply(&self, config: &mut ReceiverConfig) {
        if let Some(output) = &self.output {
            config.output = Some(output.clone());
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
        if let Some(ms) = self.standby_ms {
            config.standby_timeout_ms = ms;
        }
        if let Some(secs) = self.idle_timeout {
            config.idle_timeout_secs = secs;
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

/// Output path: configured, else the announced name stripped of directories
fn output_target(configured: Option<&str>, outcome: &ReceiverOutcome) -> PathBuf {
    match configured {
        Some(path) => PathBuf::from(path),
        None => outcome
            .file_name()
            .and_then(|name| Path::new(name).file_name())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(FALLBACK_OUTPUT)),
    }
}

fn write_output(target: &Path, payload: &[u8]) -> anyhow::Result<()> {
    if target == Path::new("-") {
        let mut out = io::stdout().lock();
        out.write_all(payload).context("writing stdout")?;
        out.flush()?;
    } else {
        fs::write(target, payload).with_context(|| format!("writing {}", target.display()))?;
        tracing::info!("Wrote {} bytes to {}", payload.len(), target.display());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Some(path) = &args.example_config {
        Config::example_receiver().to_file(path)?;
        tracing::info!("Wrote example configuration to {}", path.display());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?
            .receiver
            .ok_or_else(|| anyhow::anyhow!("{} has no [receiver] section", path.display()))?,
        None => ReceiverConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    let digest = config.digest.build()?;
    let mut receiver = Receiver::new(&config.arq(), Box::new(digest))?;

    let peer = config.sender_addr()?;
    let socket = GbnSocket::bind(config.bind_addr()?)?;
    tracing::info!(
        "GBN Receiver: listening on {}, acknowledging to {}, window {}",
        socket.as_udp_socket().local_addr()?,
        peer,
        config.window_size
    );

    let driver = DriverConfig {
        idle_timeout: config.idle_timeout(),
        progress_interval: config.stats_interval(),
    };
    let show_progress = driver.progress_interval.is_some();
    let result = run_with_progress(&mut receiver, &socket, peer, &driver, |stats| {
        if show_progress {
            display_compact_stats(stats);
        }
    });

    display_transfer_summary("TRANSFER SUMMARY (receiver)", receiver.stats());
    result?;

    let outcome = receiver
        .outcome()
        .context("receiver closed without a complete transfer")?;
    outcome.verify()?;
    tracing::info!("Digest verified");

    let target = output_target(config.output.as_deref(), outcome);
    write_output(&target, &outcome.payload)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn outcome(metadata: &'static [u8]) -> ReceiverOutcome {
        ReceiverOutcome {
            transmission_id: 1,
            payload: Bytes::new(),
            metadata: Bytes::from_static(metadata),
            expected_digest: Bytes::new(),
            actual_digest: Bytes::new(),
            total_packets: 2,
        }
    }

    #[test]
    fn test_output_target() {
        assert_eq!(
            output_target(Some("out.bin"), &outcome(b"ignored.txt")),
            PathBuf::from("out.bin")
        );
        assert_eq!(
            output_target(None, &outcome(b"report.pdf")),
            PathBuf::from("report.pdf")
        );
        assert_eq!(
            output_target(None, &outcome(b"../../etc/passwd")),
            PathBuf::from("passwd")
        );
        assert_eq!(
            output_target(None, &outcome(b"")),
            PathBuf::from(FALLBACK_OUTPUT)
        );
    }
}
