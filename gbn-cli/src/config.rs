//! Configuration file support for GBN CLI tools

use gbn_crypto::{DigestAlgorithm, RingDigest, DEFAULT_DIGEST_LEN};
use gbn_protocol::{
    ArqConfig, DEFAULT_CHUNK_SIZE, DEFAULT_WINDOW_SIZE, MAX_RETRANSMITS, RETRANSMIT_TIMEOUT,
    STANDBY_TIMEOUT,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

/// Digest settings shared by both tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestConfig {
    /// Hash function
    #[serde(default)]
    pub algorithm: DigestAlgorithm,
    /// Bytes of the hash carried in the trailer
    #[serde(default = "default_digest_len")]
    pub len: usize,
}

impl Default for DigestConfig {
    fn default() -> Self {
        DigestConfig {
            algorithm: DigestAlgorithm::default(),
            len: DEFAULT_DIGEST_LEN,
        }
    }
}

impl DigestConfig {
    /// Build the digest function
    pub fn build(&self) -> Result<RingDigest, ConfigError> {
        RingDigest::new(self.algorithm, self.len).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

fn default_digest_len() -> usize {
    DEFAULT_DIGEST_LEN
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_data_port() -> u16 {
    8000
}

fn default_ack_port() -> u16 {
    8001
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}

fn default_transmission_id() -> u16 {
    1
}

fn default_standby_ms() -> u64 {
    STANDBY_TIMEOUT.as_millis() as u64
}

fn default_retransmit_ms() -> u64 {
    RETRANSMIT_TIMEOUT.as_millis() as u64
}

fn default_max_retransmits() -> u32 {
    MAX_RETRANSMITS
}

fn default_stats_interval() -> u64 {
    1
}

fn default_idle_timeout() -> u64 {
    30
}

/// Sender configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Input file path, or "-" for stdin
    pub input: String,
    /// Receiver host
    #[serde(default = "default_host")]
    pub host: String,
    /// Port the receiver listens on for data
    #[serde(default = "default_data_port")]
    pub data_port: u16,
    /// Port this sender listens on for acknowledgments
    #[serde(default = "default_ack_port")]
    pub ack_port: u16,
    /// Data bytes per packet
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Window size (packets)
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Transmission ID stamped on every packet
    #[serde(default = "default_transmission_id")]
    pub transmission_id: u16,
    /// Quiet period before resending from the last acknowledged packet
    #[serde(default = "default_retransmit_ms")]
    pub retransmit_timeout_ms: u64,
    /// Consecutive retransmissions without progress before giving up
    #[serde(default = "default_max_retransmits")]
    pub max_retransmits: u32,
    /// Payload digest
    #[serde(default)]
    pub digest: DigestConfig,
    /// Statistics interval in seconds (0 disables progress output)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            input: "-".to_string(),
            host: default_host(),
            data_port: default_data_port(),
            ack_port: default_ack_port(),
            chunk_size: default_chunk_size(),
            window_size: default_window_size(),
            transmission_id: default_transmission_id(),
            retransmit_timeout_ms: default_retransmit_ms(),
            max_retransmits: default_max_retransmits(),
            digest: DigestConfig::default(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

/// Receiver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Output path, "-" for stdout, or unset to use the name sent by the sender
    pub output: Option<String>,
    /// Sender host, where acknowledgments go
    #[serde(default = "default_host")]
    pub host: String,
    /// Port this receiver listens on for data
    #[serde(default = "default_data_port")]
    pub data_port: u16,
    /// Port the sender listens on for acknowledgments
    #[serde(default = "default_ack_port")]
    pub ack_port: u16,
    /// Data bytes per packet, used to size the reassembly buffer
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Window size (packets)
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Quiet period before a forced duplicate acknowledgment
    #[serde(default = "default_standby_ms")]
    pub standby_timeout_ms: u64,
    /// Give up after this many seconds without traffic
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Payload digest
    #[serde(default)]
    pub digest: DigestConfig,
    /// Statistics interval in seconds (0 disables progress output)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            output: None,
            host: default_host(),
            data_port: default_data_port(),
            ack_port: default_ack_port(),
            chunk_size: default_chunk_size(),
            window_size: default_window_size(),
            standby_timeout_ms: default_standby_ms(),
            idle_timeout_secs: default_idle_timeout(),
            digest: DigestConfig::default(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

/// Combined configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Sender configuration
    pub sender: Option<SenderConfig>,
    /// Receiver configuration
    pub receiver: Option<ReceiverConfig>,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Create example sender configuration
    pub fn example_sender() -> Self {
        Config {
            sender: Some(SenderConfig {
                input: "payload.bin".to_string(),
                ..SenderConfig::default()
            }),
            receiver: None,
        }
    }

    /// Create example receiver configuration
    pub fn example_receiver() -> Self {
        Config {
            sender: None,
            receiver: Some(ReceiverConfig::default()),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Cannot resolve host: {0}")]
    Resolve(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Resolve `host:port`, preferring IPv4
fn resolve(host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| ConfigError::Resolve(format!("{}: {}", host, e)))?
        .collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| ConfigError::Resolve(host.to_string()))
}

/// Local address to listen on when talking to `peer`
fn bind_for(peer: SocketAddr, port: u16) -> SocketAddr {
    let ip = match peer.ip() {
        ip if ip.is_loopback() => ip,
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, port)
}

impl SenderConfig {
    /// Protocol tunables
    pub fn arq(&self) -> ArqConfig {
        ArqConfig {
            window_size: self.window_size,
            chunk_size: self.chunk_size,
            retransmit_timeout: Duration::from_millis(self.retransmit_timeout_ms),
            max_retransmits: self.max_retransmits,
            ..ArqConfig::default()
        }
    }

    /// Where data packets go
    pub fn receiver_addr(&self) -> Result<SocketAddr, ConfigError> {
        resolve(&self.host, self.data_port)
    }

    /// Where acknowledgments are received
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(bind_for(self.receiver_addr()?, self.ack_port))
    }

    /// Get statistics interval as Duration
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }

    /// Check for values the tools cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_port == 0 || self.ack_port == 0 {
            return Err(ConfigError::Invalid("ports must be non-zero".to_string()));
        }
        self.arq()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.digest.build()?;
        Ok(())
    }
}

impl ReceiverConfig {
    /// Protocol tunables
    pub fn arq(&self) -> ArqConfig {
        ArqConfig {
            window_size: self.window_size,
            chunk_size: self.chunk_size,
            standby_timeout: Duration::from_millis(self.standby_timeout_ms),
            ..ArqConfig::default()
        }
    }

    /// Where acknowledgments go
    pub fn sender_addr(&self) -> Result<SocketAddr, ConfigError> {
        resolve(&self.host, self.ack_port)
    }

    /// Where data packets are received
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(bind_for(self.sender_addr()?, self.data_port))
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// Get statistics interval as Duration
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }

    /// Check for values the tools cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_port == 0 || self.ack_port == 0 {
            return Err(ConfigError::Invalid("ports must be non-zero".to_string()));
        }
        self.arq()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.digest.build()?;
        Ok(())
    }
}
