use std::{fs::read_to_string, net::SocketAddr, path::Path, str::FromStr};

use anyhow::Result;
use serde::Deserialize;

use service::schedule::RetransmitPolicy;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Server {
    ///
    /// server address
    ///
    /// The address and port the upstream RADIUS server listens on,
    /// ipv4 or ipv6.
    ///
    pub address: SocketAddr,
    ///
    /// shared secret
    ///
    /// The secret shared with this server; it keys every
    /// authenticator and the password transform.
    ///
    pub secret: String,
    ///
    /// Initial retransmission interval in milliseconds.
    ///
    #[serde(default = "Server::retransmit_time_init")]
    pub retransmit_time_init: u64,
    ///
    /// Per-try ceiling on the retransmission interval in milliseconds.
    /// Absent means unbounded.
    ///
    #[serde(default = "Server::retransmit_time_max")]
    pub retransmit_time_max: Option<u64>,
    ///
    /// Aggregate retransmission budget in milliseconds.  Absent means
    /// unbounded.
    ///
    #[serde(default = "Server::retransmit_duration_max")]
    pub retransmit_duration_max: Option<u64>,
    ///
    /// Ceiling on tries against this server before failing over.
    /// Absent means unbounded.
    ///
    #[serde(default = "Server::retransmit_count_max")]
    pub retransmit_count_max: Option<u32>,
    #[serde(default = "Server::enabled")]
    pub enabled: bool,
}

impl Server {
    pub fn retransmit(&self) -> RetransmitPolicy {
        RetransmitPolicy {
            time_init: self.retransmit_time_init,
            time_max: self.retransmit_time_max,
            duration_max: self.retransmit_duration_max,
            count_max: self.retransmit_count_max,
        }
    }
}

impl Server {
    fn retransmit_time_init() -> u64 {
        RetransmitPolicy::default().time_init
    }

    fn retransmit_time_max() -> Option<u64> {
        RetransmitPolicy::default().time_max
    }

    fn retransmit_duration_max() -> Option<u64> {
        RetransmitPolicy::default().duration_max
    }

    fn retransmit_count_max() -> Option<u32> {
        RetransmitPolicy::default().count_max
    }

    fn enabled() -> bool {
        true
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Pool {
    ///
    /// Per-worker, per-family socket pool floor; drained sockets above
    /// it are closed.
    ///
    #[serde(default = "Pool::sockets_min")]
    pub sockets_min: usize,
    ///
    /// Per-worker, per-family socket pool ceiling.  With 256
    /// identifiers per socket this bounds the queries a worker can
    /// keep in flight per family.
    ///
    #[serde(default = "Pool::sockets_max")]
    pub sockets_max: usize,
}

impl Pool {
    fn sockets_min() -> usize {
        1
    }

    fn sockets_max() -> usize {
        4
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self {
            sockets_min: Self::sockets_min(),
            sockets_max: Self::sockets_max(),
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Socket {
    ///
    /// SO_SNDBUF, best effort.
    ///
    #[serde(default)]
    pub send_buffer_size: Option<usize>,
    ///
    /// SO_RCVBUF, best effort.
    ///
    #[serde(default)]
    pub recv_buffer_size: Option<usize>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    ///
    /// log level
    ///
    /// An enum representing the available verbosity levels of the
    /// logger.
    ///
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    ///
    /// Number of scheduler workers.  Each worker owns its own socket
    /// pools, so this scales identifier capacity as well as
    /// throughput.
    ///
    #[serde(default = "Config::workers")]
    pub workers: usize,
    ///
    /// Server table capacity.
    ///
    #[serde(default = "Config::servers_max")]
    pub servers_max: usize,
    ///
    /// NAS-Identifier stamped on requests built by the bundled tool.
    ///
    #[serde(default)]
    pub nas_identifier: Option<String>,
    #[serde(default)]
    pub pool: Pool,
    #[serde(default)]
    pub socket: Socket,
    #[serde(default)]
    pub log: Log,
    ///
    /// Upstream server list, in priority order.
    ///
    #[serde(default)]
    pub servers: Vec<Server>,
}

impl Config {
    fn workers() -> usize {
        num_cpus::get()
    }

    fn servers_max() -> usize {
        32
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: Self::workers(),
            servers_max: Self::servers_max(),
            nas_identifier: None,
            pool: Pool::default(),
            socket: Socket::default(),
            log: Log::default(),
            servers: Vec::new(),
        }
    }
}

impl Config {
    ///
    /// Load the configuration from a TOML file.
    ///
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(toml::from_str::<Self>(&read_to_string(path)?)?)
    }
}
