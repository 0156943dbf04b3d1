use super::*;

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// When appended log records are forced to the disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum FsyncPolicy {
    /// Every append waits for its fsync.
    PerAppend,
    /// Appends return once written to the OS. A background flusher syncs after
    /// `max_entries` pending records or `max_delay`, whichever comes first.
    Batched {
        max_entries: usize,
        max_delay: Duration,
    },
    /// Never fsync. Durability is left to the OS.
    OsOnly,
}

impl Default for FsyncPolicy {
    fn default() -> Self {
        Self::PerAppend
    }
}

/// `per-append`, `batched:64`, `batched:10ms` or `os-only`.
impl FromStr for FsyncPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "per-append" => return Ok(Self::PerAppend),
            "os-only" => return Ok(Self::OsOnly),
            _ => {}
        }
        let Some(arg) = s.strip_prefix("batched:") else {
            bail!("unknown fsync policy {s:?}");
        };
        let out = if let Some(ms) = arg.strip_suffix("ms") {
            Self::Batched {
                max_entries: usize::MAX,
                max_delay: Duration::from_millis(ms.parse()?),
            }
        } else {
            let n: usize = arg.parse()?;
            ensure!(n > 0, "batched fsync needs a positive entry count");
            Self::Batched {
                max_entries: n,
                max_delay: Duration::from_millis(100),
            }
        };
        Ok(out)
    }
}

impl TryFrom<String> for FsyncPolicy {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// What a sender does when a connection's send queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackPressure {
    /// Wait for room until the request timeout.
    #[default]
    Block,
    /// Fail immediately with `Overloaded`.
    Fail,
}

/// Whether this server wants to take part in elections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RolePreference {
    #[default]
    Voter,
    /// Never campaigns, even when listed as a voter.
    Observer,
}

mod duration_ms {
    use super::*;
    use serde::Deserializer;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Configuration of a `RaftNode`.
///
/// Durations are given in milliseconds when deserialized.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Socket the RPC server binds to.
    pub listen_addr: SocketAddr,
    /// The URI other servers reach this one at.
    pub self_address: Option<NodeAddress>,
    /// Initial voters. Ignored once a membership is persisted.
    pub voters: Vec<NodeAddress>,
    /// Initial observers.
    pub observers: Vec<NodeAddress>,
    pub data_dir: PathBuf,
    pub fsync_policy: FsyncPolicy,
    pub role: RolePreference,

    #[serde(with = "duration_ms")]
    pub election_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub heartbeat_interval: Duration,
    #[serde(with = "duration_ms")]
    pub rpc_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Idle connections are evicted from the pool after this.
    #[serde(with = "duration_ms")]
    pub connection_idle_timeout: Duration,
    /// Subscriptions without a pull for this long are dropped.
    #[serde(with = "duration_ms")]
    pub watch_timeout: Duration,
    /// Subtracted from the election timeout when judging a leader lease.
    #[serde(with = "duration_ms")]
    pub clock_skew: Duration,

    pub max_replication_retries: u32,
    /// Upper bound of entry payload bytes in one AppendEntries.
    pub max_replication_bytes: usize,
    /// A segment file is rolled once it grows past this.
    pub segment_size: u64,
    /// Take a snapshot every this many applied entries. 0 disables.
    pub snapshot_interval: u64,
    pub snapshot_chunk_size: usize,
    pub send_queue_capacity: usize,
    pub back_pressure: BackPressure,
    /// Per-subscriber event buffer.
    pub watch_backlog: usize,
    pub max_frame_size: usize,
    /// Requests of one inbound connection handled at the same time.
    pub max_in_flight_requests: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 7000)),
            self_address: None,
            voters: vec![],
            observers: vec![],
            data_dir: PathBuf::from("data"),
            fsync_policy: FsyncPolicy::default(),
            role: RolePreference::default(),
            election_timeout: Duration::from_millis(1000),
            heartbeat_interval: Duration::from_millis(200),
            rpc_timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(1),
            connection_idle_timeout: Duration::from_secs(60),
            watch_timeout: Duration::from_secs(60),
            clock_skew: Duration::from_millis(50),
            max_replication_retries: 10,
            max_replication_bytes: 1 << 20,
            segment_size: 64 << 20,
            snapshot_interval: 10_000,
            snapshot_chunk_size: 256 << 10,
            send_queue_capacity: 1024,
            back_pressure: BackPressure::default(),
            watch_backlog: 1024,
            max_frame_size: 16 << 20,
            max_in_flight_requests: 256,
        }
    }
}

impl NodeConfig {
    pub fn new(self_address: NodeAddress, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            self_address: Some(self_address),
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn voters(mut self, voters: impl IntoIterator<Item = NodeAddress>) -> Self {
        self.voters = voters.into_iter().collect();
        self
    }

    pub fn observers(mut self, observers: impl IntoIterator<Item = NodeAddress>) -> Self {
        self.observers = observers.into_iter().collect();
        self
    }

    pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    pub fn fsync_policy(mut self, policy: FsyncPolicy) -> Self {
        self.fsync_policy = policy;
        self
    }

    pub fn role(mut self, role: RolePreference) -> Self {
        self.role = role;
        self
    }

    pub fn election_timeout(mut self, t: Duration) -> Self {
        self.election_timeout = t;
        self
    }

    pub fn heartbeat_interval(mut self, t: Duration) -> Self {
        self.heartbeat_interval = t;
        self
    }

    pub fn snapshot_interval(mut self, n: u64) -> Self {
        self.snapshot_interval = n;
        self
    }

    pub fn segment_size(mut self, n: u64) -> Self {
        self.segment_size = n;
        self
    }

    pub fn watch_timeout(mut self, t: Duration) -> Self {
        self.watch_timeout = t;
        self
    }

    pub fn self_address(&self) -> Result<&NodeAddress> {
        self.self_address
            .as_ref()
            .context("self_address is not configured")
    }

    pub fn validate(&self) -> Result<()> {
        self.self_address()?;
        ensure!(
            self.heartbeat_interval < self.election_timeout,
            "heartbeat_interval ({:?}) must be shorter than election_timeout ({:?})",
            self.heartbeat_interval,
            self.election_timeout
        );
        ensure!(
            self.clock_skew < self.election_timeout,
            "clock_skew must be shorter than election_timeout"
        );
        ensure!(self.snapshot_chunk_size > 0);
        ensure!(self.send_queue_capacity > 0);
        ensure!(self.max_in_flight_requests > 0);
        ensure!(self.watch_backlog > 0);
        ensure!(self.segment_size > 0);
        Ok(())
    }
}
