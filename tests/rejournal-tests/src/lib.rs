use anyhow::{bail, ensure, Result};
use env::Env;
use rejournal::message::ServerStatus;
use rejournal::process::Role;
use rejournal::{JournalClient, LogIndex, NodeConfig};
use std::time::Duration;
use tokio::time::Instant;

/// How long a cluster gets to settle before a wait gives up.
pub const SETTLE: Duration = Duration::from_secs(10);

pub struct Builder {
    with_logging: bool,
    snapshot_interval: Option<u64>,
}
impl Builder {
    fn new() -> Self {
        Self {
            with_logging: true,
            snapshot_interval: None,
        }
    }

    pub fn with_logging(self, b: bool) -> Self {
        Self {
            with_logging: b,
            ..self
        }
    }

    pub fn snapshot_interval(self, n: u64) -> Self {
        Self {
            snapshot_interval: Some(n),
            ..self
        }
    }

    pub async fn build(self, n: u8) -> Result<Cluster> {
        ensure!(n > 0);
        let mut env = Env::new(self.with_logging);
        let ids: Vec<u8> = (0..n).collect();
        for &id in &ids {
            env.reserve(id)?;
        }
        let status_client = env.client();
        let mut cluster = Cluster {
            env,
            status_client,
            snapshot_interval: self.snapshot_interval,
        };
        for &id in &ids {
            cluster.start(id, &ids).await?;
        }
        Ok(cluster)
    }
}

pub struct Cluster {
    env: Env,
    /// Shared by the status polls so that they reuse connections.
    status_client: JournalClient,
    snapshot_interval: Option<u64>,
}
impl Cluster {
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Create `n` voters and start them.
    pub async fn new(n: u8) -> Result<Self> {
        Self::builder().build(n).await
    }

    pub fn env(&mut self) -> &mut Env {
        &mut self.env
    }

    /// Starts or restarts node `id` with `voters` as its initial voters.
    pub async fn start(&mut self, id: u8, voters: &[u8]) -> Result<()> {
        let snapshot_interval = self.snapshot_interval;
        self.env
            .start_node_with(id, voters, |config: NodeConfig| match snapshot_interval {
                Some(n) => config.snapshot_interval(n),
                None => config,
            })
            .await
    }

    pub fn stop(&mut self, id: u8) {
        self.env.stop_node(id);
    }

    /// An application client that talks to every known server.
    pub fn user(&self) -> testapp::Client {
        testapp::Client::new(self.env.client())
    }

    /// An application client that only knows the servers in `ids`.
    pub fn user_to(&self, ids: &[u8]) -> testapp::Client {
        testapp::Client::new(self.env.client_to(ids))
    }

    pub fn admin(&self) -> JournalClient {
        self.env.client()
    }

    pub fn address(&self, id: u8) -> rejournal::NodeAddress {
        self.env.address(id)
    }

    pub async fn status(&self, id: u8) -> Result<ServerStatus> {
        Ok(self.status_client.server_status(&self.address(id)).await?)
    }

    /// Waits until one of `among` is the leader known by all of them.
    pub async fn wait_leader(&self, among: &[u8]) -> Result<u8> {
        let deadline = Instant::now() + SETTLE;
        while Instant::now() < deadline {
            let mut statuses = vec![];
            for &id in among {
                if let Ok(st) = self.status(id).await {
                    statuses.push((id, st));
                }
            }
            let leader = statuses
                .iter()
                .filter(|(_, st)| st.role == Role::Leader)
                .max_by_key(|(_, st)| st.term);
            if let Some((leader_id, leader_st)) = leader {
                let leader_addr = self.address(*leader_id);
                let agreed = statuses.len() == among.len()
                    && statuses.iter().all(|(_, st)| {
                        st.term == leader_st.term && st.leader.as_ref() == Some(&leader_addr)
                    });
                if agreed {
                    return Ok(*leader_id);
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        bail!("no leader elected among {among:?}");
    }

    /// Waits until node `id` has applied `index`.
    pub async fn wait_applied(&self, id: u8, index: LogIndex) -> Result<()> {
        let deadline = Instant::now() + SETTLE;
        let addr = self.address(id);
        while Instant::now() < deadline {
            if let Ok(applied) = self.status_client.last_applied(&addr).await {
                if applied >= index {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        bail!("node(id={id}) did not apply {index}");
    }

    /// Adds `n` through the leader and returns the index the addition was applied at.
    pub async fn fetch_add(&self, n: u64) -> Result<(LogIndex, u64)> {
        self.user().fetch_add_at(n).await
    }
}
