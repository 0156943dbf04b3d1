use crate::codec::{Decode, Encode};
use crate::message::*;
use crate::process::LogIndex;
use crate::transport::{self, ConnectionPool, TransportOptions};
use crate::{Error, NodeAddress};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::debug;
use uuid::Uuid;

/// Client of a journal cluster.
///
/// Writes and linearizable reads go to the leader. The client remembers the
/// last leader it heard of, follows `NotLeader` hints and retries transient
/// failures with an exponential backoff. A write keeps its `(client_id,
/// sequence)` across retries, so it is applied at most once.
pub struct JournalClient {
    pool: ConnectionPool,
    servers: Vec<NodeAddress>,
    leader: Mutex<Option<NodeAddress>>,
    cursor: AtomicUsize,
    client_id: Uuid,
    sequence: AtomicU64,
    max_retries: usize,
}

impl JournalClient {
    pub fn new(servers: Vec<NodeAddress>, options: TransportOptions) -> Self {
        Self {
            pool: ConnectionPool::new(options),
            servers,
            leader: Mutex::new(None),
            cursor: AtomicUsize::new(0),
            client_id: Uuid::new_v4(),
            sequence: AtomicU64::new(0),
            max_retries: 10,
        }
    }

    pub fn max_retries(mut self, n: usize) -> Self {
        self.max_retries = n;
        self
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    fn target(&self) -> Result<NodeAddress, Error> {
        if let Some(leader) = self.leader.lock().clone() {
            return Ok(leader);
        }
        if self.servers.is_empty() {
            return Err(Error::Protocol("no server to connect".into()));
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        Ok(self.servers[i % self.servers.len()].clone())
    }

    fn learn(&self, target: &NodeAddress, e: &Error) {
        let mut leader = self.leader.lock();
        match e {
            Error::NotLeader { leader: Some(hint) } if hint != target => {
                debug!("{target} redirects to {hint}");
                *leader = Some(hint.clone());
            }
            e if e.is_transient() => {
                *leader = None;
            }
            _ => {}
        }
    }

    async fn call_once<Req: Encode, Resp: Decode>(
        &self,
        command_type: CommandType,
        req: &Req,
    ) -> Result<Resp, Error> {
        let target = self.target()?;
        let r = self.pool.call(&target, command_type, req).await;
        match &r {
            Ok(_) => *self.leader.lock() = Some(target),
            Err(e) => self.learn(&target, e),
        }
        r
    }

    /// Sends to the leader, retrying transient failures.
    async fn call_leader<Req: Encode, Resp: Decode>(
        &self,
        command_type: CommandType,
        req: &Req,
    ) -> Result<Resp, Error> {
        // 20ms, 40ms, 80ms, ... up to 1s
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(10)
            .max_delay(Duration::from_secs(1))
            .map(jitter)
            .take(self.max_retries);
        RetryIf::start(
            strategy,
            || self.call_once(command_type, req),
            |e: &Error| e.is_transient(),
        )
        .await
    }

    /// Applies `command` to the replicated state machine.
    /// Returns the index it was applied at and the state machine's response.
    pub async fn update(&self, command: impl Into<Bytes>) -> Result<(LogIndex, Bytes), Error> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let req = UpdateClusterState {
            client_id: Some(self.client_id),
            sequence,
            command: command.into(),
        };
        let resp: UpdateClusterStateResponse = self
            .call_leader(CommandType::UpdateClusterState, &req)
            .await?;
        Ok((resp.index, resp.result))
    }

    /// A linearizable read served by the leader.
    pub async fn query(
        &self,
        consistency: ReadConsistency,
        query: impl Into<Bytes>,
    ) -> Result<(LogIndex, Bytes), Error> {
        let req = QueryClusterState {
            consistency,
            query: query.into(),
        };
        let resp: QueryResponse = self
            .call_leader(CommandType::QueryClusterState, &req)
            .await?;
        Ok((resp.index, resp.result))
    }

    /// Reads the state machine of `server` as it is. The result may be stale.
    pub async fn query_local(
        &self,
        server: &NodeAddress,
        query: impl Into<Bytes>,
    ) -> Result<(LogIndex, Bytes), Error> {
        let req = QueryServerState {
            query: query.into(),
        };
        let resp: QueryResponse = self
            .pool
            .call(server, CommandType::QueryServerState, &req)
            .await?;
        Ok((resp.index, resp.result))
    }

    pub async fn last_applied(&self, server: &NodeAddress) -> Result<LogIndex, Error> {
        let resp: LastAppliedResponse = self
            .pool
            .call(server, CommandType::LastApplied, &())
            .await?;
        Ok(resp.last_applied)
    }

    pub async fn get_servers(&self, server: &NodeAddress) -> Result<GetServersResponse, Error> {
        self.pool.call(server, CommandType::GetServers, &()).await
    }

    pub async fn server_status(&self, server: &NodeAddress) -> Result<ServerStatus, Error> {
        self.pool
            .call(server, CommandType::GetServerStatus, &())
            .await
    }

    /// Changes the voters through a joint configuration and returns once the
    /// new configuration is committed.
    pub async fn update_voters(
        &self,
        old_voters: Vec<NodeAddress>,
        new_voters: Vec<NodeAddress>,
    ) -> Result<(), Error> {
        let req = UpdateVoters {
            old_voters,
            new_voters,
        };
        self.call_leader(CommandType::UpdateVoters, &req).await
    }

    /// Subscribes to the events emitted on `server`.
    pub async fn add_pull_watch(&self, server: &NodeAddress) -> Result<AddPullWatchResponse, Error> {
        self.pool
            .call(server, CommandType::AddPullWatch, &())
            .await
    }

    /// Returns the events after `last_event_id`, waiting up to `max_wait` for one.
    pub async fn pull_events(
        &self,
        server: &NodeAddress,
        subscriber_id: Uuid,
        last_event_id: u64,
        max_wait: Duration,
    ) -> Result<PullEventsResponse, Error> {
        let req = PullEvents {
            subscriber_id,
            last_event_id,
            max_wait_ms: max_wait.as_millis() as u64,
        };
        let conn = self.pool.get(server);
        let timeout = max_wait + self.pool.options().rpc_timeout;
        transport::call(&conn, CommandType::PullEvents, &req, timeout).await
    }

    pub async fn remove_pull_watch(
        &self,
        server: &NodeAddress,
        subscriber_id: Uuid,
    ) -> Result<(), Error> {
        let req = RemovePullWatch { subscriber_id };
        self.pool
            .call(server, CommandType::RemovePullWatch, &req)
            .await
    }
}
