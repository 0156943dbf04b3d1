use super::*;

use crate::config::NodeConfig;
use crate::storage::Log;
use message::{
    AddPullWatchResponse, AppendEntries, AppendEntriesResponse, GetServersResponse,
    InstallSnapshot, InstallSnapshotResponse, PullEvents, PullEventsResponse, ReadConsistency,
    RequestVote, RequestVoteResponse, ServerStatus,
};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Capacity of the consensus task's queue.
const CONTROL_QUEUE: usize = 4096;

#[allow(dead_code)]
struct ThreadHandles {
    control_handle: ThreadHandle,
    app_handle: ThreadHandle,
    watch_gc_handle: ThreadHandle,
}

/// `RaftProcess` is the implementation of the Raft process in `RaftNode`.
/// It is unaware of the network but just focuses on the Raft algorithm.
pub struct RaftProcess {
    ctrl_tx: mpsc::Sender<ControlMessage>,
    app_tx: mpsc::UnboundedSender<AppMessage>,
    state_rx: tokio_watch::Receiver<ControlState>,
    applied_rx: tokio_watch::Receiver<LogIndex>,
    log: Actor<Log>,
    watches: Arc<WatchRegistry>,
    _thread_handles: ThreadHandles,
}

impl RaftProcess {
    pub async fn new(
        app: impl StateMachine,
        storage: RaftStorage,
        config: &NodeConfig,
        io: RaftHandle,
    ) -> Result<Self> {
        let RaftStorage {
            ballot,
            log,
            snapshots,
            membership,
        } = storage;
        let log = Arc::new(RwLock::new(log));
        let commit_index = log.read().await.commit_index();

        let watches = Arc::new(WatchRegistry::new(
            config.watch_backlog,
            config.watch_timeout,
        ));
        let writes = Arc::new(WriteWaiters::default());
        let initial_config =
            ClusterConfiguration::new(config.voters.clone(), config.observers.clone());

        let (ctrl_tx, ctrl_rx) = mpsc::channel(CONTROL_QUEUE);
        let (app_tx, app_rx) = mpsc::unbounded_channel();
        let (commit_tx, commit_rx) = tokio_watch::channel(commit_index);
        let (applied_tx, applied_rx) = tokio_watch::channel(0);
        let (state_tx, state_rx) = tokio_watch::channel(ControlState {
            role: Role::Follower,
            term: 0,
            leader: None,
            commit_index,
            configuration: initial_config.clone(),
        });

        let host = AppHost::new(app::AppHostInit {
            app: Arc::new(app),
            log: log.clone(),
            snapshots: snapshots.clone(),
            events: EventSink::new(watches.clone()),
            writes: writes.clone(),
            base_config: initial_config.clone(),
            snapshot_interval: config.snapshot_interval,
            inbox: app_rx,
            commit_rx,
            applied_tx,
            ctrl_tx: ctrl_tx.clone(),
        })
        .await?;
        info!("state machine is restored at {:?}", host.applied());

        let ctrl = Control::new(control::ControlInit {
            io,
            options: control::ControlOptions {
                election_timeout: config.election_timeout,
                heartbeat_interval: config.heartbeat_interval,
                clock_skew: config.clock_skew,
                max_replication_retries: config.max_replication_retries,
                max_replication_bytes: config.max_replication_bytes,
                snapshot_chunk_size: config.snapshot_chunk_size,
            },
            role_pref: config.role,
            ballot_store: ballot,
            log: log.clone(),
            snapshots,
            membership_store: membership,
            initial_config,
            writes,
            app_tx: app_tx.clone(),
            ctrl_tx: ctrl_tx.clone(),
            commit_tx,
            state_tx,
        })
        .await?;

        let _thread_handles = ThreadHandles {
            control_handle: control::thread::new(ctrl, ctrl_rx),
            app_handle: app::new(host),
            watch_gc_handle: watch::gc_thread(watches.clone()),
        };

        Ok(Self {
            ctrl_tx,
            app_tx,
            state_rx,
            applied_rx,
            log,
            watches,
            _thread_handles,
        })
    }

    async fn send(&self, msg: ControlMessage) -> std::result::Result<(), Error> {
        self.ctrl_tx
            .send(msg)
            .await
            .map_err(|_| Error::NodeStopped)
    }

    async fn call<T>(
        &self,
        f: impl FnOnce(Reply<T>) -> ControlMessage,
    ) -> std::result::Result<T, Error> {
        let (tx, rx) = oneshot::channel();
        self.send(f(tx)).await?;
        completion::wait(rx).await
    }

    /// Replicates a command and applies it to the state machine.
    /// A write of a known `(client_id, sequence)` returns the response of its first application.
    pub async fn process_write(
        &self,
        client_id: Option<Uuid>,
        sequence: u64,
        command: &[u8],
    ) -> std::result::Result<(LogIndex, Bytes), Error> {
        let payload = Command::Execute {
            message: command,
            client_id,
            sequence,
        }
        .serialize()
        .map_err(Error::from_anyhow)?;
        let (completion, rx) = prepare_app_completion();
        self.send(ControlMessage::Propose {
            payload,
            completion,
        })
        .await?;
        completion::wait(rx).await
    }

    /// A linearizable read. Only the leader serves it.
    pub async fn process_read(
        &self,
        consistency: ReadConsistency,
        query: Bytes,
    ) -> std::result::Result<(LogIndex, Bytes), Error> {
        let (completion, rx) = prepare_app_completion();
        self.send(ControlMessage::Read {
            consistency,
            message: query,
            completion,
        })
        .await?;
        completion::wait(rx).await
    }

    /// Reads the local state machine as it is now. The result may be stale.
    pub async fn process_local_read(
        &self,
        query: Bytes,
    ) -> std::result::Result<(LogIndex, Bytes), Error> {
        let (completion, rx) = prepare_app_completion();
        self.app_tx
            .send(AppMessage::Query {
                read_index: 0,
                message: query,
                completion,
            })
            .map_err(|_| Error::NodeStopped)?;
        completion::wait(rx).await
    }

    pub fn last_applied(&self) -> LogIndex {
        *self.applied_rx.borrow()
    }

    pub fn get_servers(&self) -> GetServersResponse {
        let state = self.state_rx.borrow();
        let config = &state.configuration;
        GetServersResponse {
            leader: state.leader.clone(),
            voters: config.voters.iter().cloned().collect(),
            joint_voters: config
                .joint
                .as_ref()
                .map(|x| x.iter().cloned().collect()),
            observers: config.observers.iter().cloned().collect(),
        }
    }

    pub async fn status(&self) -> ServerStatus {
        let (first_index, last_index) = {
            let log = self.log.read().await;
            (log.first_index(), log.last_index())
        };
        let state = self.state_rx.borrow().clone();
        ServerStatus {
            role: state.role,
            term: state.term,
            leader: state.leader,
            commit_index: state.commit_index,
            last_applied: self.last_applied(),
            first_index,
            last_index,
        }
    }

    /// Moves the voters to `new_voters` through a joint configuration.
    /// An empty `old_voters` skips the check against the current voters.
    pub async fn update_voters(
        &self,
        old_voters: Vec<NodeAddress>,
        new_voters: Vec<NodeAddress>,
    ) -> std::result::Result<(), Error> {
        let (completion, rx) = prepare_kern_completion();
        self.send(ControlMessage::UpdateVoters {
            old_voters: old_voters.into_iter().collect(),
            new_voters: new_voters.into_iter().collect(),
            completion,
        })
        .await?;
        completion::wait(rx).await
    }

    pub async fn request_vote(
        &self,
        req: RequestVote,
    ) -> std::result::Result<RequestVoteResponse, Error> {
        self.call(|tx| ControlMessage::RequestVote(req, tx)).await
    }

    pub async fn append_entries(
        &self,
        req: AppendEntries,
    ) -> std::result::Result<AppendEntriesResponse, Error> {
        self.call(|tx| ControlMessage::AppendEntries(req, tx)).await
    }

    pub async fn install_snapshot(
        &self,
        req: InstallSnapshot,
    ) -> std::result::Result<InstallSnapshotResponse, Error> {
        self.call(|tx| ControlMessage::InstallSnapshot(req, tx)).await
    }

    pub fn add_pull_watch(&self) -> AddPullWatchResponse {
        AddPullWatchResponse {
            subscriber_id: self.watches.add(),
            watch_timeout_ms: self.watches.timeout().as_millis() as u64,
        }
    }

    /// Long-polls the events of a subscription.
    /// The wait is capped so that the subscription outlives it.
    pub async fn pull_events(
        &self,
        req: PullEvents,
    ) -> std::result::Result<PullEventsResponse, Error> {
        let max_wait = Duration::from_millis(req.max_wait_ms).min(self.watches.timeout() / 2);
        self.watches
            .pull(&req.subscriber_id, req.last_event_id, max_wait)
            .await
    }

    pub fn remove_pull_watch(&self, subscriber_id: &Uuid) -> std::result::Result<(), Error> {
        self.watches.remove(subscriber_id)
    }
}
