use super::*;

use crate::storage::{Log, SnapshotMeta, SnapshotStore};

mod query_queue;
use query_queue::{Query, WaitQueue};
mod session;
pub use session::Sessions;

/// Entries read from the log at once.
const APPLY_BATCH: usize = 64 << 10;

pub enum AppMessage {
    /// Serve `message` once the state machine has applied `read_index`.
    Query {
        read_index: LogIndex,
        message: Bytes,
        completion: AppCompletion,
    },
}

/// Owner of the state machine.
///
/// Applies committed entries in log order, serves queries at their read
/// index and takes snapshots. When the entries it needs have been replaced
/// by an installed snapshot it restores the state machine from that snapshot.
pub struct AppHost {
    app: Arc<dyn StateMachine>,
    log: Actor<Log>,
    snapshots: Arc<SnapshotStore>,
    events: EventSink,
    writes: Arc<WriteWaiters>,

    applied: Clock,
    applied_config: ClusterConfiguration,
    sessions: Sessions,
    snapshot_index: LogIndex,
    snapshot_interval: u64,

    queries: WaitQueue<Query>,
    inbox: mpsc::UnboundedReceiver<AppMessage>,
    commit_rx: tokio_watch::Receiver<LogIndex>,
    applied_tx: tokio_watch::Sender<LogIndex>,
    ctrl_tx: mpsc::Sender<ControlMessage>,
}

pub struct AppHostInit {
    pub app: Arc<dyn StateMachine>,
    pub log: Actor<Log>,
    pub snapshots: Arc<SnapshotStore>,
    pub events: EventSink,
    pub writes: Arc<WriteWaiters>,
    /// Membership as of the log's first entry.
    pub base_config: ClusterConfiguration,
    pub snapshot_interval: u64,
    pub inbox: mpsc::UnboundedReceiver<AppMessage>,
    pub commit_rx: tokio_watch::Receiver<LogIndex>,
    pub applied_tx: tokio_watch::Sender<LogIndex>,
    pub ctrl_tx: mpsc::Sender<ControlMessage>,
}

impl AppHost {
    /// Restores the state machine from the latest snapshot if any.
    pub async fn new(init: AppHostInit) -> Result<Self> {
        let mut this = Self {
            app: init.app,
            log: init.log,
            snapshots: init.snapshots,
            events: init.events,
            writes: init.writes,
            applied: Clock::default(),
            applied_config: init.base_config,
            sessions: Sessions::new(),
            snapshot_index: 0,
            snapshot_interval: init.snapshot_interval,
            queries: WaitQueue::new(),
            inbox: init.inbox,
            commit_rx: init.commit_rx,
            applied_tx: init.applied_tx,
            ctrl_tx: init.ctrl_tx,
        };

        let prev = this.log.read().await.prev_clock();
        match this.snapshots.latest()? {
            Some(meta) => {
                ensure!(
                    meta.index >= prev.index,
                    Error::StorageFailure(format!(
                        "log starts after {} but the latest snapshot is at {}",
                        prev.index, meta.index
                    ))
                );
                this.restore(meta).await?;
            }
            None => {
                ensure!(
                    prev.index == 0,
                    Error::StorageFailure(format!(
                        "log starts after {} but there is no snapshot",
                        prev.index
                    ))
                );
            }
        }
        Ok(this)
    }

    pub fn applied(&self) -> Clock {
        self.applied
    }

    async fn restore(&mut self, meta: SnapshotMeta) -> Result<()> {
        info!("restore state machine from snapshot at {:?}", meta.clock());
        let st = self.snapshots.open_data(meta.clock()).await?;
        self.app.restore(st).await?;
        self.applied = meta.clock();
        self.applied_config = meta.configuration;
        self.sessions = meta.sessions;
        self.snapshot_index = meta.index;
        self.applied_tx.send_replace(meta.index);
        Ok(())
    }

    async fn restore_latest(&mut self) -> Result<()> {
        let meta = self
            .snapshots
            .latest()?
            .context(Error::StorageFailure("no snapshot to restore".to_owned()))?;
        ensure!(
            meta.index > self.applied.index,
            Error::StorageFailure(format!(
                "entry {} is gone but the latest snapshot is at {}",
                self.applied.index + 1,
                meta.index
            ))
        );
        self.restore(meta).await
    }

    async fn apply(&mut self, e: Entry) -> Result<()> {
        let clock = e.clock();
        match Command::deserialize(&e.payload)? {
            Command::Barrier(term) => {
                debug!("applied barrier of term {term} at {}", e.index);
                self.writes.complete(clock, Ok(Bytes::new()));
            }
            Command::ClusterConfiguration(config) => {
                info!("applied cluster configuration at {}: {config:?}", e.index);
                self.applied_config = config;
                self.writes.complete(clock, Ok(Bytes::new()));
            }
            Command::Execute {
                message,
                client_id,
                sequence,
            } => {
                let result = match client_id {
                    Some(id) => match session::check(&self.sessions, &id, sequence) {
                        session::Dedup::Execute => {
                            let r = self.execute(e.index, message).await;
                            session::record(&mut self.sessions, id, sequence, &r);
                            r
                        }
                        session::Dedup::Replay(r) => {
                            debug!("replay response of client {id} (seq={sequence})");
                            r
                        }
                        session::Dedup::Stale { high_water } => {
                            Err(Error::StateMachine(format!(
                                "sequence {sequence} of client {id} is behind its session window ({high_water})"
                            )))
                        }
                    },
                    None => self.execute(e.index, message).await,
                };
                self.writes.complete(clock, result);
            }
        }
        self.applied = clock;
        Ok(())
    }

    async fn execute(&self, index: LogIndex, message: &[u8]) -> std::result::Result<Bytes, Error> {
        self.app
            .apply(index, message, &self.events)
            .await
            .map_err(|e| Error::StateMachine(format!("{e:#}")))
    }

    /// Applies everything committed.
    async fn advance_application(&mut self) -> Result<()> {
        loop {
            let commit = *self.commit_rx.borrow();
            if self.applied.index >= commit {
                return Ok(());
            }
            let from = self.applied.index + 1;
            let entries = {
                let log = self.log.read().await;
                log.entries(from, APPLY_BATCH)
            };
            let entries = match entries {
                Ok(x) => x,
                Err(e) if matches!(e.downcast_ref::<Error>(), Some(Error::SnapshotRequired)) => {
                    self.restore_latest().await?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if entries.is_empty() {
                return Ok(());
            }
            for e in entries {
                if e.index > commit {
                    break;
                }
                self.apply(e).await?;
            }
            self.applied_tx.send_replace(self.applied.index);
        }
    }

    async fn process_queries(&mut self) {
        let qs = self.queries.pop(self.applied.index);
        let index = self.applied.index;
        let mut futs = vec![];
        for (_, q) in qs {
            let app = self.app.clone();
            futs.push(async move {
                let r = app
                    .read(&q.message)
                    .await
                    .map(|x| (index, x))
                    .map_err(|e| Error::StateMachine(format!("{e:#}")));
                q.completion.complete_with(r);
            });
        }
        futures::future::join_all(futs).await;
    }

    async fn advance_snapshot(&mut self) -> Result<()> {
        if self.snapshot_interval == 0 {
            return Ok(());
        }
        if self.applied.index < self.snapshot_index + self.snapshot_interval {
            return Ok(());
        }
        let meta = SnapshotMeta {
            index: self.applied.index,
            term: self.applied.term,
            configuration: self.applied_config.clone(),
            sessions: self.sessions.clone(),
        };
        let st = self.app.snapshot().await?;
        self.snapshots.save(&meta, st).await?;
        self.snapshot_index = meta.index;
        info!("took snapshot at {:?}", meta.clock());
        self.ctrl_tx
            .send(ControlMessage::SnapshotTaken(meta.clock()))
            .await
            .ok();
        Ok(())
    }

    fn handle(&mut self, msg: AppMessage) {
        match msg {
            AppMessage::Query {
                read_index,
                message,
                completion,
            } => {
                self.queries.push(read_index, Query {
                    message,
                    completion,
                });
            }
        }
    }

    async fn run_once(&mut self) -> Result<()> {
        self.advance_application().await?;
        self.process_queries().await;
        if let Err(e) = self.advance_snapshot().await {
            // The next interval tries again.
            warn!("failed to take snapshot: {e:#}");
        }
        Ok(())
    }

    fn do_loop(mut self) -> ThreadHandle {
        let fut = async move {
            loop {
                if let Err(e) = self.run_once().await {
                    error!("failed to apply committed entries: {e:#}");
                    let e = Error::from_anyhow(e);
                    self.ctrl_tx.send(ControlMessage::AppStopped(e)).await.ok();
                    break;
                }
                tokio::select! {
                    r = self.commit_rx.changed() => {
                        if r.is_err() {
                            break;
                        }
                    }
                    msg = self.inbox.recv() => {
                        match msg {
                            Some(msg) => self.handle(msg),
                            None => break,
                        }
                    }
                }
            }
        };
        let hdl = tokio::spawn(fut).abort_handle();
        ThreadHandle(hdl)
    }
}

pub fn new(host: AppHost) -> ThreadHandle {
    host.do_loop()
}
