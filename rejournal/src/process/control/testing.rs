//! A `Control` over a temporary directory, driven by calling effects directly.

use super::*;

use crate::storage::{LogOptions, RaftStorage};
use crate::transport::{ConnectionPool, TransportOptions};
use std::path::Path;

pub fn addr(name: &str) -> NodeAddress {
    format!("http://{name}:7000").parse().unwrap()
}

/// An entry the apply path can decode.
pub fn barrier(index: LogIndex, term: Term) -> Entry {
    Entry {
        index,
        term,
        payload: Command::Barrier(term).serialize().unwrap(),
    }
}

pub fn config_entry(index: LogIndex, term: Term, voters: &[&str]) -> Entry {
    let config = ClusterConfiguration::new(voters.iter().map(|x| addr(x)), []);
    Entry {
        index,
        term,
        payload: Command::ClusterConfiguration(config).serialize().unwrap(),
    }
}

pub struct Harness {
    pub ctrl: Control,
    pub ctrl_rx: mpsc::Receiver<ControlMessage>,
    pub app_rx: mpsc::UnboundedReceiver<AppMessage>,
    pub writes: Arc<WriteWaiters>,
}

impl Harness {
    /// Opens the storage in `dir` as server `self_id` of `voters`.
    pub async fn open(dir: &Path, self_id: &str, voters: &[&str]) -> Result<Self> {
        let storage = RaftStorage::open(dir, LogOptions::default())?;
        let log = Arc::new(RwLock::new(storage.log));
        let commit_index = log.read().await.commit_index();
        let initial_config = ClusterConfiguration::new(voters.iter().map(|x| addr(x)), []);
        let writes = Arc::new(WriteWaiters::default());

        let (ctrl_tx, ctrl_rx) = mpsc::channel(1024);
        let (app_tx, app_rx) = mpsc::unbounded_channel();
        let (commit_tx, _) = tokio_watch::channel(commit_index);
        let (state_tx, _) = tokio_watch::channel(ControlState {
            role: Role::Follower,
            term: 0,
            leader: None,
            commit_index,
            configuration: initial_config.clone(),
        });

        let ctrl = Control::new(ControlInit {
            io: RaftHandle::new(addr(self_id), ConnectionPool::new(TransportOptions::default())),
            options: ControlOptions {
                election_timeout: Duration::from_secs(1),
                heartbeat_interval: Duration::from_millis(100),
                clock_skew: Duration::from_millis(10),
                max_replication_retries: 3,
                max_replication_bytes: 1 << 20,
                snapshot_chunk_size: 1 << 10,
            },
            role_pref: RolePreference::Voter,
            ballot_store: storage.ballot,
            log,
            snapshots: storage.snapshots,
            membership_store: storage.membership,
            initial_config,
            writes: writes.clone(),
            app_tx,
            ctrl_tx,
            commit_tx,
            state_tx,
        })
        .await?;

        Ok(Self {
            ctrl,
            ctrl_rx,
            app_rx,
            writes,
        })
    }

    /// Appends `entries` as sent by `leader` at `term`.
    pub async fn replicate(
        &mut self,
        leader: &str,
        term: Term,
        prev: (LogIndex, Term),
        entries: Vec<Entry>,
        leader_commit: LogIndex,
    ) -> Result<AppendEntriesResponse> {
        effect::receive_append_entries::Effect {
            ctrl: &mut self.ctrl,
        }
        .exec(AppendEntries {
            term,
            leader: addr(leader),
            prev_log_index: prev.0,
            prev_log_term: prev.1,
            entries,
            leader_commit,
        })
        .await
    }

    pub async fn request_vote(
        &mut self,
        candidate: &str,
        term: Term,
        last: (LogIndex, Term),
    ) -> Result<RequestVoteResponse> {
        effect::receive_vote_request::Effect {
            ctrl: &mut self.ctrl,
        }
        .exec(RequestVote {
            term,
            candidate: addr(candidate),
            last_log_index: last.0,
            last_log_term: last.1,
        })
        .await
    }

    /// Turns this server into the leader of `term` without an election.
    pub async fn lead(&mut self, term: Term) -> Result<()> {
        self.ctrl
            .write_ballot(Ballot {
                cur_term: term,
                voted_for: Some(self.ctrl.self_id.clone()),
            })
            .await?;
        self.ctrl.role = Role::Leader;
        self.ctrl.leader = Some(self.ctrl.self_id.clone());
        self.ctrl.became_leader_at = Some(Instant::now());
        let next_index = self.ctrl.log.read().await.last_index() + 1;
        let self_id = self.ctrl.self_id.clone();
        self.ctrl.progress = self
            .ctrl
            .config
            .members()
            .into_iter()
            .filter(|x| *x != self_id)
            .map(|x| (x, Replication::new(next_index)))
            .collect();
        Ok(())
    }

    pub fn set_match_index(&mut self, peer: &str, index: LogIndex) {
        if let Some(p) = self.ctrl.progress.get_mut(&addr(peer)) {
            p.match_index = index;
            p.next_index = index + 1;
        }
    }

    pub async fn last_clock(&self) -> Clock {
        self.ctrl.log.read().await.last_clock()
    }
}
