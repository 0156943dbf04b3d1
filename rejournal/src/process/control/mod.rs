//! The consensus task.
//!
//! `Control` owns the node state (ballot, role, membership, follower
//! progress). Inbound RPCs, client proposals, RPC results and ticks all come
//! through a single queue and are handled one at a time, so nothing here is
//! shared with another task except the log.

use super::*;

use crate::config::RolePreference;
use crate::storage::{
    BallotStore, Log, MembershipRecord, MembershipStore, SnapshotReceiver, SnapshotStore,
};
use message::{
    AppendEntries, AppendEntriesResponse, InstallSnapshot, InstallSnapshotResponse,
    ReadConsistency, RequestVote, RequestVoteResponse,
};
use rand::Rng;
use std::time::Instant;

pub mod effect;
mod init;
pub use init::ControlInit;
mod replication;
use replication::{InFlight, Replication, SnapshotTransfer};
pub mod thread;
#[cfg(test)]
mod testing;

pub enum ControlMessage {
    RequestVote(RequestVote, Reply<RequestVoteResponse>),
    AppendEntries(AppendEntries, Reply<AppendEntriesResponse>),
    InstallSnapshot(InstallSnapshot, Reply<InstallSnapshotResponse>),
    /// Append an encoded `Command::Execute` and complete once it is applied.
    Propose {
        payload: Bytes,
        completion: AppCompletion,
    },
    Read {
        consistency: ReadConsistency,
        message: Bytes,
        completion: AppCompletion,
    },
    UpdateVoters {
        old_voters: BTreeSet<NodeAddress>,
        new_voters: BTreeSet<NodeAddress>,
        completion: KernCompletion,
    },
    VoteResult {
        term: Term,
        from: NodeAddress,
        result: std::result::Result<RequestVoteResponse, Error>,
    },
    ReplicationResult {
        peer: NodeAddress,
        seq: u64,
        term: Term,
        sent_at: Instant,
        outcome: ReplicationOutcome,
    },
    /// The state machine host saved a snapshot at this clock.
    SnapshotTaken(Clock),
    /// The state machine host failed and stopped applying.
    AppStopped(Error),
}

pub enum ReplicationOutcome {
    Append {
        /// Index of the last entry carried by the request.
        last_index: LogIndex,
        leader_commit: LogIndex,
        result: std::result::Result<AppendEntriesResponse, Error>,
    },
    Snapshot {
        clock: Clock,
        offset: u64,
        len: u64,
        done: bool,
        result: std::result::Result<InstallSnapshotResponse, Error>,
    },
}

/// What the rest of the node can see of the consensus state.
#[derive(Clone, Debug, PartialEq)]
pub struct ControlState {
    pub role: Role,
    pub term: Term,
    pub leader: Option<NodeAddress>,
    pub commit_index: LogIndex,
    pub configuration: ClusterConfiguration,
}

#[derive(Clone, Debug)]
pub struct ControlOptions {
    pub election_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub clock_skew: Duration,
    pub max_replication_retries: u32,
    pub max_replication_bytes: usize,
    pub snapshot_chunk_size: usize,
}

/// A ReadIndex read waiting for a round of heartbeats.
struct PendingRead {
    read_index: LogIndex,
    /// Acks of requests sent at or after this sequence confirm the leadership.
    seq: u64,
    acks: BTreeSet<NodeAddress>,
    message: Bytes,
    completion: AppCompletion,
}

pub struct Control {
    self_id: NodeAddress,
    io: RaftHandle,
    ctrl_tx: mpsc::Sender<ControlMessage>,
    options: ControlOptions,
    role_pref: RolePreference,

    // voter
    role: Role,
    ballot_store: BallotStore,
    ballot: Ballot,
    leader: Option<NodeAddress>,
    election_deadline: Instant,
    last_leader_contact: Option<Instant>,
    votes: BTreeSet<NodeAddress>,
    vote_tasks: Vec<ThreadHandle>,

    // log
    log: Actor<Log>,
    snapshots: Arc<SnapshotStore>,
    snapshot_receiver: Option<SnapshotReceiver>,
    commit_index: LogIndex,
    commit_tx: tokio_watch::Sender<LogIndex>,

    // membership
    membership_store: MembershipStore,
    config: ClusterConfiguration,
    /// Index of the entry `config` came from.
    config_index: LogIndex,
    /// Membership as of the log's compaction anchor.
    fallback_config: ClusterConfiguration,
    /// Configuration entries in the log after the compaction anchor.
    configs: BTreeMap<LogIndex, ClusterConfiguration>,

    // leader
    progress: HashMap<NodeAddress, Replication>,
    next_seq: u64,
    barrier_index: LogIndex,
    became_leader_at: Option<Instant>,
    pending_reads: Vec<PendingRead>,
    membership_waiter: Option<KernCompletion>,
    /// Removed servers that still need to learn the commit of `C_new`.
    retiring: BTreeSet<NodeAddress>,
    c_new_committed_at: Option<Instant>,

    writes: Arc<WriteWaiters>,
    app_tx: mpsc::UnboundedSender<AppMessage>,
    state_tx: tokio_watch::Sender<ControlState>,
}

impl Control {
    pub fn cur_term(&self) -> Term {
        self.ballot.cur_term
    }

    async fn write_ballot(&mut self, b: Ballot) -> Result<()> {
        self.ballot_store.save_ballot(b.clone()).await?;
        self.ballot = b;
        Ok(())
    }

    fn write_role(&mut self, role: Role) {
        if self.role != role {
            info!("role {:?} -> {role:?} (term={})", self.role, self.cur_term());
        }
        self.role = role;
    }

    fn reset_election_deadline(&mut self) {
        let base = self.options.election_timeout;
        let jitter = rand::thread_rng().gen_range(0..=base.as_millis() as u64);
        self.election_deadline = Instant::now() + base + Duration::from_millis(jitter);
    }

    /// A server that may start an election.
    fn can_campaign(&self) -> bool {
        self.role_pref == RolePreference::Voter && self.config.is_voter(&self.self_id)
    }

    fn visible_role(&self) -> Role {
        match self.role {
            Role::Follower if !self.can_campaign() => Role::Observer,
            x => x,
        }
    }

    fn state(&self) -> ControlState {
        ControlState {
            role: self.visible_role(),
            term: self.cur_term(),
            leader: self.leader.clone(),
            commit_index: self.commit_index,
            configuration: self.config.clone(),
        }
    }

    fn publish(&self) {
        let new_state = self.state();
        self.state_tx.send_if_modified(|cur| {
            if *cur != new_state {
                *cur = new_state;
                true
            } else {
                false
            }
        });
    }

    async fn commit(&mut self, index: LogIndex) {
        if index <= self.commit_index {
            return;
        }
        debug!("commit_index {} -> {index}", self.commit_index);
        self.commit_index = index;
        self.log.write().await.set_commit_index(index);
        self.commit_tx.send_replace(index);
    }

    /// Persists the membership along with the configuration entries,
    /// which are then known to be complete up to the end of the log.
    async fn save_membership(&self) -> Result<()> {
        let covered = self.log.read().await.last_clock();
        self.membership_store.save(&MembershipRecord {
            latest: self.config.clone(),
            entries: self.configs.clone(),
            covered,
        })
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Appends an entry of the current term and returns its index.
    async fn append_new_entry(&mut self, payload: Bytes) -> Result<LogIndex> {
        let term = self.cur_term();
        let mut log = self.log.write().await;
        let index = log.last_index() + 1;
        log.append(vec![Entry {
            index,
            term,
            payload,
        }])
        .await?;
        Ok(index)
    }

    async fn replicate_all(&mut self, heartbeat: bool) -> Result<()> {
        let peers: Vec<NodeAddress> = self.progress.keys().cloned().collect();
        for peer in peers {
            effect::advance_replication::Effect { ctrl: self }
                .exec(peer, heartbeat)
                .await?;
        }
        Ok(())
    }

    /// A leader whose quorum answered within the lease and whose barrier is committed.
    fn lease_is_valid(&self, now: Instant) -> bool {
        if self.role != Role::Leader || self.commit_index < self.barrier_index {
            return false;
        }
        let lease = self
            .options
            .election_timeout
            .saturating_sub(self.options.clock_skew);
        self.config.has_quorum(|id| {
            if *id == self.self_id {
                return true;
            }
            self.progress
                .get(id)
                .and_then(|p| p.last_ack)
                .is_some_and(|t| now.duration_since(t) < lease)
        })
    }

    async fn handle(&mut self, msg: ControlMessage) -> Result<()> {
        match msg {
            ControlMessage::RequestVote(req, reply) => {
                let r = effect::receive_vote_request::Effect { ctrl: self }
                    .exec(req)
                    .await;
                respond(reply, r)
            }
            ControlMessage::AppendEntries(req, reply) => {
                let r = effect::receive_append_entries::Effect { ctrl: self }
                    .exec(req)
                    .await;
                respond(reply, r)
            }
            ControlMessage::InstallSnapshot(req, reply) => {
                let r = effect::receive_install_snapshot::Effect { ctrl: self }
                    .exec(req)
                    .await;
                respond(reply, r)
            }
            ControlMessage::Propose {
                payload,
                completion,
            } => {
                effect::queue_new_entry::Effect { ctrl: self }
                    .exec(payload, completion)
                    .await
            }
            ControlMessage::Read {
                consistency,
                message,
                completion,
            } => {
                effect::issue_read_index::Effect { ctrl: self }
                    .exec(consistency, message, completion)
                    .await
            }
            ControlMessage::UpdateVoters {
                old_voters,
                new_voters,
                completion,
            } => {
                effect::change_membership::Effect { ctrl: self }
                    .exec(old_voters, new_voters, completion)
                    .await
            }
            ControlMessage::VoteResult { term, from, result } => {
                effect::receive_vote_response::Effect { ctrl: self }
                    .exec(term, from, result)
                    .await
            }
            ControlMessage::ReplicationResult {
                peer,
                seq,
                term,
                sent_at,
                outcome,
            } => {
                effect::receive_replication_result::Effect { ctrl: self }
                    .exec(peer, seq, term, sent_at, outcome)
                    .await
            }
            ControlMessage::SnapshotTaken(clock) => {
                effect::compact_log::Effect { ctrl: self }.exec(clock).await
            }
            ControlMessage::AppStopped(e) => {
                // Committed entries would never be applied.
                error!("state machine host stopped: {e}");
                bail!(Error::NodeStopped)
            }
        }
    }

    async fn on_tick(&mut self) -> Result<()> {
        let now = Instant::now();
        if self.role == Role::Leader {
            let stepped_down = effect::check_quorum::Effect { ctrl: self }.exec(now).await?;
            if stepped_down {
                return Ok(());
            }
            // Entries appended without any ack to wait for (a single voter) commit here.
            effect::advance_commit::Effect { ctrl: self }.exec().await?;
            if self.role != Role::Leader {
                return Ok(());
            }
            self.replicate_all(false).await?;
        } else if now >= self.election_deadline {
            self.reset_election_deadline();
            if self.can_campaign() {
                effect::try_promote::Effect { ctrl: self }.exec().await?;
            }
        }
        Ok(())
    }

    /// Fails everything that waits for this node to be a working leader.
    fn fail_waiters(&mut self, e: Error) {
        for r in self.pending_reads.drain(..) {
            r.completion.complete_with(Err(e.clone()));
        }
        if let Some(w) = self.membership_waiter.take() {
            w.fail(e.clone());
        }
        self.writes.fail_from(0, e);
    }
}

/// Sends the result of an RPC back to the caller.
/// Only a storage failure is passed on to the loop.
fn respond<T>(reply: Reply<T>, r: Result<T>) -> Result<()> {
    match r {
        Ok(x) => {
            reply.send(Ok(x)).ok();
            Ok(())
        }
        Err(e) => {
            let e = Error::from_anyhow(e);
            reply.send(Err(e.clone())).ok();
            match e {
                Error::StorageFailure(_) => Err(e.into()),
                _ => Ok(()),
            }
        }
    }
}
