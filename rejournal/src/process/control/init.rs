use super::*;

pub struct ControlInit {
    pub io: RaftHandle,
    pub options: ControlOptions,
    pub role_pref: RolePreference,
    pub ballot_store: BallotStore,
    pub log: Actor<Log>,
    pub snapshots: Arc<SnapshotStore>,
    pub membership_store: MembershipStore,
    /// Used only when nothing is persisted.
    pub initial_config: ClusterConfiguration,
    pub writes: Arc<WriteWaiters>,
    pub app_tx: mpsc::UnboundedSender<AppMessage>,
    pub ctrl_tx: mpsc::Sender<ControlMessage>,
    pub commit_tx: tokio_watch::Sender<LogIndex>,
    pub state_tx: tokio_watch::Sender<ControlState>,
}

impl Control {
    /// Restores the ballot and the membership from the storage.
    /// The term is raised to the last term in the log if the ballot is behind it.
    ///
    /// The membership is taken from the last configuration entry in the log,
    /// then the latest snapshot, then the persisted record and finally the
    /// initial configuration.
    pub async fn new(init: ControlInit) -> Result<Self> {
        let mut ballot = init.ballot_store.load_ballot().await?;
        let (prev, commit_index, last_term) = {
            let log = init.log.read().await;
            (log.prev_clock(), log.commit_index(), log.last_term())
        };
        // The ballot may have been lost. The term never falls behind the log.
        if ballot.cur_term < last_term {
            warn!(
                "ballot term {} is behind the log term {last_term}. raise it",
                ballot.cur_term
            );
            ballot = Ballot {
                cur_term: last_term,
                voted_for: None,
            };
            init.ballot_store.save_ballot(ballot.clone()).await?;
        }

        let record = init.membership_store.load()?;
        let configs = {
            let log = init.log.read().await;
            scan_configs(&log, record.as_ref())?
        };
        let fallback_config = match init.snapshots.latest()? {
            Some(meta) if meta.index >= prev.index => meta.configuration,
            _ => match record {
                Some(record) => record.latest,
                None => init.initial_config,
            },
        };

        let self_id = init.io.self_address.clone();
        let mut this = Self {
            self_id,
            io: init.io,
            ctrl_tx: init.ctrl_tx,
            options: init.options,
            role_pref: init.role_pref,

            role: Role::Follower,
            ballot_store: init.ballot_store,
            ballot,
            leader: None,
            election_deadline: Instant::now(),
            last_leader_contact: None,
            votes: BTreeSet::new(),
            vote_tasks: vec![],

            log: init.log,
            snapshots: init.snapshots,
            snapshot_receiver: None,
            commit_index,
            commit_tx: init.commit_tx,

            membership_store: init.membership_store,
            config: ClusterConfiguration::default(),
            config_index: 0,
            fallback_config,
            configs,

            progress: HashMap::new(),
            next_seq: 0,
            barrier_index: 0,
            became_leader_at: None,
            pending_reads: vec![],
            membership_waiter: None,
            retiring: BTreeSet::new(),
            c_new_committed_at: None,

            writes: init.writes,
            app_tx: init.app_tx,
            state_tx: init.state_tx,
        };

        effect::restore_membership::Effect { ctrl: &mut this }
            .exec()
            .await?;
        this.reset_election_deadline();
        this.commit_tx.send_replace(commit_index);
        this.publish();

        info!(
            "restored consensus state (term={}, voted_for={:?}, commit_index={commit_index}, membership={:?})",
            this.ballot.cur_term, this.ballot.voted_for, this.config,
        );
        Ok(this)
    }
}

/// Configuration entries of the log after its compaction anchor.
///
/// The entries in `record` are trusted up to its `covered` position as long
/// as the log still holds the same entry there. Only the rest is read.
fn scan_configs(
    log: &Log,
    record: Option<&MembershipRecord>,
) -> Result<BTreeMap<LogIndex, ClusterConfiguration>> {
    let anchor = log.prev_clock().index;
    let (mut configs, from) = match record {
        Some(r) if log.term_at(r.covered.index) == Some(r.covered.term) => {
            let configs = r
                .entries
                .range(anchor + 1..)
                .take_while(|(i, _)| **i <= r.covered.index)
                .map(|(i, c)| (*i, c.clone()))
                .collect();
            (configs, std::cmp::max(r.covered.index, anchor) + 1)
        }
        _ => (BTreeMap::new(), anchor + 1),
    };
    let last_index = log.last_index();
    if from <= last_index {
        debug!("scan configuration entries in [{from}, {last_index}]");
    }
    for i in from..=last_index {
        let e = log.entry(i)?;
        if let Command::ClusterConfiguration(config) = Command::deserialize(&e.payload)? {
            configs.insert(i, config);
        }
    }
    Ok(configs)
}
