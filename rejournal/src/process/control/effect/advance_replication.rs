use super::*;

pub struct Effect<'a> {
    pub ctrl: &'a mut Control,
}

impl Effect<'_> {
    /// Send the next request to `follower_id` if it is idle and either behind
    /// or due a heartbeat. `heartbeat` forces an empty request.
    pub async fn exec(self, follower_id: NodeAddress, heartbeat: bool) -> Result<()> {
        let now = Instant::now();
        let interval = self.ctrl.options.heartbeat_interval;
        let Some(progress) = self.ctrl.progress.get(&follower_id) else {
            return Ok(());
        };
        if !progress.is_idle(now) {
            return Ok(());
        }
        let next_index = progress.next_index;
        let heartbeat_due = progress.heartbeat_due(now, interval);

        let (anchor, last_index) = {
            let log = self.ctrl.log.read().await;
            (log.prev_clock(), log.last_index())
        };
        let behind = next_index <= last_index;
        if !behind && !heartbeat && !heartbeat_due {
            return Ok(());
        }

        // The entries to be sent were compacted away.
        if next_index <= anchor.index {
            return self.send_snapshot(follower_id).await;
        }
        self.send_entries(follower_id, next_index).await
    }

    async fn send_entries(self, follower_id: NodeAddress, next_index: LogIndex) -> Result<()> {
        let term = self.ctrl.cur_term();
        let leader_commit = self.ctrl.commit_index;
        let req = {
            let log = self.ctrl.log.read().await;
            let prev_log_index = next_index - 1;
            let prev_log_term = log
                .term_at(prev_log_index)
                .context(Error::EntryNotFound(prev_log_index))?;
            let entries = if next_index <= log.last_index() {
                log.entries(next_index, self.ctrl.options.max_replication_bytes)?
            } else {
                vec![]
            };
            AppendEntries {
                term,
                leader: self.ctrl.self_id.clone(),
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            }
        };
        let last_index = req.prev_log_index + req.entries.len() as u64;
        if !req.entries.is_empty() {
            debug!(
                "replicate [{}, {last_index}] to {follower_id}",
                req.prev_log_index + 1
            );
        }

        let seq = self.ctrl.next_seq();
        let sent_at = Instant::now();
        let conn = self.ctrl.io.connect(&follower_id);
        let tx = self.ctrl.ctrl_tx.clone();
        let peer = follower_id.clone();
        let fut = async move {
            let result = conn.append_entries(req).await;
            let msg = ControlMessage::ReplicationResult {
                peer,
                seq,
                term,
                sent_at,
                outcome: ReplicationOutcome::Append {
                    last_index,
                    leader_commit,
                    result,
                },
            };
            tx.send(msg).await.ok();
        };
        self.mark_sent(&follower_id, seq, sent_at, fut);
        Ok(())
    }

    async fn send_snapshot(self, follower_id: NodeAddress) -> Result<()> {
        let Some(progress) = self.ctrl.progress.get(&follower_id) else {
            return Ok(());
        };
        let (transfer, meta) = match progress.snapshot {
            Some(t) if t.offset > 0 => (t, Bytes::new()),
            _ => {
                let meta = self.ctrl.snapshots.latest()?.context(Error::StorageFailure(
                    "log is compacted but there is no snapshot".into(),
                ))?;
                info!("start sending snapshot at {:?} to {follower_id}", meta.clock());
                let t = SnapshotTransfer {
                    clock: meta.clock(),
                    offset: 0,
                };
                (t, meta.to_bytes()?)
            }
        };

        let chunk = self
            .ctrl
            .snapshots
            .read_chunk(
                transfer.clock,
                transfer.offset,
                self.ctrl.options.snapshot_chunk_size,
            )
            .await;
        let (data, done) = match chunk {
            Ok(x) => x,
            Err(e) => {
                // Replaced by a newer snapshot. Start over with it.
                warn!("restart snapshot transfer to {follower_id}: {e:#}");
                if let Some(p) = self.ctrl.progress.get_mut(&follower_id) {
                    p.snapshot = None;
                }
                return Ok(());
            }
        };

        let term = self.ctrl.cur_term();
        let len = data.len() as u64;
        let req = InstallSnapshot {
            term,
            leader: self.ctrl.self_id.clone(),
            last_included_index: transfer.clock.index,
            last_included_term: transfer.clock.term,
            offset: transfer.offset,
            meta,
            data,
            done,
        };

        let seq = self.ctrl.next_seq();
        let sent_at = Instant::now();
        let conn = self.ctrl.io.connect(&follower_id);
        let tx = self.ctrl.ctrl_tx.clone();
        let peer = follower_id.clone();
        let fut = async move {
            let result = conn.install_snapshot(req).await;
            let msg = ControlMessage::ReplicationResult {
                peer,
                seq,
                term,
                sent_at,
                outcome: ReplicationOutcome::Snapshot {
                    clock: transfer.clock,
                    offset: transfer.offset,
                    len,
                    done,
                    result,
                },
            };
            tx.send(msg).await.ok();
        };
        if let Some(p) = self.ctrl.progress.get_mut(&follower_id) {
            p.snapshot = Some(transfer);
        }
        self.mark_sent(&follower_id, seq, sent_at, fut);
        Ok(())
    }

    fn mark_sent(
        self,
        follower_id: &NodeAddress,
        seq: u64,
        sent_at: Instant,
        fut: impl std::future::Future<Output = ()> + Send + 'static,
    ) {
        let hdl = tokio::spawn(fut).abort_handle();
        if let Some(p) = self.ctrl.progress.get_mut(follower_id) {
            p.in_flight = Some(InFlight {
                seq,
                _handle: ThreadHandle(hdl),
            });
            p.last_sent = Some(sent_at);
        }
    }
}
