use super::*;

pub struct Effect<'a> {
    pub ctrl: &'a mut Control,
}

/// What to do after the progress of a follower is updated.
enum Next {
    Nothing,
    StepDown(Term),
    /// An ack: commit may advance and more entries may be sent.
    Acked,
    /// Retry right away from a new `next_index`.
    Retry,
}

impl Effect<'_> {
    pub async fn exec(
        mut self,
        follower_id: NodeAddress,
        seq: u64,
        term: Term,
        sent_at: Instant,
        outcome: ReplicationOutcome,
    ) -> Result<()> {
        // The answer to a request sent in an older term.
        if self.ctrl.role != Role::Leader || term != self.ctrl.cur_term() {
            return Ok(());
        }
        match self.ctrl.progress.get_mut(&follower_id) {
            Some(p) if p.in_flight.as_ref().is_some_and(|x| x.seq == seq) => {
                p.in_flight = None;
            }
            _ => return Ok(()),
        }

        let next = match outcome {
            ReplicationOutcome::Append {
                last_index,
                leader_commit,
                result,
            } => {
                self.on_append(&follower_id, seq, sent_at, last_index, leader_commit, result)
                    .await
            }
            ReplicationOutcome::Snapshot {
                clock,
                offset,
                len,
                done,
                result,
            } => self.on_snapshot(&follower_id, seq, sent_at, clock, offset, len, done, result),
        };

        match next {
            Next::Nothing => Ok(()),
            Next::StepDown(term) => {
                effect::step_down::Effect { ctrl: self.ctrl }
                    .exec(term, None)
                    .await
            }
            Next::Acked => {
                self.ctrl.ack_reads(&follower_id, seq);
                self.ctrl.release_reads();
                effect::advance_commit::Effect {
                    ctrl: &mut *self.ctrl,
                }
                .exec()
                .await?;
                if self.ctrl.role != Role::Leader {
                    return Ok(());
                }
                // A read may be waiting for a request sent after this one.
                let confirm = self.ctrl.needs_confirmation(&follower_id);
                effect::advance_replication::Effect { ctrl: self.ctrl }
                    .exec(follower_id, confirm)
                    .await
            }
            Next::Retry => {
                effect::advance_replication::Effect { ctrl: self.ctrl }
                    .exec(follower_id, true)
                    .await
            }
        }
    }

    async fn on_append(
        &mut self,
        follower_id: &NodeAddress,
        seq: u64,
        sent_at: Instant,
        last_index: LogIndex,
        leader_commit: LogIndex,
        result: std::result::Result<AppendEntriesResponse, Error>,
    ) -> Next {
        let cur_term = self.ctrl.cur_term();
        match result {
            Ok(resp) if resp.term > cur_term => Next::StepDown(resp.term),
            Ok(resp) => {
                let Some(p) = self.ctrl.progress.get_mut(follower_id) else {
                    return Next::Nothing;
                };
                let match_index = resp.match_index.min(last_index);
                p.match_index = p.match_index.max(match_index);
                p.next_index = p.match_index + 1;
                p.reset_backoff();
                p.last_ack = Some(sent_at);
                p.acked_seq = seq;
                p.acked_commit = p.acked_commit.max(leader_commit);
                Next::Acked
            }
            Err(Error::TermStale(t)) if t > cur_term => Next::StepDown(t),
            Err(Error::LogMismatch {
                hint_term,
                hint_index,
            }) => {
                let candidate = if hint_term == 0 {
                    hint_index
                } else {
                    // Skip the whole conflicting term.
                    let log = self.ctrl.log.read().await;
                    match log.last_index_of_term(hint_term) {
                        Some(i) => i + 1,
                        None => hint_index,
                    }
                };
                let Some(p) = self.ctrl.progress.get_mut(follower_id) else {
                    return Next::Nothing;
                };
                let old_next = p.next_index;
                p.next_index = candidate.min(old_next.saturating_sub(1)).max(1);
                p.reset_backoff();
                p.last_ack = Some(sent_at);
                p.acked_seq = seq;
                debug!(
                    "log mismatch on {follower_id} (hint={hint_index}@{hint_term}). next_index {old_next} -> {}",
                    p.next_index
                );
                self.ctrl.ack_reads(follower_id, seq);
                self.ctrl.release_reads();
                Next::Retry
            }
            Err(e) => {
                if e.is_transient() {
                    debug!("replication to {follower_id} failed: {e}");
                } else {
                    warn!("replication to {follower_id} failed: {e}");
                }
                self.ctrl.backoff(follower_id);
                Next::Nothing
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn on_snapshot(
        &mut self,
        follower_id: &NodeAddress,
        seq: u64,
        sent_at: Instant,
        clock: Clock,
        offset: u64,
        len: u64,
        done: bool,
        result: std::result::Result<InstallSnapshotResponse, Error>,
    ) -> Next {
        let cur_term = self.ctrl.cur_term();
        match result {
            Ok(resp) if resp.term > cur_term => Next::StepDown(resp.term),
            Ok(_) => {
                let Some(p) = self.ctrl.progress.get_mut(follower_id) else {
                    return Next::Nothing;
                };
                p.reset_backoff();
                p.last_ack = Some(sent_at);
                p.acked_seq = seq;
                if done {
                    info!("snapshot at {clock:?} is installed on {follower_id}");
                    p.snapshot = None;
                    p.match_index = p.match_index.max(clock.index);
                    p.next_index = p.match_index + 1;
                } else {
                    p.snapshot = Some(SnapshotTransfer {
                        clock,
                        offset: offset + len,
                    });
                }
                Next::Acked
            }
            Err(Error::TermStale(t)) if t > cur_term => Next::StepDown(t),
            Err(e) if e.is_transient() => {
                debug!("sending snapshot to {follower_id} failed: {e}");
                self.ctrl.backoff(follower_id);
                Next::Nothing
            }
            Err(e) => {
                warn!("sending snapshot to {follower_id} failed: {e}. start over");
                if let Some(p) = self.ctrl.progress.get_mut(follower_id) {
                    p.snapshot = None;
                }
                self.ctrl.backoff(follower_id);
                Next::Nothing
            }
        }
    }
}

impl Control {
    fn backoff(&mut self, follower_id: &NodeAddress) {
        let hb = self.options.heartbeat_interval;
        let base = std::cmp::max(hb / 10, Duration::from_millis(5));
        let give_up = self.options.election_timeout;
        let max_retries = self.options.max_replication_retries;
        if let Some(p) = self.progress.get_mut(follower_id) {
            p.backoff(Instant::now(), base, hb, give_up, max_retries);
        }
    }
}
