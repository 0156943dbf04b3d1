use super::*;

pub struct Effect<'a> {
    pub ctrl: &'a mut Control,
}

impl Effect<'_> {
    /// Decide the index a linearizable read is served at and hand it to the
    /// state machine host once the leadership is confirmed.
    pub async fn exec(
        self,
        consistency: ReadConsistency,
        message: Bytes,
        completion: AppCompletion,
    ) -> Result<()> {
        if self.ctrl.role != Role::Leader {
            completion.complete_with(Err(Error::NotLeader {
                leader: self.ctrl.leader.clone(),
            }));
            return Ok(());
        }

        // Waiting for the barrier makes every entry committed before this term visible.
        let read_index = std::cmp::max(self.ctrl.commit_index, self.ctrl.barrier_index);

        if consistency == ReadConsistency::Lease && self.ctrl.lease_is_valid(Instant::now()) {
            self.ctrl
                .app_tx
                .send(AppMessage::Query {
                    read_index,
                    message,
                    completion,
                })
                .ok();
            return Ok(());
        }

        let seq = self.ctrl.next_seq + 1;
        self.ctrl.pending_reads.push(PendingRead {
            read_index,
            seq,
            acks: BTreeSet::from([self.ctrl.self_id.clone()]),
            message,
            completion,
        });
        self.ctrl.release_reads();
        if self.ctrl.pending_reads.is_empty() {
            return Ok(());
        }
        self.ctrl.replicate_all(true).await
    }
}

impl Control {
    /// `follower_id` answered the request of `seq`.
    pub(super) fn ack_reads(&mut self, follower_id: &NodeAddress, seq: u64) {
        for r in &mut self.pending_reads {
            if seq >= r.seq {
                r.acks.insert(follower_id.clone());
            }
        }
    }

    /// Hands the reads confirmed by a quorum to the state machine host.
    pub(super) fn release_reads(&mut self) {
        let config = &self.config;
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_reads)
            .into_iter()
            .partition(|r| config.has_quorum(|x| r.acks.contains(x)));
        self.pending_reads = waiting;
        for r in ready {
            self.app_tx
                .send(AppMessage::Query {
                    read_index: r.read_index,
                    message: r.message,
                    completion: r.completion,
                })
                .ok();
        }
    }

    /// Some read still waits for an ack from `follower_id` to a newer request.
    pub(super) fn needs_confirmation(&self, follower_id: &NodeAddress) -> bool {
        self.pending_reads
            .iter()
            .any(|r| !r.acks.contains(follower_id))
    }
}
