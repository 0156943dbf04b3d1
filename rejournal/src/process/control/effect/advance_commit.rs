use super::*;

pub struct Effect<'a> {
    pub ctrl: &'a mut Control,
}

impl Effect<'_> {
    /// Advance `commit_index` to the greatest index matched by a quorum,
    /// then move the membership change forward if it was committed.
    pub async fn exec(mut self) -> Result<()> {
        if self.ctrl.role != Role::Leader {
            return Ok(());
        }

        let old_commit_index = self.ctrl.commit_index;
        let new_commit_index = {
            let log = self.ctrl.log.read().await;
            let last_index = log.last_index();
            let self_id = &self.ctrl.self_id;
            let progress = &self.ctrl.progress;
            let quorum_index = self.ctrl.config.quorum_index(|id| {
                if id == self_id {
                    last_index
                } else {
                    progress.get(id).map_or(0, |p| p.match_index)
                }
            });
            // Entries of an older term are only committed through one of the current term.
            if log.term_at(quorum_index) == Some(self.ctrl.cur_term()) {
                quorum_index
            } else {
                old_commit_index
            }
        };
        self.ctrl.commit(new_commit_index).await;

        let config_index = self.ctrl.config_index;
        if config_index <= self.ctrl.commit_index {
            if self.ctrl.config.is_joint() {
                self.leave_joint().await?;
            } else if config_index > old_commit_index {
                info!("membership at {config_index} is committed: {:?}", self.ctrl.config);
                if let Some(w) = self.ctrl.membership_waiter.take() {
                    w.complete();
                }
                let members = self.ctrl.config.members();
                self.ctrl.retiring = self
                    .ctrl
                    .progress
                    .keys()
                    .filter(|x| !members.contains(*x))
                    .cloned()
                    .collect();
                self.ctrl.c_new_committed_at = Some(Instant::now());
            }
        }

        self.retire().await
    }

    /// `C_old,new` is committed: append `C_new`.
    async fn leave_joint(&mut self) -> Result<()> {
        let c_new = self.ctrl.config.leave_joint();
        let payload = Command::ClusterConfiguration(c_new.clone()).serialize()?;
        let index = self.ctrl.append_new_entry(payload).await?;
        info!("joint membership is committed. C_new is queued at {index}");
        effect::set_membership::Effect {
            ctrl: &mut *self.ctrl,
        }
        .exec(c_new, index)
        .await?;
        self.ctrl.replicate_all(true).await
    }

    /// Stop replicating to the removed servers that have learned `C_new` is committed.
    /// A leader removed from the voters steps down afterwards.
    async fn retire(&mut self) -> Result<()> {
        let Some(since) = self.ctrl.c_new_committed_at else {
            return Ok(());
        };
        let config_index = self.ctrl.config_index;
        let timed_out = since.elapsed() >= self.ctrl.options.election_timeout;

        let done: Vec<NodeAddress> = self
            .ctrl
            .retiring
            .iter()
            .filter(|id| {
                timed_out
                    || self
                        .ctrl
                        .progress
                        .get(*id)
                        .map_or(true, |p| p.acked_commit >= config_index)
            })
            .cloned()
            .collect();
        for id in done {
            info!("{id} is removed from the cluster");
            self.ctrl.retiring.remove(&id);
            self.ctrl.progress.remove(&id);
        }

        if self.ctrl.retiring.is_empty() && !self.ctrl.config.is_voter(&self.ctrl.self_id) {
            info!("this server is not a voter anymore. step down");
            let term = self.ctrl.cur_term();
            effect::step_down::Effect {
                ctrl: &mut *self.ctrl,
            }
            .exec(term, None)
            .await?;
        }
        Ok(())
    }
}
