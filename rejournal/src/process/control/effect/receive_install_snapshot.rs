use super::*;

pub struct Effect<'a> {
    pub ctrl: &'a mut Control,
}

impl Effect<'_> {
    pub async fn exec(mut self, req: InstallSnapshot) -> Result<InstallSnapshotResponse> {
        effect::accept_leader::Effect {
            ctrl: &mut *self.ctrl,
        }
        .exec(req.term, &req.leader)
        .await?;

        let clock = Clock {
            term: req.last_included_term,
            index: req.last_included_index,
        };

        if req.offset == 0 {
            let meta: SnapshotMeta = bincode::deserialize(&req.meta)
                .map_err(|e| Error::Protocol(format!("bad snapshot meta: {e}")))?;
            ensure!(
                meta.clock() == clock,
                Error::Protocol(format!(
                    "snapshot meta is at {:?} but the chunk is for {clock:?}",
                    meta.clock()
                ))
            );
            info!("start receiving snapshot at {clock:?} from {}", req.leader);
            // Dropping the previous receiver discards its partial data.
            self.ctrl.snapshot_receiver = Some(self.ctrl.snapshots.receiver(meta).await?);
        }

        let rx = match &mut self.ctrl.snapshot_receiver {
            Some(rx) if rx.meta().clock() == clock => rx,
            _ => bail!(Error::Protocol(format!(
                "snapshot chunk at offset {} without a transfer",
                req.offset
            ))),
        };
        rx.write(req.offset, &req.data).await?;

        if req.done {
            let rx = self
                .ctrl
                .snapshot_receiver
                .take()
                .context(Error::Internal("snapshot receiver disappeared".into()))?;
            let meta = rx.finish(&self.ctrl.snapshots).await?;
            info!("received snapshot at {clock:?}");
            self.install(meta).await?;
        }

        Ok(InstallSnapshotResponse {
            term: self.ctrl.cur_term(),
        })
    }

    /// Replaces the log prefix with the snapshot. The state machine host
    /// restores itself once it finds the entries it needs are gone.
    async fn install(&mut self, meta: SnapshotMeta) -> Result<()> {
        if meta.index <= self.ctrl.commit_index {
            info!(
                "snapshot at {:?} is behind commit_index {}",
                meta.clock(),
                self.ctrl.commit_index
            );
            return Ok(());
        }

        let reset = {
            let mut log = self.ctrl.log.write().await;
            let reset = if log.term_at(meta.index) == Some(meta.term) {
                // The entries after the snapshot are kept.
                log.compact(meta.index + 1)?;
                false
            } else {
                log.reset(meta.clock())?;
                true
            };
            log.set_commit_index(meta.index);
            reset
        };

        self.ctrl.fallback_config = meta.configuration.clone();
        if reset {
            self.ctrl.configs.clear();
        } else {
            self.ctrl.configs = self.ctrl.configs.split_off(&(meta.index + 1));
        }
        effect::restore_membership::Effect {
            ctrl: &mut *self.ctrl,
        }
        .exec()
        .await?;
        self.ctrl.commit(meta.index).await;
        Ok(())
    }
}
