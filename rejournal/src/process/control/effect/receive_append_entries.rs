use super::*;

pub struct Effect<'a> {
    pub ctrl: &'a mut Control,
}

impl Effect<'_> {
    pub async fn exec(self, req: AppendEntries) -> Result<AppendEntriesResponse> {
        effect::accept_leader::Effect {
            ctrl: &mut *self.ctrl,
        }
        .exec(req.term, &req.leader)
        .await?;

        let n = req.entries.len() as u64;
        let last_new_index = req.prev_log_index + n;

        let (truncated, configs) = {
            let log = self.ctrl.log.clone();
            let mut log = log.write().await;

            let mut prev_index = req.prev_log_index;
            let mut prev_term = req.prev_log_term;
            let mut entries = req.entries;

            // The prefix covered by the snapshot is committed and identical to the leader's.
            let anchor = log.prev_clock();
            if prev_index < anchor.index {
                entries.retain(|e| e.index > anchor.index);
                prev_index = anchor.index;
                prev_term = anchor.term;
            }

            let last_index = log.last_index();
            if prev_index > last_index {
                bail!(Error::LogMismatch {
                    hint_term: 0,
                    hint_index: last_index + 1,
                });
            }
            match log.term_at(prev_index) {
                Some(t) if t == prev_term => {}
                Some(t) => {
                    let first = log.first_index_of_term(t, prev_index);
                    bail!(Error::LogMismatch {
                        hint_term: t,
                        hint_index: first,
                    });
                }
                None => bail!(Error::EntryNotFound(prev_index)),
            }

            // Skip the entries already in the log.
            let mut skip = 0;
            for e in &entries {
                if log.term_at(e.index) != Some(e.term) {
                    break;
                }
                skip += 1;
            }
            let entries = entries.split_off(skip);

            let mut truncated = None;
            if let Some(head) = entries.first() {
                if head.index <= log.last_index() {
                    warn!(
                        "log conflicts at {} (leader={}). truncate the tail",
                        head.index, req.leader
                    );
                    log.truncate_tail(head.index)?;
                    truncated = Some(head.index);
                }
            }

            let mut configs = vec![];
            for e in &entries {
                if let Command::ClusterConfiguration(config) = Command::deserialize(&e.payload)? {
                    configs.push((e.index, config));
                }
            }
            log.append(entries).await?;
            (truncated, configs)
        };

        // Configurations take effect once appended.
        if truncated.is_some() || !configs.is_empty() {
            if let Some(from) = truncated {
                self.ctrl.configs.retain(|i, _| *i < from);
            }
            self.ctrl.configs.extend(configs);
            effect::restore_membership::Effect {
                ctrl: &mut *self.ctrl,
            }
            .exec()
            .await?;
        }

        self.ctrl
            .commit(std::cmp::min(req.leader_commit, last_new_index))
            .await;

        Ok(AppendEntriesResponse {
            term: self.ctrl.cur_term(),
            match_index: last_new_index,
        })
    }
}
