use super::*;

pub struct Effect<'a> {
    pub ctrl: &'a mut Control,
}

impl Effect<'_> {
    pub async fn exec(self) -> Result<()> {
        let term = self.ctrl.cur_term();
        info!("got enough votes. promoted to leader at term {term}");

        self.ctrl.write_role(Role::Leader);
        self.ctrl.leader = Some(self.ctrl.self_id.clone());
        self.ctrl.votes.clear();
        self.ctrl.vote_tasks.clear();
        self.ctrl.became_leader_at = Some(Instant::now());
        self.ctrl.c_new_committed_at = None;
        self.ctrl.retiring.clear();

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

        // Entries of the previous terms are committed through this one.
        let payload = Command::Barrier(term).serialize()?;
        let index = self.ctrl.append_new_entry(payload).await?;
        self.ctrl.barrier_index = index;
        info!("noop barrier is queued at index({index}) (term={term})");

        self.ctrl.replicate_all(true).await?;
        effect::advance_commit::Effect { ctrl: self.ctrl }
            .exec()
            .await
    }
}
