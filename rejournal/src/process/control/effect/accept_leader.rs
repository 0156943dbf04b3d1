use super::*;

pub struct Effect<'a> {
    pub ctrl: &'a mut Control,
}

impl Effect<'_> {
    /// Recognize `leader` as the leader of `term`.
    pub async fn exec(self, term: Term, leader: &NodeAddress) -> Result<()> {
        let cur_term = self.ctrl.cur_term();
        ensure!(term >= cur_term, Error::TermStale(cur_term));

        if term > cur_term || self.ctrl.role != Role::Follower {
            effect::step_down::Effect {
                ctrl: &mut *self.ctrl,
            }
            .exec(term, Some(leader.clone()))
            .await?;
        }
        if self.ctrl.leader.as_ref() != Some(leader) {
            info!("follow leader {leader} at term {term}");
            self.ctrl.leader = Some(leader.clone());
        }
        self.ctrl.last_leader_contact = Some(Instant::now());
        self.ctrl.reset_election_deadline();
        Ok(())
    }
}
