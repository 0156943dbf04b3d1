use super::*;

pub struct Effect<'a> {
    pub ctrl: &'a mut Control,
}

impl Effect<'_> {
    /// Become a follower at `term`.
    /// A higher term is persisted before anything else changes.
    pub async fn exec(self, term: Term, leader: Option<NodeAddress>) -> Result<()> {
        if term > self.ctrl.cur_term() {
            info!("observed higher term {term} (cur={})", self.ctrl.cur_term());
            self.ctrl
                .write_ballot(Ballot {
                    cur_term: term,
                    voted_for: None,
                })
                .await?;
        }

        if self.ctrl.role == Role::Leader {
            info!("step down from leader at term {}", self.ctrl.cur_term());
            self.ctrl.fail_waiters(Error::NotLeader {
                leader: leader.clone(),
            });
            self.ctrl.progress.clear();
            self.ctrl.retiring.clear();
            self.ctrl.became_leader_at = None;
            self.ctrl.c_new_committed_at = None;
        }
        self.ctrl.votes.clear();
        self.ctrl.vote_tasks.clear();

        self.ctrl.leader = leader;
        self.ctrl.write_role(Role::Follower);
        self.ctrl.reset_election_deadline();
        Ok(())
    }
}
