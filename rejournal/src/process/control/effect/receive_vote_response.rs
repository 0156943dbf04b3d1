use super::*;

pub struct Effect<'a> {
    pub ctrl: &'a mut Control,
}

impl Effect<'_> {
    pub async fn exec(
        self,
        vote_term: Term,
        from: NodeAddress,
        result: std::result::Result<RequestVoteResponse, Error>,
    ) -> Result<()> {
        let resp = match result {
            Ok(x) => x,
            Err(e) => {
                debug!("vote request to {from} failed: {e}");
                return Ok(());
            }
        };

        if resp.term > self.ctrl.cur_term() {
            return effect::step_down::Effect { ctrl: self.ctrl }
                .exec(resp.term, None)
                .await;
        }
        if self.ctrl.role != Role::Candidate || vote_term != self.ctrl.cur_term() {
            return Ok(());
        }
        if !resp.vote_granted {
            return Ok(());
        }

        debug!("got vote from {from} at term {vote_term}");
        self.ctrl.votes.insert(from);
        if self.ctrl.config.has_quorum(|x| self.ctrl.votes.contains(x)) {
            effect::become_leader::Effect { ctrl: self.ctrl }
                .exec()
                .await?;
        }
        Ok(())
    }
}
