use super::*;

pub struct Effect<'a> {
    pub ctrl: &'a mut Control,
}

impl Effect<'_> {
    /// Start an election at the next term.
    pub async fn exec(self) -> Result<()> {
        ensure!(self.ctrl.role != Role::Leader);

        let vote_term = self.ctrl.cur_term() + 1;
        let self_id = self.ctrl.self_id.clone();
        info!("start election at term {vote_term}");

        // Vote to itself
        self.ctrl
            .write_ballot(Ballot {
                cur_term: vote_term,
                voted_for: Some(self_id.clone()),
            })
            .await?;
        self.ctrl.leader = None;
        self.ctrl.write_role(Role::Candidate);
        self.ctrl.votes = BTreeSet::from([self_id.clone()]);
        self.ctrl.vote_tasks.clear();
        self.ctrl.reset_election_deadline();

        if self.ctrl.config.has_quorum(|x| self.ctrl.votes.contains(x)) {
            return effect::become_leader::Effect { ctrl: self.ctrl }.exec().await;
        }

        let last_clock = self.ctrl.log.read().await.last_clock();
        for peer in self.ctrl.config.all_voters() {
            if peer == self_id {
                continue;
            }
            let req = RequestVote {
                term: vote_term,
                candidate: self_id.clone(),
                last_log_index: last_clock.index,
                last_log_term: last_clock.term,
            };
            let conn = self.ctrl.io.connect(&peer);
            let tx = self.ctrl.ctrl_tx.clone();
            let fut = async move {
                let result = conn.request_vote(req).await;
                let msg = ControlMessage::VoteResult {
                    term: vote_term,
                    from: peer,
                    result,
                };
                tx.send(msg).await.ok();
            };
            let hdl = tokio::spawn(fut).abort_handle();
            self.ctrl.vote_tasks.push(ThreadHandle(hdl));
        }
        Ok(())
    }
}
