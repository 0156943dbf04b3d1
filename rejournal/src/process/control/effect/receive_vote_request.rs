use super::*;

pub struct Effect<'a> {
    pub ctrl: &'a mut Control,
}

impl Effect<'_> {
    fn reject(&self) -> RequestVoteResponse {
        RequestVoteResponse {
            term: self.ctrl.cur_term(),
            vote_granted: false,
        }
    }

    /// A follower that heard from its leader recently ignores candidates
    /// so that a server partitioned away can't disrupt the cluster.
    fn leader_is_alive(&self, candidate: &NodeAddress) -> bool {
        if self.ctrl.role != Role::Follower {
            return false;
        }
        match (&self.ctrl.leader, self.ctrl.last_leader_contact) {
            (Some(leader), Some(t)) => {
                leader != candidate && t.elapsed() < self.ctrl.options.election_timeout
            }
            _ => false,
        }
    }

    pub async fn exec(self, req: RequestVote) -> Result<RequestVoteResponse> {
        if req.term < self.ctrl.cur_term() {
            return Ok(self.reject());
        }
        if self.leader_is_alive(&req.candidate) {
            info!(
                "reject vote for {} at term {}: leader is alive",
                req.candidate, req.term
            );
            return Ok(self.reject());
        }

        if req.term > self.ctrl.cur_term() {
            effect::step_down::Effect {
                ctrl: &mut *self.ctrl,
            }
            .exec(req.term, None)
            .await?;
        }

        let last_clock = self.ctrl.log.read().await.last_clock();
        // $5.4.1 Election restriction
        let up_to_date = (req.last_log_term, req.last_log_index) >= (last_clock.term, last_clock.index);
        let free = match &self.ctrl.ballot.voted_for {
            None => true,
            Some(x) => *x == req.candidate,
        };
        let granted = up_to_date && free;

        if granted {
            if self.ctrl.ballot.voted_for.is_none() {
                self.ctrl
                    .write_ballot(Ballot {
                        cur_term: req.term,
                        voted_for: Some(req.candidate.clone()),
                    })
                    .await?;
            }
            self.ctrl.reset_election_deadline();
        }
        info!(
            "vote {} for {} at term {} (candidate_log={}@{}, my_log={}@{})",
            if granted { "granted" } else { "rejected" },
            req.candidate,
            req.term,
            req.last_log_index,
            req.last_log_term,
            last_clock.index,
            last_clock.term,
        );

        Ok(RequestVoteResponse {
            term: self.ctrl.cur_term(),
            vote_granted: granted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::control::testing::*;

    #[tokio::test]
    async fn test_one_vote_per_term() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut h = Harness::open(dir.path(), "s1", &["s1", "s2", "s3"]).await?;

        assert!(h.request_vote("s2", 1, (0, 0)).await?.vote_granted);
        assert!(!h.request_vote("s3", 1, (0, 0)).await?.vote_granted);
        // Asking again is answered the same.
        assert!(h.request_vote("s2", 1, (0, 0)).await?.vote_granted);
        assert_eq!(h.ctrl.ballot.voted_for, Some(addr("s2")));

        // A new term frees the vote.
        let resp = h.request_vote("s3", 2, (0, 0)).await?;
        assert!(resp.vote_granted);
        assert_eq!(resp.term, 2);

        // An older term is refused without touching the ballot.
        let resp = h.request_vote("s2", 1, (0, 0)).await?;
        assert!(!resp.vote_granted);
        assert_eq!(resp.term, 2);
        assert_eq!(h.ctrl.ballot.voted_for, Some(addr("s3")));
        Ok(())
    }

    #[tokio::test]
    async fn test_vote_survives_restart() -> Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let mut h = Harness::open(dir.path(), "s1", &["s1", "s2", "s3"]).await?;
            assert!(h.request_vote("s2", 4, (0, 0)).await?.vote_granted);
        }
        let mut h = Harness::open(dir.path(), "s1", &["s1", "s2", "s3"]).await?;
        assert_eq!(h.ctrl.cur_term(), 4);
        assert!(!h.request_vote("s3", 4, (0, 0)).await?.vote_granted);
        Ok(())
    }

    #[tokio::test]
    async fn test_candidate_log_must_be_up_to_date() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut h = Harness::open(dir.path(), "s1", &["s1", "s2", "s3", "s4", "s5"]).await?;
        h.replicate("s2", 2, (0, 0), vec![barrier(1, 1), barrier(2, 2)], 0)
            .await?;

        // The leader was heard from just now.
        assert!(!h.request_vote("s3", 3, (2, 2)).await?.vote_granted);
        assert_eq!(h.ctrl.cur_term(), 2);

        h.ctrl.last_leader_contact = None;
        // Longer but of an older term.
        assert!(!h.request_vote("s3", 3, (5, 1)).await?.vote_granted);
        // Same term but shorter.
        assert!(!h.request_vote("s4", 3, (1, 2)).await?.vote_granted);
        assert!(h.request_vote("s5", 3, (2, 2)).await?.vote_granted);
        assert_eq!(h.ctrl.cur_term(), 3);
        Ok(())
    }
}
