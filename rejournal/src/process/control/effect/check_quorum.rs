use super::*;

pub struct Effect<'a> {
    pub ctrl: &'a mut Control,
}

impl Effect<'_> {
    /// A leader that hasn't heard from a quorum for an election timeout steps
    /// down. Returns true if it did.
    pub async fn exec(self, now: Instant) -> Result<bool> {
        let timeout = self.ctrl.options.election_timeout;
        let Some(since) = self.ctrl.became_leader_at else {
            return Ok(false);
        };
        if now.duration_since(since) < timeout {
            return Ok(false);
        }

        let self_id = &self.ctrl.self_id;
        let progress = &self.ctrl.progress;
        let alive = self.ctrl.config.has_quorum(|id| {
            if id == self_id {
                return true;
            }
            progress
                .get(id)
                .and_then(|p| p.last_ack)
                .is_some_and(|t| now.duration_since(t) < timeout)
        });
        if alive {
            return Ok(false);
        }

        warn!("lost contact with the quorum. step down");
        let term = self.ctrl.cur_term();
        effect::step_down::Effect { ctrl: self.ctrl }
            .exec(term, None)
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::control::testing::*;

    #[tokio::test]
    async fn test_leader_keeps_its_role_while_acked() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut h = Harness::open(dir.path(), "s1", &["s1", "s2", "s3"]).await?;
        h.lead(2).await?;

        let later = Instant::now() + Duration::from_secs(2);
        if let Some(p) = h.ctrl.progress.get_mut(&addr("s2")) {
            p.last_ack = Some(later);
        }
        let stepped_down = Effect { ctrl: &mut h.ctrl }.exec(later).await?;
        assert!(!stepped_down);
        assert_eq!(h.ctrl.role, Role::Leader);
        Ok(())
    }

    #[tokio::test]
    async fn test_isolated_leader_steps_down_on_tick() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut h = Harness::open(dir.path(), "s1", &["s1", "s2", "s3"]).await?;
        h.lead(2).await?;
        h.ctrl.became_leader_at = Some(Instant::now() - Duration::from_secs(2));

        h.ctrl.on_tick().await?;
        assert_eq!(h.ctrl.role, Role::Follower);
        assert_eq!(h.ctrl.cur_term(), 2);
        assert_eq!(h.ctrl.leader, None);
        Ok(())
    }
}
