use super::*;

pub struct Effect<'a> {
    pub ctrl: &'a mut Control,
}

impl Effect<'_> {
    fn validate(
        &self,
        old_voters: &BTreeSet<NodeAddress>,
        new_voters: &BTreeSet<NodeAddress>,
    ) -> std::result::Result<(), Error> {
        let ctrl = &*self.ctrl;
        if ctrl.role != Role::Leader {
            return Err(Error::NotLeader {
                leader: ctrl.leader.clone(),
            });
        }
        // One change at a time, and only after this leader's barrier is committed.
        if ctrl.config.is_joint()
            || ctrl.config_index > ctrl.commit_index
            || ctrl.barrier_index > ctrl.commit_index
            || ctrl.membership_waiter.is_some()
        {
            return Err(Error::MembershipChangeInProgress);
        }
        if !old_voters.is_empty() && *old_voters != ctrl.config.voters {
            return Err(Error::Protocol(format!(
                "old voters {old_voters:?} don't match the current voters {:?}",
                ctrl.config.voters
            )));
        }
        if new_voters.is_empty() {
            return Err(Error::Protocol("new voters must not be empty".into()));
        }
        Ok(())
    }

    /// Start a joint consensus from the current voters to `new_voters`.
    /// The completion is fulfilled when `C_new` is committed.
    pub async fn exec(
        self,
        old_voters: BTreeSet<NodeAddress>,
        new_voters: BTreeSet<NodeAddress>,
        completion: KernCompletion,
    ) -> Result<()> {
        if let Err(e) = self.validate(&old_voters, &new_voters) {
            completion.fail(e);
            return Ok(());
        }
        if new_voters == self.ctrl.config.voters {
            completion.complete();
            return Ok(());
        }

        let joint = self.ctrl.config.enter_joint(new_voters);
        let payload = Command::ClusterConfiguration(joint.clone()).serialize()?;
        let index = match self.ctrl.append_new_entry(payload).await {
            Ok(x) => x,
            Err(e) => {
                let e = Error::from_anyhow(e);
                completion.fail(e.clone());
                return Err(e.into());
            }
        };
        info!("joint membership is queued at {index}: {joint:?}");

        effect::set_membership::Effect {
            ctrl: &mut *self.ctrl,
        }
        .exec(joint, index)
        .await?;
        self.ctrl.membership_waiter = Some(completion);

        self.ctrl.replicate_all(true).await?;
        effect::advance_commit::Effect { ctrl: self.ctrl }
            .exec()
            .await
    }
}
