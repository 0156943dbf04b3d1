use super::*;

pub struct Effect<'a> {
    pub ctrl: &'a mut Control,
}

impl Effect<'_> {
    /// Append a client command and replicate it.
    /// The completion is fulfilled by the state machine host once it is applied.
    pub async fn exec(self, payload: Bytes, completion: AppCompletion) -> Result<()> {
        if self.ctrl.role != Role::Leader {
            completion.complete_with(Err(Error::NotLeader {
                leader: self.ctrl.leader.clone(),
            }));
            return Ok(());
        }

        let term = self.ctrl.cur_term();
        let index = match self.ctrl.append_new_entry(payload).await {
            Ok(x) => x,
            Err(e) => {
                let e = Error::from_anyhow(e);
                completion.complete_with(Err(e.clone()));
                return Err(e.into());
            }
        };
        self.ctrl.writes.register(index, term, completion);

        self.ctrl.replicate_all(false).await?;
        effect::advance_commit::Effect { ctrl: self.ctrl }
            .exec()
            .await
    }
}
