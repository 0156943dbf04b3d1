use super::*;

pub struct Effect<'a> {
    pub ctrl: &'a mut Control,
}

impl Effect<'_> {
    /// Adopt the last configuration in the log, or the one as of the
    /// compaction anchor if the log has none.
    pub async fn exec(self) -> Result<()> {
        let (config, index) = match self.ctrl.configs.last_key_value() {
            Some((index, config)) => (config.clone(), *index),
            None => {
                let anchor = self.ctrl.log.read().await.prev_clock();
                (self.ctrl.fallback_config.clone(), anchor.index)
            }
        };
        effect::set_membership::Effect { ctrl: self.ctrl }
            .exec(config, index)
            .await
    }
}
