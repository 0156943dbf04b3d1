use super::*;

pub struct Effect<'a> {
    pub ctrl: &'a mut Control,
}

impl Effect<'_> {
    /// Adopt the configuration of the entry at `index`.
    pub async fn exec(self, config: ClusterConfiguration, index: LogIndex) -> Result<()> {
        info!("membership -> {config:?} (index={index})");

        if self.ctrl.role == Role::Leader {
            let next_index = self.ctrl.log.read().await.last_index() + 1;
            for id in config.members() {
                if id == self.ctrl.self_id {
                    continue;
                }
                self.ctrl
                    .progress
                    .entry(id)
                    .or_insert_with(|| Replication::new(next_index));
            }
            // Servers outside `config` are kept until `C_new` is committed and they learn it.
        }

        if index > self.ctrl.log.read().await.prev_clock().index {
            self.ctrl.configs.insert(index, config.clone());
        }
        self.ctrl.config = config;
        self.ctrl.config_index = index;
        self.ctrl.save_membership().await
    }
}
