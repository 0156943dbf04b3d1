use super::*;

pub struct Effect<'a> {
    pub ctrl: &'a mut Control,
}

impl Effect<'_> {
    /// The snapshot at `clock` is saved: the entries up to it are not needed anymore.
    pub async fn exec(self, clock: Clock) -> Result<()> {
        {
            let mut log = self.ctrl.log.write().await;
            if clock.index <= log.prev_clock().index {
                return Ok(());
            }
            log.compact(clock.index + 1)?;
        }
        if let Some(meta) = self.ctrl.snapshots.latest()? {
            if meta.index == clock.index {
                self.ctrl.fallback_config = meta.configuration;
            }
        }
        self.ctrl.configs = self.ctrl.configs.split_off(&(clock.index + 1));
        self.ctrl.save_membership().await
    }
}
