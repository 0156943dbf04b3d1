use super::*;

use tokio::time::MissedTickBehavior;

pub struct Thread {
    ctrl: Control,
    inbox: mpsc::Receiver<ControlMessage>,
}

impl Thread {
    fn is_fatal(e: &anyhow::Error) -> bool {
        matches!(
            e.downcast_ref::<Error>(),
            Some(Error::StorageFailure(_) | Error::NodeStopped)
        )
    }

    async fn run_once(&mut self, tick: &mut tokio::time::Interval) -> Result<bool> {
        let r = tokio::select! {
            msg = self.inbox.recv() => {
                match msg {
                    Some(msg) => self.ctrl.handle(msg).await,
                    None => return Ok(false),
                }
            }
            _ = tick.tick() => self.ctrl.on_tick().await,
        };
        if let Err(e) = r {
            if Self::is_fatal(&e) {
                return Err(e);
            }
            warn!("{e:#}");
        }
        self.ctrl.publish();
        Ok(true)
    }

    fn do_loop(mut self) -> ThreadHandle {
        let fut = async move {
            let period = std::cmp::max(
                self.ctrl.options.heartbeat_interval / 2,
                Duration::from_millis(10),
            );
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                match self.run_once(&mut tick).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        // Nothing can be trusted about the durable state anymore.
                        error!("consensus stopped: {e:#}");
                        self.ctrl.fail_waiters(Error::NodeStopped);
                        break;
                    }
                }
            }
        };
        let hdl = tokio::spawn(fut).abort_handle();
        ThreadHandle(hdl)
    }
}

pub fn new(ctrl: Control, inbox: mpsc::Receiver<ControlMessage>) -> ThreadHandle {
    Thread { ctrl, inbox }.do_loop()
}
