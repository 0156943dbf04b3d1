use super::*;

#[derive(Clone)]
pub struct Thread {
    registry: Arc<WatchRegistry>,
}
impl Thread {
    fn run_once(&self) -> usize {
        self.registry.evict_expired()
    }

    fn do_loop(self) -> ThreadHandle {
        let fut = async move {
            let period = std::cmp::max(self.registry.timeout() / 4, Duration::from_millis(10));
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let n = self.run_once();
                if n > 0 {
                    debug!("evicted {n} pull watches");
                }
            }
        };
        let hdl = tokio::spawn(fut).abort_handle();
        ThreadHandle(hdl)
    }
}

pub fn new(registry: Arc<WatchRegistry>) -> ThreadHandle {
    Thread { registry }.do_loop()
}
