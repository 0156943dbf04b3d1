//! Pull watches.
//!
//! Every subscriber owns a bounded queue of events. Events the state machine
//! emits while applying are appended to every queue and a long-polling pull
//! returns whatever is queued after the last event the subscriber has seen.

use super::*;

use message::{PullEventsResponse, WatchEvent};
use std::collections::VecDeque;
use std::time::Instant;
use tokio::sync::Notify;
use uuid::Uuid;

mod gc;
pub use gc::new as gc_thread;

struct Subscriber {
    queue: VecDeque<WatchEvent>,
    next_id: u64,
    /// The greatest event id returned by a pull.
    delivered: u64,
    /// Undelivered events were dropped since the last pull.
    overflowed: bool,
    last_seen: Instant,
    notify: Arc<Notify>,
}

impl Subscriber {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            next_id: 1,
            delivered: 0,
            overflowed: false,
            last_seen: Instant::now(),
            notify: Arc::new(Notify::new()),
        }
    }
}

pub struct WatchRegistry {
    subscribers: parking_lot::Mutex<HashMap<Uuid, Subscriber>>,
    backlog: usize,
    timeout: Duration,
}

impl WatchRegistry {
    pub fn new(backlog: usize, timeout: Duration) -> Self {
        Self {
            subscribers: parking_lot::Mutex::new(HashMap::new()),
            backlog: backlog.max(1),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn add(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.subscribers.lock().insert(id, Subscriber::new());
        info!("add pull watch {id}");
        id
    }

    pub fn remove(&self, id: &Uuid) -> std::result::Result<(), Error> {
        match self.subscribers.lock().remove(id) {
            Some(_) => {
                info!("remove pull watch {id}");
                Ok(())
            }
            None => Err(Error::WatchNotFound),
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn publish(&self, payload: Bytes) {
        let mut subscribers = self.subscribers.lock();
        for sub in subscribers.values_mut() {
            if sub.queue.len() >= self.backlog {
                // An event already handed out only waits for its ack.
                if let Some(e) = sub.queue.pop_front() {
                    if e.id > sub.delivered {
                        sub.overflowed = true;
                    }
                }
            }
            let id = sub.next_id;
            sub.next_id += 1;
            sub.queue.push_back(WatchEvent {
                id,
                payload: payload.clone(),
            });
            sub.notify.notify_one();
        }
    }

    /// Returns the events after `last_event_id`, waiting up to `max_wait` for the first one.
    pub async fn pull(
        &self,
        id: &Uuid,
        last_event_id: u64,
        max_wait: Duration,
    ) -> std::result::Result<PullEventsResponse, Error> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let notify = {
                let mut subscribers = self.subscribers.lock();
                let sub = subscribers.get_mut(id).ok_or(Error::WatchNotFound)?;
                sub.last_seen = Instant::now();

                // Acknowledged.
                while sub.queue.front().is_some_and(|e| e.id <= last_event_id) {
                    sub.queue.pop_front();
                }

                if !sub.queue.is_empty() || sub.overflowed {
                    let resync_required = std::mem::take(&mut sub.overflowed);
                    if let Some(e) = sub.queue.back() {
                        sub.delivered = sub.delivered.max(e.id);
                    }
                    return Ok(PullEventsResponse {
                        events: sub.queue.iter().cloned().collect(),
                        resync_required,
                    });
                }
                sub.notify.clone()
            };

            if tokio::time::timeout_at(deadline, notify.notified())
                .await
                .is_err()
            {
                if let Some(sub) = self.subscribers.lock().get_mut(id) {
                    sub.last_seen = Instant::now();
                }
                return Ok(PullEventsResponse::default());
            }
        }
    }

    /// Drops the subscribers that have not pulled within the watch timeout.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|id, sub| {
            let alive = now.duration_since(sub.last_seen) < self.timeout;
            if !alive {
                warn!("evict pull watch {id} (no pull for {:?})", self.timeout);
            }
            alive
        });
        before - subscribers.len()
    }
}

/// Handed to `StateMachine::apply` to emit watch events.
#[derive(Clone)]
pub struct EventSink {
    registry: Arc<WatchRegistry>,
}

impl EventSink {
    pub(crate) fn new(registry: Arc<WatchRegistry>) -> Self {
        Self { registry }
    }

    pub fn publish(&self, payload: impl Into<Bytes>) {
        self.registry.publish(payload.into());
    }
}
