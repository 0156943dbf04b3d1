use super::*;

/// An RPC to the peer that has not been answered yet.
pub struct InFlight {
    pub seq: u64,
    pub _handle: ThreadHandle,
}

/// Position in the leader's latest snapshot being sent to the peer.
#[derive(Clone, Copy, Debug)]
pub struct SnapshotTransfer {
    pub clock: Clock,
    pub offset: u64,
}

/// Leader's view of a follower.
pub struct Replication {
    /// The log entries `[1, match_index]` are replicated with this node.
    pub match_index: LogIndex,
    /// The next replication starts from this index.
    pub next_index: LogIndex,
    pub in_flight: Option<InFlight>,
    pub last_sent: Option<Instant>,
    /// Send time of the latest answered request.
    pub last_ack: Option<Instant>,
    /// Sequence number of the latest answered request.
    pub acked_seq: u64,
    /// `leader_commit` carried by the latest answered request.
    pub acked_commit: LogIndex,
    pub retries: u32,
    pub retry_at: Option<Instant>,
    pub snapshot: Option<SnapshotTransfer>,
}

impl Replication {
    pub fn new(init_next_index: LogIndex) -> Self {
        Self {
            match_index: 0,
            next_index: init_next_index,
            in_flight: None,
            last_sent: None,
            last_ack: None,
            acked_seq: 0,
            acked_commit: 0,
            retries: 0,
            retry_at: None,
            snapshot: None,
        }
    }

    /// Ready to send something now.
    pub fn is_idle(&self, now: Instant) -> bool {
        self.in_flight.is_none() && self.retry_at.map_or(true, |t| t <= now)
    }

    /// Whether a heartbeat is due.
    pub fn heartbeat_due(&self, now: Instant, interval: Duration) -> bool {
        self.last_sent.map_or(true, |t| t + interval <= now)
    }

    /// Exponential backoff from `base` up to `cap` after a failed RPC.
    /// Beyond `max_retries` failures in a row the peer is only tried every `give_up`.
    pub fn backoff(
        &mut self,
        now: Instant,
        base: Duration,
        cap: Duration,
        give_up: Duration,
        max_retries: u32,
    ) {
        self.retries = self.retries.saturating_add(1);
        let delay = if self.retries > max_retries {
            give_up
        } else {
            let exp = (self.retries - 1).min(16);
            base.saturating_mul(1 << exp).min(cap)
        };
        self.retry_at = Some(now + delay);
    }

    pub fn reset_backoff(&mut self) {
        self.retries = 0;
        self.retry_at = None;
    }
}
