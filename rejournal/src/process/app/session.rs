use super::*;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How far a client's writes may be reordered. A sequence further behind
/// the newest applied one is given up on.
pub const SESSION_WINDOW: u64 = 1024;

type Response = std::result::Result<Vec<u8>, String>;

/// Applied writes of a client and their outcomes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Every sequence up to this one is applied.
    pub high_water: u64,
    /// Applied sequences above `high_water`.
    pub applied: BTreeSet<u64>,
    /// Outcomes of the latest writes.
    pub responses: BTreeMap<u64, Response>,
}

impl Session {
    fn is_applied(&self, sequence: u64) -> bool {
        sequence <= self.high_water || self.applied.contains(&sequence)
    }

    fn slide(&mut self) {
        while self.applied.remove(&(self.high_water + 1)) {
            self.high_water += 1;
        }
    }

    fn insert(&mut self, sequence: u64, response: Response) {
        if self.is_applied(sequence) {
            return;
        }
        self.applied.insert(sequence);
        self.slide();

        let newest = self.applied.last().copied().unwrap_or(self.high_water);
        let floor = newest.saturating_sub(SESSION_WINDOW);
        if self.high_water < floor {
            self.high_water = floor;
            self.applied = self.applied.split_off(&(floor + 1));
            self.slide();
        }

        self.responses.insert(sequence, response);
        while self.responses.len() > SESSION_WINDOW as usize {
            self.responses.pop_first();
        }
    }
}

/// Client sessions. Ordered so that every server serializes them alike.
pub type Sessions = BTreeMap<Uuid, Session>;

pub enum Dedup {
    Execute,
    /// Already applied. The cached outcome is returned again.
    Replay(std::result::Result<Bytes, Error>),
    /// Applied or given up on, and the outcome is not kept anymore.
    Stale { high_water: u64 },
}

pub fn check(sessions: &Sessions, client_id: &Uuid, sequence: u64) -> Dedup {
    let Some(s) = sessions.get(client_id) else {
        return Dedup::Execute;
    };
    if !s.is_applied(sequence) {
        return Dedup::Execute;
    }
    match s.responses.get(&sequence) {
        Some(Ok(x)) => Dedup::Replay(Ok(Bytes::copy_from_slice(x))),
        Some(Err(msg)) => Dedup::Replay(Err(Error::StateMachine(msg.clone()))),
        None => Dedup::Stale {
            high_water: s.high_water,
        },
    }
}

pub fn record(
    sessions: &mut Sessions,
    client_id: Uuid,
    sequence: u64,
    result: &std::result::Result<Bytes, Error>,
) {
    let response = match result {
        Ok(x) => Ok(x.to_vec()),
        Err(Error::StateMachine(msg)) => Err(msg.clone()),
        Err(e) => Err(e.to_string()),
    };
    sessions
        .entry(client_id)
        .or_default()
        .insert(sequence, response);
}
