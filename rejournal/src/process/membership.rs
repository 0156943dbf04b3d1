use super::*;

use serde::{Deserialize, Serialize};

/// Voters and observers of the cluster.
///
/// While `joint` is set the cluster is moving from `voters` to `joint`:
/// a decision needs a majority of both sets.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterConfiguration {
    pub voters: BTreeSet<NodeAddress>,
    pub joint: Option<BTreeSet<NodeAddress>>,
    pub observers: BTreeSet<NodeAddress>,
}

fn majority<F: Fn(&NodeAddress) -> bool>(set: &BTreeSet<NodeAddress>, ok: F) -> bool {
    if set.is_empty() {
        return false;
    }
    let n = set.iter().filter(|x| ok(x)).count();
    n > set.len() / 2
}

/// The greatest index matched by a majority of `set`.
fn majority_index<F: Fn(&NodeAddress) -> LogIndex>(set: &BTreeSet<NodeAddress>, f: F) -> LogIndex {
    if set.is_empty() {
        return 0;
    }
    let mut xs: Vec<LogIndex> = set.iter().map(f).collect();
    xs.sort_unstable();
    xs.reverse();
    xs[set.len() / 2]
}

impl ClusterConfiguration {
    pub fn new(
        voters: impl IntoIterator<Item = NodeAddress>,
        observers: impl IntoIterator<Item = NodeAddress>,
    ) -> Self {
        let voters: BTreeSet<_> = voters.into_iter().collect();
        let observers = observers
            .into_iter()
            .filter(|x| !voters.contains(x))
            .collect();
        Self {
            voters,
            joint: None,
            observers,
        }
    }

    pub fn is_joint(&self) -> bool {
        self.joint.is_some()
    }

    /// Counted in some quorum.
    pub fn is_voter(&self, id: &NodeAddress) -> bool {
        self.voters.contains(id) || self.joint.as_ref().is_some_and(|x| x.contains(id))
    }

    pub fn all_voters(&self) -> BTreeSet<NodeAddress> {
        let mut out = self.voters.clone();
        if let Some(joint) = &self.joint {
            out.extend(joint.iter().cloned());
        }
        out
    }

    /// Every server that receives replication.
    pub fn members(&self) -> BTreeSet<NodeAddress> {
        let mut out = self.all_voters();
        out.extend(self.observers.iter().cloned());
        out
    }

    pub fn has_quorum(&self, ok: impl Fn(&NodeAddress) -> bool) -> bool {
        if !majority(&self.voters, &ok) {
            return false;
        }
        match &self.joint {
            Some(joint) => majority(joint, &ok),
            None => true,
        }
    }

    /// The greatest index matched by a quorum.
    pub fn quorum_index(&self, match_index: impl Fn(&NodeAddress) -> LogIndex) -> LogIndex {
        let a = majority_index(&self.voters, &match_index);
        match &self.joint {
            Some(joint) => a.min(majority_index(joint, &match_index)),
            None => a,
        }
    }

    /// `C_old,new` on the way to `new_voters`.
    pub fn enter_joint(&self, new_voters: BTreeSet<NodeAddress>) -> Self {
        let observers = self
            .observers
            .iter()
            .filter(|x| !new_voters.contains(x))
            .cloned()
            .collect();
        Self {
            voters: self.voters.clone(),
            joint: Some(new_voters),
            observers,
        }
    }

    /// `C_new` that follows a committed joint configuration.
    pub fn leave_joint(&self) -> Self {
        match &self.joint {
            Some(new_voters) => Self {
                voters: new_voters.clone(),
                joint: None,
                observers: self.observers.clone(),
            },
            None => self.clone(),
        }
    }
}
