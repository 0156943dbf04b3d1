use super::*;

use crate::storage::SnapshotMeta;

// election
pub mod become_leader;
pub mod check_quorum;
pub mod receive_vote_request;
pub mod receive_vote_response;
pub mod step_down;
pub mod try_promote;

// follower
pub mod accept_leader;
pub mod receive_append_entries;
pub mod receive_install_snapshot;

// leader
pub mod advance_commit;
pub mod advance_replication;
pub mod issue_read_index;
pub mod queue_new_entry;
pub mod receive_replication_result;

// membership and log
pub mod change_membership;
pub mod compact_log;
pub mod restore_membership;
pub mod set_membership;
