use super::*;

#[derive(Clone, Debug, PartialEq)]
pub struct RequestVote {
    pub term: Term,
    pub candidate: NodeAddress,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

impl Encode for RequestVote {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.term);
        codec::put_uri(buf, Some(&self.candidate));
        buf.put_u64(self.last_log_index);
        buf.put_u64(self.last_log_term);
    }
}

impl Decode for RequestVote {
    fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            term: codec::get_u64(buf)?,
            candidate: codec::get_required_uri(buf)?,
            last_log_index: codec::get_u64(buf)?,
            last_log_term: codec::get_u64(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RequestVoteResponse {
    pub term: Term,
    pub vote_granted: bool,
}

impl Encode for RequestVoteResponse {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.term);
        codec::put_bool(buf, self.vote_granted);
    }
}

impl Decode for RequestVoteResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            term: codec::get_u64(buf)?,
            vote_granted: codec::get_bool(buf)?,
        })
    }
}

fn put_entry(buf: &mut BytesMut, e: &Entry) {
    buf.put_u64(e.index);
    buf.put_u64(e.term);
    codec::put_bytes(buf, &e.payload);
}

fn get_entry(buf: &mut Bytes) -> Result<Entry, Error> {
    Ok(Entry {
        index: codec::get_u64(buf)?,
        term: codec::get_u64(buf)?,
        payload: codec::get_bytes(buf)?,
    })
}

/// An empty `entries` is a heartbeat.
#[derive(Clone, Debug, PartialEq)]
pub struct AppendEntries {
    pub term: Term,
    pub leader: NodeAddress,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<Entry>,
    pub leader_commit: LogIndex,
}

impl Encode for AppendEntries {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.term);
        codec::put_uri(buf, Some(&self.leader));
        buf.put_u64(self.prev_log_index);
        buf.put_u64(self.prev_log_term);
        codec::put_list(buf, Some(self.entries.as_slice()), put_entry);
        buf.put_u64(self.leader_commit);
    }
}

impl Decode for AppendEntries {
    fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            term: codec::get_u64(buf)?,
            leader: codec::get_required_uri(buf)?,
            prev_log_index: codec::get_u64(buf)?,
            prev_log_term: codec::get_u64(buf)?,
            entries: codec::get_list(buf, get_entry)?.unwrap_or_default(),
            leader_commit: codec::get_u64(buf)?,
        })
    }
}

/// Sent on success. Rejections travel as `LogMismatch` or `TermStale` errors.
#[derive(Clone, Debug, PartialEq)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub match_index: LogIndex,
}

impl Encode for AppendEntriesResponse {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.term);
        buf.put_u64(self.match_index);
    }
}

impl Decode for AppendEntriesResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            term: codec::get_u64(buf)?,
            match_index: codec::get_u64(buf)?,
        })
    }
}

/// One chunk of a snapshot transfer. `meta` is only carried by the chunk at offset 0.
#[derive(Clone, Debug, PartialEq)]
pub struct InstallSnapshot {
    pub term: Term,
    pub leader: NodeAddress,
    pub last_included_index: LogIndex,
    pub last_included_term: Term,
    pub offset: u64,
    pub meta: Bytes,
    pub data: Bytes,
    pub done: bool,
}

impl Encode for InstallSnapshot {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.term);
        codec::put_uri(buf, Some(&self.leader));
        buf.put_u64(self.last_included_index);
        buf.put_u64(self.last_included_term);
        buf.put_u64(self.offset);
        codec::put_bytes(buf, &self.meta);
        codec::put_bytes(buf, &self.data);
        codec::put_bool(buf, self.done);
    }
}

impl Decode for InstallSnapshot {
    fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            term: codec::get_u64(buf)?,
            leader: codec::get_required_uri(buf)?,
            last_included_index: codec::get_u64(buf)?,
            last_included_term: codec::get_u64(buf)?,
            offset: codec::get_u64(buf)?,
            meta: codec::get_bytes(buf)?,
            data: codec::get_bytes(buf)?,
            done: codec::get_bool(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstallSnapshotResponse {
    pub term: Term,
}

impl Encode for InstallSnapshotResponse {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.term);
    }
}

impl Decode for InstallSnapshotResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            term: codec::get_u64(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_entries_layout() {
        let leader: NodeAddress = "http://n1:7000".parse().unwrap();
        let uri_len = 4 + leader.to_string().len();
        let req = AppendEntries {
            term: 2,
            leader,
            prev_log_index: 4,
            prev_log_term: 1,
            entries: vec![Entry {
                index: 5,
                term: 2,
                payload: Bytes::from_static(b"x"),
            }],
            leader_commit: 4,
        };
        let bin = req.to_bytes();
        // term | uri | prev index | prev term | list(1) | entry | commit
        assert_eq!(bin.len(), 8 + uri_len + 8 + 8 + 4 + (8 + 8 + 4 + 1) + 8);
        assert_eq!(AppendEntries::from_bytes(bin).unwrap(), req);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bin = BytesMut::from(&RequestVoteResponse {
            term: 1,
            vote_granted: true,
        }
        .to_bytes()[..]);
        bin.put_u8(0);
        assert!(matches!(
            RequestVoteResponse::from_bytes(bin.freeze()),
            Err(Error::Protocol(_))
        ));
    }
}
