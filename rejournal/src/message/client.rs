use super::*;

/// Proposes one command. `client_id` and `sequence` identify the request so a
/// retry after a lost response is applied at most once.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateClusterState {
    pub client_id: Option<Uuid>,
    pub sequence: u64,
    pub command: Bytes,
}

impl Encode for UpdateClusterState {
    fn encode(&self, buf: &mut BytesMut) {
        codec::put_uuid(buf, self.client_id.as_ref());
        buf.put_u64(self.sequence);
        codec::put_bytes(buf, &self.command);
    }
}

impl Decode for UpdateClusterState {
    fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            client_id: codec::get_uuid(buf)?,
            sequence: codec::get_u64(buf)?,
            command: codec::get_bytes(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpdateClusterStateResponse {
    pub index: LogIndex,
    pub result: Bytes,
}

impl Encode for UpdateClusterStateResponse {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.index);
        codec::put_bytes(buf, &self.result);
    }
}

impl Decode for UpdateClusterStateResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            index: codec::get_u64(buf)?,
            result: codec::get_bytes(buf)?,
        })
    }
}

/// How a leader confirms it may serve a read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ReadConsistency {
    /// Confirm leadership with a heartbeat round.
    #[default]
    ReadIndex,
    /// Trust the lease held since the last quorum of acks.
    Lease,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryClusterState {
    pub consistency: ReadConsistency,
    pub query: Bytes,
}

impl Encode for QueryClusterState {
    fn encode(&self, buf: &mut BytesMut) {
        let c = match self.consistency {
            ReadConsistency::ReadIndex => 0,
            ReadConsistency::Lease => 1,
        };
        buf.put_u8(c);
        codec::put_bytes(buf, &self.query);
    }
}

impl Decode for QueryClusterState {
    fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        let consistency = match codec::get_u8(buf)? {
            0 => ReadConsistency::ReadIndex,
            1 => ReadConsistency::Lease,
            x => return Err(Error::Protocol(format!("unknown read consistency {x}"))),
        };
        Ok(Self {
            consistency,
            query: codec::get_bytes(buf)?,
        })
    }
}

/// Reads the local state machine without any leader involvement.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryServerState {
    pub query: Bytes,
}

impl Encode for QueryServerState {
    fn encode(&self, buf: &mut BytesMut) {
        codec::put_bytes(buf, &self.query);
    }
}

impl Decode for QueryServerState {
    fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            query: codec::get_bytes(buf)?,
        })
    }
}

/// Answer to both query commands.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryResponse {
    /// The applied index the query was served at.
    pub index: LogIndex,
    pub result: Bytes,
}

impl Encode for QueryResponse {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.index);
        codec::put_bytes(buf, &self.result);
    }
}

impl Decode for QueryResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            index: codec::get_u64(buf)?,
            result: codec::get_bytes(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LastAppliedResponse {
    pub last_applied: LogIndex,
}

impl Encode for LastAppliedResponse {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.last_applied);
    }
}

impl Decode for LastAppliedResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            last_applied: codec::get_u64(buf)?,
        })
    }
}

fn put_uris(buf: &mut BytesMut, xs: Option<&[NodeAddress]>) {
    codec::put_list(buf, xs, |buf, x| codec::put_uri(buf, Some(x)));
}

fn get_uris(buf: &mut Bytes) -> Result<Option<Vec<NodeAddress>>, Error> {
    codec::get_list(buf, codec::get_required_uri)
}

/// Membership as known by the answering server.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct GetServersResponse {
    pub leader: Option<NodeAddress>,
    pub voters: Vec<NodeAddress>,
    /// The incoming voters while a joint configuration is in effect.
    pub joint_voters: Option<Vec<NodeAddress>>,
    pub observers: Vec<NodeAddress>,
}

impl Encode for GetServersResponse {
    fn encode(&self, buf: &mut BytesMut) {
        codec::put_uri(buf, self.leader.as_ref());
        put_uris(buf, Some(self.voters.as_slice()));
        put_uris(buf, self.joint_voters.as_deref());
        put_uris(buf, Some(self.observers.as_slice()));
    }
}

impl Decode for GetServersResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            leader: codec::get_uri(buf)?,
            voters: get_uris(buf)?.unwrap_or_default(),
            joint_voters: get_uris(buf)?,
            observers: get_uris(buf)?.unwrap_or_default(),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpdateVoters {
    pub old_voters: Vec<NodeAddress>,
    pub new_voters: Vec<NodeAddress>,
}

impl Encode for UpdateVoters {
    fn encode(&self, buf: &mut BytesMut) {
        put_uris(buf, Some(self.old_voters.as_slice()));
        put_uris(buf, Some(self.new_voters.as_slice()));
    }
}

impl Decode for UpdateVoters {
    fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            old_voters: get_uris(buf)?.unwrap_or_default(),
            new_voters: get_uris(buf)?.unwrap_or_default(),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServerStatus {
    pub role: Role,
    pub term: Term,
    pub leader: Option<NodeAddress>,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub first_index: LogIndex,
    pub last_index: LogIndex,
}

impl Encode for ServerStatus {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.role as u8);
        buf.put_u64(self.term);
        codec::put_uri(buf, self.leader.as_ref());
        buf.put_u64(self.commit_index);
        buf.put_u64(self.last_applied);
        buf.put_u64(self.first_index);
        buf.put_u64(self.last_index);
    }
}

impl Decode for ServerStatus {
    fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        let role = match codec::get_u8(buf)? {
            0 => Role::Follower,
            1 => Role::Candidate,
            2 => Role::Leader,
            3 => Role::Observer,
            x => return Err(Error::Protocol(format!("unknown role {x}"))),
        };
        Ok(Self {
            role,
            term: codec::get_u64(buf)?,
            leader: codec::get_uri(buf)?,
            commit_index: codec::get_u64(buf)?,
            last_applied: codec::get_u64(buf)?,
            first_index: codec::get_u64(buf)?,
            last_index: codec::get_u64(buf)?,
        })
    }
}
