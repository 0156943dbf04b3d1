use super::*;

#[derive(Clone, Debug, PartialEq)]
pub struct AddPullWatchResponse {
    pub subscriber_id: Uuid,
    /// Milliseconds a subscription survives without a pull.
    pub watch_timeout_ms: u64,
}

impl Encode for AddPullWatchResponse {
    fn encode(&self, buf: &mut BytesMut) {
        codec::put_uuid(buf, Some(&self.subscriber_id));
        buf.put_u64(self.watch_timeout_ms);
    }
}

impl Decode for AddPullWatchResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        let subscriber_id =
            codec::get_uuid(buf)?.ok_or_else(|| Error::Protocol("missing subscriber id".into()))?;
        Ok(Self {
            subscriber_id,
            watch_timeout_ms: codec::get_u64(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RemovePullWatch {
    pub subscriber_id: Uuid,
}

impl Encode for RemovePullWatch {
    fn encode(&self, buf: &mut BytesMut) {
        codec::put_uuid(buf, Some(&self.subscriber_id));
    }
}

impl Decode for RemovePullWatch {
    fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        let subscriber_id =
            codec::get_uuid(buf)?.ok_or_else(|| Error::Protocol("missing subscriber id".into()))?;
        Ok(Self { subscriber_id })
    }
}

/// Long-poll for events after `last_event_id`. Events up to it are acknowledged.
#[derive(Clone, Debug, PartialEq)]
pub struct PullEvents {
    pub subscriber_id: Uuid,
    pub last_event_id: u64,
    pub max_wait_ms: u64,
}

impl Encode for PullEvents {
    fn encode(&self, buf: &mut BytesMut) {
        codec::put_uuid(buf, Some(&self.subscriber_id));
        buf.put_u64(self.last_event_id);
        buf.put_u64(self.max_wait_ms);
    }
}

impl Decode for PullEvents {
    fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        let subscriber_id =
            codec::get_uuid(buf)?.ok_or_else(|| Error::Protocol("missing subscriber id".into()))?;
        Ok(Self {
            subscriber_id,
            last_event_id: codec::get_u64(buf)?,
            max_wait_ms: codec::get_u64(buf)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WatchEvent {
    pub id: u64,
    pub payload: Bytes,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct PullEventsResponse {
    pub events: Vec<WatchEvent>,
    /// Events were dropped from the backlog. The subscriber must re-read the state.
    pub resync_required: bool,
}

impl Encode for PullEventsResponse {
    fn encode(&self, buf: &mut BytesMut) {
        codec::put_list(buf, Some(self.events.as_slice()), |buf, e| {
            buf.put_u64(e.id);
            codec::put_bytes(buf, &e.payload);
        });
        codec::put_bool(buf, self.resync_required);
    }
}

impl Decode for PullEventsResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        let events = codec::get_list(buf, |buf| {
            Ok(WatchEvent {
                id: codec::get_u64(buf)?,
                payload: codec::get_bytes(buf)?,
            })
        })?
        .unwrap_or_default();
        Ok(Self {
            events,
            resync_required: codec::get_bool(buf)?,
        })
    }
}
