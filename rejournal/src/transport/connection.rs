use super::*;

use crate::process::ThreadHandle;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};

type Waiter = oneshot::Sender<Result<Frame, Error>>;

struct Shared {
    peer: NodeAddress,
    pending: Mutex<HashMap<u64, Waiter>>,
    closed: AtomicBool,
}

impl Shared {
    fn complete(&self, frame: Frame) {
        let waiter = self.pending.lock().remove(&frame.request_id);
        match waiter {
            Some(tx) => {
                tx.send(Ok(frame)).ok();
            }
            None => {
                debug!(
                    "drop response to unknown request({}) from {}",
                    frame.request_id, self.peer
                );
            }
        }
    }

    /// Marks the connection closed and fails every outstanding request with `e`.
    fn fail_all(&self, e: Error) {
        self.closed.store(true, Ordering::SeqCst);
        let waiters: Vec<Waiter> = self.pending.lock().drain().map(|(_, tx)| tx).collect();
        for tx in waiters {
            tx.send(Err(e.clone())).ok();
        }
    }
}

/// Removes the waiter when the caller stops waiting for any reason.
struct PendingGuard<'a> {
    shared: &'a Shared,
    request_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending.lock().remove(&self.request_id);
    }
}

/// A multiplexed client connection to one peer.
///
/// Requests are written in the order they are queued and responses are
/// matched back by request id, so many requests can be outstanding at once.
/// The TCP connection is established lazily by a background task. When it
/// breaks, every outstanding request fails and the connection stays closed.
#[derive(Clone)]
pub struct Connection {
    tx: mpsc::Sender<Frame>,
    shared: Arc<Shared>,
    next_request_id: Arc<AtomicU64>,
    back_pressure: BackPressure,
    max_frame_size: usize,
    _driver: Arc<ThreadHandle>,
}

impl Connection {
    pub fn open(peer: NodeAddress, options: &TransportOptions) -> Self {
        let (tx, rx) = mpsc::channel(options.send_queue_capacity);
        let shared = Arc::new(Shared {
            peer,
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });
        let hdl = tokio::spawn(drive(shared.clone(), rx, options.clone())).abort_handle();
        Self {
            tx,
            shared,
            next_request_id: Arc::new(AtomicU64::new(1)),
            back_pressure: options.back_pressure,
            max_frame_size: options.max_frame_size,
            _driver: Arc::new(ThreadHandle(hdl)),
        }
    }

    pub fn peer(&self) -> &NodeAddress {
        &self.shared.peer
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn ptr_eq(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn prepare(&self, frame: &mut Frame) -> Result<(), Error> {
        if frame.payload.len() > self.max_frame_size {
            return Err(Error::Protocol(format!(
                "payload of {} bytes exceeds frame limit {}",
                frame.payload.len(),
                self.max_frame_size
            )));
        }
        if frame.request_id == 0 {
            frame.request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn enqueue(&self, frame: Frame, deadline: Instant) -> Result<(), Error> {
        match self.back_pressure {
            BackPressure::Fail => self.tx.try_send(frame).map_err(|e| match e {
                TrySendError::Full(_) => Error::Overloaded,
                TrySendError::Closed(_) => Error::ConnectionLost,
            }),
            BackPressure::Block => match tokio::time::timeout_at(deadline, self.tx.send(frame)).await
            {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(Error::ConnectionLost),
                Err(_) => Err(Error::Timeout),
            },
        }
    }

    /// Sends a request and waits for the response with the same request id.
    /// A request id of 0 is replaced by a fresh one.
    pub async fn send(&self, mut frame: Frame, timeout: Duration) -> Result<Frame, Error> {
        let deadline = Instant::now() + timeout;
        self.prepare(&mut frame)?;
        let request_id = frame.request_id;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(request_id, tx);
        let _guard = PendingGuard {
            shared: &self.shared,
            request_id,
        };
        if self.is_closed() {
            return Err(Error::ConnectionLost);
        }

        self.enqueue(frame, deadline).await?;

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Queues a one-way request. Returns once it is queued for writing.
    pub async fn send_oneway(&self, mut frame: Frame, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        frame.flags |= FLAG_ONEWAY;
        self.prepare(&mut frame)?;
        if self.is_closed() {
            return Err(Error::ConnectionLost);
        }
        self.enqueue(frame, deadline).await
    }
}

async fn drive(shared: Arc<Shared>, mut rx: mpsc::Receiver<Frame>, options: TransportOptions) {
    let e = match run(&shared, &mut rx, &options).await {
        Ok(()) => Error::ConnectionLost,
        Err(e) => e,
    };
    debug!("connection to {} closed: {e}", shared.peer);
    shared.fail_all(e);
}

async fn run(
    shared: &Shared,
    rx: &mut mpsc::Receiver<Frame>,
    options: &TransportOptions,
) -> Result<(), Error> {
    let authority = shared
        .peer
        .authority()
        .map_err(|e| Error::Protocol(e.to_string()))?;
    let stream = tokio::time::timeout(options.connect_timeout, TcpStream::connect(&authority))
        .await
        .map_err(|_| Error::Timeout)??;
    stream.set_nodelay(true)?;

    let (r, w) = stream.into_split();
    let mut reader = FramedRead::new(r, FrameCodec::new(options.max_frame_size));
    let mut writer = FramedWrite::new(w, FrameCodec::new(options.max_frame_size));

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else {
                    return Ok(());
                };
                writer.feed(frame).await?;
                while let Ok(frame) = rx.try_recv() {
                    writer.feed(frame).await?;
                }
                writer.flush().await?;
            }
            frame = reader.next() => {
                match frame {
                    Some(frame) => shared.complete(frame?),
                    None => return Err(Error::ConnectionLost),
                }
            }
        }
    }
}
