use super::*;

use crate::dispatcher::Dispatcher;
use crate::process::ThreadHandle;
use futures::{SinkExt, StreamExt};
use std::sync::Weak;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

/// Accepts connections until the listener fails.
///
/// The server only holds a weak reference to the dispatcher. Once the owner
/// drops it, every connection is closed on its next frame.
pub async fn serve(
    listener: TcpListener,
    dispatcher: Weak<Dispatcher>,
    options: TransportOptions,
) -> anyhow::Result<()> {
    loop {
        let (stream, remote) = listener.accept().await?;
        if dispatcher.strong_count() == 0 {
            info!("dispatcher is gone. stop accepting");
            return Ok(());
        }
        debug!("accepted connection from {remote}");
        let dispatcher = dispatcher.clone();
        let options = options.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, dispatcher, options).await {
                debug!("connection from {remote} closed: {e}");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    dispatcher: Weak<Dispatcher>,
    options: TransportOptions,
) -> Result<(), Error> {
    stream.set_nodelay(true)?;
    let (r, w) = stream.into_split();
    let reader = FramedRead::new(r, FrameCodec::new(options.max_frame_size));

    let (tx, mut rx) = mpsc::channel::<Frame>(options.send_queue_capacity);
    let max_frame_size = options.max_frame_size;
    let writer = tokio::spawn(async move {
        let mut writer = FramedWrite::new(w, FrameCodec::new(max_frame_size));
        while let Some(frame) = rx.recv().await {
            writer.feed(frame).await?;
            while let Ok(frame) = rx.try_recv() {
                writer.feed(frame).await?;
            }
            writer.flush().await?;
        }
        Ok::<(), Error>(())
    });
    let _writer = ThreadHandle(writer.abort_handle());

    // Handlers start in arrival order and at most `max_in_flight` run at once.
    // Responses go out as they complete.
    let dispatched = reader
        .map(|frame| dispatch(dispatcher.clone(), frame))
        .buffer_unordered(options.max_in_flight.max(1));
    let mut dispatched = std::pin::pin!(dispatched);

    while let Some(resp) = dispatched.next().await {
        if let Some(resp) = resp? {
            if tx.send(resp).await.is_err() {
                warn!("response dropped. connection is closed");
            }
        }
    }
    Ok(())
}

async fn dispatch(
    dispatcher: Weak<Dispatcher>,
    frame: Result<Frame, Error>,
) -> Result<Option<Frame>, Error> {
    let frame = frame?;
    let Some(dispatcher) = dispatcher.upgrade() else {
        return Err(Error::NodeStopped);
    };
    Ok(dispatcher.dispatch(frame).await)
}
