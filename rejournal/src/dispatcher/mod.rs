use crate::message::{self, CommandType};
use crate::transport::Frame;
use crate::Error;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, warn};

/// `Ok(None)` sends no response at all.
pub type HandlerResult = Result<Option<Bytes>, Error>;

type Handler = Arc<dyn Fn(Bytes) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Table of handlers keyed by command type.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<u32, Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, command_type: CommandType, f: F)
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let h: Handler = Arc::new(move |payload| f(payload).boxed());
        self.handlers.insert(command_type.code(), h);
    }

    /// Runs the handler for the frame and builds the response frame.
    ///
    /// An unknown command or a failing handler is answered with an error
    /// response. One-way requests are never answered.
    pub async fn dispatch(&self, frame: Frame) -> Option<Frame> {
        let oneway = frame.is_oneway();
        let result = match self.handlers.get(&frame.command_type) {
            Some(h) => {
                let fut = h(frame.payload);
                match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(r) => r,
                    Err(_) => {
                        error!("handler for command({}) panicked", frame.command_type);
                        Err(Error::Internal("handler panicked".into()))
                    }
                }
            }
            None => Err(Error::UnknownCommand(frame.command_type)),
        };

        if oneway {
            if let Err(e) = result {
                warn!("one-way command({}) failed: {e}", frame.command_type);
            }
            return None;
        }

        let body = match result {
            Ok(Some(body)) => Ok(body),
            Ok(None) => return None,
            Err(e) => Err(e),
        };
        Some(Frame {
            flags: 0,
            command_type: message::response_code(frame.command_type),
            request_id: frame.request_id,
            payload: message::encode_response(&body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FLAG_ONEWAY;

    fn frame(command_type: u32, flags: u8) -> Frame {
        Frame {
            flags,
            command_type,
            request_id: 7,
            payload: Bytes::from_static(b"ping"),
        }
    }

    fn dispatcher() -> Dispatcher {
        let mut d = Dispatcher::new();
        d.register(CommandType::LastApplied, |payload| async move {
            Ok(Some(payload))
        });
        d.register(CommandType::GetServers, |_| async move {
            Err(Error::NotLeader { leader: None })
        });
        d.register(CommandType::PullEvents, explode);
        d
    }

    async fn explode(_: Bytes) -> HandlerResult {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_dispatch_ok() {
        let resp = dispatcher().dispatch(frame(7, 0)).await.unwrap();
        assert_eq!(resp.command_type, 8);
        assert_eq!(resp.request_id, 7);
        assert_eq!(
            message::decode_response(resp.payload).unwrap(),
            Bytes::from_static(b"ping")
        );
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let resp = dispatcher().dispatch(frame(99, 0)).await.unwrap();
        assert_eq!(resp.command_type, 100);
        assert_eq!(
            message::decode_response(resp.payload),
            Err(Error::UnknownCommand(99))
        );
    }

    #[tokio::test]
    async fn test_handler_error_and_panic() {
        let d = dispatcher();
        let resp = d.dispatch(frame(9, 0)).await.unwrap();
        assert_eq!(
            message::decode_response(resp.payload),
            Err(Error::NotLeader { leader: None })
        );

        let resp = d.dispatch(frame(15, 0)).await.unwrap();
        assert!(matches!(
            message::decode_response(resp.payload),
            Err(Error::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_oneway_is_silent() {
        let d = dispatcher();
        assert!(d.dispatch(frame(7, FLAG_ONEWAY)).await.is_none());
        assert!(d.dispatch(frame(99, FLAG_ONEWAY)).await.is_none());
    }
}
