use super::*;

use anyhow::bail;
use futures::TryStreamExt;
use rejournal::{EventSink, SnapshotStream, StateMachine};
use std::sync::RwLock;

/// Snapshots are cut into chunks of this size so that restoring one walks a multi-chunk stream.
const SNAPSHOT_CHUNK: usize = 4;

/// A counter that publishes an `AppEvent` on every addition.
#[derive(Default)]
pub struct CounterApp {
    state: RwLock<AppState>,
}

impl CounterApp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AppState {
        *self.state.read().unwrap()
    }
}

#[async_trait::async_trait]
impl StateMachine for CounterApp {
    async fn apply(&self, index: LogIndex, command: &[u8], events: &EventSink) -> Result<Bytes> {
        let req = AppWriteRequest::deserialize(command)?;
        let n = match req {
            AppWriteRequest::FetchAdd { n } => n,
            AppWriteRequest::Fail => bail!("rejected at {index}"),
        };
        let mut cur = self.state.write().unwrap();
        let old = cur.counter;
        cur.counter += n;
        cur.n_applied += 1;
        events.publish(
            AppEvent {
                index,
                old,
                new: cur.counter,
            }
            .serialize(),
        );
        Ok(bincode::serialize(&old)?.into())
    }

    async fn read(&self, query: &[u8]) -> Result<Bytes> {
        match AppReadRequest::deserialize(query)? {
            AppReadRequest::Read => Ok(self.state().serialize()),
        }
    }

    async fn snapshot(&self) -> Result<SnapshotStream> {
        let bytes = self.state().serialize();
        let chunks: Vec<Result<Bytes>> = bytes
            .chunks(SNAPSHOT_CHUNK)
            .map(|x| Ok(Bytes::copy_from_slice(x)))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn restore(&self, snapshot: SnapshotStream) -> Result<()> {
        let chunks: Vec<Bytes> = snapshot.try_collect().await?;
        let bytes = chunks.concat();
        let new_state = AppState::deserialize(&bytes)?;
        *self.state.write().unwrap() = new_state;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_snapshot_restore() {
        let app = CounterApp::new();
        *app.state.write().unwrap() = AppState {
            counter: 1234567,
            n_applied: 89,
        };
        let st = app.snapshot().await.unwrap();
        let n_chunks = {
            let st = app.snapshot().await.unwrap();
            st.count().await
        };
        assert!(n_chunks > 1);

        let other = CounterApp::new();
        other.restore(st).await.unwrap();
        assert_eq!(other.state(), app.state());
    }
}
