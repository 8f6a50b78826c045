// ── Reactive snapshot stream ──
//
// Subscription to a coordinator's snapshot for consumers that prefer
// awaiting changes over registering a callback.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures_util::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::coordinator::CoordinatorSnapshot;

type Slot = Option<Arc<CoordinatorSnapshot>>;

/// A subscription to a coordinator's latest successful snapshot.
///
/// Provides point-in-time access plus change notification via
/// [`changed()`](Self::changed) or by converting into a `Stream`.
pub struct SnapshotStream {
    current: Slot,
    receiver: watch::Receiver<Slot>,
}

impl SnapshotStream {
    pub(crate) fn new(receiver: watch::Receiver<Slot>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Snapshot captured at creation or at the last `changed()`.
    pub fn current(&self) -> Option<&Arc<CoordinatorSnapshot>> {
        self.current.as_ref()
    }

    /// Latest snapshot, which may be newer than `current()`.
    pub fn latest(&self) -> Slot {
        self.receiver.borrow().clone()
    }

    /// Wait for the next snapshot. Returns `None` once the coordinator is gone.
    pub async fn changed(&mut self) -> Option<Arc<CoordinatorSnapshot>> {
        loop {
            self.receiver.changed().await.ok()?;
            let snap = self.receiver.borrow_and_update().clone();
            if let Some(snap) = snap {
                self.current = Some(Arc::clone(&snap));
                return Some(snap);
            }
        }
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> SnapshotWatchStream {
        SnapshotWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter yielding each snapshot. The empty pre-refresh slot is
/// skipped.
pub struct SnapshotWatchStream {
    inner: WatchStream<Slot>,
}

impl Stream for SnapshotWatchStream {
    type Item = Arc<CoordinatorSnapshot>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                Some(Some(snap)) => return Poll::Ready(Some(snap)),
                Some(None) => {}
                None => return Poll::Ready(None),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use futures_util::StreamExt;

    use super::*;
    use crate::model::DeviceState;

    fn snapshot(sequence: u64) -> Slot {
        Some(Arc::new(CoordinatorSnapshot {
            state: Arc::new(DeviceState::default()),
            refreshed_at: Utc::now(),
            sequence,
        }))
    }

    #[tokio::test]
    async fn stream_skips_empty_slot() {
        let (tx, rx) = watch::channel(None);
        let mut stream = SnapshotStream::new(rx).into_stream();

        tx.send_replace(snapshot(1));
        let first = stream.next().await.unwrap();
        assert_eq!(first.sequence, 1);

        drop(tx);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn latest_tracks_sender() {
        let (tx, rx) = watch::channel(snapshot(1));
        let stream = SnapshotStream::new(rx);
        tx.send_replace(snapshot(2));

        assert_eq!(stream.current().unwrap().sequence, 1);
        assert_eq!(stream.latest().unwrap().sequence, 2);
    }
}
