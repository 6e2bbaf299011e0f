use bytes::Bytes;
use tokio::sync::broadcast::{self, error::RecvError};

pub type ChunkSender = broadcast::Sender<Bytes>;
pub type ChunkReceiver = broadcast::Receiver<Bytes>;

/// Raw chunks held per subscriber before the oldest ones are dropped.
pub const DEFAULT_TAP_CAPACITY: usize = 256;

/// Log "lagging" at most every N dropped chunks.
const DROP_LOG_INTERVAL: u64 = 64;

/// Duplication point between the active source and every client pipeline.
///
/// `push` never waits on subscribers. A subscriber that falls more than the
/// tap capacity behind loses its oldest chunks and carries on from the
/// oldest chunk still retained.
#[derive(Clone)]
pub struct BroadcastTap {
    tx: ChunkSender,
}

impl BroadcastTap {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Delivers `chunk` to every live subscriber, returning how many got it.
    pub fn push(&self, chunk: Bytes) -> usize {
        if chunk.is_empty() {
            return self.tx.receiver_count();
        }
        // No receivers is not an error for a live broadcast.
        self.tx.send(chunk).unwrap_or(0)
    }

    /// New subscription that sees every chunk pushed from now on.
    pub fn subscribe(&self) -> TapSubscription {
        TapSubscription {
            rx: self.tx.subscribe(),
            dropped: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastTap {
    fn default() -> Self {
        Self::new(DEFAULT_TAP_CAPACITY)
    }
}

/// One client's read handle into the tap. Dropping it unsubscribes.
pub struct TapSubscription {
    rx: ChunkReceiver,
    dropped: u64,
}

impl TapSubscription {
    /// Next chunk in push order, or `None` once the tap is gone.
    pub async fn recv(&mut self) -> Option<Bytes> {
        loop {
            match self.rx.recv().await {
                Ok(chunk) => return Some(chunk),
                Err(RecvError::Lagged(n)) => self.note_lag(n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-waiting variant of [`recv`](Self::recv); `None` when nothing is queued.
    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Option<Bytes> {
        loop {
            match self.rx.try_recv() {
                Ok(chunk) => return Some(chunk),
                Err(broadcast::error::TryRecvError::Lagged(n)) => self.note_lag(n),
                Err(_) => return None,
            }
        }
    }

    /// Chunks this subscriber lost by falling behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Releases the subscription and everything still queued for it.
    pub fn unsubscribe(self) {}

    fn note_lag(&mut self, n: u64) {
        let before = self.dropped;
        self.dropped += n;
        if before / DROP_LOG_INTERVAL != self.dropped / DROP_LOG_INTERVAL || before == 0 {
            log::debug!(
                "tap subscriber lagging, dropped {} chunks so far",
                self.dropped
            );
        }
    }
}

#[cfg(test)]
#[path = "tap_test.rs"]
mod tap_test;
