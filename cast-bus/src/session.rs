use std::{
    collections::HashMap,
    fmt, io,
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
    task::{Context, Poll},
};

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    encoder::Encoder, icy::IcyFramer, metadata::MetadataRegister, tap::TapSubscription,
};

pub type SessionId = u64;

/// Encoded chunks queued towards one client socket.
pub const DEFAULT_CLIENT_QUEUE: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Streaming,
    Closed,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Connecting,
            1 => SessionState::Streaming,
            _ => SessionState::Closed,
        }
    }
}

/// Why a session reached `Closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Socket closed or the body stream was dropped.
    ClientGone,
    /// This client's encoder failed; nobody else is affected.
    EncoderFault(String),
    /// The tap went away with the bus.
    TapClosed,
    /// Closed by the server (stop, explicit close).
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientGone => write!(f, "client gone"),
            CloseReason::EncoderFault(e) => write!(f, "encoder fault: {}", e),
            CloseReason::TapClosed => write!(f, "tap closed"),
            CloseReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Shared view of a session's state, readable after the session is gone.
#[derive(Debug)]
pub struct SessionStatus {
    state: AtomicU8,
}

impl SessionStatus {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Connecting as u8),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn streaming(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Connecting as u8,
                SessionState::Streaming as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Moves to `Closed`. True only for the call that made the transition.
    fn close(&self) -> bool {
        self.state.swap(SessionState::Closed as u8, Ordering::AcqRel) != SessionState::Closed as u8
    }
}

struct SessionEntry {
    cancel: CancellationToken,
    status: Arc<SessionStatus>,
    metadata: bool,
}

/// Lifecycle manager: the registry of live sessions.
///
/// A session is registered when it starts streaming and removed exactly once
/// when it closes, whichever path closes it.
pub struct SessionManager {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn next_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn register(&self, id: SessionId, entry: SessionEntry) {
        let mut sessions = self.lock();
        sessions.insert(id, entry);
        log::debug!("session {} registered, {} live", id, sessions.len());
    }

    fn release(&self, id: SessionId) {
        let mut sessions = self.lock();
        if sessions.remove(&id).is_some() {
            log::debug!("session {} released, {} live", id, sessions.len());
        }
    }

    /// Asks a session to close. Safe to call any number of times.
    pub fn close(&self, id: SessionId) -> bool {
        match self.lock().get(&id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn close_all(&self) {
        let sessions = self.lock();
        for entry in sessions.values() {
            entry.cancel.cancel();
        }
        if !sessions.is_empty() {
            log::info!("closing {} sessions", sessions.len());
        }
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn metadata_count(&self) -> usize {
        self.lock().values().filter(|e| e.metadata).count()
    }

    #[cfg(test)]
    pub(crate) fn state(&self, id: SessionId) -> Option<SessionState> {
        self.lock().get(&id).map(|e| e.status.state())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, SessionEntry>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything one client's pipeline needs.
pub(crate) struct SessionParts {
    pub subscription: TapSubscription,
    pub encoder: Box<dyn Encoder>,
    pub framer: Option<IcyFramer>,
    pub metadata: MetadataRegister,
    pub fallback_title: Arc<str>,
    pub queue: usize,
}

/// Per-client encode pipeline: tap subscription -> encoder -> framer -> socket queue.
struct ClientSession {
    id: SessionId,
    subscription: TapSubscription,
    encoder: Box<dyn Encoder>,
    framer: Option<IcyFramer>,
    metadata: MetadataRegister,
    fallback_title: Arc<str>,
    out: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    scratch: BytesMut,
}

impl ClientSession {
    async fn run(mut self) -> CloseReason {
        let reason = self.pump().await;
        if reason == CloseReason::Shutdown {
            self.flush_tail();
        }
        reason
    }

    async fn pump(&mut self) -> CloseReason {
        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => return CloseReason::Shutdown,
                _ = self.out.closed() => return CloseReason::ClientGone,
                chunk = self.subscription.recv() => match chunk {
                    Some(chunk) => chunk,
                    None => return CloseReason::TapClosed,
                },
            };

            let encoded = match self.encoder.encode(&chunk) {
                Ok(encoded) => encoded,
                Err(e) => return CloseReason::EncoderFault(e.to_string()),
            };
            if encoded.is_empty() {
                continue;
            }

            let framed = self.frame(encoded);
            tokio::select! {
                _ = self.cancel.cancelled() => return CloseReason::Shutdown,
                sent = self.out.send(framed) => {
                    if sent.is_err() {
                        return CloseReason::ClientGone;
                    }
                }
            }
        }
    }

    /// Queues whatever the encoder still buffers, if the client has room for it.
    fn flush_tail(&mut self) {
        let tail = match self.encoder.flush() {
            Ok(tail) => tail,
            Err(e) => {
                log::debug!("session {} flush failed: {}", self.id, e);
                return;
            }
        };
        if tail.is_empty() {
            return;
        }
        let framed = self.frame(tail);
        if self.out.try_send(framed).is_err() {
            log::debug!("session {} dropped encoder tail, queue full", self.id);
        }
    }

    fn frame(&mut self, encoded: Bytes) -> Bytes {
        let Some(framer) = self.framer.as_mut() else {
            return encoded;
        };
        let title = self.metadata.title_or(&self.fallback_title);
        self.scratch.reserve(encoded.len() + 1);
        framer.write(&encoded, &title, &mut self.scratch);
        self.scratch.split().freeze()
    }
}

/// Starts a session task and returns the client's side of it.
pub(crate) fn spawn_session(manager: &Arc<SessionManager>, parts: SessionParts) -> ClientStream {
    let id = manager.next_id();
    let status = Arc::new(SessionStatus::new());
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(parts.queue.max(1));
    let metaint = parts.framer.as_ref().map(IcyFramer::metaint);

    manager.register(
        id,
        SessionEntry {
            cancel: cancel.clone(),
            status: Arc::clone(&status),
            metadata: metaint.is_some(),
        },
    );
    status.streaming();

    let session = ClientSession {
        id,
        subscription: parts.subscription,
        encoder: parts.encoder,
        framer: parts.framer,
        metadata: parts.metadata,
        fallback_title: parts.fallback_title,
        out: tx,
        cancel: cancel.clone(),
        scratch: BytesMut::new(),
    };

    let guard = SessionGuard {
        id,
        manager: Arc::clone(manager),
        status: Arc::clone(&status),
    };
    log::info!(
        "session {} streaming (metadata: {})",
        id,
        if metaint.is_some() { "on" } else { "off" }
    );
    tokio::spawn(async move {
        let id = session.id;
        let reason = session.run().await;
        log::info!("session {} closed: {}", id, reason);
        drop(guard);
    });

    ClientStream {
        id,
        rx,
        cancel,
        status,
        metaint,
    }
}

/// Releases the registry entry even if the session task is aborted.
struct SessionGuard {
    id: SessionId,
    manager: Arc<SessionManager>,
    status: Arc<SessionStatus>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.status.close();
        self.manager.release(self.id);
    }
}

/// The client's end of a session: the response body stream.
///
/// Dropping it (the HTTP layer does so when the socket closes) closes the
/// queue, which the session task observes immediately and tears down.
pub struct ClientStream {
    id: SessionId,
    rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
    status: Arc<SessionStatus>,
    metaint: Option<usize>,
}

impl ClientStream {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Negotiated metadata interval, `None` for plain clients.
    pub fn metaint(&self) -> Option<usize> {
        self.metaint
    }

    pub fn state(&self) -> SessionState {
        self.status.state()
    }

    /// Waits for the next chunk destined for the socket.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Closes the session. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Stream for ClientStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx).map(|opt| opt.map(Ok))
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
