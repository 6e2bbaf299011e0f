use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{CastError, Result},
    input::AudioSource,
    tap::BroadcastTap,
};

/// Owns the single active source and pumps it into the tap.
///
/// All source changes go through one ingestion task, so a replacement is
/// atomic with respect to pushes: once `set_source` returns, the previous
/// source has been dropped and none of its remaining bytes reach the tap.
///
/// Every chunk pushed is a whole number of `frame_size` units. A partial
/// frame is held back until the same source completes it and is dropped
/// together with that source, so a switch never splits a sample.
pub struct Switchboard {
    cancel: CancellationToken,
    tx: mpsc::Sender<SwitchCommand>,
}

enum SwitchCommand {
    SetSource {
        source: AudioSource,
        result: oneshot::Sender<Option<String>>,
    },
    Detach {
        result: oneshot::Sender<Option<String>>,
    },
    Current {
        result: oneshot::Sender<Option<String>>,
    },
}

enum Event {
    Command(SwitchCommand),
    Chunk(Option<std::io::Result<Bytes>>),
}

/// The active source and the tail of its last chunk that did not fill a frame.
struct Attached {
    source: AudioSource,
    remainder: BytesMut,
}

impl Attached {
    fn new(source: AudioSource) -> Self {
        Self {
            source,
            remainder: BytesMut::new(),
        }
    }

    fn name(&self) -> &str {
        self.source.name()
    }

    /// Whole frames available after appending `chunk`, if any.
    fn align(&mut self, chunk: Bytes, frame_size: usize) -> Option<Bytes> {
        if frame_size <= 1 {
            return Some(chunk);
        }
        if self.remainder.is_empty() && chunk.len() % frame_size == 0 {
            return Some(chunk);
        }
        self.remainder.extend_from_slice(&chunk);
        let whole = self.remainder.len() - self.remainder.len() % frame_size;
        if whole == 0 {
            return None;
        }
        Some(self.remainder.split_to(whole).freeze())
    }
}

impl Switchboard {
    /// Starts the ingestion task. `frame_size` is the byte unit chunks are
    /// aligned to before they reach the tap; 1 disables alignment.
    pub fn new(tap: BroadcastTap, frame_size: usize) -> Self {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(16);

        let cancel_clone = cancel.clone();
        tokio::spawn(async move { Self::inner_loop(cancel_clone, rx, tap, frame_size).await });
        Self { cancel, tx }
    }

    async fn inner_loop(
        cancel: CancellationToken,
        mut rx: mpsc::Receiver<SwitchCommand>,
        tap: BroadcastTap,
        frame_size: usize,
    ) {
        let mut current: Option<Attached> = None;
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                cmd = rx.recv() => match cmd {
                    Some(cmd) => Event::Command(cmd),
                    None => break,
                },
                chunk = next_chunk(&mut current), if current.is_some() => Event::Chunk(chunk),
            };

            match event {
                Event::Command(cmd) => Self::handle_command(&mut current, cmd),
                Event::Chunk(Some(Ok(chunk))) => {
                    let aligned = current
                        .as_mut()
                        .and_then(|attached| attached.align(chunk, frame_size));
                    if let Some(aligned) = aligned {
                        tap.push(aligned);
                    }
                }
                Event::Chunk(Some(Err(e))) => {
                    if let Some(source) = current.take() {
                        log::warn!("source {} failed, detaching: {}", source.name(), e);
                    }
                }
                Event::Chunk(None) => {
                    if let Some(source) = current.take() {
                        log::info!("source {} ended", source.name());
                    }
                }
            }
        }
        log::debug!("switchboard stopped");
    }

    fn handle_command(current: &mut Option<Attached>, cmd: SwitchCommand) {
        match cmd {
            SwitchCommand::SetSource { source, result } => {
                log::info!("attaching source {}", source.name());
                let previous = current
                    .replace(Attached::new(source))
                    .map(|s| s.name().to_string());
                if let Some(name) = &previous {
                    log::info!("source {} replaced, unread bytes discarded", name);
                }
                let _ = result.send(previous);
            }
            SwitchCommand::Detach { result } => {
                let previous = current.take().map(|s| s.name().to_string());
                if let Some(name) = &previous {
                    log::info!("source {} detached", name);
                }
                let _ = result.send(previous);
            }
            SwitchCommand::Current { result } => {
                let _ = result.send(current.as_ref().map(|s| s.name().to_string()));
            }
        }
    }

    /// Attaches `source`, dropping the previous one. Returns the previous source's name.
    pub async fn set_source(&self, source: AudioSource) -> Result<Option<String>> {
        let (tx, rx) = oneshot::channel();
        self.send(SwitchCommand::SetSource { source, result: tx }).await?;
        rx.await.map_err(|_| CastError::Stopped)
    }

    /// Drops the active source without a replacement.
    pub async fn detach(&self) -> Result<Option<String>> {
        let (tx, rx) = oneshot::channel();
        self.send(SwitchCommand::Detach { result: tx }).await?;
        rx.await.map_err(|_| CastError::Stopped)
    }

    /// Name of the source currently attached, if any.
    pub async fn current(&self) -> Result<Option<String>> {
        let (tx, rx) = oneshot::channel();
        self.send(SwitchCommand::Current { result: tx }).await?;
        rx.await.map_err(|_| CastError::Stopped)
    }

    async fn send(&self, cmd: SwitchCommand) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(CastError::Stopped);
        }
        self.tx.send(cmd).await.map_err(|_| CastError::Stopped)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    #[cfg(test)]
    pub(crate) fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Switchboard {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn next_chunk(current: &mut Option<Attached>) -> Option<std::io::Result<Bytes>> {
    match current {
        Some(attached) => attached.source.next().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "switchboard_test.rs"]
mod switchboard_test;
