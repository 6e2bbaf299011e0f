use std::sync::Arc;

use crate::{
    encoder::{EncoderFactory, PcmFormat},
    error::Result,
    icy::{ICY_METAINT, IcyFramer},
    input::AudioSource,
    metadata::MetadataRegister,
    session::{self, ClientStream, DEFAULT_CLIENT_QUEUE, SessionManager, SessionParts},
    switchboard::Switchboard,
    tap::{BroadcastTap, DEFAULT_TAP_CAPACITY},
};

pub const DEFAULT_NAME: &str = "Nicercast";

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Station name, sent as the title while none is set.
    pub name: String,
    pub format: PcmFormat,
    pub metaint: usize,
    pub tap_capacity: usize,
    pub client_queue: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            format: PcmFormat::default(),
            metaint: ICY_METAINT,
            tap_capacity: DEFAULT_TAP_CAPACITY,
            client_queue: DEFAULT_CLIENT_QUEUE,
        }
    }
}

/// One broadcast: a swappable source fanned out to independently encoded clients.
///
/// Must be created inside a Tokio runtime; the ingestion task starts immediately.
pub struct CastBus {
    config: BusConfig,
    fallback_title: Arc<str>,
    tap: BroadcastTap,
    switchboard: Switchboard,
    metadata: MetadataRegister,
    sessions: Arc<SessionManager>,
    encoders: Arc<dyn EncoderFactory>,
}

impl CastBus {
    pub fn new(config: BusConfig, encoders: Arc<dyn EncoderFactory>) -> Self {
        let tap = BroadcastTap::new(config.tap_capacity);
        let switchboard = Switchboard::new(tap.clone(), encoders.input_alignment(config.format));
        Self {
            fallback_title: Arc::from(config.name.as_str()),
            config,
            tap,
            switchboard,
            metadata: MetadataRegister::new(),
            sessions: Arc::new(SessionManager::new()),
            encoders,
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Replaces the input, keeping every client connected.
    pub async fn set_source(&self, source: AudioSource) -> Result<()> {
        self.switchboard.set_source(source).await?;
        Ok(())
    }

    pub async fn detach_source(&self) -> Result<()> {
        self.switchboard.detach().await?;
        Ok(())
    }

    pub async fn source_name(&self) -> Result<Option<String>> {
        self.switchboard.current().await
    }

    pub fn set_metadata(&self, title: impl Into<String>) {
        self.metadata.set(title);
    }

    pub fn metadata(&self) -> &MetadataRegister {
        &self.metadata
    }

    /// Opens a client pipeline. With `accepts_metadata` the returned stream is
    /// ICY-framed at the configured interval.
    ///
    /// The subscription is taken before this returns, so every chunk pushed
    /// afterwards reaches the client.
    pub fn open_session(&self, accepts_metadata: bool) -> Result<ClientStream> {
        let encoder = self.encoders.create(self.config.format)?;
        let framer = accepts_metadata.then(|| IcyFramer::new(self.config.metaint));
        let parts = SessionParts {
            subscription: self.tap.subscribe(),
            encoder,
            framer,
            metadata: self.metadata.clone(),
            fallback_title: Arc::clone(&self.fallback_title),
            queue: self.config.client_queue,
        };
        Ok(session::spawn_session(&self.sessions, parts))
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn listener_count(&self) -> usize {
        self.sessions.active_count()
    }

    /// Closes every client and stops ingestion.
    pub fn stop(&self) {
        self.switchboard.stop();
        self.sessions.close_all();
    }
}

impl Drop for CastBus {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "bus_test.rs"]
mod bus_test;
