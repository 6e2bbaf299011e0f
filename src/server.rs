use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use cast_bus::{AudioSource, BusConfig, CastBus, CastError, EncoderFactory, Result};
use tokio::{net::TcpListener, sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{api, handler::AppState};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Station name, the stream title until one is set.
    pub name: String,
    pub bind: IpAddr,
    /// Host written into playlists instead of the detected local address.
    pub public_host: Option<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            name: cast_bus::bus::DEFAULT_NAME.to_string(),
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            public_host: None,
        }
    }
}

struct Running {
    port: u16,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Control surface of a broadcast: input, title, and the HTTP listener.
///
/// The broadcast itself outlives `stop`; only the listener and its sessions
/// go away, so the same server may be started again.
pub struct CastServer {
    bus: Arc<CastBus>,
    options: ServerOptions,
    running: Mutex<Option<Running>>,
}

impl CastServer {
    pub fn new(options: ServerOptions, encoders: Arc<dyn EncoderFactory>) -> Self {
        let config = BusConfig {
            name: options.name.clone(),
            ..BusConfig::default()
        };
        Self {
            bus: Arc::new(CastBus::new(config, encoders)),
            options,
            running: Mutex::new(None),
        }
    }

    pub fn bus(&self) -> &Arc<CastBus> {
        &self.bus
    }

    /// Replaces the input. Connected listeners keep their connections.
    pub async fn set_input_stream(&self, source: AudioSource) -> Result<()> {
        self.bus.set_source(source).await
    }

    pub fn set_metadata(&self, title: impl Into<String>) {
        self.bus.set_metadata(title);
    }

    /// Binds `port`, or an ephemeral one with `None`, and returns the bound port.
    pub async fn start(&self, port: Option<u16>) -> Result<u16> {
        let mut running = self.running.lock().await;
        if let Some(r) = running.as_ref() {
            return Err(CastError::AlreadyRunning(r.port));
        }

        let addr = SocketAddr::new(self.options.bind, port.unwrap_or(0));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| CastError::ServerStart { addr, source })?;
        let port = listener
            .local_addr()
            .map_err(|source| CastError::ServerStart { addr, source })?
            .port();

        let cancel = CancellationToken::new();
        let state = AppState {
            bus: Arc::clone(&self.bus),
            port,
            public_host: self.options.public_host.clone(),
            shutdown: cancel.clone(),
        };
        let handle = api::start_api_server(listener, state, cancel.clone());
        *running = Some(Running {
            port,
            cancel,
            handle,
        });
        Ok(port)
    }

    /// Closes every listener connection and the socket. Does nothing when not running.
    pub async fn stop(&self) {
        let Some(mut running) = self.running.lock().await.take() else {
            return;
        };
        // Cancel first: a listen handler that registers after the sweep below
        // sees the token and closes its own session.
        running.cancel.cancel();
        self.bus.sessions().close_all();
        match tokio::time::timeout(STOP_TIMEOUT, &mut running.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("API server task on port {} failed: {}", running.port, e),
            Err(_) => {
                log::warn!("API server on port {} did not stop in time, aborting", running.port);
                running.handle.abort();
                self.bus.sessions().close_all();
            }
        }
    }

    pub async fn port(&self) -> Option<u16> {
        self.running.lock().await.as_ref().map(|r| r.port)
    }

    pub fn listener_count(&self) -> usize {
        self.bus.listener_count()
    }
}

impl Drop for CastServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
        self.bus.stop();
    }
}

#[cfg(test)]
#[path = "server_test.rs"]
mod server_test;
