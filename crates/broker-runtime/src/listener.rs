//! Listen addresses and accept loops.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::connection::{serve_connection, ConnectionContext};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported listen address '{0}', expected tcp://host:port or unix:/path")]
pub struct ListenAddrError(String);

/// A parsed `listen` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    /// `tcp://host:port`
    Tcp(String),
    /// `unix:/path` or `unix:///path`
    Unix(PathBuf),
}

impl FromStr for ListenAddr {
    type Err = ListenAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(addr) = s.strip_prefix("tcp://") {
            if addr.rsplit_once(':').is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok()) {
                return Ok(ListenAddr::Tcp(addr.to_string()));
            }
        } else if let Some(path) = s.strip_prefix("unix:") {
            let path = path.strip_prefix("//").unwrap_or(path);
            if !path.is_empty() {
                return Ok(ListenAddr::Unix(PathBuf::from(path)));
            }
        }
        Err(ListenAddrError(s.to_string()))
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Tcp(addr) => write!(f, "tcp://{}", addr),
            ListenAddr::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// A bound listener ready for [`Listener::run`].
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener, PathBuf),
}

impl Listener {
    /// Bind an address. Returns the listener and the address actually bound,
    /// which differs from `addr` for TCP port 0.
    pub async fn bind(addr: &ListenAddr) -> std::io::Result<(Self, ListenAddr)> {
        match addr {
            ListenAddr::Tcp(host_port) => {
                let listener = TcpListener::bind(host_port.as_str()).await?;
                let local = ListenAddr::Tcp(listener.local_addr()?.to_string());
                Ok((Listener::Tcp(listener), local))
            }
            #[cfg(unix)]
            ListenAddr::Unix(path) => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                let listener = tokio::net::UnixListener::bind(path)?;
                Ok((Listener::Unix(listener, path.clone()), addr.clone()))
            }
            #[cfg(not(unix))]
            ListenAddr::Unix(_) => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix sockets are not available on this platform",
            )),
        }
    }

    /// Accept connections until shutdown, one task per connection.
    pub async fn run(self, context: Arc<ConnectionContext>, mut shutdown: watch::Receiver<bool>) {
        let connection_shutdown = shutdown.clone();
        loop {
            tokio::select! {
                accepted = self.accept(&context, &connection_shutdown) => {
                    if let Err(e) = accepted {
                        warn!(error = %e, "Accept failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        #[cfg(unix)]
        if let Listener::Unix(_, path) = &self {
            let _ = std::fs::remove_file(path);
        }
        info!("Listener stopped");
    }

    async fn accept(
        &self,
        context: &Arc<ConnectionContext>,
        shutdown: &watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                tokio::spawn(serve_connection(
                    stream,
                    peer.to_string(),
                    Arc::clone(context),
                    shutdown.clone(),
                ));
            }
            #[cfg(unix)]
            Listener::Unix(listener, path) => {
                let (stream, _) = listener.accept().await?;
                tokio::spawn(serve_connection(
                    stream,
                    path.display().to_string(),
                    Arc::clone(context),
                    shutdown.clone(),
                ));
            }
        }
        Ok(())
    }
}
