//! Control-channel listener: accepts connections and spawns one session
//! task per connection.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::server::session::Session;

/// An FTP control-channel server.
///
/// Owns no session state itself: each accepted connection gets its own
/// [`Session`], sharing only the immutable [`ServerConfig`].
pub struct FtpServer {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    shutdown: Arc<Notify>,
}

impl FtpServer {
    /// Bind the control-channel listener at `config.bind_host:bind_port`.
    pub async fn bind(config: ServerConfig) -> ServerResult<Self> {
        let addr = format!("{}:{}", config.bind_host, config.bind_port);
        let listener = TcpListener::bind(&addr).await?;
        info!(%addr, "listening for FTP control connections");
        Ok(Self {
            listener,
            config: Arc::new(config),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// A handle whose `notify_one()` causes [`FtpServer::run`] to stop
    /// accepting new connections and return, even while blocked waiting
    /// on the next accept.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// The address the listener actually bound to (useful when
    /// `bind_port` is `0`, e.g. in tests).
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until a [`FtpServer::shutdown_handle`] fires,
    /// spawning one session task per connection. Each session's own
    /// errors are logged and otherwise swallowed; one misbehaving
    /// connection never brings down the listener.
    pub async fn run(self) -> ServerResult<()> {
        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = self.shutdown.notified() => return Ok(()),
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };
            let local_addr = match stream.local_addr() {
                Ok(addr) => addr,
                Err(e) => {
                    warn!(error = %e, "failed to read local address for accepted connection");
                    continue;
                }
            };

            let config = Arc::clone(&self.config);
            tokio::spawn(async move {
                let session = Session::new(stream, peer_addr, local_addr, config);
                if let Err(e) = session.serve().await {
                    debug!(%peer_addr, error = %e, "session ended with error");
                }
            });
        }
    }
}
