//! Blocking HTTP/2 listener.
//!
//! Accepts connections and runs each one on its own thread. All connections
//! share one handler and one worker pool.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use super::connection::Connection;
use super::exchange::Handler;
use super::pool::WorkerPool;
use super::transfer::Transport;
use crate::config::ServerConfig;
use crate::error::Result;

/// HTTP/2 server over cleartext TCP (prior knowledge).
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    handler: Arc<dyn Handler>,
    pool: Arc<WorkerPool>,
}

impl Server {
    pub fn bind(addr: impl ToSocketAddrs, config: ServerConfig, handler: impl Handler) -> io::Result<Self> {
        Self::from_listener(TcpListener::bind(addr)?, config, handler)
    }

    pub fn from_listener(listener: TcpListener, config: ServerConfig, handler: impl Handler) -> io::Result<Self> {
        let pool = Arc::new(WorkerPool::new(config.worker_threads, config.queue_depth)?);
        Ok(Self { listener, config, handler: Arc::new(handler), pool })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accept connections forever. Accept errors are logged and skipped.
    pub fn serve(&self) -> io::Result<()> {
        info!(addr = %self.local_addr()?, workers = self.pool.threads(), "listening");
        for incoming in self.listener.incoming() {
            match incoming {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(error = %e, "set_nodelay failed");
                    }
                    let peer = stream.peer_addr().ok();
                    match self.spawn_connection(stream) {
                        Ok(_) => debug!(?peer, "accepted"),
                        Err(e) => warn!(?peer, error = %e, "could not start connection"),
                    }
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
        Ok(())
    }

    /// Run one connection on the calling thread.
    pub fn serve_connection<T: Transport>(&self, transport: T) -> Result<()> {
        self.connection(transport)?.serve()
    }

    /// Run one connection on a new thread.
    pub fn spawn_connection<T: Transport>(&self, transport: T) -> io::Result<JoinHandle<()>> {
        let conn = self.connection(transport)?;
        thread::Builder::new()
            .name(format!("h2-conn-{}", conn.id()))
            .spawn(move || {
                // Errors are already logged by the connection.
                let _ = conn.serve();
            })
    }

    fn connection<T: Transport>(&self, transport: T) -> io::Result<Connection> {
        Connection::new(transport, &self.config, Arc::clone(&self.handler), Arc::clone(&self.pool))
    }
}
