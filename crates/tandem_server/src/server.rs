//! Accept loop feeding connections to the worker pool.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::RequestHandler;
use crate::pool::WorkerPool;
use std::io::{self, BufReader, BufWriter};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tandem_engine::Shutdown;
use tracing::{debug, info, warn};

/// The receiving half of a networked pair.
///
/// Accepts connections on a non-blocking listener and hands each one to a
/// [`WorkerPool`]; a failing or panicking handler affects only its own
/// connection.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tandem_engine::{EchoSuppressor, Endpoint, Shutdown};
/// use tandem_server::{RequestHandler, ServerConfig, SyncServer};
///
/// let endpoint = Endpoint::new("/srv/tree", Arc::new(EchoSuppressor::new(Duration::from_secs(4))));
/// let config = ServerConfig::new("0.0.0.0:5000".parse().unwrap());
/// let server = SyncServer::bind(config, RequestHandler::new(endpoint)).unwrap();
/// server.serve(&Shutdown::new()).unwrap();
/// ```
#[derive(Debug)]
pub struct SyncServer {
    config: ServerConfig,
    listener: TcpListener,
    handler: Arc<RequestHandler>,
}

impl SyncServer {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// Returns `Bind` if the address is unavailable.
    pub fn bind(config: ServerConfig, handler: RequestHandler) -> ServerResult<Self> {
        let listener = TcpListener::bind(config.bind_addr).map_err(|source| ServerError::Bind {
            addr: config.bind_addr,
            source,
        })?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            config,
            listener,
            handler: Arc::new(handler),
        })
    }

    /// Returns the bound address (useful with port 0).
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Returns the request handler.
    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    /// Accepts connections until `shutdown` fires, then drains the pool.
    pub fn serve(self, shutdown: &Shutdown) -> ServerResult<()> {
        let pool = WorkerPool::new(
            "tandem-worker",
            self.config.worker_threads,
            self.config.max_pending_connections,
        )?;
        info!(
            addr = %self.local_addr()?,
            root = ?self.handler.endpoint().root(),
            workers = pool.size(),
            "server listening"
        );

        while !shutdown.is_cancelled() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = self.prepare(&stream) {
                        warn!(peer = %peer, error = %e, "cannot configure connection");
                        continue;
                    }
                    let handler = Arc::clone(&self.handler);
                    if !pool.execute(move || serve_connection(&handler, stream, peer)) {
                        warn!(peer = %peer, "worker pool closed; connection dropped");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if shutdown.wait_timeout(self.config.accept_backoff) {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    if shutdown.wait_timeout(self.config.accept_backoff) {
                        break;
                    }
                }
            }
        }

        pool.shutdown();
        info!("server stopped");
        Ok(())
    }

    /// Runs [`serve`](Self::serve) on its own thread.
    pub fn spawn(self, shutdown: &Shutdown) -> ServerResult<ServerHandle> {
        let addr = self.local_addr()?;
        let shutdown = shutdown.clone();
        let thread = thread::Builder::new()
            .name("tandem-server".to_string())
            .spawn(move || self.serve(&shutdown))?;
        Ok(ServerHandle { addr, thread })
    }

    fn prepare(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.config.request_timeout))?;
        stream.set_write_timeout(Some(self.config.request_timeout))?;
        stream.set_nodelay(true)
    }
}

fn serve_connection(handler: &RequestHandler, stream: TcpStream, peer: SocketAddr) {
    let mut reader = BufReader::new(&stream);
    let mut writer = BufWriter::new(&stream);
    match handler.handle(&mut reader, &mut writer) {
        Ok(statuses) => debug!(peer = %peer, responses = statuses.len(), "connection done"),
        Err(e) if e.is_client_error() => warn!(peer = %peer, error = %e, "bad request"),
        Err(e) => warn!(peer = %peer, error = %e, "request failed"),
    }
}

/// Handle to a server running on its own thread.
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    thread: JoinHandle<ServerResult<()>>,
}

impl ServerHandle {
    /// Returns the bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Waits for the server to stop. Cancel the shutdown token first.
    pub fn join(self) -> ServerResult<()> {
        self.thread.join().map_err(|_| {
            ServerError::Io(io::Error::new(io::ErrorKind::Other, "server thread panicked"))
        })?
    }
}
