use std::net::TcpListener;
use std::sync::Arc;

use tracing::{error, info};

use crate::config::ServerConfig;
use crate::metrics::Metrics;
use crate::session::{self, ConnectionGuard, RequestHandler};
use crate::thread_pool::ThreadPool;
use crate::worker::ComputePool;
use crate::Result;

/// A TCP socket server for prime computations.
/// It listens for incoming connections on the configured host and port, and runs a session
/// for every connection on the session [`ThreadPool`].
///
/// Each session receives a handle to the [`ComputePool`], which it uses to run the CPU bound
/// part of a request, and a handle to the shared [`Metrics`].
///
/// # Example
/// Create and run a new server listening on "127.0.0.1:9090", with one session thread per
/// connection and 4 worker processes
/// ```rust,no_run
/// use distprime::{NaiveThreadPool, PrimeServer, ProcessPool, ServerConfig, ThreadPool, WorkerCommand};
/// # use std::error::Error;
/// # fn main() -> Result<(), Box<dyn Error>> {
/// let config = ServerConfig { workers: 4, ..ServerConfig::default() };
/// let compute = ProcessPool::new(config.workers, WorkerCommand::current_exe()?)?;
/// let sessions = NaiveThreadPool::new(0)?;
/// let server = PrimeServer::new(config, compute, sessions);
/// server.run()?;
/// # Ok(())
/// # }
/// ```
pub struct PrimeServer<C: ComputePool, P: ThreadPool> {
    config: ServerConfig,
    /// the pool the sessions submit computations to
    compute: C,
    /// a pool of threads that run the sessions
    sessions: P,
    metrics: Arc<Metrics>,
}

impl<C: ComputePool, P: ThreadPool> PrimeServer<C, P> {
    /// Create a new `PrimeServer`. Its metrics store is created here, so the uptime is
    /// measured from this point.
    pub fn new(config: ServerConfig, compute: C, sessions: P) -> Self {
        PrimeServer {
            config,
            compute,
            sessions,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// a handle to the metrics store shared by all sessions
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// binds to the configured address and serves connections on it.
    ///
    /// # Errors
    /// returns an error if the listening socket could not be bound. Once bound, this only
    /// returns if the listener itself fails
    pub fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.addr())?;
        self.serve(listener)
    }

    /// accepts connections on `listener` forever, spawning a session for each of them.
    /// Errors of a single connection or session are logged, they never stop the server.
    pub fn serve(self, listener: TcpListener) -> Result<()> {
        info!("Listening on {}", listener.local_addr()?);
        let limits = self.config.limits();
        let handler = RequestHandler::new(
            self.compute.clone(),
            Arc::clone(&self.metrics),
            limits.max_span,
        );

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let peer = stream
                        .peer_addr()
                        .map(|addr| addr.to_string())
                        .unwrap_or_else(|_| "unknown peer".to_owned());
                    info!("Accepted connection from {}", peer);
                    let metrics = Arc::clone(&self.metrics);
                    let handler = handler.clone();
                    self.sessions.spawn(move || {
                        // a connection waiting for a free session thread is not active yet
                        let guard = ConnectionGuard::open(metrics);
                        if let Err(e) = session::serve(handler, limits, stream) {
                            error!("Error on serving client {}: {}", peer, e);
                        }
                        drop(guard);
                        info!("Connection from {} closed", peer);
                    });
                }
                Err(e) => error!("Connection failed: {}", e),
            }
        }
        Ok(())
    }
}
