//! TCP server implementation.

use crate::config::Config;
use crate::error::ServerError;
use crate::registry::{EvictionPolicy, SessionRegistry};
use crate::session::{Session, SessionSettings};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// First delay after a transient accept error.
const ACCEPT_BACKOFF_INITIAL: Duration = Duration::from_millis(5);

/// Upper bound for the accept backoff.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to, as `host:port`.
    pub bind_addr: String,
    /// Identity eviction policy.
    pub eviction: EvictionPolicy,
    /// Settings applied to every accepted session.
    pub session: SessionSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:6500".to_string(),
            eviction: EvictionPolicy::default(),
            session: SessionSettings::default(),
        }
    }
}

impl From<&Config> for ServerConfig {
    fn from(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr.clone(),
            eviction: config.session.eviction,
            session: SessionSettings::from(config),
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            ..Default::default()
        }
    }

    pub fn with_eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = eviction;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.session.max_bytes = max_bytes;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.session.timeout = timeout;
        self
    }

    pub fn with_write_quiescence(mut self, quiescence: Duration) -> Self {
        self.session.write_quiescence = quiescence;
        self
    }

    pub fn with_bridge_timeout(mut self, timeout: Duration) -> Self {
        self.session.bridge_timeout = timeout;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.session.debug = debug;
        self
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_accepted: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_closed: AtomicU64,
    pub accept_errors: AtomicU64,
}

/// Handles one accepted connection.
///
/// The handler runs in its own task. When it returns the session is closed.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn handle(&self, session: Arc<Session>) -> impl Future<Output = ()> + Send;
}

impl<F, Fut> ConnectionHandler for F
where
    F: Fn(Arc<Session>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn handle(&self, session: Arc<Session>) -> impl Future<Output = ()> + Send {
        self(session)
    }
}

/// Exponential delay between retries of a failing accept.
#[derive(Debug, Clone, Default)]
pub struct AcceptBackoff {
    delay: Duration,
}

impl AcceptBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next delay: 5 ms, then doubling up to 1 s.
    pub fn next_delay(&mut self) -> Duration {
        self.delay = if self.delay.is_zero() {
            ACCEPT_BACKOFF_INITIAL
        } else {
            (self.delay * 2).min(ACCEPT_BACKOFF_MAX)
        };
        self.delay
    }

    /// Current delay; zero after a successful accept.
    pub fn current(&self) -> Duration {
        self.delay
    }

    pub fn reset(&mut self) {
        self.delay = Duration::ZERO;
    }
}

/// Returns whether an accept error is worth retrying.
pub fn is_transient(err: &io::Error) -> bool {
    // ENFILE / EMFILE: out of file descriptors
    if matches!(err.raw_os_error(), Some(23) | Some(24)) {
        return true;
    }
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

/// TCP server accepting device connections.
pub struct Server {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    shutting_down: AtomicBool,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let stats = Arc::new(ServerStats::default());
        let registry = Arc::new(SessionRegistry::with_stats(config.eviction, stats.clone()));
        Self {
            config,
            registry,
            stats,
            shutdown: shutdown_tx,
            shutting_down: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Sets the callback invoked with the identity of every closed session.
    pub fn on_session_closed(&self, callback: impl Fn(Option<&str>) + Send + Sync + 'static) {
        self.registry.set_on_close(callback);
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run<H: ConnectionHandler>(&self, handler: H) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr.as_str())
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.config.bind_addr.clone(),
                source,
            })?;
        self.serve(listener, handler).await
    }

    /// Accepts connections on `listener` until shutdown.
    ///
    /// Transient accept errors are retried with [`AcceptBackoff`]. Any other
    /// accept error stops the loop and is returned.
    pub async fn serve<H: ConnectionHandler>(
        &self,
        listener: TcpListener,
        handler: H,
    ) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(ServerError::ShuttingDown);
        }

        let handler = Arc::new(handler);
        let mut backoff = AcceptBackoff::new();
        self.running.store(true, Ordering::SeqCst);

        match listener.local_addr() {
            Ok(addr) => tracing::info!("Server listening on {}", addr),
            Err(_) => tracing::info!("Server listening on {}", self.config.bind_addr),
        }

        let result = loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            backoff.reset();
                            self.spawn_session(stream, addr, &handler);
                        }
                        Err(e) if is_transient(&e) => {
                            self.stats.accept_errors.fetch_add(1, Ordering::Relaxed);
                            let delay = backoff.next_delay();
                            tracing::warn!("Accept error: {}; retrying in {:?}", e, delay);
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = shutdown_rx.recv() => break Ok(()),
                            }
                        }
                        Err(e) => {
                            self.stats.accept_errors.fetch_add(1, Ordering::Relaxed);
                            tracing::error!("Accept failed: {}", e);
                            break Err(ServerError::Io(e));
                        }
                    }
                }
                _ = shutdown_rx.recv() => break Ok(()),
            }
        };

        tracing::info!("Server stopped accepting connections");
        self.running.store(false, Ordering::SeqCst);
        result
    }

    fn spawn_session<H: ConnectionHandler>(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        handler: &Arc<H>,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("[{}] failed to set TCP_NODELAY: {}", addr, e);
        }

        let settings = self.config.session.clone();
        let session = self.registry.open(stream, addr, settings);
        self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Client connected: {} ({})", addr, session.id());

        // Registered after the shutdown sweep
        if self.shutting_down.load(Ordering::SeqCst) {
            session.close();
            return;
        }

        let handler = handler.clone();
        tokio::spawn(async move {
            handler.handle(session.clone()).await;
            session.close();
        });
    }

    /// Finds the live session holding `identity`.
    pub fn find_session(&self, identity: &str) -> Result<Arc<Session>, ServerError> {
        self.registry.find(identity)
    }

    /// Returns a snapshot of the live sessions.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.registry.sessions()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Stops the accept loop and closes every live session.
    pub fn shutdown(&self) {
        tracing::info!("Server shutting down");
        self.shutting_down.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(());
        self.registry.close_all();
    }

    /// Returns whether the accept loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}
