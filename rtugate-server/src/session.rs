//! Device sessions.
//!
//! A session owns one accepted TCP connection. The stream is split so reads
//! and writes can proceed independently:
//!
//! - reads are driven by the task that owns the connection handler
//! - writes go through an admission gate that stays held for a quiescence
//!   interval after each write, so two frames are never coalesced into one
//!   TCP segment
//! - `send`/`receive` hand data between tasks through a single-slot bridge
//! - [`Session::lock`] lets callers reserve the device for a whole
//!   request/response exchange
//!
//! Every blocking operation also waits on the session's close signal, so
//! closing a session wakes all of them with [`ServerError::DeviceOffline`].

use crate::config::Config;
use crate::error::ServerError;
use crate::registry::SessionRegistry;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use rtugate_protocol::{Framer, RtuFrame};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex, MutexGuard};
use uuid::Uuid;

/// Per-session I/O settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Maximum bytes returned by one read.
    pub max_bytes: usize,
    /// Read and write deadline.
    pub timeout: Duration,
    /// How long the write gate stays held after a write.
    pub write_quiescence: Duration,
    /// Send/receive deadline.
    pub bridge_timeout: Duration,
    /// Log raw traffic as hex.
    pub debug: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_bytes: 500,
            timeout: Duration::from_secs(180),
            write_quiescence: Duration::from_secs(1),
            bridge_timeout: Duration::from_secs(5),
            debug: false,
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_bytes: config.network.max_bytes,
            timeout: config.network.timeout(),
            write_quiescence: config.session.write_quiescence(),
            bridge_timeout: config.session.bridge_timeout(),
            debug: config.session.debug,
        }
    }
}

/// Result of racing an operation against the close signal and a deadline.
enum Outcome<T> {
    Closed,
    TimedOut,
    Done(T),
}

/// One connected device.
pub struct Session {
    id: Uuid,
    remote_addr: SocketAddr,
    identity: RwLock<Option<String>>,
    settings: SessionSettings,

    reader: Mutex<Option<OwnedReadHalf>>,
    /// Write half. The lock is the admission gate.
    writer: Mutex<Option<OwnedWriteHalf>>,

    closed: AtomicBool,
    close_tx: watch::Sender<bool>,

    bridge_tx: mpsc::Sender<Bytes>,
    bridge_rx: Mutex<mpsc::Receiver<Bytes>>,

    /// Caller-side exchange lock. Never taken by the session itself.
    exchange: Mutex<()>,

    attrs: DashMap<String, String>,
    registry: Weak<SessionRegistry>,
    created_at: Instant,
}

impl Session {
    pub(crate) fn new(
        stream: TcpStream,
        remote_addr: SocketAddr,
        settings: SessionSettings,
        registry: Weak<SessionRegistry>,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        let (close_tx, _) = watch::channel(false);
        let (bridge_tx, bridge_rx) = mpsc::channel(1);

        Self {
            id: Uuid::new_v4(),
            remote_addr,
            identity: RwLock::new(None),
            settings,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
            close_tx,
            bridge_tx,
            bridge_rx: Mutex::new(bridge_rx),
            exchange: Mutex::new(()),
            attrs: DashMap::new(),
            registry,
            created_at: Instant::now(),
        }
    }

    /// Connection id, unique per accepted connection.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Time since the connection was accepted.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Returns the application-assigned identity, if any.
    pub fn identity(&self) -> Option<String> {
        self.identity.read().clone()
    }

    /// Assigns an identity to the session.
    ///
    /// Other live sessions holding the same identity are closed according to
    /// the registry's eviction policy. Returns the number of evicted sessions.
    pub fn set_identity(&self, identity: impl Into<String>) -> usize {
        let identity = identity.into();
        let previous = self.identity.write().replace(identity.clone());

        match self.registry.upgrade() {
            Some(registry) => registry.assign(self, previous.as_deref(), &identity),
            None => 0,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stores a handler-defined attribute.
    pub fn set_attr(&self, key: impl Into<String>, value: impl Into<String>) {
        self.attrs.insert(key.into(), value.into());
    }

    pub fn attr(&self, key: &str) -> Option<String> {
        self.attrs.get(key).map(|v| v.value().clone())
    }

    pub fn remove_attr(&self, key: &str) -> Option<String> {
        self.attrs.remove(key).map(|(_, v)| v)
    }

    /// Reserves the device for one exchange.
    ///
    /// Hold the guard across a [`Session::write`] and the matching
    /// [`Session::receive`] so request/response pairs issued by different
    /// tasks are not interleaved on the device.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.exchange.lock().await
    }

    /// Drops a transport half once the session is closed.
    ///
    /// `close` cannot take a half that an operation holds, so every operation
    /// calls this before releasing its guard.
    fn release_if_closed<T>(&self, half: &mut Option<T>) {
        if self.is_closed() {
            half.take();
        }
    }

    /// Resolves once the session is closed.
    async fn closed(&self) {
        let mut rx = self.close_tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Reads at most `max_bytes` from the device.
    pub async fn read(&self) -> Result<Bytes, ServerError> {
        let mut guard = tokio::select! {
            biased;
            _ = self.closed() => return Err(ServerError::DeviceOffline),
            guard = self.reader.lock() => guard,
        };
        let Some(reader) = guard.as_mut() else {
            return Err(ServerError::DeviceOffline);
        };

        let mut buf = vec![0u8; self.settings.max_bytes];
        let outcome = tokio::select! {
            biased;
            _ = self.closed() => Outcome::Closed,
            result = tokio::time::timeout(self.settings.timeout, reader.read(&mut buf)) => {
                match result {
                    Ok(result) => Outcome::Done(result),
                    Err(_) => Outcome::TimedOut,
                }
            }
        };
        self.release_if_closed(&mut guard);

        match outcome {
            Outcome::Closed => Err(ServerError::DeviceOffline),
            Outcome::TimedOut => Err(ServerError::ReadTimeout),
            Outcome::Done(Ok(0)) => Err(ServerError::ConnectionClosed),
            Outcome::Done(Ok(n)) => {
                buf.truncate(n);
                if self.settings.debug {
                    tracing::info!("[{}] read: 0x{}", self.id, hex::encode(&buf));
                }
                tracing::debug!("[{}] read {} bytes", self.id, n);
                Ok(Bytes::from(buf))
            }
            Outcome::Done(Err(e)) => Err(ServerError::Io(e)),
        }
    }

    /// Reads one chunk and parses it as an RTU frame.
    pub async fn read_frame(&self) -> Result<RtuFrame, ServerError> {
        let bytes = self.read().await?;
        Ok(RtuFrame::parse(&bytes)?)
    }

    /// Writes `data` to the device.
    ///
    /// Only one write runs at a time. After the transport write finishes the
    /// gate stays held for the quiescence interval, unless the session closes
    /// first.
    pub async fn write(&self, data: &[u8]) -> Result<usize, ServerError> {
        let mut guard = tokio::select! {
            biased;
            _ = self.closed() => return Err(ServerError::DeviceOffline),
            guard = self.writer.lock() => guard,
        };
        let Some(writer) = guard.as_mut() else {
            return Err(ServerError::DeviceOffline);
        };

        let outcome = tokio::select! {
            biased;
            _ = self.closed() => Outcome::Closed,
            result = tokio::time::timeout(self.settings.timeout, writer.write_all(data)) => {
                match result {
                    Ok(result) => Outcome::Done(result),
                    Err(_) => Outcome::TimedOut,
                }
            }
        };

        let result = match outcome {
            Outcome::Closed => {
                self.release_if_closed(&mut guard);
                return Err(ServerError::DeviceOffline);
            }
            Outcome::TimedOut => Err(ServerError::WriteTimeout),
            Outcome::Done(Ok(())) => {
                if self.settings.debug {
                    tracing::info!("[{}] write: 0x{}", self.id, hex::encode(data));
                }
                tracing::debug!("[{}] wrote {} bytes", self.id, data.len());
                Ok(data.len())
            }
            Outcome::Done(Err(e)) => Err(ServerError::Io(e)),
        };

        tokio::select! {
            biased;
            _ = self.closed() => {}
            _ = tokio::time::sleep(self.settings.write_quiescence) => {}
        }
        self.release_if_closed(&mut guard);

        result
    }

    /// Encodes and writes a frame.
    pub async fn write_frame<F: Framer>(&self, frame: &F) -> Result<usize, ServerError> {
        let bytes = frame.encode();
        self.write(&bytes).await
    }

    /// Hands `data` to the task waiting in [`Session::receive`].
    ///
    /// The bridge holds one pending item; while it is full this waits until
    /// it drains, the bridge timeout expires or the session closes.
    pub async fn send(&self, data: impl Into<Bytes>) -> Result<(), ServerError> {
        let data = data.into();
        tokio::select! {
            biased;
            _ = self.closed() => Err(ServerError::DeviceOffline),
            result = self.bridge_tx.send(data) => {
                result.map_err(|_| ServerError::DeviceOffline)
            }
            _ = tokio::time::sleep(self.settings.bridge_timeout) => {
                Err(ServerError::SendTimeout)
            }
        }
    }

    /// Waits for data handed over by [`Session::send`].
    pub async fn receive(&self) -> Result<Bytes, ServerError> {
        tokio::select! {
            biased;
            _ = self.closed() => Err(ServerError::DeviceOffline),
            data = async { self.bridge_rx.lock().await.recv().await } => {
                data.ok_or(ServerError::DeviceOffline)
            }
            _ = tokio::time::sleep(self.settings.bridge_timeout) => {
                Err(ServerError::ReceiveTimeout)
            }
        }
    }

    /// Closes the session. Only the first call has any effect.
    ///
    /// Removes the session from the registry, wakes every pending operation
    /// and releases the connection. The registry's close callback is invoked
    /// with the session identity.
    pub fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let registry = self.registry.upgrade();
        if let Some(registry) = &registry {
            registry.remove(self);
        }

        self.close_tx.send_replace(true);

        // Halves held by an in-flight operation are dropped by that operation
        // once it observes the close signal.
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }

        let identity = self.identity();
        tracing::info!(
            "Session closed: {} ({}, identity={:?})",
            self.remote_addr,
            self.id,
            identity
        );

        if let Some(registry) = registry {
            registry.notify_closed(identity.as_deref());
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("identity", &self.identity())
            .field("closed", &self.is_closed())
            .finish()
    }
}
