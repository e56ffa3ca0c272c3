//! A bounded pool of daemon connections.
//!
//! Each pooled connection is an independent [`DaemonClient`]; operations on
//! different pooled connections run fully in parallel. The pool never
//! retries failed operations; it only validates idle connections before
//! handing them out again.

use crate::client::{ConnectOptions, DaemonClient};
use crate::error::Error;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Configuration for a [`ConnectionPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of concurrently open connections.
    pub max_size: usize,
    /// How long [`acquire`](ConnectionPool::acquire) waits for a free slot.
    pub acquire_timeout: Duration,
    /// How long to wait for a new connection to be established.
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        // One connection per core plus headroom.
        let max_size = std::thread::available_parallelism()
            .map(|n| n.get() + 1)
            .unwrap_or(5);

        Self {
            max_size,
            acquire_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// A pool of connections to one daemon socket.
pub struct ConnectionPool {
    socket_path: PathBuf,
    options: ConnectOptions,
    config: PoolConfig,
    idle: Mutex<Vec<DaemonClient>>,
    slots: Arc<Semaphore>,
}

impl ConnectionPool {
    pub fn new(socket_path: impl Into<PathBuf>, config: PoolConfig) -> Self {
        Self::with_options(socket_path, config, ConnectOptions::default())
    }

    /// Build a pool whose connections share the given options (log sink,
    /// cancellation token, string size limit).
    pub fn with_options(
        socket_path: impl Into<PathBuf>,
        config: PoolConfig,
        options: ConnectOptions,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_size));
        Self {
            socket_path: socket_path.into(),
            options,
            config,
            idle: Mutex::new(Vec::new()),
            slots,
        }
    }

    /// Take a connection from the pool, reusing an idle one when possible
    /// and dialling a new one otherwise. Waits up to `acquire_timeout` for a
    /// slot when the pool is at capacity.
    pub async fn acquire(&self) -> Result<PooledClient<'_>, Error> {
        let permit = tokio::time::timeout(
            self.config.acquire_timeout,
            self.slots.clone().acquire_owned(),
        )
        .await
        .map_err(|_| Error::PoolTimeout)?
        // The semaphore is owned by the pool and never closed.
        .map_err(|_| Error::PoolTimeout)?;

        while let Some(client) = self.pop_idle() {
            if client.is_reusable() {
                debug!("reusing idle daemon connection");
                return Ok(PooledClient {
                    client: Some(client),
                    pool: self,
                    _permit: permit,
                });
            }
            warn!("discarding broken idle daemon connection");
        }

        let client = tokio::time::timeout(
            self.config.connect_timeout,
            DaemonClient::connect_with_options(&self.socket_path, self.options.clone()),
        )
        .await
        .map_err(|_| Error::ConnectTimeout)??;

        debug!("opened new pooled daemon connection");
        Ok(PooledClient {
            client: Some(client),
            pool: self,
            _permit: permit,
        })
    }

    fn pop_idle(&self) -> Option<DaemonClient> {
        self.idle.lock().ok()?.pop()
    }

    fn return_client(&self, client: DaemonClient) {
        if !client.is_reusable() {
            debug!("dropping broken daemon connection instead of pooling it");
            return;
        }
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(client);
        }
    }
}

/// A pooled connection. Derefs to [`DaemonClient`]; returning it to the pool
/// happens on drop. Broken or closed connections are discarded rather than
/// pooled.
pub struct PooledClient<'a> {
    client: Option<DaemonClient>,
    pool: &'a ConnectionPool,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledClient<'_> {
    type Target = DaemonClient;

    fn deref(&self) -> &DaemonClient {
        self.client
            .as_ref()
            .expect("client present until PooledClient is dropped")
    }
}

impl Drop for PooledClient<'_> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.return_client(client);
        }
    }
}
