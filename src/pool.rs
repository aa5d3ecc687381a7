//! Transport Pool (§4.1): a keyed cache of live SSH transports, reference
//! counted by the Remote Session Registry sessions that share them.
//!
//! Grounded on the teacher's `router.rs`, which keeps a
//! `tokio::sync::RwLock<HashMap<...>>` of endpoint senders behind a small
//! async API with doctest-verified examples on every public method; the
//! refcount/idle-timer bookkeeping follows the same "short critical
//! section, real work happens outside the lock" shape as
//! `crates/service/src/session/ports.rs`'s `PortAllocator`.

use std::sync::Arc;

use ahash::AHashMap;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::TransportPoolConfig;
use crate::error::GatewayError;
use crate::remote::{RemoteTransport, SshAuth, SshParams};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl From<&SshParams> for PoolKey {
    fn from(params: &SshParams) -> Self {
        Self {
            host: params.host.clone(),
            port: params.port,
            username: params.username.clone(),
        }
    }
}

struct Entry {
    transport: Arc<RemoteTransport>,
    refcount: usize,
    idle_timer: Option<JoinHandle<()>>,
}

/// Amortizes repeated SSH handshakes to the same `(host, port, username)`
/// across independently-opened shell channels.
#[derive(Clone)]
pub struct TransportPool {
    entries: Arc<Mutex<AHashMap<PoolKey, Entry>>>,
    config: TransportPoolConfig,
}

impl TransportPool {
    pub fn new(config: TransportPoolConfig) -> Self {
        Self {
            entries: Arc::new(Mutex::new(AHashMap::new())),
            config,
        }
    }

    /// Acquire a transport for `params`, establishing one if none is live
    /// for this pool key yet.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use termgate::pool::TransportPool;
    /// # use termgate::config::TransportPoolConfig;
    /// # use termgate::remote::{SshParams, SshAuth};
    /// # async fn go() -> anyhow::Result<()> {
    /// let pool = TransportPool::new(TransportPoolConfig::default());
    /// let params = SshParams {
    ///     host: "example.com".into(),
    ///     port: 22,
    ///     username: "alice".into(),
    ///     auth: SshAuth::Password("hunter2".into()),
    ///     term: "xterm-256color".into(),
    /// };
    /// let transport = pool.acquire(&params).await?;
    /// pool.release(&params).await;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn acquire(&self, params: &SshParams) -> Result<Arc<RemoteTransport>, GatewayError> {
        let key = PoolKey::from(params);

        {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get_mut(&key) {
                if let Some(timer) = entry.idle_timer.take() {
                    timer.abort();
                }
                entry.refcount += 1;
                return Ok(entry.transport.clone());
            }
        }

        // Establishing a transport suspends on network I/O; this must never
        // happen while holding the map lock (§5 "registry mutations must be
        // short and non-blocking").
        let transport = Arc::new(
            RemoteTransport::connect(params, self.config.keepalive(), self.config.ready_timeout())
                .await?,
        );

        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&key) {
            // Lost the race to a concurrent acquire for the same key; the
            // transport we just opened is simply dropped.
            entry.refcount += 1;
            return Ok(entry.transport.clone());
        }

        entries.insert(
            key,
            Entry {
                transport: transport.clone(),
                refcount: 1,
                idle_timer: None,
            },
        );

        Ok(transport)
    }

    /// Decrement the reference count for `params`'s pool key. At zero, arms
    /// an idle-close timer; a subsequent `acquire` before it fires disarms
    /// it.
    pub async fn release(&self, params: &SshParams) {
        let key = PoolKey::from(params);
        let idle_close = self.config.idle_close();

        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(&key) else {
            return;
        };

        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount > 0 {
            return;
        }

        let entries_handle = self.entries.clone();
        let key_for_timer = key.clone();
        entry.idle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(idle_close).await;

            let mut entries = entries_handle.lock().await;
            if let Some(entry) = entries.get(&key_for_timer) {
                if entry.refcount == 0 {
                    if let Some(entry) = entries.remove(&key_for_timer) {
                        entry.transport.close().await;
                    }
                }
            }
        }));
    }

    /// Remove and close the entry for `key` immediately, regardless of
    /// reference count. Called when a transport reports it has gone away
    /// on its own (§4.1 "A transport-level close event ... must remove the
    /// entry synchronously").
    pub async fn invalidate(&self, key: &PoolKey) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.remove(key) {
            if let Some(timer) = entry.idle_timer {
                timer.abort();
            }
            entry.transport.close().await;
        }
    }

    /// Current reference count for a pool key, for tests and introspection.
    pub async fn refcount(&self, key: &PoolKey) -> usize {
        self.entries
            .lock()
            .await
            .get(key)
            .map(|e| e.refcount)
            .unwrap_or(0)
    }

    /// Cancel every idle timer and close every live transport.
    pub async fn shutdown(&self) {
        let mut entries = self.entries.lock().await;
        for (_, entry) in entries.drain() {
            if let Some(timer) = entry.idle_timer {
                timer.abort();
            }
            entry.transport.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(host: &str, username: &str) -> SshParams {
        SshParams {
            host: host.to_string(),
            port: 22,
            username: username.to_string(),
            auth: SshAuth::Password("unused-in-key-derivation".into()),
            term: "xterm-256color".into(),
        }
    }

    #[test]
    fn pool_key_ignores_credentials() {
        let a = PoolKey::from(&params("h", "alice"));
        let mut b = params("h", "alice");
        b.auth = SshAuth::Password("different-password".into());
        let b = PoolKey::from(&b);
        assert_eq!(a, b);
    }

    #[test]
    fn pool_key_distinguishes_username() {
        let a = PoolKey::from(&params("h", "alice"));
        let b = PoolKey::from(&params("h", "bob"));
        assert_ne!(a, b);
    }
}
