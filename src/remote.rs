//! Remote Session Registry (§4.2) and the SSH transport/channel plumbing it
//! rides on.
//!
//! The registry owns interactive shell channels opened over
//! [`TransportPool`]-managed [`RemoteTransport`]s and pumps bytes between a
//! channel and its owning [`ClientHandle`](crate::gateway::ClientHandle).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use parking_lot::RwLock;
use russh::client::{self, Handle};
use russh::keys::{decode_secret_key, PrivateKeyWithHashAlg};
use russh::{ChannelMsg, Disconnect};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::GatewayError;
use crate::gateway::ClientHandle;
use crate::ids::SessionId;
use crate::pool::TransportPool;
use crate::protocol::{SafeSshParams, ServerMessage};

#[derive(Debug, Clone)]
pub enum SshAuth {
    Password(String),
    PrivateKey {
        key: String,
        passphrase: Option<String>,
    },
}

/// Full SSH connection parameters, credentials included. Never implement
/// `Serialize` for this type directly — use [`SafeSshParams`] on the wire.
#[derive(Debug, Clone)]
pub struct SshParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
    pub term: String,
}

impl SshParams {
    pub fn safe(&self) -> SafeSshParams {
        SafeSshParams {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            term: self.term.clone(),
        }
    }

    pub fn title(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }
}

struct NoopHandler;

impl client::Handler for NoopHandler {
    type Error = russh::Error;

    // This gateway is a generic jump point to arbitrary user-supplied
    // hosts; there is no fixed known_hosts database to check against, so
    // host key verification is intentionally left to the user's own
    // judgment (the same trust model an ad-hoc `ssh` invocation has).
    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// A live, authenticated SSH transport shared by every Remote Session whose
/// pool key matches it.
pub struct RemoteTransport {
    handle: AsyncMutex<Handle<NoopHandler>>,
}

impl RemoteTransport {
    pub async fn connect(
        params: &SshParams,
        keepalive: Duration,
        ready_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let mut config = client::Config::default();
        config.keepalive_interval = Some(keepalive);

        let addr: SocketAddr = tokio::net::lookup_host((params.host.as_str(), params.port))
            .await
            .map_err(|e| GatewayError::UnreachableHost(e.to_string()))?
            .next()
            .ok_or_else(|| GatewayError::UnreachableHost(params.host.clone()))?;

        let mut handle = tokio::time::timeout(
            ready_timeout,
            client::connect(Arc::new(config), addr, NoopHandler),
        )
        .await
        .map_err(|_| GatewayError::UnreachableHost("connect timed out".into()))?
        .map_err(|e| GatewayError::TransportError(e.to_string()))?;

        let authenticated = match &params.auth {
            SshAuth::Password(password) => handle
                .authenticate_password(&params.username, password)
                .await
                .map_err(|e| GatewayError::TransportError(e.to_string()))?
                .success(),
            SshAuth::PrivateKey { key, passphrase } => {
                let key = decode_secret_key(key, passphrase.as_deref())
                    .map_err(|e| GatewayError::AuthFailed.wrap(e))?;
                handle
                    .authenticate_publickey(
                        &params.username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), None),
                    )
                    .await
                    .map_err(|e| GatewayError::TransportError(e.to_string()))?
                    .success()
            }
        };

        if !authenticated {
            return Err(GatewayError::AuthFailed);
        }

        Ok(Self {
            handle: AsyncMutex::new(handle),
        })
    }

    async fn open_channel(
        &self,
        term: &str,
        cols: u16,
        rows: u16,
    ) -> Result<russh::Channel<client::Msg>, GatewayError> {
        let handle = self.handle.lock().await;
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| GatewayError::RemoteOpenFailed(e.to_string()))?;

        channel
            .request_pty(false, term, cols as u32, rows as u32, 0, 0, &[])
            .await
            .map_err(|e| GatewayError::RemoteOpenFailed(e.to_string()))?;

        channel
            .request_shell(false)
            .await
            .map_err(|e| GatewayError::RemoteOpenFailed(e.to_string()))?;

        Ok(channel)
    }

    pub async fn close(&self) {
        let handle = self.handle.lock().await;
        let _ = handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
    }
}

// `russh_keys`/`ssh_key` errors don't implement `std::error::Error` neatly
// against `GatewayError::AuthFailed`'s unit variant; this keeps the wire
// message generic ("authentication failed") while still logging specifics.
impl GatewayError {
    fn wrap<E: std::fmt::Display>(self, source: E) -> Self {
        log::warn!("ssh key material rejected: {source}");
        self
    }
}

enum ChannelCommand {
    Data(Vec<u8>),
    Resize { cols: u16, rows: u16 },
}

struct RemoteEntry {
    params: SshParams,
    commands: tokio::sync::mpsc::UnboundedSender<ChannelCommand>,
    cols: u16,
    rows: u16,
    last_activity: Instant,
    owner: ClientHandle,
}

/// Owns interactive remote shell channels (§4.2).
#[derive(Clone)]
pub struct RemoteRegistry {
    pool: TransportPool,
    sessions: Arc<RwLock<AHashMap<SessionId, RemoteEntry>>>,
    remembered: crate::catalog::RememberedParams,
    default_term: String,
}

impl RemoteRegistry {
    pub fn new(
        pool: TransportPool,
        remembered: crate::catalog::RememberedParams,
        default_term: String,
    ) -> Self {
        Self {
            pool,
            sessions: Arc::new(RwLock::new(AHashMap::new())),
            remembered,
            default_term,
        }
    }

    pub async fn create(
        &self,
        owner: ClientHandle,
        params: SshParams,
        cols: u16,
        rows: u16,
    ) -> Result<(SessionId, String, SafeSshParams), GatewayError> {
        self.establish(owner, SessionId::new(), params, cols, rows)
            .await
    }

    /// Shared by [`create`](Self::create) (fresh id) and
    /// [`reconnect`](Self::reconnect) (caller-supplied id, so the session
    /// keeps the identifier the client already knows about).
    async fn establish(
        &self,
        owner: ClientHandle,
        session_id: SessionId,
        mut params: SshParams,
        cols: u16,
        rows: u16,
    ) -> Result<(SessionId, String, SafeSshParams), GatewayError> {
        if params.term.is_empty() {
            params.term = self.default_term.clone();
        }

        let transport = self.pool.acquire(&params).await?;

        let channel = match transport.open_channel(&params.term, cols, rows).await {
            Ok(channel) => channel,
            Err(err) => {
                self.pool.release(&params).await;
                return Err(err);
            }
        };

        let title = params.title();
        let safe_params = params.safe();
        let (commands_tx, commands_rx) = tokio::sync::mpsc::unbounded_channel();

        self.sessions.write().insert(
            session_id,
            RemoteEntry {
                params: params.clone(),
                commands: commands_tx,
                cols,
                rows,
                last_activity: Instant::now(),
                owner: owner.clone(),
            },
        );

        self.remembered.remember(session_id, params.clone()).await;

        self.spawn_reader(session_id, channel, commands_rx, transport, owner);

        Ok((session_id, title, safe_params))
    }

    pub async fn duplicate(
        &self,
        owner: ClientHandle,
        session_id: SessionId,
    ) -> Result<(SessionId, String, SafeSshParams), GatewayError> {
        let params = {
            let sessions = self.sessions.read();
            sessions
                .get(&session_id)
                .map(|e| e.params.clone())
                .ok_or(GatewayError::UnknownSession)?
        };

        let (cols, rows) = {
            let sessions = self.sessions.read();
            sessions
                .get(&session_id)
                .map(|e| (e.cols, e.rows))
                .unwrap_or((80, 30))
        };

        self.create(owner, params, cols, rows).await
    }

    pub async fn reconnect(
        &self,
        owner: ClientHandle,
        session_id: SessionId,
    ) -> Result<(SessionId, String, SafeSshParams), GatewayError> {
        let params = self
            .remembered
            .lookup(session_id)
            .await
            .ok_or(GatewayError::UnknownSession)?;

        self.establish(owner, session_id, params, 80, 30).await
    }

    pub async fn input(&self, session_id: SessionId, data: &[u8]) {
        let mut sessions = self.sessions.write();
        let Some(entry) = sessions.get_mut(&session_id) else {
            return;
        };
        entry.last_activity = Instant::now();
        let _ = entry.commands.send(ChannelCommand::Data(data.to_vec()));
    }

    pub async fn resize(&self, session_id: SessionId, cols: u16, rows: u16) {
        let mut sessions = self.sessions.write();
        if let Some(entry) = sessions.get_mut(&session_id) {
            entry.cols = cols;
            entry.rows = rows;
            let _ = entry.commands.send(ChannelCommand::Resize { cols, rows });
        }
    }

    pub async fn close(&self, session_id: SessionId) {
        let entry = self.sessions.write().remove(&session_id);
        if let Some(entry) = entry {
            self.pool.release(&entry.params).await;
            entry.owner.send(ServerMessage::SshClosed { session_id });
        }
    }

    pub fn owns(&self, session_id: SessionId) -> bool {
        self.sessions.read().contains_key(&session_id)
    }

    pub fn list_public(&self) -> Vec<(SessionId, String, SafeSshParams)> {
        self.sessions
            .read()
            .iter()
            .map(|(id, e)| (*id, e.params.title(), e.params.safe()))
            .collect()
    }

    /// Owns `channel` for its whole lifetime: `input`/`resize` reach it only
    /// by sending a [`ChannelCommand`], since `russh`'s channel read (`wait`)
    /// and write (`data`) both need `&mut self` and the reader loop is the
    /// only task allowed to hold that `&mut`.
    fn spawn_reader(
        &self,
        session_id: SessionId,
        mut channel: russh::Channel<client::Msg>,
        mut commands: tokio::sync::mpsc::UnboundedReceiver<ChannelCommand>,
        transport: Arc<RemoteTransport>,
        owner: ClientHandle,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut exit_code = None;

            loop {
                tokio::select! {
                    event = channel.wait() => match event {
                        Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                            use base64::Engine;
                            owner.send(ServerMessage::SshData {
                                session_id,
                                data: base64::engine::general_purpose::STANDARD.encode(&data[..]),
                            });
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => {
                            exit_code = Some(exit_status as i32);
                        }
                        Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                        Some(_) => {}
                    },
                    command = commands.recv() => match command {
                        Some(ChannelCommand::Data(bytes)) => {
                            if channel.data(&bytes[..]).await.is_err() {
                                break;
                            }
                        }
                        Some(ChannelCommand::Resize { cols, rows }) => {
                            let _ = channel.window_change(cols as u32, rows as u32, 0, 0).await;
                        }
                        None => {}
                    },
                }
            }

            log::debug!("ssh channel for {session_id} closed, exit status {exit_code:?}");
            drop(transport);
            this.close(session_id).await;
        });
    }
}
