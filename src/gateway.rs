//! Client Gateway (§4.5): one instance per connected client. Parses the
//! framed JSON message stream, dispatches to the registries, and forwards
//! output frames back over the same websocket.
//!
//! Grounded on the teacher's `router.rs` fan-out-to-per-endpoint-sender
//! shape: each client gets an `UnboundedSender<ServerMessage>` paired with a
//! writer task, decoupling session producers (PTY reader threads, remote
//! channel readers) from the one consumer allowed to write to the socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::ids::SessionId;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::server::Server;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Input/output `data` fields are base64 so arbitrary byte sequences (not
/// just valid UTF-8) survive the JSON frame. A malformed payload is treated
/// as empty rather than closing the connection.
fn decode(data: &str) -> Vec<u8> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .unwrap_or_default()
}

/// Every `type` tag [`ClientMessage`] knows how to deserialize, kept in sync
/// with its variants by hand since `serde`'s internally-tagged enums don't
/// expose their variant names at runtime.
const KNOWN_FRAME_KINDS: &[&str] = &[
    "create_terminal",
    "create_sandbox",
    "clone_terminal",
    "input",
    "resize",
    "close_terminal",
    "create_ssh",
    "duplicate_ssh",
    "reconnect_ssh",
    "ssh_input",
    "ssh_resize",
    "close_ssh",
];

#[derive(serde::Deserialize)]
struct TaggedFrame {
    #[serde(rename = "type")]
    kind: String,
}

enum FrameKind {
    Known(ClientMessage),
    Unknown(String),
    Malformed(serde_json::Error),
}

/// Distinguishes an unrecognized `type` tag (§4.5: "ignored with a log event,
/// not an error to the peer") from a genuinely malformed frame (unparsable
/// JSON, or a known kind with the wrong fields — both do get an `error`
/// frame back).
fn parse_frame(text: &str) -> FrameKind {
    if let Ok(tagged) = serde_json::from_str::<TaggedFrame>(text) {
        if !KNOWN_FRAME_KINDS.contains(&tagged.kind.as_str()) {
            return FrameKind::Unknown(tagged.kind);
        }
    }

    match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => FrameKind::Known(message),
        Err(e) => FrameKind::Malformed(e),
    }
}

/// A cheap, cloneable handle registries use to push frames back to a
/// client's writer task. Sending after the client has disconnected is a
/// silent no-op — the receiving end is simply gone — which is what gives
/// registries a "weak" reference without an actual `Weak` pointer: a
/// disconnected client can never be resurrected into accepting writes.
#[derive(Clone)]
pub struct ClientHandle {
    id: u64,
    sender: UnboundedSender<ServerMessage>,
}

impl ClientHandle {
    fn new(sender: UnboundedSender<ServerMessage>) -> Self {
        Self {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            sender,
        }
    }

    pub fn send(&self, message: ServerMessage) {
        let _ = self.sender.send(message);
    }
}

impl PartialEq for ClientHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ClientHandle {}

/// Sessions (of either kind) owned by this connection, tracked so a
/// disconnect can close every one of them (§4.5 "Lifetime binding").
///
/// `pending` holds the join handle of every spawned create/duplicate/
/// reconnect task: since those now run off the read loop (§5), the loop can
/// exit for disconnect while one is still registering a freshly created
/// session. Disconnect cleanup joins `pending` first so a session born just
/// as the client leaves is still seen and closed, not leaked.
struct Owned {
    local: std::sync::Mutex<Vec<SessionId>>,
    remote: std::sync::Mutex<Vec<SessionId>>,
    pending: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Owned {
    fn new() -> Self {
        Self {
            local: std::sync::Mutex::new(Vec::new()),
            remote: std::sync::Mutex::new(Vec::new()),
            pending: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn track_local(&self, id: SessionId) {
        self.local.lock().unwrap().push(id);
    }

    fn track_remote(&self, id: SessionId) {
        self.remote.lock().unwrap().push(id);
    }

    fn track_pending(&self, handle: tokio::task::JoinHandle<()>) {
        self.pending.lock().unwrap().push(handle);
    }
}

pub async fn handle_socket(socket: WebSocket, server: Server) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let client = ClientHandle::new(tx);
    let owned = Arc::new(Owned::new());

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&message) else {
                continue;
            };
            // Back-pressure policy (§4.5): if the socket isn't writable,
            // this send fails and the frame is dropped; ordering of frames
            // that do go out is preserved because this loop is the single
            // writer.
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    client.send(ServerMessage::ConnectionEstablished {
        timestamp: server.now_unix(),
    });

    while let Some(Ok(message)) = ws_rx.next().await {
        let Message::Text(text) = message else {
            continue;
        };

        if text.len() > server.max_frame_bytes() {
            client.send(ServerMessage::Error {
                message: "frame exceeds maximum size".into(),
            });
            continue;
        }

        match parse_frame(&text) {
            FrameKind::Known(message) => dispatch(server.clone(), client.clone(), owned.clone(), message).await,
            FrameKind::Unknown(kind) => log::debug!("ignoring frame of unknown kind {kind:?}"),
            FrameKind::Malformed(e) => client.send(ServerMessage::Error {
                message: format!("invalid frame: {e}"),
            }),
        }
    }

    for handle in owned.pending.lock().unwrap().drain(..).collect::<Vec<_>>() {
        let _ = handle.await;
    }

    for id in owned.local.lock().unwrap().drain(..).collect::<Vec<_>>() {
        server.local.close(id).await;
    }
    for id in owned.remote.lock().unwrap().drain(..).collect::<Vec<_>>() {
        server.remote.close(id).await;
    }

    writer.abort();
}

/// Dispatches one parsed frame. `input`/`resize`/`close` are handled inline
/// (fast, per §5), but every operation §5 calls out as a blocking point —
/// SSH handshakes, container image pulls and creation — is spawned onto its
/// own task so a slow session never stalls another session's frames on the
/// same connection's single read loop (§5 "Cross-session independence").
async fn dispatch(server: Server, client: ClientHandle, owned: Arc<Owned>, message: ClientMessage) {
    match message {
        ClientMessage::CreateTerminal {
            cols,
            rows,
            title,
            kube_context,
        } => {
            let tracker = owned.clone();
            let handle = tokio::spawn(async move {
                match server
                    .local
                    .create_local(client.clone(), cols, rows, title, kube_context)
                    .await
                {
                    Ok((id, title)) => {
                        owned.track_local(id);
                        client.send(ServerMessage::TerminalCreated {
                            session_id: id,
                            title,
                            cloned: None,
                            is_sandbox: None,
                            clone_type: None,
                        });
                    }
                    Err(e) => client.send(ServerMessage::Error {
                        message: e.wire_message(),
                    }),
                }
            });
            tracker.track_pending(handle);
        }

        ClientMessage::CreateSandbox {
            cols,
            rows,
            image,
            title,
        } => {
            let tracker = owned.clone();
            let handle = tokio::spawn(async move {
                match server
                    .local
                    .create_sandbox(client.clone(), cols, rows, image, title)
                    .await
                {
                    Ok((id, title)) => {
                        owned.track_local(id);
                        client.send(ServerMessage::TerminalCreated {
                            session_id: id,
                            title,
                            cloned: None,
                            is_sandbox: Some(true),
                            clone_type: None,
                        });
                    }
                    Err(e) => client.send(ServerMessage::Error {
                        message: e.wire_message(),
                    }),
                }
            });
            tracker.track_pending(handle);
        }

        ClientMessage::CloneTerminal {
            original_session_id,
            clone_type,
            ..
        } => {
            let tracker = owned.clone();
            let handle = tokio::spawn(async move {
                if server.remote.owns(original_session_id) {
                    match server
                        .remote
                        .duplicate(client.clone(), original_session_id)
                        .await
                    {
                        Ok((id, title, params)) => {
                            owned.track_remote(id);
                            client.send(ServerMessage::SshCreated {
                                session_id: id,
                                title,
                                params,
                                cloned: Some(true),
                                duplicated: Some(true),
                                reconnected: None,
                            });
                        }
                        Err(e) => client.send(ServerMessage::Error {
                            message: e.wire_message(),
                        }),
                    }
                } else {
                    match server
                        .local
                        .duplicate(client.clone(), original_session_id)
                        .await
                    {
                        Ok((id, title, is_sandbox)) => {
                            owned.track_local(id);
                            client.send(ServerMessage::TerminalCreated {
                                session_id: id,
                                title,
                                cloned: Some(true),
                                is_sandbox: Some(is_sandbox),
                                clone_type: Some(clone_type),
                            });
                        }
                        Err(e) => client.send(ServerMessage::Error {
                            message: e.wire_message(),
                        }),
                    }
                }
            });
            tracker.track_pending(handle);
        }

        ClientMessage::Input { session_id, data } => {
            server.local.input(session_id, &decode(&data)).await;
        }

        ClientMessage::Resize {
            session_id,
            cols,
            rows,
        } => {
            server.local.resize(session_id, cols, rows).await;
        }

        ClientMessage::CloseTerminal { session_id } => {
            server.local.close(session_id).await;
        }

        ClientMessage::CreateSsh {
            host,
            port,
            username,
            password,
            private_key,
            passphrase,
            term,
            cols,
            rows,
        } => {
            let auth = if let Some(key) = private_key {
                crate::remote::SshAuth::PrivateKey { key, passphrase }
            } else {
                crate::remote::SshAuth::Password(password.unwrap_or_default())
            };

            let params = crate::remote::SshParams {
                host,
                port,
                username,
                auth,
                term: term.unwrap_or_default(),
            };

            let tracker = owned.clone();
            let handle = tokio::spawn(async move {
                match server.remote.create(client.clone(), params, cols, rows).await {
                    Ok((id, title, safe_params)) => {
                        owned.track_remote(id);
                        client.send(ServerMessage::SshCreated {
                            session_id: id,
                            title,
                            params: safe_params,
                            cloned: None,
                            duplicated: None,
                            reconnected: None,
                        });
                    }
                    Err(e) => client.send(ServerMessage::Error {
                        message: e.wire_message(),
                    }),
                }
            });
            tracker.track_pending(handle);
        }

        ClientMessage::DuplicateSsh { session_id } => {
            let tracker = owned.clone();
            let handle = tokio::spawn(async move {
                match server.remote.duplicate(client.clone(), session_id).await {
                    Ok((id, title, params)) => {
                        owned.track_remote(id);
                        client.send(ServerMessage::SshCreated {
                            session_id: id,
                            title,
                            params,
                            cloned: Some(true),
                            duplicated: Some(true),
                            reconnected: None,
                        });
                    }
                    Err(e) => client.send(ServerMessage::Error {
                        message: e.wire_message(),
                    }),
                }
            });
            tracker.track_pending(handle);
        }

        ClientMessage::ReconnectSsh { session_id } => {
            let tracker = owned.clone();
            let handle = tokio::spawn(async move {
                match server.remote.reconnect(client.clone(), session_id).await {
                    Ok((id, title, params)) => {
                        owned.track_remote(id);
                        client.send(ServerMessage::SshCreated {
                            session_id: id,
                            title,
                            params,
                            cloned: None,
                            duplicated: None,
                            reconnected: Some(true),
                        });
                    }
                    Err(e) => client.send(ServerMessage::Error {
                        message: e.wire_message(),
                    }),
                }
            });
            tracker.track_pending(handle);
        }

        ClientMessage::SshInput { session_id, data } => {
            server.remote.input(session_id, &decode(&data)).await;
        }

        ClientMessage::SshResize {
            session_id,
            cols,
            rows,
        } => {
            server.remote.resize(session_id, cols, rows).await;
        }

        ClientMessage::CloseSsh { session_id } => {
            server.remote.close(session_id).await;
        }
    }
}
