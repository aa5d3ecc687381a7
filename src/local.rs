//! Local & Container Session Registry (§4.4): owns pseudo-terminal child
//! processes for host shells and container-exec shells.
//!
//! Grounded on the `portable_pty` usage shown in the reference terminal
//! server code (`native_pty_system().openpty(...)`, `CommandBuilder`,
//! blocking reader thread bridging into the async world via a channel) and
//! on the teacher's actor-ish registry shape (`Arc<RwLock<HashMap<...>>>`
//! with short, non-blocking critical sections).

use std::io::{Read, Write};
use std::sync::Arc;

use ahash::AHashMap;
use base64::Engine;
use parking_lot::{Mutex as SyncMutex, RwLock};
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};

use crate::container::ContainerAdapter;
use crate::cwd;
use crate::error::GatewayError;
use crate::gateway::ClientHandle;
use crate::ids::SessionId;
use crate::protocol::ServerMessage;

#[derive(Clone)]
enum Kind {
    Local,
    Container { container_name: String },
}

struct Entry {
    kind: Kind,
    title: String,
    cols: u16,
    rows: u16,
    cwd: Arc<SyncMutex<String>>,
    writer: Arc<SyncMutex<Box<dyn Write + Send>>>,
    master: Arc<SyncMutex<Box<dyn MasterPty + Send>>>,
    pid: Option<u32>,
    owner: ClientHandle,
}

/// Owns local-shell and container-exec pseudo-terminals (§4.4).
#[derive(Clone)]
pub struct LocalRegistry {
    sessions: Arc<RwLock<AHashMap<SessionId, Entry>>>,
    containers: ContainerAdapter,
    remembered_images: crate::catalog::RememberedImages,
    next_terminal_number: Arc<std::sync::atomic::AtomicU64>,
    kube_context_tool: &'static str,
}

impl LocalRegistry {
    pub fn new(
        containers: ContainerAdapter,
        remembered_images: crate::catalog::RememberedImages,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(AHashMap::new())),
            containers,
            remembered_images,
            next_terminal_number: Arc::new(std::sync::atomic::AtomicU64::new(1)),
            kube_context_tool: "kubectl",
        }
    }

    fn default_title(&self) -> String {
        let n = self
            .next_terminal_number
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        format!("Terminal {n}")
    }

    pub async fn create_local(
        &self,
        owner: ClientHandle,
        cols: u16,
        rows: u16,
        title: Option<String>,
        kube_context: Option<String>,
    ) -> Result<(SessionId, String), GatewayError> {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/".to_string());
        let shell = default_shell();

        let mut cmd = CommandBuilder::new(shell);
        cmd.cwd(&home);
        if let Some(context) = &kube_context {
            cmd.env("TERMGATE_KUBE_CONTEXT", context);
        }

        let session_id = SessionId::new();
        let title = title.unwrap_or_else(|| self.default_title());

        let (master, writer, pid) = spawn_pty(cmd, cols, rows)?;

        if let Some(context) = kube_context {
            let writer = writer.clone();
            let tool = self.kube_context_tool;
            let context = context.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                let mut w = writer.lock();
                let _ = writeln!(w, "{tool} config use-context {context}");
                let _ = writeln!(w, "echo \"switched to context {context}\"");
            });
        }

        self.insert(
            session_id,
            Entry {
                kind: Kind::Local,
                title: title.clone(),
                cols,
                rows,
                cwd: Arc::new(SyncMutex::new(home)),
                writer,
                master,
                pid,
                owner: owner.clone(),
            },
            owner,
        );

        Ok((session_id, title))
    }

    pub async fn create_sandbox(
        &self,
        owner: ClientHandle,
        cols: u16,
        rows: u16,
        image: String,
        title: Option<String>,
    ) -> Result<(SessionId, String), GatewayError> {
        let session_id = SessionId::new();

        self.containers.ensure_image(&image).await?;
        let container_name = self.containers.create_container(session_id, &image).await?;
        self.remembered_images.remember(image.clone()).await;

        let (command, argv) = self.containers.exec_spec(&container_name).await?;
        let mut cmd = CommandBuilder::new(command);
        for arg in argv {
            cmd.arg(arg);
        }

        let title = title.unwrap_or_else(|| self.default_title());

        let spawn_result = spawn_pty(cmd, cols, rows);
        let (master, writer, pid) = match spawn_result {
            Ok(v) => v,
            Err(e) => {
                let _ = self.containers.stop(&container_name).await;
                return Err(e);
            }
        };

        self.insert(
            session_id,
            Entry {
                kind: Kind::Container { container_name },
                title: title.clone(),
                cols,
                rows,
                cwd: Arc::new(SyncMutex::new("/".to_string())),
                writer,
                master,
                pid,
                owner: owner.clone(),
            },
            owner,
        );

        Ok((session_id, title))
    }

    pub async fn duplicate(
        &self,
        owner: ClientHandle,
        session_id: SessionId,
    ) -> Result<(SessionId, String, bool), GatewayError> {
        let (kind, cols, rows, cwd, original_title) = {
            let sessions = self.sessions.read();
            let entry = sessions.get(&session_id).ok_or(GatewayError::UnknownSession)?;
            (
                entry.kind.clone(),
                entry.cols,
                entry.rows,
                entry.cwd.lock().clone(),
                entry.title.clone(),
            )
        };

        match kind {
            Kind::Container { container_name } => {
                let (command, argv) = self.containers.exec_spec(&container_name).await?;
                let mut cmd = CommandBuilder::new(command);
                for arg in argv {
                    cmd.arg(arg);
                }

                let new_id = SessionId::new();
                let (master, writer, pid) = spawn_pty(cmd, cols, rows)?;
                let title = format!("{original_title} (copy)");

                self.insert(
                    new_id,
                    Entry {
                        kind: Kind::Container { container_name },
                        title: title.clone(),
                        cols,
                        rows,
                        cwd: Arc::new(SyncMutex::new("/".to_string())),
                        writer,
                        master,
                        pid,
                        owner: owner.clone(),
                    },
                    owner,
                );

                Ok((new_id, title, true))
            }

            Kind::Local => {
                let refreshed_cwd = {
                    let sessions = self.sessions.read();
                    match sessions.get(&session_id).and_then(|e| e.pid) {
                        Some(pid) => cwd::of_pid(pid),
                        None => cwd,
                    }
                };
                let cwd_for_spawn = if refreshed_cwd == "unknown" {
                    cwd
                } else {
                    refreshed_cwd
                };

                let shell = default_shell();
                let mut cmd = CommandBuilder::new(shell);
                cmd.cwd(&cwd_for_spawn);

                let new_id = SessionId::new();
                let (master, writer, pid) = spawn_pty(cmd, cols, rows)?;
                let title = format!("{original_title} (copy)");

                self.insert(
                    new_id,
                    Entry {
                        kind: Kind::Local,
                        title: title.clone(),
                        cols,
                        rows,
                        cwd: Arc::new(SyncMutex::new(cwd_for_spawn)),
                        writer,
                        master,
                        pid,
                        owner: owner.clone(),
                    },
                    owner,
                );

                Ok((new_id, title, false))
            }
        }
    }

    pub async fn input(&self, session_id: SessionId, data: &[u8]) {
        let (writer, cwd, pid) = {
            let sessions = self.sessions.read();
            let Some(entry) = sessions.get(&session_id) else {
                return;
            };
            (entry.writer.clone(), entry.cwd.clone(), entry.pid)
        };

        {
            let mut w = writer.lock();
            let _ = w.write_all(data);
        }

        if looks_like_cd(data) {
            if let Some(pid) = pid {
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                    let refreshed = cwd::of_pid(pid);
                    if refreshed != "unknown" {
                        *cwd.lock() = refreshed;
                    }
                });
            }
        }
    }

    pub async fn resize(&self, session_id: SessionId, cols: u16, rows: u16) {
        let master = {
            let mut sessions = self.sessions.write();
            let Some(entry) = sessions.get_mut(&session_id) else {
                return;
            };
            entry.cols = cols;
            entry.rows = rows;
            entry.master.clone()
        };

        let _ = master.lock().resize(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        });
    }

    pub async fn close(&self, session_id: SessionId) {
        self.teardown(session_id, Some(ServerMessage::TerminalClosed { session_id }))
            .await;
    }

    /// Shared by an explicit `close_terminal` and by the reader thread
    /// noticing the backing process exited on its own: either way the
    /// container (if any) must be stopped and the entry removed exactly
    /// once. A second call for the same id is a no-op (§8 idempotence).
    /// `notification` is `None` on the process-exit path since the reader
    /// thread already emitted `terminal_exit`; §6 only produces
    /// `terminal_closed` for an explicit close.
    async fn teardown(&self, session_id: SessionId, notification: Option<ServerMessage>) {
        let entry = self.sessions.write().remove(&session_id);
        let Some(entry) = entry else {
            return;
        };

        if let Kind::Container { container_name } = &entry.kind {
            let _ = self.containers.stop(container_name).await;
        }

        if let Some(notification) = notification {
            entry.owner.send(notification);
        }
    }

    pub fn owns(&self, session_id: SessionId) -> bool {
        self.sessions.read().contains_key(&session_id)
    }

    pub fn list_public(&self) -> Vec<(SessionId, String, bool)> {
        self.sessions
            .read()
            .iter()
            .map(|(id, e)| (*id, e.title.clone(), matches!(e.kind, Kind::Container { .. })))
            .collect()
    }

    fn insert(&self, session_id: SessionId, entry: Entry, owner: ClientHandle) {
        let reader = entry.master.lock().try_clone_reader();
        self.sessions.write().insert(session_id, entry);

        if let Ok(mut reader) = reader {
            let registry = self.clone();
            let runtime = tokio::runtime::Handle::current();
            std::thread::spawn(move || {
                let mut buf = [0u8; 8192];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            let data = base64::engine::general_purpose::STANDARD.encode(&buf[..n]);
                            owner.send(ServerMessage::Data { session_id, data });
                        }
                        Err(_) => break,
                    }
                }

                owner.send(ServerMessage::TerminalExit {
                    session_id,
                    code: None,
                });

                // The reader thread is the only witness to process exit
                // that isn't driven by an explicit close message; hand
                // cleanup (container stop included) back to the runtime
                // since stopping a container is async.
                runtime.spawn(async move {
                    registry.teardown(session_id, None).await;
                });
            });
        }
    }
}

fn spawn_pty(
    mut cmd: CommandBuilder,
    cols: u16,
    rows: u16,
) -> Result<
    (
        Arc<SyncMutex<Box<dyn MasterPty + Send>>>,
        Arc<SyncMutex<Box<dyn Write + Send>>>,
        Option<u32>,
    ),
    GatewayError,
> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| GatewayError::SpawnFailed(e.to_string()))?;

    cmd.env("TERM", "xterm-256color");

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| GatewayError::SpawnFailed(e.to_string()))?;
    let pid = child.process_id();

    let writer = pair
        .master
        .take_writer()
        .map_err(|e| GatewayError::SpawnFailed(e.to_string()))?;

    drop(pair.slave);

    Ok((
        Arc::new(SyncMutex::new(pair.master)),
        Arc::new(SyncMutex::new(writer)),
        pid,
    ))
}

fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

fn looks_like_cd(data: &[u8]) -> bool {
    let text = String::from_utf8_lossy(data);
    let text = text.trim();
    text.starts_with("cd ") || text == "cd" || text.starts_with("cd\t")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_cd_commands() {
        assert!(looks_like_cd(b"cd /tmp\r"));
        assert!(looks_like_cd(b"cd\r"));
        assert!(!looks_like_cd(b"echo cd /tmp\r"));
    }
}
