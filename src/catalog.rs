//! Persisted catalogs (§6 "Persisted state") and the read-mostly HTTP
//! surface built on top of them.
//!
//! Both catalogs are small JSON files under the configured data directory,
//! written with a temp-file-then-rename so a crash mid-write can't leave a
//! half-written file behind. `PersistFailed` is logged, never propagated to
//! the caller (§7).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Path as AxumPath, State};
use axum::Json;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::GatewayError;
use crate::ids::SessionId;
use crate::remote::{SshAuth, SshParams};
use crate::server::Server;

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), GatewayError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| GatewayError::PersistFailed(e.to_string()))?;
    }

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)
        .await
        .map_err(|e| GatewayError::PersistFailed(e.to_string()))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| GatewayError::PersistFailed(e.to_string()))?;

    Ok(())
}

fn log_persist_failure(context: &str, err: GatewayError) {
    log::warn!("{context}: {err}");
}

/// Set-semantics, insertion-ordered (most recent first), catalog of image
/// names a sandbox was created with at least once.
#[derive(Clone)]
pub struct RememberedImages {
    path: PathBuf,
    images: Arc<RwLock<Vec<String>>>,
}

impl RememberedImages {
    pub async fn load(data_dir: &Path) -> Self {
        let path = data_dir.join("container-images.json");
        let images = fs::read(&path)
            .await
            .ok()
            .and_then(|bytes| serde_json::from_slice::<Vec<String>>(&bytes).ok())
            .unwrap_or_default();

        Self {
            path,
            images: Arc::new(RwLock::new(images)),
        }
    }

    pub async fn remember(&self, image: String) {
        {
            let mut images = self.images.write();
            images.retain(|i| i != &image);
            images.insert(0, image);
        }
        self.persist().await;
    }

    pub async fn remove(&self, image: &str) {
        {
            let mut images = self.images.write();
            images.retain(|i| i != image);
        }
        self.persist().await;
    }

    pub fn list(&self) -> Vec<String> {
        self.images.read().clone()
    }

    async fn persist(&self) {
        let snapshot = self.images.read().clone();
        let Ok(bytes) = serde_json::to_vec_pretty(&snapshot) else {
            return;
        };
        if let Err(e) = write_atomic(&self.path, &bytes).await {
            log_persist_failure("remembered images", e);
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
struct StoredSshAuth {
    password: Option<String>,
    private_key: Option<String>,
    passphrase: Option<String>,
}

impl From<&SshAuth> for StoredSshAuth {
    fn from(auth: &SshAuth) -> Self {
        match auth {
            SshAuth::Password(p) => Self {
                password: Some(p.clone()),
                private_key: None,
                passphrase: None,
            },
            SshAuth::PrivateKey { key, passphrase } => Self {
                password: None,
                private_key: Some(key.clone()),
                passphrase: passphrase.clone(),
            },
        }
    }
}

impl From<StoredSshAuth> for SshAuth {
    fn from(stored: StoredSshAuth) -> Self {
        if let Some(key) = stored.private_key {
            SshAuth::PrivateKey {
                key,
                passphrase: stored.passphrase,
            }
        } else {
            SshAuth::Password(stored.password.unwrap_or_default())
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
struct StoredParams {
    host: String,
    port: u16,
    username: String,
    auth: StoredSshAuth,
    term: String,
    saved_at_unix: u64,
}

/// Remembered remote connection parameters, credentials included, keyed by
/// the session id that first created them (§3, §9 open question: persisted
/// unencrypted on disk, matching the source).
#[derive(Clone)]
pub struct RememberedParams {
    path: PathBuf,
    max_age_days: u64,
    entries: Arc<RwLock<HashMap<SessionId, StoredParams>>>,
}

impl RememberedParams {
    pub async fn load(data_dir: &Path, max_age_days: u64) -> Self {
        let path = data_dir.join("ssh-sessions.json");
        let entries = fs::read(&path)
            .await
            .ok()
            .and_then(|bytes| serde_json::from_slice::<HashMap<SessionId, StoredParams>>(&bytes).ok())
            .unwrap_or_default();

        let registry = Self {
            path,
            max_age_days,
            entries: Arc::new(RwLock::new(entries)),
        };
        registry.evict_expired();
        registry
    }

    fn evict_expired(&self) {
        let max_age_secs = self.max_age_days * 24 * 60 * 60;
        let now = now_unix();
        self.entries
            .write()
            .retain(|_, v| now.saturating_sub(v.saved_at_unix) < max_age_secs);
    }

    pub async fn remember(&self, session_id: SessionId, params: SshParams) {
        {
            let mut entries = self.entries.write();
            entries.insert(
                session_id,
                StoredParams {
                    host: params.host,
                    port: params.port,
                    username: params.username,
                    auth: StoredSshAuth::from(&params.auth),
                    term: params.term,
                    saved_at_unix: now_unix(),
                },
            );
        }
        self.persist().await;
    }

    pub async fn lookup(&self, session_id: SessionId) -> Option<SshParams> {
        let stored = self.entries.read().get(&session_id).cloned()?;
        Some(SshParams {
            host: stored.host,
            port: stored.port,
            username: stored.username,
            auth: stored.auth.into(),
            term: stored.term,
        })
    }

    async fn persist(&self) {
        let snapshot = self.entries.read().clone();
        let Ok(bytes) = serde_json::to_vec_pretty(&snapshot) else {
            return;
        };
        if let Err(e) = write_atomic(&self.path, &bytes).await {
            log_persist_failure("remembered ssh params", e);
        }
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// --- HTTP handlers -------------------------------------------------------

#[derive(Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub terminals: usize,
    pub uptime: u64,
}

pub async fn health(State(server): State<Server>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        terminals: server.local.list_public().len(),
        uptime: server.uptime_secs(),
    })
}

#[derive(Serialize)]
pub struct TerminalSummary {
    #[serde(rename = "sessionId")]
    session_id: SessionId,
    title: String,
    #[serde(rename = "isSandbox")]
    is_sandbox: bool,
}

pub async fn list_terminals(State(server): State<Server>) -> Json<Vec<TerminalSummary>> {
    Json(
        server
            .local
            .list_public()
            .into_iter()
            .map(|(session_id, title, is_sandbox)| TerminalSummary {
                session_id,
                title,
                is_sandbox,
            })
            .collect(),
    )
}

#[derive(Serialize)]
pub struct SshSessionSummary {
    #[serde(rename = "sessionId")]
    session_id: SessionId,
    title: String,
    params: crate::protocol::SafeSshParams,
}

pub async fn list_ssh_sessions(State(server): State<Server>) -> Json<Vec<SshSessionSummary>> {
    Json(
        server
            .remote
            .list_public()
            .into_iter()
            .map(|(session_id, title, params)| SshSessionSummary {
                session_id,
                title,
                params,
            })
            .collect(),
    )
}

#[derive(Serialize)]
pub struct KubectlContextsBody {
    contexts: Vec<String>,
}

pub async fn kubectl_contexts(State(server): State<Server>) -> Json<KubectlContextsBody> {
    let _ = &server;
    let contexts = tokio::process::Command::new("kubectl")
        .args(["config", "get-contexts", "-o", "name"])
        .output()
        .await
        .ok()
        .filter(|o| o.status.success())
        .map(|o| {
            String::from_utf8_lossy(&o.stdout)
                .lines()
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Json(KubectlContextsBody { contexts })
}

#[derive(Serialize)]
pub struct ContainerImagesBody {
    images: Vec<String>,
}

pub async fn list_container_images(State(server): State<Server>) -> Json<ContainerImagesBody> {
    Json(ContainerImagesBody {
        images: server.remembered_images.list(),
    })
}

#[derive(Deserialize)]
pub struct AddImageRequest {
    image: String,
}

pub async fn add_container_image(
    State(server): State<Server>,
    Json(body): Json<AddImageRequest>,
) -> Json<ContainerImagesBody> {
    server.remembered_images.remember(body.image).await;
    Json(ContainerImagesBody {
        images: server.remembered_images.list(),
    })
}

pub async fn remove_container_image(
    State(server): State<Server>,
    AxumPath(image): AxumPath<String>,
) -> Json<ContainerImagesBody> {
    server.remembered_images.remove(&image).await;
    Json(ContainerImagesBody {
        images: server.remembered_images.list(),
    })
}
