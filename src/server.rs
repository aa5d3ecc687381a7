//! Top-level `Server`: owns every registry and catalog, builds the axum
//! `Router` serving both the websocket gateway and the catalog HTTP surface
//! on one listener (§6 "same listener as the HTTP catalog").

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{delete, get};
use axum::Router;

use crate::catalog::{self, RememberedImages, RememberedParams};
use crate::config::Config;
use crate::container::ContainerAdapter;
use crate::gateway;
use crate::local::LocalRegistry;
use crate::pool::TransportPool;
use crate::remote::RemoteRegistry;

/// Cheaply cloneable: every field is itself an `Arc`-backed handle, matching
/// the shape axum's `State` extractor expects. Constructed once in `main`
/// and handed to the router; there is exactly one of these per process,
/// explicitly, rather than the teacher's process-wide static maps (§9).
#[derive(Clone)]
pub struct Server {
    pub local: LocalRegistry,
    pub remote: RemoteRegistry,
    pub pool: TransportPool,
    pub remembered_images: RememberedImages,
    started_at: Arc<Instant>,
    max_frame_bytes: usize,
}

impl Server {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.persistence.data_dir).await?;

        let remembered_images = RememberedImages::load(&config.persistence.data_dir).await;
        let remembered_params = RememberedParams::load(
            &config.persistence.data_dir,
            config.remote.remembered_max_age_days,
        )
        .await;

        let pool = TransportPool::new(config.transport_pool.clone());
        let remote = RemoteRegistry::new(pool.clone(), remembered_params, config.remote.term.clone());
        let containers = ContainerAdapter::new(config.container.runtime_override.clone());
        let local = LocalRegistry::new(containers, remembered_images.clone());

        Ok(Self {
            local,
            remote,
            pool,
            remembered_images,
            started_at: Arc::new(Instant::now()),
            max_frame_bytes: config.server.max_frame_bytes,
        })
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn now_unix(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(catalog::health))
            .route("/api/terminals", get(catalog::list_terminals))
            .route("/api/kubectl-contexts", get(catalog::kubectl_contexts))
            .route(
                "/api/container-images",
                get(catalog::list_container_images).post(catalog::add_container_image),
            )
            .route(
                "/api/container-images/{image}",
                delete(catalog::remove_container_image),
            )
            .route("/api/ssh-sessions", get(catalog::list_ssh_sessions))
            .with_state(self)
    }

    /// Closes every owned session and every pooled transport. Called from
    /// the graceful-shutdown path in `main` so an orderly `ctrl-c` doesn't
    /// leak child processes, containers, or open SSH transports.
    pub async fn shutdown(&self) {
        let local_sessions: Vec<_> = self.local.list_public().into_iter().map(|(id, _, _)| id).collect();
        for id in local_sessions {
            self.local.close(id).await;
        }

        let remote_sessions: Vec<_> = self.remote.list_public().into_iter().map(|(id, _, _)| id).collect();
        for id in remote_sessions {
            self.remote.close(id).await;
        }

        self.pool.shutdown().await;
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(server): State<Server>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| gateway::handle_socket(socket, server))
}
