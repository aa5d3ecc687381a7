//! Container Runtime Adapter (§4.3): a thin façade over whichever of
//! `docker`/`podman` is installed, shelled out to via `tokio::process::Command`
//! the same way the teacher's `server/mod.rs` spawns and awaits subprocess-like
//! async work.

use std::collections::HashSet;
use std::sync::OnceLock;

use tokio::process::Command;
use tokio::sync::OnceCell;

use crate::error::GatewayError;
use crate::ids::SessionId;

const CANDIDATES: &[&str] = &["docker", "podman"];

/// Detected once per process and cached (§4.3 "subsequent calls are O(1)").
#[derive(Clone)]
pub struct ContainerRuntime {
    binary: &'static str,
}

async fn probe(candidate: &str) -> bool {
    Command::new(candidate)
        .arg("version")
        .kill_on_drop(true)
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[derive(Clone)]
pub struct ContainerAdapter {
    runtime: std::sync::Arc<OnceCell<ContainerRuntime>>,
    override_binary: Option<&'static str>,
}

impl ContainerAdapter {
    pub fn new(runtime_override: Option<String>) -> Self {
        let override_binary = runtime_override.and_then(|s| {
            CANDIDATES
                .iter()
                .find(|c| **c == s)
                .copied()
                .or_else(|| leak(s))
        });

        Self {
            runtime: std::sync::Arc::new(OnceCell::new()),
            override_binary,
        }
    }

    /// Probes candidate runtimes in order; caches the first that answers.
    pub async fn detect(&self) -> Result<ContainerRuntime, GatewayError> {
        if let Some(runtime) = self.runtime.get() {
            return Ok(runtime.clone());
        }

        let binary = if let Some(forced) = self.override_binary {
            if probe(forced).await {
                Some(forced)
            } else {
                None
            }
        } else {
            let mut found = None;
            for candidate in CANDIDATES {
                if probe(candidate).await {
                    found = Some(*candidate);
                    break;
                }
            }
            found
        };

        let binary = binary.ok_or(GatewayError::NoRuntime)?;
        let runtime = ContainerRuntime { binary };
        let _ = self.runtime.set(runtime.clone());
        Ok(runtime)
    }

    pub async fn list_local_images(&self) -> Result<HashSet<String>, GatewayError> {
        let runtime = self.detect().await?;
        let output = Command::new(runtime.binary)
            .args(["images", "--format", "{{.Repository}}:{{.Tag}}"])
            .output()
            .await
            .map_err(|e| GatewayError::CreateFailed(e.to_string()))?;

        if !output.status.success() {
            return Err(GatewayError::CreateFailed(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }

    pub async fn ensure_image(&self, image: &str) -> Result<(), GatewayError> {
        let runtime = self.detect().await?;

        if self.list_local_images().await?.contains(image) {
            return Ok(());
        }

        let status = Command::new(runtime.binary)
            .args(["pull", image])
            .status()
            .await
            .map_err(|e| GatewayError::PullFailed {
                image: image.to_string(),
                reason: e.to_string(),
            })?;

        if !status.success() {
            return Err(GatewayError::PullFailed {
                image: image.to_string(),
                reason: format!("exit status {status}"),
            });
        }

        Ok(())
    }

    pub fn container_name(session_id: SessionId) -> String {
        format!("termgate-{}", session_id.as_simple())
    }

    pub async fn create_container(
        &self,
        session_id: SessionId,
        image: &str,
    ) -> Result<String, GatewayError> {
        let runtime = self.detect().await?;
        let name = Self::container_name(session_id);

        let status = Command::new(runtime.binary)
            .args([
                "run", "-d", "--rm", "--name", &name, image, "/bin/sh", "-c", "sleep infinity",
            ])
            .status()
            .await
            .map_err(|e| GatewayError::CreateFailed(e.to_string()))?;

        if !status.success() {
            return Err(GatewayError::CreateFailed(format!(
                "exit status {status}"
            )));
        }

        Ok(name)
    }

    /// Returns the command+argv that, run under a pseudo-terminal, attaches
    /// an interactive shell inside `container_name`.
    pub async fn exec_spec(&self, container_name: &str) -> Result<(String, Vec<String>), GatewayError> {
        let runtime = self.detect().await?;
        Ok((
            runtime.binary.to_string(),
            vec![
                "exec".to_string(),
                "-it".to_string(),
                container_name.to_string(),
                "/bin/sh".to_string(),
            ],
        ))
    }

    pub async fn stop(&self, container_name: &str) -> Result<(), GatewayError> {
        let runtime = self.detect().await?;
        let output = Command::new(runtime.binary)
            .args(["stop", container_name])
            .output()
            .await
            .map_err(|e| GatewayError::StopFailed(e.to_string()))?;

        // Auto-removed or already-gone containers report a "no such
        // container" style error on stderr; §4.3 requires that be success.
        if output.status.success() || already_gone(&output.stderr) {
            return Ok(());
        }

        Err(GatewayError::StopFailed(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }
}

fn already_gone(stderr: &[u8]) -> bool {
    let text = String::from_utf8_lossy(stderr).to_lowercase();
    text.contains("no such container") || text.contains("is not running")
}

fn leak(s: String) -> Option<&'static str> {
    static SLOTS: OnceLock<std::sync::Mutex<Vec<&'static str>>> = OnceLock::new();
    let slots = SLOTS.get_or_init(|| std::sync::Mutex::new(Vec::new()));
    let leaked: &'static str = Box::leak(s.into_boxed_str());
    slots.lock().unwrap().push(leaked);
    Some(leaked)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_is_deterministic_from_session_id() {
        let id = SessionId::new();
        assert_eq!(
            ContainerAdapter::container_name(id),
            ContainerAdapter::container_name(id)
        );
    }

    #[test]
    fn already_gone_matches_common_phrasing() {
        assert!(already_gone(b"Error: No such container: foo"));
        assert!(!already_gone(b"permission denied"));
    }
}
