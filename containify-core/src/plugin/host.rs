//! Plugin host
//!
//! Spawns the user's configuration binary, performs the stdout handshake
//! and sources `BuildGroups` over the versioned RPC. Any spawn, handshake
//! or RPC failure is fatal for the engine invocation.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use super::proto::{
    GetBuildResponse, GetBuildsResponse, Handshake, RpcRequest, COOKIE_ENV, COOKIE_VALUE,
    SERVICE_NAME,
};
use crate::build::BuildGroups;
use crate::error::{EngineError, Result};
use crate::{DEFAULT_PLUGIN_FILE, PLUGIN_FILE_ENV};

/// How long the plugin gets to print its handshake line
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// RPC client for a handshaken plugin
#[derive(Debug)]
pub struct PluginClient {
    base: String,
    version: u32,
    http: reqwest::Client,
}

impl PluginClient {
    pub fn new(addr: &str, version: u32) -> Self {
        PluginClient {
            base: format!("http://{}", addr),
            version,
            http: reqwest::Client::new(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Fetch build groups: `GetBuilds` on protocol v2, `GetBuild` with
    /// single-member wrapping on v1.
    pub async fn get_builds(&self) -> Result<BuildGroups> {
        if self.version >= 2 {
            let response: GetBuildsResponse = self.call("GetBuilds").await?;
            response.into_groups()
        } else {
            tracing::info!("plugin speaks protocol v1, wrapping builds into one-element groups");
            let response: GetBuildResponse = self.call("GetBuild").await?;
            response.into_groups()
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str) -> Result<T> {
        let request = RpcRequest {
            service: SERVICE_NAME.to_string(),
            method: method.to_string(),
        };

        let response = self
            .http
            .post(format!("{}/rpc", self.base))
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Plugin(format!("rpc {} failed: {}", method, e)))?;

        if !response.status().is_success() {
            return Err(EngineError::Plugin(format!(
                "rpc {} returned {}",
                method,
                response.status()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| EngineError::Plugin(format!("rpc {} unparseable response: {}", method, e)))
    }
}

/// A running configuration plugin process
#[derive(Debug)]
pub struct PluginHost {
    child: Child,
    client: PluginClient,
}

impl PluginHost {
    /// Spawn the plugin named by `CONTAINIFYCI_FILE` (or the default
    /// location) and perform the handshake.
    pub async fn launch() -> Result<Self> {
        let path = std::env::var(PLUGIN_FILE_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_PLUGIN_FILE));
        Self::launch_from(path).await
    }

    /// Spawn a specific plugin binary and perform the handshake.
    pub async fn launch_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            return Err(EngineError::Plugin(format!(
                "plugin binary {:?} not found (set {})",
                path, PLUGIN_FILE_ENV
            )));
        }

        let mut child = Command::new(&path)
            .env(COOKIE_ENV, COOKIE_VALUE)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Plugin(format!("failed to spawn {:?}: {}", path, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Plugin("plugin stdout not captured".to_string()))?;

        let mut lines = BufReader::new(stdout).lines();
        let line = tokio::time::timeout(HANDSHAKE_TIMEOUT, lines.next_line())
            .await
            .map_err(|_| EngineError::Plugin("plugin handshake timed out".to_string()))?
            .map_err(|e| EngineError::Plugin(format!("plugin handshake read failed: {}", e)))?
            .ok_or_else(|| {
                EngineError::Plugin("plugin exited before handshaking".to_string())
            })?;

        let handshake = Handshake::parse(&line)?;
        tracing::debug!(
            "plugin {:?} handshake: protocol v{} at {}",
            path,
            handshake.version,
            handshake.addr
        );

        Ok(PluginHost {
            child,
            client: PluginClient::new(&handshake.addr, handshake.version),
        })
    }

    pub async fn get_builds(&self) -> Result<BuildGroups> {
        self.client.get_builds().await
    }

    /// Kill the plugin process. Called once the groups are sourced; the
    /// plugin has no further role in the run.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!("plugin already gone: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::proto::{BuildArgs, BuildArgsGroup};
    use axum::extract::Json;
    use axum::routing::post;
    use axum::Router;

    async fn stub_plugin_server() -> std::net::SocketAddr {
        async fn rpc(
            Json(request): Json<RpcRequest>,
        ) -> Json<serde_json::Value> {
            assert_eq!(request.service, SERVICE_NAME);
            match request.method.as_str() {
                "GetBuilds" => Json(
                    serde_json::to_value(GetBuildsResponse {
                        args: vec![BuildArgsGroup {
                            args: vec![
                                sample("svc"),
                                sample("worker"),
                            ],
                        }],
                    })
                    .unwrap(),
                ),
                "GetBuild" => Json(
                    serde_json::to_value(GetBuildResponse {
                        args: vec![sample("svc"), sample("worker")],
                    })
                    .unwrap(),
                ),
                other => panic!("unexpected method {}", other),
            }
        }

        fn sample(app: &str) -> BuildArgs {
            BuildArgs {
                application: app.to_string(),
                build_type: "golang".to_string(),
                environment: "build".to_string(),
                ..Default::default()
            }
        }

        let router = Router::new().route("/rpc", post(rpc));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_v2_client_fetches_grouped_builds() {
        let addr = stub_plugin_server().await;
        let client = PluginClient::new(&addr.to_string(), 2);

        let groups = client.get_builds().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups.groups[0].builds.len(), 2);
    }

    #[tokio::test]
    async fn test_v1_client_wraps_flat_list() {
        let addr = stub_plugin_server().await;
        let client = PluginClient::new(&addr.to_string(), 1);

        let groups = client.get_builds().await.unwrap();
        assert_eq!(groups.len(), 2, "v1 builds become one-element groups");
        assert!(groups.groups.iter().all(|group| group.builds.len() == 1));
    }

    #[tokio::test]
    async fn test_client_reports_unreachable_plugin() {
        let client = PluginClient::new("127.0.0.1:1", 2);
        let err = client.get_builds().await.unwrap_err();
        assert!(matches!(err, EngineError::Plugin(_)));
    }

    #[tokio::test]
    async fn test_launch_rejects_missing_binary() {
        let err = PluginHost::launch_from(PathBuf::from("/nonexistent/containifyci"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Plugin(_)));
        assert!(err.to_string().contains("not found"));
    }
}
