//! Authenticated key-value sidecar
//!
//! A process-local HTTP server that running build containers use to
//! exchange small opaque blobs with the host and with each other. Every
//! request carries a bearer token generated at startup; data lives in
//! memory for the lifetime of the sidecar only.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use parking_lot::RwLock;
use rand::RngCore;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::cri::RuntimeKind;
use crate::error::Result;

/// Values above this cap are rejected with 413
pub const MAX_VALUE_BYTES: usize = 1024 * 1024;

struct SidecarState {
    store: RwLock<HashMap<String, Vec<u8>>>,
    secret: String,
}

/// Handle to a running key-value sidecar
pub struct KvSidecar {
    addr: SocketAddr,
    secret: String,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl KvSidecar {
    /// Bind an ephemeral localhost port and start serving.
    pub async fn start() -> Result<Self> {
        let secret = generate_secret();
        let state = Arc::new(SidecarState {
            store: RwLock::new(HashMap::new()),
            secret: secret.clone(),
        });

        let router = Router::new()
            .route(
                "/v1/{key}",
                get(get_value).put(put_value).delete(delete_value),
            )
            .layer(middleware::from_fn_with_state(
                Arc::clone(&state),
                authorize,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                tracing::error!("kv sidecar terminated: {}", e);
            }
        });

        tracing::debug!("kv sidecar listening on {}", addr);

        Ok(KvSidecar {
            addr,
            secret,
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Host-local base URL.
    pub fn external_host(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Container-routable base URL for the active runtime.
    pub fn container_host(&self, kind: RuntimeKind) -> String {
        format!("http://{}:{}", kind.container_host(), self.addr.port())
    }

    /// Stop serving and wait for the server task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

async fn authorize(
    State(state): State<Arc<SidecarState>>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token == state.secret)
        .unwrap_or(false);

    if !authorized {
        return (StatusCode::UNAUTHORIZED, "invalid bearer token").into_response();
    }
    next.run(request).await
}

async fn get_value(
    State(state): State<Arc<SidecarState>>,
    Path(key): Path<String>,
) -> Response {
    match state.store.read().get(&key) {
        Some(value) => (StatusCode::OK, value.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, format!("no such key: {}", key)).into_response(),
    }
}

async fn put_value(
    State(state): State<Arc<SidecarState>>,
    Path(key): Path<String>,
    body: Bytes,
) -> Response {
    if body.len() > MAX_VALUE_BYTES {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("value exceeds {} bytes", MAX_VALUE_BYTES),
        )
            .into_response();
    }
    // A write replaces the whole value under the lock; readers see either
    // the previous complete value or this one.
    state.store.write().insert(key, body.to_vec());
    StatusCode::NO_CONTENT.into_response()
}

async fn delete_value(
    State(state): State<Arc<SidecarState>>,
    Path(key): Path<String>,
) -> Response {
    state.store.write().remove(&key);
    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn client() -> (KvSidecar, reqwest::Client) {
        let sidecar = KvSidecar::start().await.unwrap();
        (sidecar, reqwest::Client::new())
    }

    #[tokio::test]
    async fn test_put_get_delete_roundtrip() {
        let (sidecar, client) = client().await;
        let url = format!("{}/v1/result", sidecar.external_host());
        let auth = format!("Bearer {}", sidecar.secret());

        let response = client
            .put(&url)
            .header("Authorization", &auth)
            .body("coverage=93")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 204);

        let response = client
            .get(&url)
            .header("Authorization", &auth)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.bytes().await.unwrap().as_ref(), b"coverage=93");

        let response = client
            .delete(&url)
            .header("Authorization", &auth)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 204);

        let response = client
            .get(&url)
            .header("Authorization", &auth)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        sidecar.shutdown().await;
    }

    #[tokio::test]
    async fn test_wrong_secret_is_rejected() {
        let (sidecar, client) = client().await;
        let url = format!("{}/v1/result", sidecar.external_host());

        let response = client
            .put(&url)
            .header("Authorization", "Bearer not-the-secret")
            .body("x")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);

        // The failed write must not have created the key.
        let response = client
            .get(&url)
            .header("Authorization", format!("Bearer {}", sidecar.secret()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        sidecar.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_auth_header_is_rejected() {
        let (sidecar, client) = client().await;
        let url = format!("{}/v1/result", sidecar.external_host());

        let response = client.get(&url).send().await.unwrap();
        assert_eq!(response.status(), 401);

        sidecar.shutdown().await;
    }

    #[tokio::test]
    async fn test_oversized_value_is_rejected() {
        let (sidecar, client) = client().await;
        let url = format!("{}/v1/blob", sidecar.external_host());
        let auth = format!("Bearer {}", sidecar.secret());

        let response = client
            .put(&url)
            .header("Authorization", &auth)
            .body(vec![0u8; MAX_VALUE_BYTES + 1])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 413);

        sidecar.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_reads_see_complete_values() {
        let (sidecar, client) = client().await;
        let url = format!("{}/v1/flag", sidecar.external_host());
        let auth = format!("Bearer {}", sidecar.secret());

        let value_a = vec![b'a'; 4096];
        let value_b = vec![b'b'; 4096];

        client
            .put(&url)
            .header("Authorization", &auth)
            .body(value_a.clone())
            .send()
            .await
            .unwrap();

        let writer = {
            let client = client.clone();
            let url = url.clone();
            let auth = auth.clone();
            let value_b = value_b.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    client
                        .put(&url)
                        .header("Authorization", &auth)
                        .body(value_b.clone())
                        .send()
                        .await
                        .unwrap();
                }
            })
        };

        for _ in 0..20 {
            let body = client
                .get(&url)
                .header("Authorization", &auth)
                .send()
                .await
                .unwrap()
                .bytes()
                .await
                .unwrap();
            let bytes = body.as_ref();
            assert!(
                bytes == value_a.as_slice() || bytes == value_b.as_slice(),
                "read must return a complete value"
            );
        }

        writer.await.unwrap();
        sidecar.shutdown().await;
    }
}
