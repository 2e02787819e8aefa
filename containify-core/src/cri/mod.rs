//! Container Runtime Interface
//!
//! Narrow abstraction over a Docker- or Podman-compatible runtime. The
//! engine only ever speaks to the runtime through this trait, so the same
//! orchestration works against either CLI or against the recording double
//! used by tests and dry runs.

pub mod cli;
pub mod recording;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{EngineError, Result};

pub use cli::CliRuntime;
pub use recording::RecordingRuntime;
pub use types::{ContainerInfo, ContainerSpec, ImageRef, Mount, RuntimeKind};

/// Environment variable forcing a runtime kind (docker|podman)
pub const RUNTIME_ENV: &str = "CONTAINIFYCI_RUNTIME";

/// Operations the engine needs from a container runtime.
///
/// Implementations must be safe for concurrent calls across tasks.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// The active runtime kind
    fn kind(&self) -> RuntimeKind;

    async fn pull(&self, image: &str) -> Result<()>;

    /// Whether an image is present in the local store
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Build an intermediate image from in-memory Dockerfile contents,
    /// once per target platform.
    async fn build_intermediate_image(
        &self,
        tag: &str,
        dockerfile: &str,
        platforms: &[String],
    ) -> Result<()>;

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start(&self, id: &str) -> Result<()>;

    /// Block until the container exits; returns the exit code.
    async fn wait(&self, id: &str) -> Result<i64>;

    async fn stop(&self, id: &str) -> Result<()>;

    async fn remove(&self, id: &str) -> Result<()>;

    /// Commit a container to an image, applying Dockerfile-style changes
    /// (USER, ENTRYPOINT, WORKDIR, ...). Returns the image id.
    async fn commit(&self, id: &str, tag: &str, changes: &[String]) -> Result<String>;

    /// Tag `image` for `uri` and push it.
    async fn push(&self, image: &str, uri: &str) -> Result<()>;

    /// Write bytes to a path inside the container.
    async fn copy_to(&self, id: &str, content: &[u8], dest: &str) -> Result<()>;

    /// Read a file out of the container.
    async fn copy_from(&self, id: &str, src: &str) -> Result<Vec<u8>>;

    /// Run a command inside a running container; returns its stdout.
    async fn exec(&self, id: &str, cmd: &[String]) -> Result<String>;

    async fn inspect(&self, id: &str) -> Result<ContainerInfo>;

    async fn logs(&self, id: &str) -> Result<String>;

    /// Export an image to a tarball on the host.
    async fn save(&self, image: &str, path: &str) -> Result<()>;

    /// Import an image tarball from the host.
    async fn load(&self, path: &str) -> Result<()>;

    /// Split an image reference into name and tag.
    fn parse_image(&self, reference: &str) -> Result<ImageRef> {
        ImageRef::parse(reference)
    }
}

/// Probe for an available runtime, honoring the `CONTAINIFYCI_RUNTIME`
/// override. Docker wins when both are installed.
pub async fn detect() -> Result<Arc<dyn ContainerRuntime>> {
    if let Ok(forced) = std::env::var(RUNTIME_ENV) {
        let kind: RuntimeKind = forced.parse()?;
        if !cli::probe(kind).await {
            return Err(EngineError::container(
                "detect",
                kind.binary(),
                format!("{} requested via {} but not available", kind, RUNTIME_ENV),
            ));
        }
        tracing::debug!("using {} (forced via {})", kind, RUNTIME_ENV);
        return Ok(Arc::new(CliRuntime::new(kind)));
    }

    for kind in [RuntimeKind::Docker, RuntimeKind::Podman] {
        if cli::probe(kind).await {
            tracing::debug!("detected container runtime: {}", kind);
            return Ok(Arc::new(CliRuntime::new(kind)));
        }
    }

    Err(EngineError::container(
        "detect",
        "docker|podman",
        "no container runtime found on PATH",
    ))
}
