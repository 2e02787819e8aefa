//! Container runtime data types

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{EngineError, Result};

/// Kind of container runtime the engine talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    Docker,
    Podman,
}

impl Default for RuntimeKind {
    fn default() -> Self {
        RuntimeKind::Docker
    }
}

impl RuntimeKind {
    /// Binary name of the runtime CLI
    pub fn binary(&self) -> &'static str {
        match self {
            RuntimeKind::Docker => "docker",
            RuntimeKind::Podman => "podman",
        }
    }

    /// Hostname containers use to reach services on the host
    pub fn container_host(&self) -> &'static str {
        match self {
            RuntimeKind::Docker => "host.docker.internal",
            RuntimeKind::Podman => "host.containers.internal",
        }
    }
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.binary())
    }
}

impl std::str::FromStr for RuntimeKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(RuntimeKind::Docker),
            "podman" => Ok(RuntimeKind::Podman),
            other => Err(EngineError::validation(
                "runtime",
                other,
                "expected docker or podman",
            )),
        }
    }
}

/// A bind mount into a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    pub fn bind(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Mount {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Specification for creating a container
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: Option<String>,
    pub image: String,
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Vec<String>,
    pub working_dir: Option<String>,
    pub env: Vec<(String, String)>,
    pub mounts: Vec<Mount>,
    pub platform: Option<String>,
    pub user: Option<String>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        ContainerSpec {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_entrypoint(mut self, entrypoint: Vec<String>) -> Self {
        self.entrypoint = Some(entrypoint);
        self
    }

    pub fn with_cmd(mut self, cmd: Vec<String>) -> Self {
        self.cmd = cmd;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }
}

/// Parsed image reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub name: String,
    pub tag: String,
}

static IMAGE_REF: Lazy<Regex> = Lazy::new(|| {
    // name may embed a registry with port; tag and digest are optional
    Regex::new(r"^(?P<name>[^:@\s]+(?::\d+/[^:@\s]+)?)(?::(?P<tag>[^:@\s]+))?(?:@(?P<digest>\S+))?$")
        .expect("image reference pattern")
});

impl ImageRef {
    /// Split an image reference into name and tag; the tag defaults to
    /// `latest` when absent. Digests are dropped from the tag.
    pub fn parse(reference: &str) -> Result<Self> {
        let captures = IMAGE_REF.captures(reference.trim()).ok_or_else(|| {
            EngineError::validation("image", reference, "not a valid image reference")
        })?;

        let name = captures
            .name("name")
            .map(|m| m.as_str().to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                EngineError::validation("image", reference, "missing image name")
            })?;
        let tag = captures
            .name("tag")
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| "latest".to_string());

        Ok(ImageRef { name, tag })
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// Snapshot of a container's state as reported by the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub image: String,
    pub running: bool,
    pub exit_code: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_and_tag() {
        let image = ImageRef::parse("golang:1.24.2-alpine").unwrap();
        assert_eq!(image.name, "golang");
        assert_eq!(image.tag, "1.24.2-alpine");
    }

    #[test]
    fn test_parse_defaults_to_latest() {
        let image = ImageRef::parse("alpine").unwrap();
        assert_eq!(image.name, "alpine");
        assert_eq!(image.tag, "latest");
    }

    #[test]
    fn test_parse_registry_with_port() {
        let image = ImageRef::parse("localhost:5000/acme/svc:1.0.0").unwrap();
        assert_eq!(image.name, "localhost:5000/acme/svc");
        assert_eq!(image.tag, "1.0.0");
    }

    #[test]
    fn test_parse_drops_digest() {
        let image = ImageRef::parse("alpine:3.20@sha256:abcdef").unwrap();
        assert_eq!(image.name, "alpine");
        assert_eq!(image.tag, "3.20");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(ImageRef::parse("").is_err());
    }

    #[test]
    fn test_spec_builder() {
        let spec = ContainerSpec::new("alpine:latest")
            .with_working_dir("/src")
            .with_env("SSH_AUTH_SOCK", "/tmp/ssh-agent.sock")
            .with_mount(Mount::bind("/home/ci/project", "/src"));

        assert_eq!(spec.image, "alpine:latest");
        assert_eq!(spec.working_dir.as_deref(), Some("/src"));
        assert_eq!(spec.env.len(), 1);
        assert_eq!(spec.mounts[0].target, "/src");
    }

    #[test]
    fn test_runtime_kind_container_host() {
        assert_eq!(RuntimeKind::Docker.container_host(), "host.docker.internal");
        assert_eq!(
            RuntimeKind::Podman.container_host(),
            "host.containers.internal"
        );
    }
}
