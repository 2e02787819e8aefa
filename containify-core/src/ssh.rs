//! SSH-agent forwarding
//!
//! Exposes the host's SSH agent inside build containers so private
//! repositories stay reachable. Without an agent on the host this is a
//! no-op and builds proceed unauthenticated.

use std::path::PathBuf;

use crate::build::Build;
use crate::cri::{ContainerSpec, Mount};

/// Stable in-container path for the forwarded agent socket
pub const CONTAINER_SOCK: &str = "/tmp/ssh-agent.sock";

/// SSH-agent forwarder for a build
#[derive(Debug, Clone, Default)]
pub struct SshForward {
    socket: Option<PathBuf>,
}

impl SshForward {
    /// Locate the host agent socket for a build. Reads `SSH_AUTH_SOCK`
    /// and verifies the socket actually exists.
    pub fn detect(build: &Build) -> Self {
        let socket = std::env::var_os("SSH_AUTH_SOCK")
            .map(PathBuf::from)
            .filter(|path| path.exists());

        match &socket {
            Some(path) => {
                tracing::debug!("[{}] forwarding ssh agent from {:?}", build.app, path)
            }
            None => tracing::debug!("[{}] no ssh agent on host, continuing without", build.app),
        }

        SshForward { socket }
    }

    pub fn available(&self) -> bool {
        self.socket.is_some()
    }

    /// Enrich a container spec with the agent socket mount and
    /// `SSH_AUTH_SOCK`. Absent an agent, returns the spec unchanged.
    pub fn apply(&self, spec: ContainerSpec) -> ContainerSpec {
        match &self.socket {
            Some(socket) => spec
                .with_mount(Mount::bind(socket.clone(), CONTAINER_SOCK))
                .with_env("SSH_AUTH_SOCK", CONTAINER_SOCK),
            None => spec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_without_agent_is_noop() {
        let forward = SshForward::default();
        let spec = ContainerSpec::new("alpine");
        let spec = forward.apply(spec);

        assert!(spec.mounts.is_empty());
        assert!(spec.env.is_empty());
    }

    #[test]
    fn test_apply_with_agent_adds_mount_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("agent.sock");
        std::fs::write(&socket, b"").unwrap();

        let forward = SshForward {
            socket: Some(socket.clone()),
        };
        let spec = forward.apply(ContainerSpec::new("alpine"));

        assert_eq!(spec.mounts.len(), 1);
        assert_eq!(spec.mounts[0].source, socket);
        assert_eq!(spec.mounts[0].target, CONTAINER_SOCK);
        assert_eq!(
            spec.env,
            vec![("SSH_AUTH_SOCK".to_string(), CONTAINER_SOCK.to_string())]
        );
    }
}
