//! CLI-backed container runtime adapter
//!
//! Drives `docker` or `podman` through their command-line interface. Both
//! CLIs are argument-compatible for the narrow surface the engine uses.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use uuid::Uuid;

use super::types::{ContainerInfo, ContainerSpec, RuntimeKind};
use super::ContainerRuntime;
use crate::error::{EngineError, Result};

/// Check that a runtime CLI is installed and answering.
pub async fn probe(kind: RuntimeKind) -> bool {
    Command::new(kind.binary())
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Docker/Podman CLI adapter
pub struct CliRuntime {
    kind: RuntimeKind,
}

impl CliRuntime {
    pub fn new(kind: RuntimeKind) -> Self {
        CliRuntime { kind }
    }

    /// Run a runtime subcommand, returning trimmed stdout. Non-zero exit
    /// maps to a container error carrying the CLI's stderr, attributed to
    /// `container` when the operation targets one.
    async fn run(&self, op: &str, container: Option<&str>, args: &[String]) -> Result<String> {
        tracing::debug!("{} {}", self.kind.binary(), args.join(" "));

        let output = Command::new(self.kind.binary())
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| EngineError::Container {
                op: op.to_string(),
                container_id: container.map(str::to_string),
                image: None,
                detail: format!("failed to spawn {}: {}", self.kind.binary(), e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let detail = if stderr.is_empty() { stdout } else { stderr };
            return Err(EngineError::Container {
                op: op.to_string(),
                container_id: container.map(str::to_string),
                image: None,
                detail: format!(
                    "exit code {}: {}",
                    output.status.code().unwrap_or(-1),
                    detail
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn create_args(&self, spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec!["create".to_string()];

        if let Some(name) = &spec.name {
            args.push("--name".to_string());
            args.push(name.clone());
        }
        if let Some(platform) = &spec.platform {
            args.push("--platform".to_string());
            args.push(platform.clone());
        }
        if let Some(dir) = &spec.working_dir {
            args.push("--workdir".to_string());
            args.push(dir.clone());
        }
        if let Some(user) = &spec.user {
            args.push("--user".to_string());
            args.push(user.clone());
        }
        for (key, value) in &spec.env {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }
        for mount in &spec.mounts {
            let mut value = format!(
                "type=bind,source={},target={}",
                mount.source.display(),
                mount.target
            );
            if mount.read_only {
                value.push_str(",readonly");
            }
            args.push("--mount".to_string());
            args.push(value);
        }
        // --entrypoint takes exactly one token naming the executable; the
        // remaining entrypoint elements become leading container args.
        let mut leading_args: Vec<String> = Vec::new();
        if let Some(entrypoint) = &spec.entrypoint {
            if let Some((executable, rest)) = entrypoint.split_first() {
                args.push("--entrypoint".to_string());
                args.push(executable.clone());
                leading_args.extend(rest.iter().cloned());
            }
        }

        args.push(spec.image.clone());
        args.extend(leading_args);
        args.extend(spec.cmd.iter().cloned());
        args
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    fn kind(&self) -> RuntimeKind {
        self.kind
    }

    async fn pull(&self, image: &str) -> Result<()> {
        self.run("pull", None, &["pull".to_string(), image.to_string()])
            .await
            .map_err(|e| e.with_image(image))?;
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let result = Command::new(self.kind.binary())
            .args(["image", "inspect", image])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match result {
            Ok(status) => Ok(status.success()),
            Err(e) => Err(EngineError::container(
                "image_exists",
                image,
                e.to_string(),
            )),
        }
    }

    async fn build_intermediate_image(
        &self,
        tag: &str,
        dockerfile: &str,
        platforms: &[String],
    ) -> Result<()> {
        let context = scratch_path(&format!("build-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&context).await?;
        let dockerfile_path = context.join("Dockerfile");
        tokio::fs::write(&dockerfile_path, dockerfile).await?;

        let result = async {
            if platforms.is_empty() {
                self.build_one(tag, &dockerfile_path, &context, None).await?;
            } else {
                for platform in platforms {
                    self.build_one(tag, &dockerfile_path, &context, Some(platform))
                        .await?;
                }
            }
            Ok(())
        }
        .await;

        let _ = tokio::fs::remove_dir_all(&context).await;
        result
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let id = self
            .run("create", None, &self.create_args(spec))
            .await
            .map_err(|e| e.with_image(&spec.image))?;
        if id.is_empty() {
            return Err(EngineError::container(
                "create",
                &spec.image,
                "runtime returned no container id",
            ));
        }
        // Multi-line output carries warnings first; the id is last.
        Ok(id.lines().last().unwrap_or(&id).to_string())
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.run("start", Some(id), &["start".to_string(), id.to_string()])
            .await?;
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64> {
        let out = self
            .run("wait", Some(id), &["wait".to_string(), id.to_string()])
            .await?;
        out.trim().parse::<i64>().map_err(|_| {
            EngineError::container_id("wait", id, format!("unparseable exit code {:?}", out))
        })
    }

    async fn stop(&self, id: &str) -> Result<()> {
        self.run("stop", Some(id), &["stop".to_string(), id.to_string()])
            .await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.run(
            "remove",
            Some(id),
            &["rm".to_string(), "-f".to_string(), id.to_string()],
        )
        .await?;
        Ok(())
    }

    async fn commit(&self, id: &str, tag: &str, changes: &[String]) -> Result<String> {
        let mut args = vec!["commit".to_string()];
        for change in changes {
            args.push("--change".to_string());
            args.push(change.clone());
        }
        args.push(id.to_string());
        args.push(tag.to_string());

        let image_id = self.run("commit", Some(id), &args).await?;
        Ok(image_id)
    }

    async fn push(&self, image: &str, uri: &str) -> Result<()> {
        if image != uri {
            self.run(
                "push",
                None,
                &["tag".to_string(), image.to_string(), uri.to_string()],
            )
            .await
            .map_err(|e| e.with_image(image))?;
        }
        self.run("push", None, &["push".to_string(), uri.to_string()])
            .await
            .map_err(|e| e.with_image(uri))?;
        Ok(())
    }

    async fn copy_to(&self, id: &str, content: &[u8], dest: &str) -> Result<()> {
        let staging = scratch_path(&format!("cp-{}", Uuid::new_v4()));
        tokio::fs::write(&staging, content).await?;

        let result = self
            .run(
                "copy_to",
                Some(id),
                &[
                    "cp".to_string(),
                    staging.display().to_string(),
                    format!("{}:{}", id, dest),
                ],
            )
            .await;

        let _ = tokio::fs::remove_file(&staging).await;
        result.map(|_| ())
    }

    async fn copy_from(&self, id: &str, src: &str) -> Result<Vec<u8>> {
        let staging = scratch_path(&format!("cp-{}", Uuid::new_v4()));

        self.run(
            "copy_from",
            Some(id),
            &[
                "cp".to_string(),
                format!("{}:{}", id, src),
                staging.display().to_string(),
            ],
        )
        .await?;

        let content = tokio::fs::read(&staging).await?;
        let _ = tokio::fs::remove_file(&staging).await;
        Ok(content)
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> Result<String> {
        let mut args = vec!["exec".to_string(), id.to_string()];
        args.extend(cmd.iter().cloned());
        self.run("exec", Some(id), &args).await
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo> {
        let out = self
            .run("inspect", Some(id), &["inspect".to_string(), id.to_string()])
            .await?;

        let parsed: serde_json::Value = serde_json::from_str(&out)?;
        let entry = parsed
            .as_array()
            .and_then(|entries| entries.first())
            .ok_or_else(|| {
                EngineError::container_id("inspect", id, "empty inspect response")
            })?;

        Ok(ContainerInfo {
            id: entry["Id"].as_str().unwrap_or(id).to_string(),
            image: entry["Config"]["Image"].as_str().unwrap_or("").to_string(),
            running: entry["State"]["Running"].as_bool().unwrap_or(false),
            exit_code: entry["State"]["ExitCode"].as_i64(),
        })
    }

    async fn logs(&self, id: &str) -> Result<String> {
        self.run("logs", Some(id), &["logs".to_string(), id.to_string()])
            .await
    }

    async fn save(&self, image: &str, path: &str) -> Result<()> {
        self.run(
            "save",
            None,
            &[
                "save".to_string(),
                "--output".to_string(),
                path.to_string(),
                image.to_string(),
            ],
        )
        .await
        .map_err(|e| e.with_image(image))?;
        Ok(())
    }

    async fn load(&self, path: &str) -> Result<()> {
        self.run(
            "load",
            None,
            &["load".to_string(), "--input".to_string(), path.to_string()],
        )
        .await?;
        Ok(())
    }
}

impl CliRuntime {
    async fn build_one(
        &self,
        tag: &str,
        dockerfile: &PathBuf,
        context: &PathBuf,
        platform: Option<&String>,
    ) -> Result<()> {
        let mut args = vec![
            "build".to_string(),
            "--file".to_string(),
            dockerfile.display().to_string(),
            "--tag".to_string(),
            tag.to_string(),
        ];
        if let Some(platform) = platform {
            args.push("--platform".to_string());
            args.push(platform.clone());
        }
        args.push(context.display().to_string());

        self.run("build_intermediate", None, &args)
            .await
            .map_err(|e| e.with_image(tag))?;
        Ok(())
    }
}

fn scratch_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("containifyci-{}", name))
}

impl EngineError {
    fn with_image(self, image: &str) -> Self {
        match self {
            EngineError::Container {
                op,
                container_id,
                detail,
                ..
            } => EngineError::Container {
                op,
                container_id,
                image: Some(image.to_string()),
                detail,
            },
            other => other,
        }
    }
}
