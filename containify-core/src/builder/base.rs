//! Shared container-orchestration scaffolding for language builders

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::build::Build;
use crate::checksum::content_tag;
use crate::config::{PullPolicy, RuntimeOptions};
use crate::cri::{ContainerRuntime, ContainerSpec, Mount};
use crate::error::{EngineError, Result};
use crate::ssh::SshForward;
use crate::steps::BuildLoop;
use crate::{KEY_EXTERNAL_HOST, KEY_HOST};

/// In-container path the build script is uploaded to
pub const SCRIPT_PATH: &str = "/tmp/script.sh";

/// Default in-container source mount
pub const SOURCE_MOUNT: &str = "/src";

/// Reusable orchestration core each language builder embeds
pub struct BaseBuilder {
    pub language: String,
    pub build: Build,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub options: RuntimeOptions,
}

impl BaseBuilder {
    pub fn new(
        language: impl Into<String>,
        runtime: Arc<dyn ContainerRuntime>,
        build: Build,
        options: RuntimeOptions,
    ) -> Self {
        BaseBuilder {
            language: language.into(),
            runtime,
            build,
            options,
        }
    }

    /// Intermediate image reference for a Dockerfile: the tag is the
    /// SHA-256 of the Dockerfile bytes, so identical content always maps
    /// to the same image.
    pub fn intermediate_image(&self, name: &str, dockerfile: &str) -> String {
        format!(
            "{}/{}:{}",
            self.options.intermediate_registry,
            name,
            content_tag(dockerfile.as_bytes())
        )
    }

    /// Pull base images, honoring the pull policy.
    pub async fn pull_images(&self, images: &[String]) -> Result<()> {
        for image in images {
            if self.options.pull_policy == PullPolicy::IfMissing
                && self.runtime.image_exists(image).await?
            {
                tracing::debug!("[{}] image {} already present", self.build.app, image);
                continue;
            }
            tracing::info!("[{}] pulling {}", self.build.app, image);
            self.runtime.pull(image).await?;
        }
        Ok(())
    }

    /// Build the intermediate image unless the content-addressed tag is
    /// already in the local store. Group members serialize through the
    /// leader so the image is built once.
    pub async fn build_intermediate(&self, tag: &str, dockerfile: &str) -> Result<()> {
        let platforms = vec![self.build.platform.container.clone()];

        let build_once = || async {
            if self.runtime.image_exists(tag).await? {
                tracing::debug!("[{}] intermediate {} cached", self.build.app, tag);
                return Ok(());
            }
            tracing::info!("[{}] building intermediate image {}", self.build.app, tag);
            self.runtime
                .build_intermediate_image(tag, dockerfile, &platforms)
                .await
                .map_err(|e| EngineError::build_stage("build_intermediate", &self.language, e))
        };

        match &self.build.leader {
            Some(leader) => leader.run(|_| build_once()).await,
            None => build_once().await,
        }
    }

    /// Absolute host path of the build's working directory.
    pub fn source_dir(&self) -> PathBuf {
        let folder = Path::new(&self.build.folder);
        if folder.is_absolute() {
            folder.to_path_buf()
        } else {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(folder)
        }
    }

    /// Compose the build-container spec, upload the script, run the
    /// container to completion and return its id.
    pub async fn run_build_container(
        &self,
        image: &str,
        script: &str,
        env: &[(String, String)],
        cache: (PathBuf, &str),
    ) -> Result<String> {
        let mut spec = ContainerSpec::new(image)
            .with_name(format!(
                "containifyci-{}-{}",
                self.build.app,
                &Uuid::new_v4().to_string()[..8]
            ))
            .with_platform(self.build.platform.container.clone())
            .with_working_dir(SOURCE_MOUNT)
            .with_mount(Mount::bind(self.source_dir(), SOURCE_MOUNT))
            .with_mount(Mount::bind(cache.0, cache.1))
            .with_entrypoint(vec!["sh".to_string(), SCRIPT_PATH.to_string()]);

        for (key, value) in env {
            spec = spec.with_env(key.clone(), value.clone());
        }
        for key in [KEY_HOST, KEY_EXTERNAL_HOST] {
            if let Some(value) = self.build.custom_one(key) {
                spec = spec.with_env(key, value);
            }
        }
        for (key, value) in &self.build.secret {
            spec = spec.with_env(key.clone(), value.clone());
        }
        spec = SshForward::detect(&self.build).apply(spec);

        let stage = |e| EngineError::build_stage("building_container", &self.language, e);

        let id = self.runtime.create_container(&spec).await.map_err(stage)?;
        self.runtime
            .copy_to(&id, script.as_bytes(), SCRIPT_PATH)
            .await
            .map_err(stage)?;
        self.runtime.start(&id).await.map_err(stage)?;

        let exit = self.wait_or_cancel(&id).await?;
        if self.build.verbose {
            if let Ok(logs) = self.runtime.logs(&id).await {
                for line in logs.lines() {
                    tracing::info!("[{}] {}", self.build.app, line);
                }
            }
        }
        if exit != 0 {
            let logs = self.runtime.logs(&id).await.unwrap_or_default();
            return Err(EngineError::build_stage(
                "building_container",
                &self.language,
                EngineError::container_id(
                    "wait",
                    &id,
                    format!("build script exited with {}: {}", exit, tail(&logs, 20)),
                ),
            ));
        }

        Ok(id)
    }

    /// Wait for a container, racing cancellation and the configured
    /// timeout; both stop the container before returning.
    async fn wait_or_cancel(&self, id: &str) -> Result<i64> {
        let timeout = Duration::from_secs(self.options.container_timeout_secs);
        tokio::select! {
            exit = self.runtime.wait(id) => {
                exit.map_err(|e| EngineError::build_stage("building_container", &self.language, e))
            }
            _ = self.build.cancel.canceled() => {
                let _ = self.runtime.stop(id).await;
                Err(EngineError::Canceled)
            }
            _ = tokio::time::sleep(timeout) => {
                let _ = self.runtime.stop(id).await;
                Err(EngineError::build_stage(
                    "building_container",
                    &self.language,
                    EngineError::container_id(
                        "wait",
                        id,
                        format!("timed out after {}s", self.options.container_timeout_secs),
                    ),
                ))
            }
        }
    }

    /// Commit and push the production image.
    ///
    /// Local builds and builds without a production image skip with a clean
    /// `Continue` and perform no runtime call. The compiled artifact is
    /// read from the bind-mounted working directory where the build script
    /// left it.
    pub async fn prod(&self, prod_base: &str, artifact: &str) -> Result<BuildLoop> {
        if self.build.env == crate::build::EnvType::Local || self.build.image.is_empty() {
            tracing::debug!(
                "[{}] no production image for env {}, skipping",
                self.build.app,
                self.build.env
            );
            return Ok(BuildLoop::Continue);
        }

        let artifact_path = self.source_dir().join(artifact);
        let content = tokio::fs::read(&artifact_path).await.map_err(|e| {
            EngineError::build_stage(
                "commit",
                &self.language,
                EngineError::Cache {
                    op: "read_artifact".to_string(),
                    language: self.language.clone(),
                    path: artifact_path.clone(),
                    source: e,
                },
            )
        })?;

        self.pull_images(&[prod_base.to_string()])
            .await
            .map_err(|e| EngineError::build_stage("commit", &self.language, e))?;

        let commit_stage = |e| EngineError::build_stage("commit", &self.language, e);
        let app = &self.build.app;

        let spec = ContainerSpec::new(prod_base)
            .with_name(format!(
                "containifyci-{}-prod-{}",
                app,
                &Uuid::new_v4().to_string()[..8]
            ))
            .with_platform(self.build.platform.container.clone())
            .with_entrypoint(vec!["sleep".to_string(), "300".to_string()]);

        let id = self.runtime.create_container(&spec).await.map_err(commit_stage)?;
        self.runtime.start(&id).await.map_err(commit_stage)?;

        let setup =
            "mkdir -p /app && (addgroup -S app && adduser -S app -G app || adduser -D app)"
                .to_string();
        self.runtime
            .exec(&id, &["sh".to_string(), "-c".to_string(), setup])
            .await
            .map_err(commit_stage)?;
        self.runtime
            .copy_to(&id, &content, &format!("/app/{}", app))
            .await
            .map_err(commit_stage)?;
        self.runtime
            .exec(
                &id,
                &[
                    "sh".to_string(),
                    "-c".to_string(),
                    format!("chmod +x /app/{} && chown -R app /app", app),
                ],
            )
            .await
            .map_err(commit_stage)?;

        let tag = format!("{}:{}", self.build.image, self.build.image_tag);
        let changes = vec![
            "USER app".to_string(),
            "WORKDIR /app".to_string(),
            format!("ENTRYPOINT [\"/app/{}\"]", app),
        ];
        self.runtime
            .commit(&id, &tag, &changes)
            .await
            .map_err(commit_stage)?;
        self.runtime.stop(&id).await.map_err(commit_stage)?;

        self.push_prod(&tag).await?;
        Ok(BuildLoop::Continue)
    }

    /// Push the committed image to every configured registry, exactly once
    /// per target across the whole build group.
    async fn push_prod(&self, tag: &str) -> Result<()> {
        let registries = self.build.push_registries();
        let uris: Vec<String> = if registries.is_empty() {
            vec![tag.to_string()]
        } else {
            registries
                .iter()
                .map(|registry| format!("{}/{}", registry, tag))
                .collect()
        };

        let push_all = |claim: Option<Arc<crate::leader::Leader>>| {
            let uris = uris.clone();
            async move {
                for uri in uris {
                    if let Some(leader) = &claim {
                        if !leader.mark_done(&format!("push:{}", uri)) {
                            tracing::info!(
                                "[{}] {} already pushed by group, skipping",
                                self.build.app,
                                uri
                            );
                            continue;
                        }
                    }
                    tracing::info!("[{}] pushing {}", self.build.app, uri);
                    self.runtime
                        .push(tag, &uri)
                        .await
                        .map_err(|e| EngineError::build_stage("push", &self.language, e))?;
                }
                Ok(())
            }
        };

        match &self.build.leader {
            Some(leader) => {
                let claim = Arc::clone(leader);
                leader.run(|_| push_all(Some(claim))).await
            }
            None => push_all(None).await,
        }
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{BuildType, EnvType};
    use crate::cri::RecordingRuntime;

    fn base_with(build: Build) -> (Arc<RecordingRuntime>, BaseBuilder) {
        let runtime = Arc::new(RecordingRuntime::default());
        let base = BaseBuilder::new(
            "golang",
            Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
            build,
            RuntimeOptions::default(),
        );
        (runtime, base)
    }

    #[tokio::test]
    async fn test_prod_skips_local_env() {
        let mut build = Build::new("svc", BuildType::GoLang, EnvType::Local);
        build.image = "svc".to_string();
        build.defaults();
        let (runtime, base) = base_with(build);

        let control = base.prod("alpine:latest", "svc").await.unwrap();

        assert_eq!(control, BuildLoop::Continue);
        assert!(runtime.calls().is_empty(), "local env must not touch the runtime");
    }

    #[tokio::test]
    async fn test_prod_skips_empty_image() {
        let mut build = Build::new("svc", BuildType::GoLang, EnvType::Build);
        build.defaults();
        let (runtime, base) = base_with(build);

        let control = base.prod("alpine:latest", "svc").await.unwrap();

        assert_eq!(control, BuildLoop::Continue);
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_prod_commits_and_pushes_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("svc"), b"binary").unwrap();

        let mut build = Build::new("svc", BuildType::GoLang, EnvType::Build);
        build.image = "svc".to_string();
        build.image_tag = "1.0.0".to_string();
        build.folder = dir.path().display().to_string();
        build.defaults();
        let (runtime, base) = base_with(build);

        let control = base.prod("alpine:latest", "svc").await.unwrap();
        assert_eq!(control, BuildLoop::Continue);

        let calls = runtime.calls();
        assert!(calls.iter().any(
            |call| matches!(call, crate::cri::recording::CriCall::Commit { tag, .. } if tag == "svc:1.0.0")
        ));
        assert_eq!(runtime.pushes(), vec![("svc:1.0.0".to_string(), "svc:1.0.0".to_string())]);
    }

    #[tokio::test]
    async fn test_prod_pushes_to_each_registry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("svc"), b"binary").unwrap();

        let mut build = Build::new("svc", BuildType::GoLang, EnvType::Prod);
        build.image = "svc".to_string();
        build.image_tag = "1.0.0".to_string();
        build.registry = "ghcr.io/acme".to_string();
        build.registries = vec!["docker.io/acme".to_string()];
        build.folder = dir.path().display().to_string();
        build.defaults();
        let (runtime, base) = base_with(build);

        base.prod("alpine:latest", "svc").await.unwrap();

        let uris: Vec<String> = runtime.pushes().into_iter().map(|(_, uri)| uri).collect();
        assert_eq!(
            uris,
            vec![
                "ghcr.io/acme/svc:1.0.0".to_string(),
                "docker.io/acme/svc:1.0.0".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_intermediate_image_is_deterministic() {
        let mut build = Build::new("svc", BuildType::GoLang, EnvType::Build);
        build.defaults();
        let (_runtime, base) = base_with(build);

        let first = base.intermediate_image("golang", "FROM golang:1.24.2-alpine\n");
        let second = base.intermediate_image("golang", "FROM golang:1.24.2-alpine\n");
        let other = base.intermediate_image("golang", "FROM golang:1.24.3-alpine\n");

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert!(first.starts_with("containifyci/golang:"));
    }

    #[tokio::test]
    async fn test_build_intermediate_skips_cached_tag() {
        let mut build = Build::new("svc", BuildType::GoLang, EnvType::Build);
        build.defaults();
        let (runtime, base) = base_with(build);

        runtime.seed_image("containifyci/golang:abc");
        base.build_intermediate("containifyci/golang:abc", "FROM scratch\n")
            .await
            .unwrap();

        assert!(runtime.calls().is_empty(), "cached tag must not rebuild");
    }
}
