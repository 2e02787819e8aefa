//! Image transport utility steps
//!
//! `docker_save` exports the production image to a tarball after Publish;
//! `docker_load` imports one before the build. Both are opt-in per build
//! through custom parameters carrying the tarball path.

use std::sync::Arc;

use async_trait::async_trait;

use super::{BuildStep, StepOutput};
use crate::build::Build;
use crate::cri::ContainerRuntime;
use crate::error::Result;

/// Custom key naming the tarball path for `docker_save`
pub const SAVE_KEY: &str = "docker_save";

/// Custom key naming the tarball path for `docker_load`
pub const LOAD_KEY: &str = "docker_load";

/// Exports the production image to a tarball
pub struct DockerSaveStep {
    runtime: Arc<dyn ContainerRuntime>,
}

impl DockerSaveStep {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Arc<Self> {
        Arc::new(DockerSaveStep { runtime })
    }
}

#[async_trait]
impl BuildStep for DockerSaveStep {
    fn name(&self) -> &str {
        "docker_save"
    }

    fn matches(&self, build: &Build) -> bool {
        build.custom_one(SAVE_KEY).is_some() && !build.image.is_empty()
    }

    async fn run(&self, build: &Build) -> Result<StepOutput> {
        let Some(path) = build.custom_one(SAVE_KEY).map(str::to_string) else {
            return Ok(StepOutput::done());
        };
        let tag = format!("{}:{}", build.image, build.image_tag);

        tracing::info!("[{}] saving {} to {}", build.app, tag, path);
        self.runtime.save(&tag, &path).await?;
        Ok(StepOutput::done())
    }
}

/// Imports an image tarball into the local store
pub struct DockerLoadStep {
    runtime: Arc<dyn ContainerRuntime>,
}

impl DockerLoadStep {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Arc<Self> {
        Arc::new(DockerLoadStep { runtime })
    }
}

#[async_trait]
impl BuildStep for DockerLoadStep {
    fn name(&self) -> &str {
        "docker_load"
    }

    fn matches(&self, build: &Build) -> bool {
        build.custom_one(LOAD_KEY).is_some()
    }

    async fn run(&self, build: &Build) -> Result<StepOutput> {
        let Some(path) = build.custom_one(LOAD_KEY).map(str::to_string) else {
            return Ok(StepOutput::done());
        };

        tracing::info!("[{}] loading images from {}", build.app, path);
        self.runtime.load(&path).await?;
        Ok(StepOutput::done())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{BuildType, EnvType};
    use crate::cri::recording::CriCall;
    use crate::cri::RecordingRuntime;

    fn build_with(key: &str, value: &str) -> Build {
        let mut build = Build::new("svc", BuildType::GoLang, EnvType::Build);
        build.image = "svc".to_string();
        build.set_custom(key, vec![value.to_string()]);
        build.defaults();
        build
    }

    #[tokio::test]
    async fn test_save_matches_only_with_path_and_image() {
        let runtime = Arc::new(RecordingRuntime::default());
        let step = DockerSaveStep::new(runtime);

        assert!(step.matches(&build_with(SAVE_KEY, "/tmp/images.tar")));

        let mut no_image = build_with(SAVE_KEY, "/tmp/images.tar");
        no_image.image = String::new();
        assert!(!step.matches(&no_image));

        let mut no_path = Build::new("svc", BuildType::GoLang, EnvType::Build);
        no_path.image = "svc".to_string();
        assert!(!step.matches(&no_path));
    }

    #[tokio::test]
    async fn test_save_exports_tagged_image() {
        let runtime = Arc::new(RecordingRuntime::default());
        let step = DockerSaveStep::new(Arc::clone(&runtime) as Arc<dyn ContainerRuntime>);

        let build = build_with(SAVE_KEY, "/tmp/images.tar");
        step.run(&build).await.unwrap();

        assert_eq!(
            runtime.calls(),
            vec![CriCall::Save {
                image: "svc:latest".to_string(),
                path: "/tmp/images.tar".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_load_imports_tarball() {
        let runtime = Arc::new(RecordingRuntime::default());
        let step = DockerLoadStep::new(Arc::clone(&runtime) as Arc<dyn ContainerRuntime>);

        let build = build_with(LOAD_KEY, "/tmp/images.tar");
        step.run(&build).await.unwrap();

        assert_eq!(
            runtime.calls(),
            vec![CriCall::Load {
                path: "/tmp/images.tar".to_string()
            }]
        );
    }
}
