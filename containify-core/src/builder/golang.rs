//! Go language builder
//!
//! The reference implementation of the `LanguageBuilder` contract: builds
//! Go services inside an alpine-based intermediate image, with the host's
//! module cache mounted through, and ships a static binary into a minimal
//! production image.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;

use super::{resolve_cache_dir, BaseBuilder, LanguageBuilder};
use crate::build::Build;
use crate::config::RuntimeOptions;
use crate::cri::ContainerRuntime;
use crate::error::Result;
use crate::steps::BuildLoop;

/// Go toolchain base image
pub const GO_IMAGE: &str = "golang:1.24.2-alpine";

/// Production base image
pub const PROD_IMAGE: &str = "alpine:latest";

/// Lint image for the optional lint sub-capability
pub const LINT_IMAGE: &str = "golangci/golangci-lint:v1.64.5-alpine";

/// Dockerfile embedded at compile time; its bytes define the
/// intermediate-image tag
pub const DOCKERFILE: &str = include_str!("dockerfiles/golang.Dockerfile");

const CACHE_MOUNT: &str = "/go/pkg/mod";

pub struct GoBuilder {
    base: BaseBuilder,
    intermediate: OnceCell<String>,
}

impl GoBuilder {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, build: Build, options: RuntimeOptions) -> Self {
        GoBuilder {
            base: BaseBuilder::new("golang", runtime, build, options),
            intermediate: OnceCell::new(),
        }
    }

    fn build_env(&self) -> Vec<(String, String)> {
        vec![
            ("GOMODCACHE".to_string(), CACHE_MOUNT.to_string()),
            ("GOCACHE".to_string(), "/root/.cache/go-build".to_string()),
            ("GOFLAGS".to_string(), "-buildvcs=false".to_string()),
        ]
    }
}

#[async_trait]
impl LanguageBuilder for GoBuilder {
    fn name(&self) -> &str {
        "golang"
    }

    fn cache_folder(&self) -> PathBuf {
        let mut candidates = Vec::new();
        if let Ok(modcache) = std::env::var("GOMODCACHE") {
            candidates.push(PathBuf::from(modcache));
        }
        if let Ok(home) = std::env::var("HOME") {
            candidates.push(PathBuf::from(home).join("go").join("pkg").join("mod"));
        }
        resolve_cache_dir("golang", &candidates)
    }

    fn images(&self) -> Vec<String> {
        vec![GO_IMAGE.to_string(), PROD_IMAGE.to_string()]
    }

    fn intermediate_image(&self) -> String {
        self.intermediate
            .get_or_init(|| self.base.intermediate_image("golang", DOCKERFILE))
            .clone()
    }

    fn build_script(&self) -> String {
        let build = &self.base.build;
        let mut script = String::from("#!/bin/sh\nset -eu\n\ngo mod download\n");

        let mut test_flags = String::new();
        let tags = build.custom_values("tags");
        if !tags.is_empty() {
            test_flags.push_str(&format!(" -tags {}", tags.join(",")));
        }
        if build.custom_flag("nocoverage") {
            script.push_str(&format!("go test{} ./...\n", test_flags));
        } else {
            script.push_str(&format!(
                "go test{} -coverprofile=coverage.out ./...\n",
                test_flags
            ));
        }

        let entry = if build.file.is_empty() {
            ".".to_string()
        } else {
            format!("./{}", build.file)
        };
        script.push_str(&format!("go build -o {} {}\n", build.app, entry));
        script
    }

    async fn pull(&self) -> Result<()> {
        self.base.pull_images(&self.images()).await
    }

    async fn build_intermediate_image(&self) -> Result<()> {
        self.base
            .build_intermediate(&self.intermediate_image(), DOCKERFILE)
            .await
    }

    async fn build(&self) -> Result<Vec<String>> {
        let id = self
            .base
            .run_build_container(
                &self.intermediate_image(),
                &self.build_script(),
                &self.build_env(),
                (self.cache_folder(), CACHE_MOUNT),
            )
            .await?;
        Ok(vec![id])
    }

    async fn prod(&self) -> Result<BuildLoop> {
        self.base.prod(PROD_IMAGE, &self.base.build.app).await
    }

    fn lint_image(&self) -> Option<String> {
        Some(LINT_IMAGE.to_string())
    }

    async fn lint(&self) -> Result<Vec<String>> {
        let script = "#!/bin/sh\nset -eu\n\ngolangci-lint run ./...\n".to_string();
        let id = self
            .base
            .run_build_container(
                LINT_IMAGE,
                &script,
                &self.build_env(),
                (self.cache_folder(), CACHE_MOUNT),
            )
            .await?;
        Ok(vec![id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{BuildType, EnvType};
    use crate::cri::RecordingRuntime;

    fn builder_for(build: Build) -> (Arc<RecordingRuntime>, GoBuilder) {
        let runtime = Arc::new(RecordingRuntime::default());
        let builder = GoBuilder::new(
            Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
            build,
            RuntimeOptions::default(),
        );
        (runtime, builder)
    }

    fn go_build() -> Build {
        let mut build = Build::new("svc", BuildType::GoLang, EnvType::Build);
        build.defaults();
        build
    }

    #[test]
    fn test_intermediate_image_is_memoized_and_deterministic() {
        let (_runtime, builder) = builder_for(go_build());
        let (_runtime2, other) = builder_for(go_build());

        assert_eq!(builder.intermediate_image(), builder.intermediate_image());
        assert_eq!(builder.intermediate_image(), other.intermediate_image());
        assert!(builder
            .intermediate_image()
            .starts_with("containifyci/golang:"));
    }

    #[test]
    fn test_build_script_defaults() {
        let (_runtime, builder) = builder_for(go_build());
        let script = builder.build_script();

        assert!(script.starts_with("#!/bin/sh"));
        assert!(script.contains("go mod download"));
        assert!(script.contains("-coverprofile=coverage.out"));
        assert!(script.contains("go build -o svc ."));
    }

    #[test]
    fn test_build_script_honours_custom_params() {
        let mut build = go_build();
        build.file = "cmd/svc/main.go".to_string();
        build.set_custom("tags", vec!["integration".to_string()]);
        build.set_custom("nocoverage", vec!["true".to_string()]);
        let (_runtime, builder) = builder_for(build);

        let script = builder.build_script();
        assert!(script.contains("-tags integration"));
        assert!(!script.contains("coverprofile"));
        assert!(script.contains("go build -o svc ./cmd/svc/main.go"));
    }

    #[tokio::test]
    async fn test_pull_fetches_base_and_prod_images() {
        let (runtime, builder) = builder_for(go_build());
        builder.pull().await.unwrap();

        assert_eq!(
            runtime.pulled(),
            vec![GO_IMAGE.to_string(), PROD_IMAGE.to_string()]
        );
    }

    #[tokio::test]
    async fn test_build_runs_container_with_script() {
        let (runtime, builder) = builder_for(go_build());
        let ids = builder.build().await.unwrap();

        assert_eq!(ids.len(), 1);
        let calls = runtime.calls();
        assert!(calls.iter().any(|call| matches!(
            call,
            crate::cri::recording::CriCall::CopyTo { dest, .. } if dest == "/tmp/script.sh"
        )));
    }
}
