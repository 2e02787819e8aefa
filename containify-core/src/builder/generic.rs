//! Generic script builder
//!
//! For repositories that only need a scripted container step: the base
//! image comes from the `from` custom parameter and the script is the
//! `cmds` values joined together. No language cache is assumed.

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

/// Base image when the build does not name one
pub const DEFAULT_IMAGE: &str = "alpine:latest";

const CACHE_MOUNT: &str = "/var/cache/containifyci";

pub struct GenericBuilder {
    base: BaseBuilder,
    intermediate: OnceCell<String>,
}

impl GenericBuilder {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, build: Build, options: RuntimeOptions) -> Self {
        GenericBuilder {
            base: BaseBuilder::new("generic", runtime, build, options),
            intermediate: OnceCell::new(),
        }
    }

    fn from_image(&self) -> String {
        self.base
            .build
            .custom_one("from")
            .unwrap_or(DEFAULT_IMAGE)
            .to_string()
    }

    /// The Dockerfile is generated from the chosen base image, so two
    /// builds naming the same image share one intermediate tag.
    fn dockerfile(&self) -> String {
        format!(
            "FROM {}\n\nRUN mkdir -p /src {}\n\nWORKDIR /src\n",
            self.from_image(),
            CACHE_MOUNT
        )
    }
}

#[async_trait]
impl LanguageBuilder for GenericBuilder {
    fn name(&self) -> &str {
        "generic"
    }

    fn cache_folder(&self) -> PathBuf {
        resolve_cache_dir("generic", &[])
    }

    fn images(&self) -> Vec<String> {
        vec![self.from_image()]
    }

    fn intermediate_image(&self) -> String {
        self.intermediate
            .get_or_init(|| self.base.intermediate_image("generic", &self.dockerfile()))
            .clone()
    }

    fn build_script(&self) -> String {
        let mut script = String::from("#!/bin/sh\nset -eu\n\n");
        for cmd in self.base.build.custom_values("cmds") {
            script.push_str(cmd);
            script.push('\n');
        }
        script
    }

    async fn pull(&self) -> Result<()> {
        self.base.pull_images(&self.images()).await
    }

    async fn build_intermediate_image(&self) -> Result<()> {
        self.base
            .build_intermediate(&self.intermediate_image(), &self.dockerfile())
            .await
    }

    async fn build(&self) -> Result<Vec<String>> {
        let id = self
            .base
            .run_build_container(
                &self.intermediate_image(),
                &self.build_script(),
                &[],
                (self.cache_folder(), CACHE_MOUNT),
            )
            .await?;
        Ok(vec![id])
    }

    async fn prod(&self) -> Result<BuildLoop> {
        let artifact = self
            .base
            .build
            .custom_one("artifact")
            .unwrap_or(self.base.build.app.as_str())
            .to_string();
        self.base.prod(&self.from_image(), &artifact).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{BuildType, EnvType};
    use crate::cri::RecordingRuntime;

    fn builder_for(build: Build) -> GenericBuilder {
        let runtime = Arc::new(RecordingRuntime::default());
        GenericBuilder::new(
            runtime as Arc<dyn ContainerRuntime>,
            build,
            RuntimeOptions::default(),
        )
    }

    #[test]
    fn test_from_image_defaults_to_alpine() {
        let mut build = Build::new("job", BuildType::Generic, EnvType::Local);
        build.defaults();
        let builder = builder_for(build);

        assert_eq!(builder.from_image(), DEFAULT_IMAGE);
    }

    #[test]
    fn test_same_from_image_shares_intermediate_tag() {
        let mut first = Build::new("a", BuildType::Generic, EnvType::Local);
        first.set_custom("from", vec!["debian:12".to_string()]);
        first.defaults();
        let mut second = Build::new("b", BuildType::Generic, EnvType::Local);
        second.set_custom("from", vec!["debian:12".to_string()]);
        second.defaults();

        assert_eq!(
            builder_for(first).intermediate_image(),
            builder_for(second).intermediate_image()
        );
    }

    #[test]
    fn test_build_script_joins_commands() {
        let mut build = Build::new("job", BuildType::Generic, EnvType::Local);
        build.set_custom(
            "cmds",
            vec!["make generate".to_string(), "make test".to_string()],
        );
        build.defaults();
        let builder = builder_for(build);

        let script = builder.build_script();
        assert!(script.contains("make generate\nmake test\n"));
    }
}
