//! Python language builder
//!
//! Runs uv-managed builds inside a slim Python intermediate image. The
//! production artifact is a zipapp written next to the sources, shipped
//! into the production base the same way Go binaries are.

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

/// Python toolchain base image
pub const PYTHON_IMAGE: &str = "python:3.12-slim";

/// Production base image; python apps need the interpreter at run time
pub const PROD_IMAGE: &str = "python:3.12-slim";

pub const DOCKERFILE: &str = include_str!("dockerfiles/python.Dockerfile");

const CACHE_MOUNT: &str = "/opt/uv-cache";

pub struct PythonBuilder {
    base: BaseBuilder,
    intermediate: OnceCell<String>,
}

impl PythonBuilder {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, build: Build, options: RuntimeOptions) -> Self {
        PythonBuilder {
            base: BaseBuilder::new("python", runtime, build, options),
            intermediate: OnceCell::new(),
        }
    }

    fn build_env(&self) -> Vec<(String, String)> {
        vec![
            ("UV_CACHE_DIR".to_string(), CACHE_MOUNT.to_string()),
            ("_PIP_USE_IMPORTLIB_METADATA".to_string(), "0".to_string()),
        ]
    }

    fn artifact(&self) -> String {
        format!("{}.pyz", self.base.build.app)
    }
}

#[async_trait]
impl LanguageBuilder for PythonBuilder {
    fn name(&self) -> &str {
        "python"
    }

    fn cache_folder(&self) -> PathBuf {
        let mut candidates = Vec::new();
        if let Ok(cache) = std::env::var("UV_CACHE_DIR") {
            candidates.push(PathBuf::from(cache));
        }
        if let Ok(home) = std::env::var("HOME") {
            candidates.push(PathBuf::from(home).join(".cache").join("uv"));
        }
        resolve_cache_dir("python", &candidates)
    }

    fn images(&self) -> Vec<String> {
        vec![PYTHON_IMAGE.to_string()]
    }

    fn intermediate_image(&self) -> String {
        self.intermediate
            .get_or_init(|| self.base.intermediate_image("python", DOCKERFILE))
            .clone()
    }

    fn build_script(&self) -> String {
        let build = &self.base.build;
        let mut script = String::from("#!/bin/sh\nset -eu\n\nuv sync --frozen\n");

        if !build.custom_flag("nocoverage") {
            script.push_str("uv run pytest\n");
        }

        let entry = if build.file.is_empty() {
            "main:main".to_string()
        } else {
            build.file.clone()
        };
        script.push_str(&format!(
            "uv run python -m zipapp . -m {} -o {}\n",
            entry,
            self.artifact()
        ));
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
        self.base.prod(PROD_IMAGE, &self.artifact()).await
    }
}
