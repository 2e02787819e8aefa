//! Steps that delegate to a language builder
//!
//! Each language family contributes one Build-category step (pull,
//! intermediate image, build container) and one Publish-category step
//! (production image). A new language is added by registering new steps;
//! the registry itself never changes.

use std::sync::Arc;

use async_trait::async_trait;

use super::{BuildStep, BuildSteps, Category, StepOutput};
use crate::build::{Build, BuildType};
use crate::builder::{GenericBuilder, GoBuilder, LanguageBuilder, PythonBuilder};
use crate::config::RuntimeOptions;
use crate::cri::ContainerRuntime;
use crate::error::Result;

/// Constructor for a per-build language builder instance
pub type BuilderFactory =
    Arc<dyn Fn(Arc<dyn ContainerRuntime>, Build, RuntimeOptions) -> Box<dyn LanguageBuilder> + Send + Sync>;

/// Build-category step: pull, materialize the intermediate image, run the
/// build container.
pub struct LanguageBuildStep {
    name: String,
    build_type: BuildType,
    images: Vec<String>,
    runtime: Arc<dyn ContainerRuntime>,
    options: RuntimeOptions,
    factory: BuilderFactory,
}

impl LanguageBuildStep {
    pub fn new(
        name: &str,
        build_type: BuildType,
        images: Vec<String>,
        runtime: Arc<dyn ContainerRuntime>,
        options: RuntimeOptions,
        factory: BuilderFactory,
    ) -> Arc<Self> {
        Arc::new(LanguageBuildStep {
            name: name.to_string(),
            build_type,
            images,
            runtime,
            options,
            factory,
        })
    }
}

#[async_trait]
impl BuildStep for LanguageBuildStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn build_type(&self) -> Option<BuildType> {
        Some(self.build_type)
    }

    fn images(&self) -> Vec<String> {
        self.images.clone()
    }

    async fn run(&self, build: &Build) -> Result<StepOutput> {
        let builder = (self.factory)(
            Arc::clone(&self.runtime),
            build.clone(),
            self.options.clone(),
        );
        builder.pull().await?;
        builder.build_intermediate_image().await?;
        let containers = builder.build().await?;
        Ok(StepOutput::with_containers(containers))
    }
}

/// Publish-category step: commit and push the production image.
pub struct ProdImageStep {
    name: String,
    build_type: BuildType,
    runtime: Arc<dyn ContainerRuntime>,
    options: RuntimeOptions,
    factory: BuilderFactory,
}

impl ProdImageStep {
    pub fn new(
        name: &str,
        build_type: BuildType,
        runtime: Arc<dyn ContainerRuntime>,
        options: RuntimeOptions,
        factory: BuilderFactory,
    ) -> Arc<Self> {
        Arc::new(ProdImageStep {
            name: name.to_string(),
            build_type,
            runtime,
            options,
            factory,
        })
    }
}

#[async_trait]
impl BuildStep for ProdImageStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn build_type(&self) -> Option<BuildType> {
        Some(self.build_type)
    }

    async fn run(&self, build: &Build) -> Result<StepOutput> {
        let builder = (self.factory)(
            Arc::clone(&self.runtime),
            build.clone(),
            self.options.clone(),
        );
        let control = builder.prod().await?;
        Ok(StepOutput {
            container_ids: Vec::new(),
            control,
        })
    }
}

/// Quality-category lint step, opted into per build via the `lint` custom
/// flag.
pub struct LintStep {
    name: String,
    build_type: BuildType,
    runtime: Arc<dyn ContainerRuntime>,
    options: RuntimeOptions,
    factory: BuilderFactory,
}

impl LintStep {
    pub fn new(
        name: &str,
        build_type: BuildType,
        runtime: Arc<dyn ContainerRuntime>,
        options: RuntimeOptions,
        factory: BuilderFactory,
    ) -> Arc<Self> {
        Arc::new(LintStep {
            name: name.to_string(),
            build_type,
            runtime,
            options,
            factory,
        })
    }
}

#[async_trait]
impl BuildStep for LintStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn build_type(&self) -> Option<BuildType> {
        Some(self.build_type)
    }

    fn matches(&self, build: &Build) -> bool {
        build.custom_flag("lint")
    }

    async fn run(&self, build: &Build) -> Result<StepOutput> {
        let builder = (self.factory)(
            Arc::clone(&self.runtime),
            build.clone(),
            self.options.clone(),
        );
        if builder.lint_image().is_none() {
            return Ok(StepOutput::done());
        }
        let containers = builder.lint().await?;
        Ok(StepOutput::with_containers(containers))
    }
}

/// The stock registry: language builds, lint, production images and the
/// image save/load utilities, in their home categories.
pub fn default_steps(
    runtime: Arc<dyn ContainerRuntime>,
    options: &RuntimeOptions,
) -> Result<BuildSteps> {
    use crate::builder::{generic, golang, python};

    let mut steps = BuildSteps::new();

    let go: BuilderFactory =
        Arc::new(|runtime, build, options| Box::new(GoBuilder::new(runtime, build, options)));
    let py: BuilderFactory =
        Arc::new(|runtime, build, options| Box::new(PythonBuilder::new(runtime, build, options)));
    let sh: BuilderFactory =
        Arc::new(|runtime, build, options| Box::new(GenericBuilder::new(runtime, build, options)));

    steps.add_to_category(
        Category::PreBuild,
        super::images::DockerLoadStep::new(Arc::clone(&runtime)),
    )?;

    steps.add_to_category(
        Category::Build,
        LanguageBuildStep::new(
            "golang",
            BuildType::GoLang,
            vec![golang::GO_IMAGE.to_string(), golang::PROD_IMAGE.to_string()],
            Arc::clone(&runtime),
            options.clone(),
            Arc::clone(&go),
        ),
    )?;
    steps.add_to_category(
        Category::Build,
        LanguageBuildStep::new(
            "python",
            BuildType::Python,
            vec![python::PYTHON_IMAGE.to_string()],
            Arc::clone(&runtime),
            options.clone(),
            Arc::clone(&py),
        ),
    )?;
    steps.add_to_category(
        Category::Build,
        LanguageBuildStep::new(
            "generic",
            BuildType::Generic,
            vec![generic::DEFAULT_IMAGE.to_string()],
            Arc::clone(&runtime),
            options.clone(),
            Arc::clone(&sh),
        ),
    )?;

    steps.add_async_to_category(
        Category::Quality,
        LintStep::new(
            "golang-lint",
            BuildType::GoLang,
            Arc::clone(&runtime),
            options.clone(),
            Arc::clone(&go),
        ),
    )?;

    steps.add_to_category(
        Category::Publish,
        ProdImageStep::new(
            "golang-prod",
            BuildType::GoLang,
            Arc::clone(&runtime),
            options.clone(),
            go,
        ),
    )?;
    steps.add_to_category(
        Category::Publish,
        ProdImageStep::new(
            "python-prod",
            BuildType::Python,
            Arc::clone(&runtime),
            options.clone(),
            py,
        ),
    )?;
    steps.add_to_category(
        Category::Publish,
        ProdImageStep::new(
            "generic-prod",
            BuildType::Generic,
            Arc::clone(&runtime),
            options.clone(),
            sh,
        ),
    )?;
    steps.add_to_category(
        Category::Publish,
        super::images::DockerSaveStep::new(runtime),
    )?;

    Ok(steps)
}
