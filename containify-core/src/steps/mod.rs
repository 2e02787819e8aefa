//! Build-step pipeline
//!
//! Steps are typed, categorized units of work registered against a
//! `BuildSteps` registry. Categories induce a strict order; within one
//! category sync steps run in registration order and async steps fan out,
//! joining at the category boundary.

pub mod container;
pub mod images;
pub mod registry;

use async_trait::async_trait;

use crate::build::{Build, BuildType};
use crate::error::Result;

pub use registry::BuildSteps;

/// Ordered phases of a build pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Auth,
    PreBuild,
    Build,
    PostBuild,
    Quality,
    Apply,
    Publish,
}

impl Category {
    /// All categories in execution order
    pub const ORDER: [Category; 7] = [
        Category::Auth,
        Category::PreBuild,
        Category::Build,
        Category::PostBuild,
        Category::Quality,
        Category::Apply,
        Category::Publish,
    ];

    pub fn index(&self) -> usize {
        Category::ORDER
            .iter()
            .position(|category| category == self)
            .unwrap_or(0)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Auth => write!(f, "auth"),
            Category::PreBuild => write!(f, "pre_build"),
            Category::Build => write!(f, "build"),
            Category::PostBuild => write!(f, "post_build"),
            Category::Quality => write!(f, "quality"),
            Category::Apply => write!(f, "apply"),
            Category::Publish => write!(f, "publish"),
        }
    }
}

/// Loop-control signal returned by a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildLoop {
    /// Proceed to the next step
    Continue,
    /// Clean halt: nothing left to do for this build
    Stop,
}

/// What a step produced
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// Containers the step created, aggregated per run
    pub container_ids: Vec<String>,
    pub control: BuildLoop,
}

impl StepOutput {
    /// Successful step with nothing to report.
    pub fn done() -> Self {
        StepOutput {
            container_ids: Vec::new(),
            control: BuildLoop::Continue,
        }
    }

    pub fn with_containers(container_ids: Vec<String>) -> Self {
        StepOutput {
            container_ids,
            control: BuildLoop::Continue,
        }
    }

    /// Clean halt for this build.
    pub fn stop() -> Self {
        StepOutput {
            container_ids: Vec::new(),
            control: BuildLoop::Stop,
        }
    }
}

/// Contract every build step satisfies
#[async_trait]
pub trait BuildStep: Send + Sync {
    /// Unique name within the registry
    fn name(&self) -> &str;

    /// Human-facing target name
    fn alias(&self) -> &str {
        self.name()
    }

    /// Whether the step applies to a given job
    fn matches(&self, _build: &Build) -> bool {
        true
    }

    /// Restrict the step to a language family; `None` applies everywhere
    fn build_type(&self) -> Option<BuildType> {
        None
    }

    /// Images the step may consume, used for cache pre-warming
    fn images(&self) -> Vec<String> {
        Vec::new()
    }

    async fn run(&self, build: &Build) -> Result<StepOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_order_is_total() {
        for window in Category::ORDER.windows(2) {
            assert!(window[0] < window[1]);
        }
        assert_eq!(Category::Auth.index(), 0);
        assert_eq!(Category::Publish.index(), 6);
    }
}
