//! Build-step registry
//!
//! Holds steps in category buckets, freezes them into an execution plan,
//! and drives a single `Build` through the plan with match filtering,
//! async fan-out per category and aggregation of results.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;

use super::{BuildLoop, BuildStep, Category, StepOutput};
use crate::build::Build;
use crate::error::{EngineError, Result};
use crate::progress::{LogProgress, Progress};

#[derive(Clone)]
struct Registered {
    step: Arc<dyn BuildStep>,
    category: Category,
    run_async: bool,
}

/// Category-aware registry of build steps
pub struct BuildSteps {
    buckets: Vec<Vec<Registered>>,
    plan: Vec<Registered>,
    initialized: bool,
    progress: Arc<dyn Progress>,
}

impl Default for BuildSteps {
    fn default() -> Self {
        BuildSteps::new()
    }
}

impl BuildSteps {
    pub fn new() -> Self {
        BuildSteps {
            buckets: vec![Vec::new(); Category::ORDER.len()],
            plan: Vec::new(),
            initialized: false,
            progress: Arc::new(LogProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn Progress>) -> Self {
        self.progress = progress;
        self
    }

    /// Register a synchronous step under a category. Rejects duplicate
    /// names; logs and ignores the call once the registry is frozen.
    pub fn add_to_category(&mut self, category: Category, step: Arc<dyn BuildStep>) -> Result<()> {
        self.add(category, step, false)
    }

    /// Register an asynchronous step under a category; it will fan out with
    /// its async siblings and join at the category boundary.
    pub fn add_async_to_category(
        &mut self,
        category: Category,
        step: Arc<dyn BuildStep>,
    ) -> Result<()> {
        self.add(category, step, true)
    }

    fn add(&mut self, category: Category, step: Arc<dyn BuildStep>, run_async: bool) -> Result<()> {
        if self.initialized {
            tracing::warn!(
                "registry already initialized, ignoring step '{}'",
                step.name()
            );
            return Ok(());
        }
        if self.find(step.name()).is_some() {
            return Err(EngineError::DuplicateStep(step.name().to_string()));
        }

        self.buckets[category.index()].push(Registered {
            step,
            category,
            run_async,
        });
        Ok(())
    }

    fn find(&self, name: &str) -> Option<&Registered> {
        self.buckets
            .iter()
            .flatten()
            .find(|registered| registered.step.name() == name)
    }

    /// Freeze the registry and compute the flattened execution plan.
    /// Idempotent; after this no further registration is possible.
    pub fn init(&mut self) {
        if self.initialized {
            return;
        }
        for (category, bucket) in Category::ORDER.iter().zip(&self.buckets) {
            if !bucket.is_empty() {
                tracing::info!(
                    "category {}: {} step(s): {}",
                    category,
                    bucket.len(),
                    bucket
                        .iter()
                        .map(|registered| registered.step.name())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
        }
        self.plan = self.buckets.iter().flatten().cloned().collect();
        self.initialized = true;
    }

    pub fn is_not_init(&self) -> bool {
        !self.initialized
    }

    /// Registered step names in plan order.
    pub fn step_names(&self) -> Vec<String> {
        self.buckets
            .iter()
            .flatten()
            .map(|registered| registered.step.name().to_string())
            .collect()
    }

    /// Human-facing target aliases in plan order.
    pub fn aliases(&self) -> Vec<String> {
        self.buckets
            .iter()
            .flatten()
            .map(|registered| registered.step.alias().to_string())
            .collect()
    }

    /// Union of the images the registered steps may consume, used to
    /// pre-warm the runtime cache.
    pub fn images(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for registered in self.buckets.iter().flatten() {
            for image in registered.step.images() {
                if !out.contains(&image) {
                    out.push(image);
                }
            }
        }
        out
    }

    /// Execute the plan (or the target-filtered sub-sequence) against one
    /// build. Returns the container ids every executed step produced.
    ///
    /// Safe to call concurrently for different builds; the plan is
    /// read-only after `init`.
    pub async fn run(&self, build: &Build, targets: &[String]) -> Result<Vec<String>> {
        if !self.initialized {
            return Err(EngineError::validation(
                "registry",
                "uninitialized",
                "init() must be called before run()",
            ));
        }

        let job = build.job_id();
        let mut selected: Vec<&Registered> = Vec::new();
        for registered in &self.plan {
            let applies = registered.step.matches(build)
                && registered
                    .step
                    .build_type()
                    .map(|build_type| build_type == build.build_type)
                    .unwrap_or(true);
            let targeted = targets.is_empty()
                || targets.iter().any(|target| {
                    target == registered.step.name() || target == registered.step.alias()
                });

            if applies && targeted {
                selected.push(registered);
            } else if targeted {
                // Only report skips for steps the caller actually asked for;
                // target filtering is not a skip.
                self.progress.step_skipped(&job, registered.step.name());
            }
        }
        let mut containers: Vec<String> = Vec::new();
        // (plan position, wrapped error); the one earliest in plan order wins.
        let mut errors: Vec<(usize, EngineError)> = Vec::new();
        let mut inflight: Vec<(usize, String, JoinHandle<Result<StepOutput>>)> = Vec::new();
        let mut halted = false;
        let mut current_category: Option<Category> = None;

        for (position, registered) in selected.iter().enumerate() {
            if halted || !errors.is_empty() {
                break;
            }
            if build.cancel.is_canceled() {
                errors.push((position, EngineError::Canceled));
                break;
            }

            // Category boundary: everything in flight joins first.
            if current_category != Some(registered.category) {
                self.drain(&job, &mut inflight, &mut containers, &mut errors, &mut halted)
                    .await;
                if halted || !errors.is_empty() {
                    break;
                }
                current_category = Some(registered.category);
            }

            let name = registered.step.name().to_string();
            if registered.run_async {
                let step = Arc::clone(&registered.step);
                let task_build = build.clone();
                self.progress.step_started(&job, &name);
                inflight.push((
                    position,
                    name,
                    tokio::spawn(async move { step.run(&task_build).await }),
                ));
            } else {
                // A sync step waits for its async siblings before running.
                self.drain(&job, &mut inflight, &mut containers, &mut errors, &mut halted)
                    .await;
                if halted || !errors.is_empty() {
                    break;
                }

                self.progress.step_started(&job, &name);
                let started = Instant::now();
                match registered.step.run(build).await {
                    Ok(output) => {
                        self.progress.step_finished(
                            &job,
                            &name,
                            started.elapsed().as_millis() as u64,
                        );
                        containers.extend(output.container_ids);
                        if output.control == BuildLoop::Stop {
                            tracing::debug!("[{}] step {} requested stop", job, name);
                            halted = true;
                        }
                    }
                    Err(e) => {
                        self.progress.step_failed(&job, &name, &e.to_string());
                        errors.push((position, EngineError::step(&name, e)));
                    }
                }
            }
        }

        // Async siblings already launched keep running and are always
        // joined, even after an abort or a stop signal.
        self.drain(&job, &mut inflight, &mut containers, &mut errors, &mut halted)
            .await;

        match errors.into_iter().min_by_key(|(position, _)| *position) {
            Some((_, error)) => Err(error),
            None => Ok(containers),
        }
    }

    async fn drain(
        &self,
        job: &str,
        inflight: &mut Vec<(usize, String, JoinHandle<Result<StepOutput>>)>,
        containers: &mut Vec<String>,
        errors: &mut Vec<(usize, EngineError)>,
        halted: &mut bool,
    ) {
        for (position, name, handle) in inflight.drain(..) {
            match handle.await {
                Ok(Ok(output)) => {
                    self.progress.step_finished(job, &name, 0);
                    containers.extend(output.container_ids);
                    if output.control == BuildLoop::Stop {
                        *halted = true;
                    }
                }
                Ok(Err(e)) => {
                    self.progress.step_failed(job, &name, &e.to_string());
                    errors.push((position, EngineError::step(&name, e)));
                }
                Err(join_error) => {
                    errors.push((
                        position,
                        EngineError::step(&name, EngineError::Internal(join_error.into())),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{BuildType, EnvType};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Outcome {
        Ok,
        Stop,
        Fail,
    }

    struct TestStep {
        name: String,
        build_type: Option<BuildType>,
        delay_ms: u64,
        outcome: Outcome,
        events: Arc<Mutex<Vec<String>>>,
    }

    impl TestStep {
        fn new(name: &str, events: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(TestStep {
                name: name.to_string(),
                build_type: None,
                delay_ms: 0,
                outcome: Outcome::Ok,
                events: Arc::clone(events),
            })
        }

        fn failing(name: &str, events: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(TestStep {
                name: name.to_string(),
                build_type: None,
                delay_ms: 0,
                outcome: Outcome::Fail,
                events: Arc::clone(events),
            })
        }

        fn stopping(name: &str, events: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(TestStep {
                name: name.to_string(),
                build_type: None,
                delay_ms: 0,
                outcome: Outcome::Stop,
                events: Arc::clone(events),
            })
        }

        fn slow(name: &str, delay_ms: u64, events: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(TestStep {
                name: name.to_string(),
                build_type: None,
                delay_ms,
                outcome: Outcome::Ok,
                events: Arc::clone(events),
            })
        }

        fn for_type(name: &str, build_type: BuildType, events: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(TestStep {
                name: name.to_string(),
                build_type: Some(build_type),
                delay_ms: 0,
                outcome: Outcome::Ok,
                events: Arc::clone(events),
            })
        }
    }

    #[async_trait]
    impl BuildStep for TestStep {
        fn name(&self) -> &str {
            &self.name
        }

        fn build_type(&self) -> Option<BuildType> {
            self.build_type
        }

        fn images(&self) -> Vec<String> {
            vec![format!("{}-image:latest", self.name)]
        }

        async fn run(&self, _build: &Build) -> Result<StepOutput> {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            self.events.lock().push(self.name.clone());
            match self.outcome {
                Outcome::Ok => Ok(StepOutput::with_containers(vec![format!(
                    "{}-container",
                    self.name
                )])),
                Outcome::Stop => Ok(StepOutput::stop()),
                Outcome::Fail => Err(EngineError::container(
                    "pull",
                    format!("{}-image", self.name),
                    "scripted failure",
                )),
            }
        }
    }

    fn test_build() -> Build {
        let mut build = Build::new("svc", BuildType::GoLang, EnvType::Build);
        build.defaults();
        build
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut steps = BuildSteps::new();

        steps
            .add_to_category(Category::Build, TestStep::new("golang", &events))
            .unwrap();
        let err = steps
            .add_to_category(Category::Quality, TestStep::new("golang", &events))
            .unwrap_err();

        assert!(matches!(err, EngineError::DuplicateStep(_)));
        assert_eq!(steps.step_names().len(), 1);
    }

    #[test]
    fn test_frozen_registry_ignores_registration() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut steps = BuildSteps::new();
        steps
            .add_to_category(Category::Build, TestStep::new("golang", &events))
            .unwrap();
        steps.init();
        assert!(!steps.is_not_init());

        steps
            .add_to_category(Category::Build, TestStep::new("late", &events))
            .unwrap();
        assert_eq!(steps.step_names(), vec!["golang".to_string()]);
    }

    #[test]
    fn test_init_is_idempotent() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut steps = BuildSteps::new();
        steps
            .add_to_category(Category::Build, TestStep::new("golang", &events))
            .unwrap();
        steps.init();
        steps.init();
        assert_eq!(steps.step_names().len(), 1);
    }

    #[test]
    fn test_plan_respects_category_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut steps = BuildSteps::new();

        // Registered out of category order on purpose.
        steps
            .add_to_category(Category::Publish, TestStep::new("push", &events))
            .unwrap();
        steps
            .add_to_category(Category::Auth, TestStep::new("login", &events))
            .unwrap();
        steps
            .add_to_category(Category::Build, TestStep::new("golang", &events))
            .unwrap();
        steps.init();

        assert_eq!(
            steps.step_names(),
            vec![
                "login".to_string(),
                "golang".to_string(),
                "push".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_run_requires_init() {
        let steps = BuildSteps::new();
        let err = steps.run(&test_build(), &[]).await.unwrap_err();
        assert!(err.to_string().contains("init"));
    }

    #[tokio::test]
    async fn test_sync_failure_aborts_later_categories() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut steps = BuildSteps::new();
        steps
            .add_to_category(Category::PreBuild, TestStep::new("s1", &events))
            .unwrap();
        steps
            .add_to_category(Category::PreBuild, TestStep::failing("s2", &events))
            .unwrap();
        steps
            .add_to_category(Category::Build, TestStep::new("b1", &events))
            .unwrap();
        steps.init();

        let err = steps.run(&test_build(), &[]).await.unwrap_err();

        assert_eq!(*events.lock(), vec!["s1".to_string(), "s2".to_string()]);
        assert!(err.to_string().contains("s2"));
    }

    #[tokio::test]
    async fn test_async_siblings_join_before_sync_step() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut steps = BuildSteps::new();
        steps
            .add_async_to_category(Category::Quality, TestStep::slow("q1", 50, &events))
            .unwrap();
        steps
            .add_async_to_category(Category::Quality, TestStep::slow("q2", 100, &events))
            .unwrap();
        steps
            .add_to_category(Category::Quality, TestStep::new("q3", &events))
            .unwrap();
        steps.init();

        steps.run(&test_build(), &[]).await.unwrap();

        let order = events.lock().clone();
        assert_eq!(order.len(), 3);
        assert_eq!(order[2], "q3", "sync step must wait for async siblings");
        assert!(order[..2].contains(&"q1".to_string()));
        assert!(order[..2].contains(&"q2".to_string()));
    }

    #[tokio::test]
    async fn test_async_steps_join_at_category_boundary() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut steps = BuildSteps::new();
        steps
            .add_async_to_category(Category::Quality, TestStep::slow("q1", 80, &events))
            .unwrap();
        steps
            .add_to_category(Category::Publish, TestStep::new("push", &events))
            .unwrap();
        steps.init();

        steps.run(&test_build(), &[]).await.unwrap();

        assert_eq!(*events.lock(), vec!["q1".to_string(), "push".to_string()]);
    }

    #[tokio::test]
    async fn test_target_filtering_runs_single_step() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut steps = BuildSteps::new();
        steps
            .add_to_category(Category::Build, TestStep::new("golang", &events))
            .unwrap();
        steps
            .add_to_category(Category::Publish, TestStep::new("golang-prod", &events))
            .unwrap();
        steps
            .add_async_to_category(Category::Quality, TestStep::new("sonarcloud", &events))
            .unwrap();
        steps.init();

        steps
            .run(&test_build(), &["golang".to_string()])
            .await
            .unwrap();

        assert_eq!(*events.lock(), vec!["golang".to_string()]);
    }

    #[tokio::test]
    async fn test_build_type_restriction_filters_steps() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut steps = BuildSteps::new();
        steps
            .add_to_category(
                Category::Build,
                TestStep::for_type("golang", BuildType::GoLang, &events),
            )
            .unwrap();
        steps
            .add_to_category(
                Category::Build,
                TestStep::for_type("python", BuildType::Python, &events),
            )
            .unwrap();
        steps.init();

        steps.run(&test_build(), &[]).await.unwrap();

        assert_eq!(*events.lock(), vec!["golang".to_string()]);
    }

    #[tokio::test]
    async fn test_stop_signal_halts_cleanly() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut steps = BuildSteps::new();
        steps
            .add_to_category(Category::PreBuild, TestStep::stopping("done", &events))
            .unwrap();
        steps
            .add_to_category(Category::Build, TestStep::new("golang", &events))
            .unwrap();
        steps.init();

        let containers = steps.run(&test_build(), &[]).await.unwrap();

        assert_eq!(*events.lock(), vec!["done".to_string()]);
        assert!(containers.is_empty());
    }

    #[tokio::test]
    async fn test_container_ids_are_aggregated() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut steps = BuildSteps::new();
        steps
            .add_to_category(Category::Build, TestStep::new("golang", &events))
            .unwrap();
        steps
            .add_to_category(Category::Publish, TestStep::new("push", &events))
            .unwrap();
        steps.init();

        let containers = steps.run(&test_build(), &[]).await.unwrap();

        assert_eq!(
            containers,
            vec![
                "golang-container".to_string(),
                "push-container".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_canceled_run_reports_cancellation() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut steps = BuildSteps::new();
        steps
            .add_to_category(Category::Build, TestStep::new("golang", &events))
            .unwrap();
        steps.init();

        let (tx, signal) = crate::build::CancelSignal::channel();
        let mut build = test_build();
        build.cancel = signal;
        tx.send(true).unwrap();

        let err = steps.run(&build, &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::Canceled));
        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_images_union_is_deduplicated() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut steps = BuildSteps::new();
        steps
            .add_to_category(Category::Build, TestStep::new("golang", &events))
            .unwrap();
        steps
            .add_to_category(Category::Quality, TestStep::new("sonarcloud", &events))
            .unwrap();

        let images = steps.images();
        assert_eq!(
            images,
            vec![
                "golang-image:latest".to_string(),
                "sonarcloud-image:latest".to_string()
            ]
        );
    }
}
