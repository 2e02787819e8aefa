//! Engine loop
//!
//! Top-level driver: starts the key-value sidecar, sources build groups
//! from the configuration plugin, runs each group's members in parallel
//! (groups strictly in sequence) and tears everything down. Every spawned
//! task is joined before the group advances; none outlive a run.

use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::build::{Build, BuildGroups, CancelSignal};
use crate::config::RuntimeOptions;
use crate::cri::ContainerRuntime;
use crate::error::{EngineError, Result};
use crate::kv::KvSidecar;
use crate::leader::Leader;
use crate::plugin::PluginHost;
use crate::progress::{LogProgress, Progress};
use crate::steps::BuildSteps;
use crate::{KEY_AUTH, KEY_EXTERNAL_HOST, KEY_HOST};

/// One engine invocation. The step registry is scoped to the engine, not
/// to the process; tests construct as many engines as they like.
pub struct Engine {
    runtime: Arc<dyn ContainerRuntime>,
    steps: Arc<BuildSteps>,
    options: RuntimeOptions,
    progress: Arc<dyn Progress>,
    cancel_tx: watch::Sender<bool>,
    cancel: CancelSignal,
}

impl Engine {
    /// Take ownership of a registry, freeze it and wire up cancellation.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        mut steps: BuildSteps,
        options: RuntimeOptions,
    ) -> Self {
        steps.init();
        let (cancel_tx, cancel) = CancelSignal::channel();
        Engine {
            runtime,
            steps: Arc::new(steps),
            options,
            progress: Arc::new(LogProgress),
            cancel_tx,
            cancel,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn Progress>) -> Self {
        self.progress = progress;
        self
    }

    /// Cancel the run: in-flight steps stop their containers and return.
    pub fn shutdown(&self) {
        tracing::info!("engine shutdown requested");
        let _ = self.cancel_tx.send(true);
    }

    /// Images the registered steps may consume, for the cache subcommand.
    pub fn images(&self) -> Vec<String> {
        self.steps.images()
    }

    /// Callable step aliases in plan order.
    pub fn aliases(&self) -> Vec<String> {
        self.steps.aliases()
    }

    /// Pre-pull every step image concurrently.
    pub async fn prewarm(&self) -> Result<()> {
        let mut set = JoinSet::new();
        for image in self.images() {
            let runtime = Arc::clone(&self.runtime);
            set.spawn(async move {
                if runtime.image_exists(&image).await? {
                    return Ok(());
                }
                tracing::info!("pre-pulling {}", image);
                runtime.pull(&image).await
            });
        }

        let mut first_err = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_err.get_or_insert(e);
                }
                Err(e) => {
                    first_err.get_or_insert(EngineError::Internal(e.into()));
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Source groups from the configuration plugin and execute them.
    pub async fn run(&self) -> Result<()> {
        let host = PluginHost::launch().await?;
        let groups = host.get_builds().await;
        host.shutdown().await;
        self.execute(groups?).await
    }

    /// Execute pre-sourced groups: sidecar up, groups in order, sidecar
    /// down regardless of outcome.
    pub async fn execute(&self, groups: BuildGroups) -> Result<()> {
        let sidecar = KvSidecar::start().await?;
        let result = self.run_groups(&sidecar, groups).await;
        sidecar.shutdown().await;
        result
    }

    async fn run_groups(&self, sidecar: &KvSidecar, groups: BuildGroups) -> Result<()> {
        let total = groups.len();
        for (index, group) in groups.groups.into_iter().enumerate() {
            if self.cancel.is_canceled() {
                return Err(EngineError::Canceled);
            }

            tracing::info!(
                "build group {}/{}: {} job(s)",
                index + 1,
                total,
                group.builds.len()
            );
            let leader = Arc::new(Leader::new(format!("group-{}", index)));
            let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_builds));
            let targets = self.options.run_targets();

            let mut prepared = Vec::with_capacity(group.builds.len());
            for build in group.builds {
                prepared.push(self.prepare(build, sidecar, &leader)?);
            }

            let mut set: JoinSet<(String, Result<Vec<String>>)> = JoinSet::new();
            for build in prepared {
                let steps = Arc::clone(&self.steps);
                let semaphore = Arc::clone(&semaphore);
                let targets = targets.clone();
                set.spawn(async move {
                    let job = build.job_id();
                    let _permit = semaphore.acquire_owned().await;
                    let result = steps.run(&build, &targets).await;
                    (job, result)
                });
            }

            let mut first_err: Option<EngineError> = None;
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((job, Ok(containers))) => {
                        tracing::info!("[{}] finished ({} container(s))", job, containers.len());
                    }
                    Ok((job, Err(e))) => {
                        tracing::error!("[{}] failed: {}", job, e);
                        if first_err.is_none() {
                            first_err = Some(e);
                            // A hard failure cancels the siblings still
                            // running in this group.
                            let _ = self.cancel_tx.send(true);
                        }
                    }
                    Err(join_error) => {
                        if first_err.is_none() {
                            first_err = Some(EngineError::Internal(join_error.into()));
                            let _ = self.cancel_tx.send(true);
                        }
                    }
                }
            }

            self.progress.group_finished(index, total);
            if let Some(e) = first_err {
                return Err(e);
            }
        }
        Ok(())
    }

    /// Attach the leader, inject sidecar coordinates and normalize the
    /// build before it is handed to the step registry.
    fn prepare(&self, mut build: Build, sidecar: &KvSidecar, leader: &Arc<Leader>) -> Result<Build> {
        build.leader = Some(Arc::clone(leader));
        build.cancel = self.cancel.clone();
        build.runtime = self.runtime.kind();
        build.verbose = build.verbose || self.options.verbose;
        build.set_custom(
            KEY_HOST,
            vec![sidecar.container_host(self.runtime.kind())],
        );
        build.set_custom(KEY_EXTERNAL_HOST, vec![sidecar.external_host()]);
        build.add_secret(KEY_AUTH, sidecar.secret());
        if let Ok(token) = std::env::var(crate::GITHUB_TOKEN_ENV) {
            if !token.is_empty() {
                build.add_secret(crate::GITHUB_TOKEN_ENV, token);
            }
        }
        build.defaults();
        build.validate()?;
        Ok(build)
    }
}
