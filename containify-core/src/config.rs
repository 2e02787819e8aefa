//! Engine runtime configuration

use serde::{Deserialize, Serialize};

/// How aggressively base images are pulled before a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullPolicy {
    /// Pull every time, picking up upstream tag moves
    Always,
    /// Pull only when the image is absent from the local store
    IfMissing,
}

impl Default for PullPolicy {
    fn default() -> Self {
        PullPolicy::IfMissing
    }
}

/// Per-invocation engine options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeOptions {
    /// Requested step target ("all" runs the full plan)
    pub target: String,

    /// Enable verbose container logs
    pub verbose: bool,

    /// Base-image pull policy
    pub pull_policy: PullPolicy,

    /// Per-container timeout in seconds
    pub container_timeout_secs: u64,

    /// Maximum builds of one group running concurrently
    pub max_concurrent_builds: usize,

    /// Registry namespace for intermediate images
    pub intermediate_registry: String,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            target: "all".to_string(),
            verbose: false,
            pull_policy: PullPolicy::default(),
            container_timeout_secs: 3600,
            max_concurrent_builds: num_cpus(),
            intermediate_registry: "containifyci".to_string(),
        }
    }
}

impl RuntimeOptions {
    /// Load options from a file
    pub fn load(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let options: RuntimeOptions = serde_json::from_str(&content)?;
        Ok(options)
    }

    /// Save options to a file
    pub fn save(&self, path: &std::path::Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply environment overrides on top of the current values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(timeout) = std::env::var("CONTAINIFYCI_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse() {
                self.container_timeout_secs = secs;
            }
        }
        if let Ok(jobs) = std::env::var("CONTAINIFYCI_MAX_BUILDS") {
            if let Ok(count) = jobs.parse::<usize>() {
                self.max_concurrent_builds = count.max(1);
            }
        }
        self
    }

    /// The target list handed to the step registry: empty means "run the
    /// whole plan".
    pub fn run_targets(&self) -> Vec<String> {
        if self.target.is_empty() || self.target == "all" {
            Vec::new()
        } else {
            vec![self.target.clone()]
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
