//! Build job data model
//!
//! A `Build` is a single job unit (one app, one language, one environment),
//! produced by the configuration plugin and handed read-mostly to each
//! build step. Groups of builds run in parallel; groups run sequentially.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::cri::RuntimeKind;
use crate::error::{EngineError, Result};
use crate::leader::Leader;

/// Language family of a build job, controls which steps apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildType {
    GoLang,
    Maven,
    Python,
    Generic,
}

impl std::fmt::Display for BuildType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildType::GoLang => write!(f, "golang"),
            BuildType::Maven => write!(f, "maven"),
            BuildType::Python => write!(f, "python"),
            BuildType::Generic => write!(f, "generic"),
        }
    }
}

impl std::str::FromStr for BuildType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "golang" | "go" => Ok(BuildType::GoLang),
            "maven" | "java" => Ok(BuildType::Maven),
            "python" => Ok(BuildType::Python),
            "generic" => Ok(BuildType::Generic),
            other => Err(EngineError::validation(
                "build_type",
                other,
                "expected one of golang, maven, python, generic",
            )),
        }
    }
}

/// Target environment, affects policy decisions such as image pushes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvType {
    Local,
    Build,
    Prod,
}

impl Default for EnvType {
    fn default() -> Self {
        EnvType::Local
    }
}

impl std::fmt::Display for EnvType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvType::Local => write!(f, "local"),
            EnvType::Build => write!(f, "build"),
            EnvType::Prod => write!(f, "prod"),
        }
    }
}

impl std::str::FromStr for EnvType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" | "" => Ok(EnvType::Local),
            "build" => Ok(EnvType::Build),
            "prod" | "production" => Ok(EnvType::Prod),
            other => Err(EngineError::validation(
                "environment",
                other,
                "expected one of local, build, prod",
            )),
        }
    }
}

/// Host and container platform pair (`os/arch` strings)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub host: String,
    pub container: String,
}

impl Platform {
    /// Parse a host platform string and derive the container platform.
    ///
    /// Container images are always linux; the architecture follows the host
    /// so that binaries built inside the container run natively.
    pub fn parse(host: &str) -> Self {
        let host = if host.is_empty() {
            Self::detect_host()
        } else {
            host.to_string()
        };

        let arch = host.split('/').nth(1).unwrap_or("amd64");
        Platform {
            container: format!("linux/{}", arch),
            host,
        }
    }

    fn detect_host() -> String {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        };
        format!("{}/{}", os, arch)
    }
}

impl Default for Platform {
    fn default() -> Self {
        Platform::parse("")
    }
}

/// Cancellation context carried by every `Build`.
///
/// Steps check it between long-running operations; container waits race
/// against it so outstanding containers can be stopped promptly.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal paired with its trigger.
    pub fn channel() -> (watch::Sender<bool>, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (tx, CancelSignal { rx })
    }

    /// A signal that never fires, for standalone runs and tests.
    pub fn none() -> Self {
        static NEVER: Lazy<CancelSignal> = Lazy::new(|| {
            let (tx, rx) = watch::channel(false);
            // Keep the sender alive so the channel never closes.
            std::mem::forget(tx);
            CancelSignal { rx }
        });
        NEVER.clone()
    }

    pub fn is_canceled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation fires. Never resolves on the quiet path.
    pub async fn canceled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without firing; nothing will ever cancel us.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        CancelSignal::none()
    }
}

/// A single build job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    /// Application identifier, required and immutable after defaults()
    pub app: String,

    /// Language family
    pub build_type: BuildType,

    /// Target environment
    #[serde(default)]
    pub env: EnvType,

    /// Production image name (empty = no production image)
    #[serde(default)]
    pub image: String,

    /// Production image tag
    #[serde(default)]
    pub image_tag: String,

    /// Primary production registry
    #[serde(default)]
    pub registry: String,

    /// Additional production registries
    #[serde(default)]
    pub registries: Vec<String>,

    /// Entry file relative to the working directory
    #[serde(default)]
    pub file: String,

    /// Working directory relative to the project root
    #[serde(default)]
    pub folder: String,

    /// Artifact source files for protobuf-like sub-steps
    #[serde(default)]
    pub source_files: Vec<String>,

    /// Artifact source packages for protobuf-like sub-steps
    #[serde(default)]
    pub source_packages: Vec<String>,

    #[serde(default)]
    pub organization: String,

    #[serde(default)]
    pub repository: String,

    #[serde(default)]
    pub platform: Platform,

    /// Free-form key -> multi-value parameters consumed by steps
    #[serde(default)]
    pub custom: HashMap<String, Vec<String>>,

    /// Auth tokens injected into containers by reference
    #[serde(default)]
    pub secret: HashMap<String, String>,

    #[serde(default)]
    pub verbose: bool,

    /// Active runtime kind, derived from the CRI adapter on init
    #[serde(default)]
    pub runtime: RuntimeKind,

    /// Back-reference to the group's leader-election primitive
    #[serde(skip)]
    pub leader: Option<Arc<Leader>>,

    /// Cancellation context for this run
    #[serde(skip)]
    pub cancel: CancelSignal,

    #[serde(skip)]
    defaulted: bool,
}

impl Build {
    pub fn new(app: impl Into<String>, build_type: BuildType, env: EnvType) -> Self {
        Build {
            app: app.into(),
            build_type,
            env,
            image: String::new(),
            image_tag: String::new(),
            registry: String::new(),
            registries: Vec::new(),
            file: String::new(),
            folder: String::new(),
            source_files: Vec::new(),
            source_packages: Vec::new(),
            organization: String::new(),
            repository: String::new(),
            platform: Platform::default(),
            custom: HashMap::new(),
            secret: HashMap::new(),
            verbose: false,
            runtime: RuntimeKind::default(),
            leader: None,
            cancel: CancelSignal::none(),
            defaulted: false,
        }
    }

    /// Normalize optional fields. Idempotent; `app` is never touched.
    pub fn defaults(&mut self) {
        if self.defaulted {
            return;
        }
        if self.folder.is_empty() {
            self.folder = ".".to_string();
        }
        if self.image_tag.is_empty() {
            self.image_tag = "latest".to_string();
        }
        if self.platform.host.is_empty() {
            self.platform = Platform::default();
        }
        self.defaulted = true;
    }

    /// Check boundary invariants. Called once after the plugin hands
    /// the job over.
    pub fn validate(&self) -> Result<()> {
        if self.app.is_empty() {
            return Err(EngineError::validation(
                "app",
                "",
                "application identifier must not be empty",
            ));
        }
        Ok(())
    }

    /// `build_type + env + app` identify a running job within a group.
    pub fn job_id(&self) -> String {
        format!("{}-{}-{}", self.build_type, self.env, self.app)
    }

    /// First value of a custom parameter, if present.
    pub fn custom_one(&self, key: &str) -> Option<&str> {
        self.custom
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of a custom parameter.
    pub fn custom_values(&self, key: &str) -> &[String] {
        self.custom.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether a custom parameter is set to "true".
    pub fn custom_flag(&self, key: &str) -> bool {
        matches!(self.custom_one(key), Some("true") | Some("1"))
    }

    pub fn set_custom(&mut self, key: impl Into<String>, values: Vec<String>) {
        self.custom.insert(key.into(), values);
    }

    pub fn add_secret(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.secret.insert(key.into(), value.into());
    }

    /// Registries the production image is pushed to: the primary registry
    /// followed by the extra ones, deduplicated, order preserved.
    pub fn push_registries(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.registry.is_empty() {
            out.push(self.registry.clone());
        }
        for registry in &self.registries {
            if !registry.is_empty() && !out.contains(registry) {
                out.push(registry.clone());
            }
        }
        out
    }
}

/// An ordered collection of builds sharing one leader-election primitive.
/// Members run in parallel; groups run sequentially.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildGroup {
    pub builds: Vec<Build>,
}

impl BuildGroup {
    pub fn new(builds: Vec<Build>) -> Self {
        BuildGroup { builds }
    }
}

/// A sequence of build groups processed in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildGroups {
    pub groups: Vec<BuildGroup>,
}

impl BuildGroups {
    pub fn new(groups: Vec<BuildGroup>) -> Self {
        BuildGroups { groups }
    }

    /// Wrap a flat list of builds into one-element groups, the protocol v1
    /// fallback shape.
    pub fn from_flat(builds: Vec<Build>) -> Self {
        BuildGroups {
            groups: builds
                .into_iter()
                .map(|build| BuildGroup::new(vec![build]))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
