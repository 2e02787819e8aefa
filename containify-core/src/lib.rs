//! ContainifyCI Core Library
//!
//! Containerized build orchestration engine with:
//! - Category-ordered build-step pipeline with async fan-out
//! - Language builders running inside ephemeral containers
//! - Docker/Podman support through a narrow runtime interface
//! - Authenticated in-process key-value sidecar for containers
//! - Out-of-process configuration plugins over a versioned RPC

pub mod build;
pub mod builder;
pub mod checksum;
pub mod config;
pub mod cri;
pub mod engine;
pub mod error;
pub mod kv;
pub mod leader;
pub mod plugin;
pub mod progress;
pub mod ssh;
pub mod steps;

pub use build::{Build, BuildGroup, BuildGroups, BuildType, EnvType, Platform};
pub use config::RuntimeOptions;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use kv::KvSidecar;
pub use leader::{Leader, Role};
pub use steps::{BuildLoop, BuildStep, BuildSteps, Category};

/// ContainifyCI version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable naming the configuration plugin binary
pub const PLUGIN_FILE_ENV: &str = "CONTAINIFYCI_FILE";

/// Default location of the configuration plugin binary
pub const DEFAULT_PLUGIN_FILE: &str = ".containifyci/containifyci";

/// Custom key carrying the container-routable sidecar address
pub const KEY_HOST: &str = "CONTAINIFYCI_HOST";

/// Custom key carrying the host-local sidecar address
pub const KEY_EXTERNAL_HOST: &str = "CONTAINIFYCI_EXTERNAL_HOST";

/// Secret key carrying the sidecar bearer token
pub const KEY_AUTH: &str = "CONTAINIFYCI_AUTH";

/// Environment variable carrying a GitHub token into steps that need it
pub const GITHUB_TOKEN_ENV: &str = "CONTAINIFYCI_GITHUB_TOKEN";
