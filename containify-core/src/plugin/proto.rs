//! Plugin wire protocol
//!
//! The configuration plugin is a user-authored child process. On startup
//! it prints one handshake line naming its protocol version and RPC
//! address, then serves JSON-RPC over local HTTP. Protocol v2 returns
//! grouped builds; v1 returns a flat list the host wraps into one-element
//! groups.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::build::{Build, BuildGroup, BuildGroups, Platform};
use crate::error::{EngineError, Result};

/// RPC service name dispensed by every plugin
pub const SERVICE_NAME: &str = "containifyci";

/// Magic-cookie environment variable set for the child process
pub const COOKIE_ENV: &str = "CONTAINIFYCI_PLUGIN_COOKIE";

/// Expected cookie value; plugins refuse to start without it
pub const COOKIE_VALUE: &str = "d7e9a1f3";

/// Marker leading the handshake line
pub const HANDSHAKE_PREFIX: &str = "CONTAINIFYCI-PLUGIN";

/// Protocol versions this host speaks
pub const SUPPORTED_VERSIONS: [u32; 2] = [1, 2];

/// Parsed handshake line: `CONTAINIFYCI-PLUGIN|<version>|<addr>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub version: u32,
    pub addr: String,
}

impl Handshake {
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.trim().split('|');
        let prefix = parts.next().unwrap_or_default();
        if prefix != HANDSHAKE_PREFIX {
            return Err(EngineError::Plugin(format!(
                "unexpected handshake line: {:?}",
                line
            )));
        }

        let version: u32 = parts
            .next()
            .and_then(|field| field.parse().ok())
            .ok_or_else(|| {
                EngineError::Plugin(format!("handshake carries no protocol version: {:?}", line))
            })?;
        let addr = parts
            .next()
            .filter(|field| !field.is_empty())
            .ok_or_else(|| {
                EngineError::Plugin(format!("handshake carries no address: {:?}", line))
            })?;

        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(EngineError::Plugin(format!(
                "unsupported plugin protocol version {}",
                version
            )));
        }

        Ok(Handshake {
            version,
            addr: addr.to_string(),
        })
    }
}

impl std::fmt::Display for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}|{}", HANDSHAKE_PREFIX, self.version, self.addr)
    }
}

/// RPC request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub service: String,
    pub method: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StringValue {
    #[serde(default)]
    pub string_value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyValues {
    #[serde(default)]
    pub values: Vec<StringValue>,
}

/// One build descriptor as emitted by the plugin
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildArgs {
    pub application: String,
    pub build_type: String,
    pub environment: String,
    pub image: String,
    pub image_tag: String,
    pub registry: String,
    pub registries: Vec<String>,
    pub repository: String,
    pub file: String,
    pub folder: String,
    pub source_packages: Vec<String>,
    pub source_files: Vec<String>,
    pub organization: String,
    pub verbose: bool,
    pub properties: HashMap<String, PropertyValues>,
    pub platform: String,
}

impl BuildArgs {
    /// Materialize an engine `Build` from the wire descriptor: typed
    /// fields parsed, properties copied into `custom`, defaults applied.
    pub fn into_build(self) -> Result<Build> {
        let mut build = Build::new(self.application, self.build_type.parse()?, self.environment.parse()?);
        build.image = self.image;
        build.image_tag = self.image_tag;
        build.registry = self.registry;
        build.registries = self.registries;
        build.repository = self.repository;
        build.file = self.file;
        build.folder = self.folder;
        build.source_packages = self.source_packages;
        build.source_files = self.source_files;
        build.organization = self.organization;
        build.verbose = self.verbose;
        build.platform = Platform::parse(&self.platform);

        for (key, property) in self.properties {
            build.set_custom(
                key,
                property
                    .values
                    .into_iter()
                    .map(|value| value.string_value)
                    .collect(),
            );
        }

        build.defaults();
        build.validate()?;
        Ok(build)
    }
}

/// v2 grouping wrapper
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildArgsGroup {
    pub args: Vec<BuildArgs>,
}

/// v1 response: one flat list of builds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetBuildResponse {
    pub args: Vec<BuildArgs>,
}

/// v2 response: builds pre-partitioned into groups
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetBuildsResponse {
    pub args: Vec<BuildArgsGroup>,
}

impl GetBuildResponse {
    /// v1 fallback shape: every build becomes its own group.
    pub fn into_groups(self) -> Result<BuildGroups> {
        let builds: Result<Vec<Build>> = self
            .args
            .into_iter()
            .map(BuildArgs::into_build)
            .collect();
        Ok(BuildGroups::from_flat(builds?))
    }
}

impl GetBuildsResponse {
    pub fn into_groups(self) -> Result<BuildGroups> {
        let groups: Result<Vec<BuildGroup>> = self
            .args
            .into_iter()
            .map(|group| {
                let builds: Result<Vec<Build>> = group
                    .args
                    .into_iter()
                    .map(BuildArgs::into_build)
                    .collect();
                Ok(BuildGroup::new(builds?))
            })
            .collect();
        Ok(BuildGroups::new(groups?))
    }
}
