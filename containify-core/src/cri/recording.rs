//! Recording runtime double
//!
//! Records every CRI call and serves scripted results instead of talking
//! to a real runtime. Backs the daemon's dry-run mode and the engine's
//! scenario tests, which assert on the recorded call sequence.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::types::{ContainerInfo, ContainerSpec, RuntimeKind};
use super::ContainerRuntime;
use crate::error::{EngineError, Result};

/// One recorded runtime interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CriCall {
    Pull { image: String },
    BuildImage { tag: String },
    Create { image: String, id: String },
    Start { id: String },
    Wait { id: String },
    Stop { id: String },
    Remove { id: String },
    Commit { id: String, tag: String },
    Push { image: String, uri: String },
    CopyTo { id: String, dest: String },
    CopyFrom { id: String, src: String },
    Exec { id: String },
    Save { image: String, path: String },
    Load { path: String },
}

#[derive(Default)]
struct Recording {
    calls: Vec<CriCall>,
    images: HashSet<String>,
    containers: HashMap<String, ContainerInfo>,
    container_files: HashMap<String, Vec<u8>>,
    next_container: u64,
    wait_exit: i64,
    fail_ops: HashMap<String, String>,
}

/// In-memory `ContainerRuntime` that records and scripts every call
pub struct RecordingRuntime {
    kind: RuntimeKind,
    state: Mutex<Recording>,
}

impl Default for RecordingRuntime {
    fn default() -> Self {
        RecordingRuntime::new(RuntimeKind::Docker)
    }
}

impl RecordingRuntime {
    pub fn new(kind: RuntimeKind) -> Self {
        RecordingRuntime {
            kind,
            state: Mutex::new(Recording::default()),
        }
    }

    /// All recorded calls in order.
    pub fn calls(&self) -> Vec<CriCall> {
        self.state.lock().calls.clone()
    }

    /// Recorded pushes as (image, uri) pairs.
    pub fn pushes(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                CriCall::Push { image, uri } => Some((image.clone(), uri.clone())),
                _ => None,
            })
            .collect()
    }

    /// Images pulled, in order.
    pub fn pulled(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                CriCall::Pull { image } => Some(image.clone()),
                _ => None,
            })
            .collect()
    }

    /// Pre-seed an image into the local store.
    pub fn seed_image(&self, image: &str) {
        self.state.lock().images.insert(image.to_string());
    }

    /// Make every subsequent call of `op` fail with `message`.
    pub fn fail_op(&self, op: &str, message: &str) {
        self.state
            .lock()
            .fail_ops
            .insert(op.to_string(), message.to_string());
    }

    /// Exit code returned by `wait` for every container.
    pub fn set_wait_exit(&self, code: i64) {
        self.state.lock().wait_exit = code;
    }

    /// Bytes served by `copy_from` for a path.
    pub fn seed_file(&self, src: &str, content: &[u8]) {
        self.state
            .lock()
            .container_files
            .insert(src.to_string(), content.to_vec());
    }

    fn check_fail(&self, op: &str) -> Result<()> {
        if let Some(message) = self.state.lock().fail_ops.get(op) {
            return Err(EngineError::container(op, "<scripted>", message.clone()));
        }
        Ok(())
    }

    fn record(&self, call: CriCall) {
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl ContainerRuntime for RecordingRuntime {
    fn kind(&self) -> RuntimeKind {
        self.kind
    }

    async fn pull(&self, image: &str) -> Result<()> {
        self.check_fail("pull")?;
        self.record(CriCall::Pull {
            image: image.to_string(),
        });
        self.state.lock().images.insert(image.to_string());
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.state.lock().images.contains(image))
    }

    async fn build_intermediate_image(
        &self,
        tag: &str,
        _dockerfile: &str,
        _platforms: &[String],
    ) -> Result<()> {
        self.check_fail("build_intermediate")?;
        self.record(CriCall::BuildImage {
            tag: tag.to_string(),
        });
        self.state.lock().images.insert(tag.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.check_fail("create")?;
        let id = {
            let mut state = self.state.lock();
            state.next_container += 1;
            let id = format!("container-{:04}", state.next_container);
            state.containers.insert(
                id.clone(),
                ContainerInfo {
                    id: id.clone(),
                    image: spec.image.clone(),
                    running: false,
                    exit_code: None,
                },
            );
            id
        };
        self.record(CriCall::Create {
            image: spec.image.clone(),
            id: id.clone(),
        });
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.check_fail("start")?;
        self.record(CriCall::Start { id: id.to_string() });
        if let Some(info) = self.state.lock().containers.get_mut(id) {
            info.running = true;
        }
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64> {
        self.check_fail("wait")?;
        self.record(CriCall::Wait { id: id.to_string() });
        let mut state = self.state.lock();
        let exit = state.wait_exit;
        if let Some(info) = state.containers.get_mut(id) {
            info.running = false;
            info.exit_code = Some(exit);
        }
        Ok(exit)
    }

    async fn stop(&self, id: &str) -> Result<()> {
        self.record(CriCall::Stop { id: id.to_string() });
        if let Some(info) = self.state.lock().containers.get_mut(id) {
            info.running = false;
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.record(CriCall::Remove { id: id.to_string() });
        self.state.lock().containers.remove(id);
        Ok(())
    }

    async fn commit(&self, id: &str, tag: &str, _changes: &[String]) -> Result<String> {
        self.check_fail("commit")?;
        self.record(CriCall::Commit {
            id: id.to_string(),
            tag: tag.to_string(),
        });
        self.state.lock().images.insert(tag.to_string());
        Ok(format!("sha256:{}", tag.len()))
    }

    async fn push(&self, image: &str, uri: &str) -> Result<()> {
        self.check_fail("push")?;
        self.record(CriCall::Push {
            image: image.to_string(),
            uri: uri.to_string(),
        });
        Ok(())
    }

    async fn copy_to(&self, id: &str, content: &[u8], dest: &str) -> Result<()> {
        self.check_fail("copy_to")?;
        self.record(CriCall::CopyTo {
            id: id.to_string(),
            dest: dest.to_string(),
        });
        self.state
            .lock()
            .container_files
            .insert(dest.to_string(), content.to_vec());
        Ok(())
    }

    async fn copy_from(&self, id: &str, src: &str) -> Result<Vec<u8>> {
        self.check_fail("copy_from")?;
        self.record(CriCall::CopyFrom {
            id: id.to_string(),
            src: src.to_string(),
        });
        Ok(self
            .state
            .lock()
            .container_files
            .get(src)
            .cloned()
            .unwrap_or_else(|| b"artifact".to_vec()))
    }

    async fn exec(&self, id: &str, _cmd: &[String]) -> Result<String> {
        self.check_fail("exec")?;
        self.record(CriCall::Exec { id: id.to_string() });
        Ok(String::new())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo> {
        self.state
            .lock()
            .containers
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::container_id("inspect", id, "no such container"))
    }

    async fn logs(&self, _id: &str) -> Result<String> {
        Ok(String::new())
    }

    async fn save(&self, image: &str, path: &str) -> Result<()> {
        self.check_fail("save")?;
        self.record(CriCall::Save {
            image: image.to_string(),
            path: path.to_string(),
        });
        Ok(())
    }

    async fn load(&self, path: &str) -> Result<()> {
        self.check_fail("load")?;
        self.record(CriCall::Load {
            path: path.to_string(),
        });
        Ok(())
    }
}
