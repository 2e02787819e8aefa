//! Pluggable progress sink
//!
//! The engine reports step lifecycle events through this trait so terminal
//! UIs can render them; the default sink writes structured log lines.

/// Observer for step and group lifecycle events
pub trait Progress: Send + Sync {
    fn step_started(&self, job: &str, step: &str);
    fn step_finished(&self, job: &str, step: &str, duration_ms: u64);
    fn step_failed(&self, job: &str, step: &str, error: &str);
    fn step_skipped(&self, job: &str, step: &str);
    fn group_finished(&self, index: usize, total: usize);
}

/// Default progress sink backed by `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl Progress for LogProgress {
    fn step_started(&self, job: &str, step: &str) {
        tracing::info!("[{}] step {} started", job, step);
    }

    fn step_finished(&self, job: &str, step: &str, duration_ms: u64) {
        tracing::info!("[{}] step {} finished in {}ms", job, step, duration_ms);
    }

    fn step_failed(&self, job: &str, step: &str, error: &str) {
        tracing::error!("[{}] step {} failed: {}", job, step, error);
    }

    fn step_skipped(&self, job: &str, step: &str) {
        tracing::debug!("[{}] step {} skipped", job, step);
    }

    fn group_finished(&self, index: usize, total: usize) {
        tracing::info!("build group {}/{} finished", index + 1, total);
    }
}

/// Sink that drops every event, for tests and quiet runs
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl Progress for NullProgress {
    fn step_started(&self, _job: &str, _step: &str) {}
    fn step_finished(&self, _job: &str, _step: &str, _duration_ms: u64) {}
    fn step_failed(&self, _job: &str, _step: &str, _error: &str) {}
    fn step_skipped(&self, _job: &str, _step: &str) {}
    fn group_finished(&self, _index: usize, _total: usize) {}
}
