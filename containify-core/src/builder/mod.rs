//! Language builders
//!
//! A language builder does the work inside a container for one build job:
//! pull base images, materialize a content-addressed intermediate image,
//! generate the build script, run the build container, and optionally
//! commit and push a production image. `BaseBuilder` carries the shared
//! container orchestration; each language supplies its images, cache and
//! script on top of it.

pub mod base;
pub mod generic;
pub mod golang;
pub mod python;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;
use crate::steps::BuildLoop;

pub use base::BaseBuilder;
pub use generic::GenericBuilder;
pub use golang::GoBuilder;
pub use python::PythonBuilder;

/// Per-language containerized build behavior
#[async_trait]
pub trait LanguageBuilder: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this builder may run concurrently with its category siblings
    fn is_async(&self) -> bool {
        false
    }

    /// Host directory mounted as the language's dependency cache.
    /// Best-effort: resolution failures fall back to a temp path.
    fn cache_folder(&self) -> PathBuf;

    /// Images the builder may consume, for cache pre-warming
    fn images(&self) -> Vec<String>;

    /// Intermediate image reference, a pure function of the builder's
    /// Dockerfile bytes
    fn intermediate_image(&self) -> String;

    /// Shell script executed inside the build container
    fn build_script(&self) -> String;

    async fn pull(&self) -> Result<()>;

    async fn build_intermediate_image(&self) -> Result<()>;

    /// Run the build container to completion; returns created container ids
    async fn build(&self) -> Result<Vec<String>>;

    /// Commit and push the production image when configured; a clean
    /// `Continue` when there is nothing to do
    async fn prod(&self) -> Result<BuildLoop>;

    /// Lint sub-capability; `None` when the language has no lint image
    fn lint_image(&self) -> Option<String> {
        None
    }

    async fn lint(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Resolve a language cache directory from candidate host paths, creating
/// the first one that works and falling back to a process-local temp path.
pub(crate) fn resolve_cache_dir(language: &str, candidates: &[PathBuf]) -> PathBuf {
    for candidate in candidates {
        match std::fs::create_dir_all(candidate) {
            Ok(()) => return candidate.clone(),
            Err(e) => {
                tracing::warn!(
                    "cache dir {:?} unusable for {}: {}, trying next",
                    candidate,
                    language,
                    e
                );
            }
        }
    }

    let fallback = std::env::temp_dir().join("containifyci-cache").join(language);
    if let Err(e) = std::fs::create_dir_all(&fallback) {
        tracing::warn!("temp cache fallback {:?} failed for {}: {}", fallback, language, e);
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_cache_dir_prefers_first_usable() {
        let dir = tempfile::tempdir().unwrap();
        let wanted = dir.path().join("modcache");

        let resolved = resolve_cache_dir("golang", &[wanted.clone()]);
        assert_eq!(resolved, wanted);
        assert!(wanted.is_dir());
    }

    #[test]
    fn test_resolve_cache_dir_falls_back_to_temp() {
        let resolved = resolve_cache_dir("golang", &[]);
        assert!(resolved.starts_with(std::env::temp_dir()));
        assert!(resolved.ends_with("golang"));
    }
}
