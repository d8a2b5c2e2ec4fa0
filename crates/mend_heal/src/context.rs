//! Failure context collection.
//!
//! Locates the spec file behind a failed result and gathers everything a
//! repair needs: the file's current text, the run's captured output, the
//! stored failure message and the normalised test title.

use std::path::{Path, PathBuf};

use mend_core::{normalize_test_title, HealTask, PathsConfig};
use mend_store::Store;
use tracing::debug;

use crate::error::{HealError, HealResult};

/// Marker of specs that live in a curated suite: `__agent/<suite>/<rest>`.
const CURATED_MARKER: &str = "__agent/";

/// Everything known about one failure.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureContext {
    /// Resolved on-disk location of the spec
    pub spec_path: PathBuf,
    /// Path used in diffs and prompts, relative to the repo root when possible
    pub relative_path: String,
    /// Spec text at collection time
    pub spec_text: String,
    pub stdout: String,
    pub stderr: String,
    pub message: Option<String>,
    /// Last segment of the test title
    pub test_title: Option<String>,
}

/// Spec file part of a test-case key, with forward slashes.
pub fn key_spec_path(key: &str) -> String {
    let file = key.split('#').next().unwrap_or(key);
    let file = if file.is_empty() { key } else { file };
    file.replace('\\', "/")
}

/// Part of `spec` below a generated root named `anchor`, if the key embeds it.
fn below_anchor<'a>(spec: &'a str, anchor: &str) -> Option<&'a str> {
    let needle = format!("{}/", anchor.trim_end_matches('/'));
    let index = spec.find(&needle)?;
    Some(&spec[index + needle.len()..])
}

/// Curated suite path for keys carrying the curated marker.
fn curated_candidate(spec: &str, curated_root: &Path) -> Option<PathBuf> {
    let index = spec.find(CURATED_MARKER)?;
    let rest = &spec[index + CURATED_MARKER.len()..];
    let mut parts = rest.splitn(2, '/');
    let suite = parts.next().filter(|s| s.starts_with("agent-"))?;
    let remainder = parts.next().unwrap_or("").trim_start_matches('/');
    Some(curated_root.join(suite).join(remainder))
}

/// Ordered locations where the spec for `key` may live.
///
/// Order: override root, curated suite, each generated root, repository root.
pub fn spec_path_candidates(key: &str, paths: &PathsConfig) -> Vec<PathBuf> {
    let spec = key_spec_path(key);
    let relative = spec.trim_start_matches('/');
    let generated = paths.generated_dirs();
    let anchored = paths
        .generated_roots
        .iter()
        .filter_map(|root| root.file_name().and_then(|n| n.to_str()))
        .find_map(|name| below_anchor(&spec, name));

    let mut candidates = Vec::new();

    if let Some(root) = &paths.override_root {
        candidates.push(root.join(anchored.unwrap_or(relative)));
    }

    if let Some(curated_root) = &paths.curated_root {
        if let Some(path) = curated_candidate(&spec, curated_root) {
            candidates.push(path);
        }
    }

    for dir in &generated {
        candidates.push(dir.join(anchored.unwrap_or(relative)));
    }

    if Path::new(&spec).is_absolute() {
        candidates.push(PathBuf::from(&spec));
    } else {
        candidates.push(paths.repo_root.join(relative));
    }

    let mut unique = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !unique.contains(&candidate) {
            unique.push(candidate);
        }
    }
    unique
}

/// First candidate that exists as a file.
pub fn resolve_spec_path(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|path| path.is_file()).cloned()
}

/// Display form of `path` relative to `root` when it lies below it.
pub fn relative_to(path: &Path, root: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

async fn read_or_empty(path: PathBuf) -> String {
    tokio::fs::read_to_string(&path).await.unwrap_or_else(|_| {
        debug!("No captured output at {:?}", path);
        String::new()
    })
}

/// Gather the context for a healing task.
pub async fn collect_failure_context(
    store: &dyn Store,
    paths: &PathsConfig,
    task: &HealTask,
) -> HealResult<FailureContext> {
    let result = store
        .get_result(&task.test_result_id)
        .await?
        .ok_or_else(|| HealError::not_found("Test result", &task.test_result_id))?;
    let case = store.get_test_case(&task.test_case_id).await?;

    let key = case
        .as_ref()
        .map(|c| c.key.clone())
        .unwrap_or_else(|| task.test_case_id.clone());
    let candidates = spec_path_candidates(&key, paths);
    let spec_path = resolve_spec_path(&candidates).ok_or_else(|| HealError::SpecNotFound {
        key: key.clone(),
        tried: candidates.clone(),
    })?;
    let spec_text = tokio::fs::read_to_string(&spec_path).await?;
    debug!("Resolved spec for {} at {:?}", key, spec_path);

    let log_dir = paths.run_log_dir(&task.run_id);
    let stdout = read_or_empty(log_dir.join("stdout.txt")).await;
    let stderr = read_or_empty(log_dir.join("stderr.txt")).await;

    let title = case
        .as_ref()
        .map(|c| c.title.as_str())
        .or(task.test_title.as_deref());

    Ok(FailureContext {
        relative_path: relative_to(&spec_path, &paths.repo_root),
        spec_path,
        spec_text,
        stdout,
        stderr,
        message: result.message,
        test_title: normalize_test_title(title),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> PathsConfig {
        let mut paths = PathsConfig::rooted("/repo");
        paths.curated_root = Some(PathBuf::from("/suites"));
        paths.override_root = Some(PathBuf::from("/local"));
        paths
    }

    #[test]
    fn test_key_spec_path() {
        assert_eq!(key_spec_path("tests\\a.spec.ts#A > b"), "tests/a.spec.ts");
        assert_eq!(key_spec_path("#title"), "#title");
    }

    #[test]
    fn test_candidate_order_for_generated_key() {
        let candidates =
            spec_path_candidates("/tmp/run/testmend-generated/web/login.spec.ts#Login", &paths());
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/local/web/login.spec.ts"),
                PathBuf::from("/repo/testmend-generated/web/login.spec.ts"),
                PathBuf::from("/tmp/run/testmend-generated/web/login.spec.ts"),
            ]
        );
    }

    #[test]
    fn test_curated_key_prefers_suite_root() {
        let candidates =
            spec_path_candidates("__agent/agent-42/checkout/pay.spec.ts#pays", &paths());
        assert_eq!(candidates[1], PathBuf::from("/suites/agent-42/checkout/pay.spec.ts"));
        assert_eq!(
            candidates.last().unwrap(),
            &PathBuf::from("/repo/__agent/agent-42/checkout/pay.spec.ts")
        );
    }

    #[test]
    fn test_resolve_picks_first_existing() {
        let dir = tempfile::tempdir().unwrap();
        let second = dir.path().join("b.spec.ts");
        std::fs::write(&second, "test").unwrap();

        let candidates = vec![dir.path().join("a.spec.ts"), second.clone(), dir.path().to_path_buf()];
        assert_eq!(resolve_spec_path(&candidates), Some(second));
        assert_eq!(resolve_spec_path(&[dir.path().join("none")]), None);
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(
            relative_to(Path::new("/repo/tests/a.spec.ts"), Path::new("/repo")),
            "tests/a.spec.ts"
        );
        assert_eq!(relative_to(Path::new("/other/a.spec.ts"), Path::new("/repo")), "/other/a.spec.ts");
    }
}
