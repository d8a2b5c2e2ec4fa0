//! Unified diffs of applied patches.

use similar::TextDiff;

/// Unified diff between two versions of a spec, headed `a/<path>` and `b/<path>`.
pub fn unified_diff(path: &str, before: &str, after: &str) -> String {
    let path = path.trim_start_matches('/');
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{}", path), &format!("b/{}", path))
        .to_string()
}
