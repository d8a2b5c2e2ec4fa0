//! Helpers for hierarchical test titles.

/// Separators used by test runners between suite and test titles.
const TITLE_SEPARATORS: [char; 2] = ['›', '>'];

/// Return the last segment of a `suite › test` style title.
///
/// Empty segments are ignored; `None` is returned for empty input.
pub fn normalize_test_title(full_name: Option<&str>) -> Option<String> {
    let full_name = full_name?;
    let last = full_name
        .split(&TITLE_SEPARATORS[..])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .last()
        .unwrap_or_else(|| full_name.trim());

    if last.is_empty() {
        None
    } else {
        Some(last.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_segment() {
        assert_eq!(
            normalize_test_title(Some("Home › Navigation > opens pricing ")).as_deref(),
            Some("opens pricing")
        );
        assert_eq!(normalize_test_title(Some("plain title")).as_deref(), Some("plain title"));
    }

    #[test]
    fn test_empty_titles() {
        assert_eq!(normalize_test_title(None), None);
        assert_eq!(normalize_test_title(Some("   ")), None);
        assert_eq!(normalize_test_title(Some(" > › ")), None);
    }
}
