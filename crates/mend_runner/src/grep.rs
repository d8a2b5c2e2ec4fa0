//! Title filters passed to the test runner.

/// Check whether a filter already looks like a regular expression.
pub fn is_regex_like(value: &str) -> bool {
    value.starts_with('^')
        || value.ends_with('$')
        || value.contains("(?")
        || value.contains('|')
        || value.contains('\\')
}

/// Escape characters that are special in a JavaScript regular expression.
fn escape_js_regex(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(
            ch,
            '.' | '*' | '+' | '?' | '^' | '$' | '{' | '}' | '(' | ')' | '|' | '[' | ']' | '\\'
        ) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Match a plain title as a whole word sequence.
pub fn build_loose_grep(title: &str) -> Option<String> {
    if title.trim().is_empty() {
        return None;
    }
    Some(format!("(?:^|\\s){}(?:$|\\s)", escape_js_regex(title)))
}

/// Turn a user or rerun filter into the value passed to `--grep`.
pub fn resolve_grep(raw: Option<&str>) -> Option<String> {
    let raw = raw.map(str::trim).filter(|g| !g.is_empty())?;
    if is_regex_like(raw) {
        Some(raw.to_string())
    } else {
        build_loose_grep(raw)
    }
}
