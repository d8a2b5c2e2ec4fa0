//! Disambiguation of locators that resolved to several elements.

use std::sync::OnceLock;

use regex::Regex;

use super::{find_call_end, PatchOutcome};

fn locator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\.(locator|getByRole|getByText|getByLabel|getByPlaceholder|getByTestId|getByTitle|getByAltText)\s*\(",
        )
        .expect("valid locator regex")
    })
}

fn href_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).expect("valid href regex"))
}

fn violation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"strict mode violation:\s*(.+?)\s+resolved to").expect("valid violation regex")
    })
}

const DISAMBIGUATORS: [&str; 4] = [".first(", ".last(", ".nth(", ".filter("];

/// A locator call in the spec: `locator(...)` or `getByX(...)`.
#[derive(Debug, Clone, Copy)]
struct LocatorCall<'a> {
    start: usize,
    end: usize,
    expr: &'a str,
}

fn normalize_expr(expr: &str) -> String {
    expr.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == '\'' || c == '`' { '"' } else { c })
        .collect()
}

/// Locator calls not yet narrowed to one element, in source order.
fn ambiguous_locators(spec: &str) -> Vec<LocatorCall<'_>> {
    let mut calls = Vec::new();
    for m in locator_re().find_iter(spec) {
        let start = m.start() + 1;
        let open = m.end() - 1;
        let Some(end) = find_call_end(spec, open) else {
            continue;
        };
        let rest = spec[end..].trim_start();
        if DISAMBIGUATORS.iter().any(|d| rest.starts_with(d)) {
            continue;
        }
        if rest.starts_with(".locator(") || rest.starts_with(".getBy") {
            continue;
        }
        calls.push(LocatorCall {
            start,
            end,
            expr: &spec[start..end],
        });
    }
    calls
}

/// Narrow an ambiguous locator to its first match.
///
/// With an `href` in the failure message the locator is replaced by an
/// anchor selector on that href; otherwise `.first()` is appended.
pub fn fix_strict_locator(spec: &str, message: &str) -> PatchOutcome {
    let candidates = ambiguous_locators(spec);
    if candidates.is_empty() {
        return PatchOutcome::NoMatch;
    }

    let reported = violation_re()
        .captures(message)
        .map(|caps| normalize_expr(&caps[1]));
    let target = reported
        .as_deref()
        .and_then(|reported| {
            candidates
                .iter()
                .find(|call| reported.ends_with(&normalize_expr(call.expr)))
        })
        .unwrap_or(&candidates[0]);

    let href = href_re()
        .captures(message)
        .map(|caps| caps[1].to_string())
        .filter(|href| !href.contains('\''));

    let (replacement, summary) = match href {
        Some(href) => (
            format!("locator('a[href=\"{}\"]').first()", href),
            format!("Scoped ambiguous locator to a[href=\"{}\"] (first match)", href),
        ),
        None => (
            format!("{}.first()", target.expr),
            format!("Narrowed ambiguous locator {} to its first match", target.expr),
        ),
    };

    let mut text = String::with_capacity(spec.len() + replacement.len());
    text.push_str(&spec[..target.start]);
    text.push_str(&replacement);
    text.push_str(&spec[target.end..]);
    PatchOutcome::patched(text, summary)
}
