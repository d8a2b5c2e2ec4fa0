//! Repair of malformed hosts in navigation URLs.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use super::{find_call_end, PatchOutcome, NAV_TIMEOUT_MS};

fn goto_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\w+)\.goto\s*\(").expect("valid goto regex"))
}

/// Corrected hostname, or `None` when the host looks fine.
///
/// Handles a doubled top-level label (`example.com.com`) and a short
/// spurious label before `.com` (`app.example.co.com`). The spurious label
/// only counts below a registrable domain, so `api.x.com` is left alone.
pub fn repair_host(host: &str) -> Option<String> {
    let labels: Vec<&str> = host.split('.').collect();
    let n = labels.len();
    if n < 3 || labels.iter().any(|l| l.is_empty()) {
        return None;
    }

    if labels[n - 1].eq_ignore_ascii_case(labels[n - 2]) && labels[n - 1].chars().all(|c| c.is_ascii_alphabetic()) {
        return Some(labels[..n - 1].join("."));
    }

    let extra = labels[n - 2];
    let spurious = extra.chars().all(|c| c.is_ascii_alphabetic())
        && extra.len() <= 2
        && n >= 4;
    if labels[n - 1].eq_ignore_ascii_case("com") && spurious {
        let mut fixed: Vec<&str> = labels[..n - 2].to_vec();
        fixed.push(labels[n - 1]);
        return Some(fixed.join("."));
    }

    None
}

/// String literal at the start of `args`: `(quote, content, bytes consumed)`.
fn leading_literal(args: &str) -> Option<(char, &str, usize)> {
    let trimmed = args.trim_start();
    let skipped = args.len() - trimmed.len();
    let quote = trimmed.chars().next().filter(|c| matches!(c, '\'' | '"' | '`'))?;
    let body = &trimmed[1..];
    let close = body.find(quote)?;
    Some((quote, &body[..close], skipped + close + 2))
}

/// Serialize `url` without the root path `Url` adds when `literal` had none.
fn render(url: &Url, literal: &str) -> String {
    let text = url.as_str().to_string();
    let after_host = |s: &str| {
        let start = s.find("://")? + 3;
        Some(s[start..].find(&['/', '?', '#'][..]).map_or(s.len(), |i| start + i))
    };
    let implicit_root = after_host(literal).is_some_and(|i| !literal[i..].starts_with('/'));
    match after_host(&text) {
        Some(i) if implicit_root && url.path() == "/" && text[i..].starts_with('/') => {
            format!("{}{}", &text[..i], &text[i + 1..])
        }
        _ => text,
    }
}

/// Fix the host of the first navigation call and pin its load options.
pub fn fix_malformed_url(spec: &str) -> PatchOutcome {
    let Some(caps) = goto_re().captures(spec) else {
        return PatchOutcome::NoMatch;
    };
    let Some(call) = caps.get(0) else {
        return PatchOutcome::NoMatch;
    };
    let receiver = &caps[1];
    let open = call.end() - 1;
    let Some(end) = find_call_end(spec, open) else {
        return PatchOutcome::NoMatch;
    };

    let Some((quote, literal, _)) = leading_literal(&spec[open + 1..end - 1]) else {
        return PatchOutcome::NoMatch;
    };
    let Ok(url) = Url::parse(literal) else {
        return PatchOutcome::NoMatch;
    };
    let Some(host) = url.host_str() else {
        return PatchOutcome::NoMatch;
    };
    let Some(fixed_host) = repair_host(host) else {
        return PatchOutcome::NoMatch;
    };
    let mut fixed = url.clone();
    if fixed.set_host(Some(&fixed_host)).is_err() {
        return PatchOutcome::NoMatch;
    }
    let fixed_literal = render(&fixed, literal);

    let replacement = format!(
        "{receiver}.goto({quote}{fixed_literal}{quote}, {{ waitUntil: \"domcontentloaded\", timeout: {NAV_TIMEOUT_MS} }})"
    );
    let mut text = String::with_capacity(spec.len() + 64);
    text.push_str(&spec[..call.start()]);
    text.push_str(&replacement);
    text.push_str(&spec[end..]);

    PatchOutcome::patched(
        text,
        format!("Fixed malformed navigation host {} -> {}", host, fixed_host),
    )
}
