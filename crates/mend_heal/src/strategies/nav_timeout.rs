//! Longer, DOM-ready navigation waits for navigation timeouts.

use std::sync::OnceLock;

use regex::Regex;

use super::{find_call_end, PatchOutcome, NAV_TIMEOUT_FLOOR_MS, NAV_TIMEOUT_MS};

fn goto_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\w+)\.goto\s*\(").expect("valid goto regex"))
}

fn timeout_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\btimeout\s*:\s*(\d+)").expect("valid timeout regex"))
}

fn wait_until_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\bwaitUntil\s*:\s*['"`][^'"`]*['"`]"#).expect("valid waitUntil regex")
    })
}

/// Split call arguments at the first top-level comma.
fn split_first_arg(args: &str) -> (&str, Option<&str>) {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (index, ch) in args.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' | '`' => quote = Some(ch),
            '(' | '{' | '[' => depth += 1,
            ')' | '}' | ']' => depth -= 1,
            ',' if depth == 0 => return (&args[..index], Some(&args[index + 1..])),
            _ => {}
        }
    }
    (args, None)
}

/// New options object, or `None` when the existing one already meets the floor.
fn raise_options(options: &str) -> Option<String> {
    let caps = timeout_re().captures(options)?;
    let current: u64 = caps[1].parse().ok()?;
    if current >= NAV_TIMEOUT_FLOOR_MS {
        return None;
    }

    let raised = timeout_re()
        .replace(options, format!("timeout: {}", NAV_TIMEOUT_MS).as_str())
        .into_owned();
    if wait_until_re().is_match(&raised) {
        return Some(
            wait_until_re()
                .replace(&raised, "waitUntil: \"domcontentloaded\"")
                .into_owned(),
        );
    }
    let body = raised.trim().trim_start_matches('{').trim_start();
    Some(format!("{{ waitUntil: \"domcontentloaded\", {}", body))
}

/// Give navigation calls a DOM-content-loaded wait and a 20 s timeout.
///
/// Calls without options get both; calls whose timeout is under 10 s are
/// raised. Anything else is left alone.
pub fn fix_nav_timeout(spec: &str) -> PatchOutcome {
    let mut text = String::with_capacity(spec.len() + 64);
    let mut last = 0;
    let mut patched = 0usize;

    for caps in goto_re().captures_iter(spec) {
        let Some(call) = caps.get(0) else { continue };
        if call.start() < last {
            continue;
        }
        let open = call.end() - 1;
        let Some(end) = find_call_end(spec, open) else {
            continue;
        };

        let args = &spec[open + 1..end - 1];
        let (target, options) = split_first_arg(args);
        let target = target.trim();
        if target.is_empty() {
            continue;
        }

        let new_options = match options.map(str::trim) {
            None | Some("") => Some(format!(
                "{{ waitUntil: \"domcontentloaded\", timeout: {} }}",
                NAV_TIMEOUT_MS
            )),
            Some(existing) if existing.starts_with('{') => raise_options(existing),
            Some(_) => None,
        };
        let Some(new_options) = new_options else {
            continue;
        };

        text.push_str(&spec[last..call.start()]);
        text.push_str(&format!("{}.goto({}, {})", &caps[1], target, new_options));
        last = end;
        patched += 1;
    }

    if patched == 0 {
        return PatchOutcome::NoMatch;
    }
    text.push_str(&spec[last..]);
    PatchOutcome::patched(
        text,
        format!(
            "Raised navigation timeout to {} ms with domcontentloaded wait ({} call{})",
            NAV_TIMEOUT_MS,
            patched,
            if patched == 1 { "" } else { "s" }
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patched_text(outcome: PatchOutcome) -> String {
        match outcome {
            PatchOutcome::Patched { text, .. } => text,
            PatchOutcome::NoMatch => panic!("expected a patch"),
        }
    }

    #[test]
    fn test_adds_options_when_missing() {
        let spec = "const url = 'https://app.example.com';\nawait page.goto(url);\n";
        let text = patched_text(fix_nav_timeout(spec));
        assert_eq!(
            text,
            "const url = 'https://app.example.com';\nawait page.goto(url, { waitUntil: \"domcontentloaded\", timeout: 20000 });\n"
        );
    }

    #[test]
    fn test_raises_short_timeout() {
        let spec = "await page.goto('/login', { timeout: 5000 });";
        assert_eq!(
            patched_text(fix_nav_timeout(spec)),
            "await page.goto('/login', { waitUntil: \"domcontentloaded\", timeout: 20000 });"
        );

        let spec = "await page.goto('/login', { waitUntil: 'load', timeout: 3000 });";
        assert_eq!(
            patched_text(fix_nav_timeout(spec)),
            "await page.goto('/login', { waitUntil: \"domcontentloaded\", timeout: 20000 });"
        );
    }

    #[test]
    fn test_no_match_when_floor_met() {
        assert_eq!(
            fix_nav_timeout("await page.goto('/a', { timeout: 15000 });"),
            PatchOutcome::NoMatch
        );
        assert_eq!(
            fix_nav_timeout("await page.goto('/a', { waitUntil: 'networkidle' });"),
            PatchOutcome::NoMatch
        );
        assert_eq!(fix_nav_timeout("await page.click('#go');"), PatchOutcome::NoMatch);
    }

    #[test]
    fn test_split_first_arg() {
        assert_eq!(split_first_arg("'a,b', { x: 1 }"), ("'a,b'", Some(" { x: 1 }")));
        assert_eq!(split_first_arg("fn(a, b)"), ("fn(a, b)", None));
    }
}
