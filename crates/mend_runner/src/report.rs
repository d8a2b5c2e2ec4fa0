//! Parsing of test-framework JSON reports.
//!
//! Supported shapes:
//!
//! - Playwright (`suites[].specs[].tests[].results[]`, nested `suites`, and the
//!   legacy `suites[].tests[]` layout)
//! - Jest (`testResults[].assertionResults[]`)
//! - Vitest (an array of suite/test task trees)
//!
//! Anything else parses to an empty list.

use std::sync::OnceLock;

use mend_core::ResultStatus;
use regex::Regex;
use serde_json::Value;

/// Outcome as reported by the framework, before mapping to [`ResultStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseStatus {
    Passed,
    Failed,
    Skipped,
    Error,
}

impl CaseStatus {
    /// Normalise a Playwright outcome string.
    fn from_playwright(value: Option<&str>) -> Self {
        match value {
            Some("expected") | Some("passed") | Some("flaky") => Self::Passed,
            Some("skipped") => Self::Skipped,
            Some("failed") | Some("unexpected") => Self::Failed,
            _ => Self::Error,
        }
    }

    /// Status stored on the TestResult.
    pub fn to_result_status(self) -> ResultStatus {
        match self {
            Self::Passed => ResultStatus::Passed,
            Self::Failed | Self::Error => ResultStatus::Failed,
            Self::Skipped => ResultStatus::Skipped,
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Error)
    }
}

/// One executed test case extracted from a report.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCase {
    /// Spec file, forward slashes
    pub file: String,
    /// Ancestor titles joined with ` > `
    pub full_name: String,
    pub duration_ms: Option<u64>,
    pub status: CaseStatus,
    pub message: Option<String>,
    /// Lines of the `Call log:` section
    pub steps: Vec<String>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl ParsedCase {
    fn new(file: String, full_name: String, status: CaseStatus) -> Self {
        Self {
            file,
            full_name,
            duration_ms: None,
            status,
            message: None,
            steps: Vec::new(),
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }
}

fn ansi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1B\[[0-9;]*[A-Za-z]").expect("valid ANSI pattern"))
}

fn bullet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*[-•]+\s*").expect("valid bullet pattern"))
}

/// Remove ANSI escape sequences and carriage returns, then trim.
pub fn strip_ansi(value: &str) -> String {
    ansi_re().replace_all(value, "").replace('\r', "").trim().to_string()
}

/// Clean captured stderr for a run's error summary.
///
/// Drops blank lines and npm update notices. Returns `None` when nothing is left.
pub fn filter_runner_error(stderr: &str) -> Option<String> {
    let cleaned = ansi_re().replace_all(stderr, "");
    let kept: Vec<&str> = cleaned
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.to_lowercase().starts_with("npm notice"))
        .filter(|line| !line.contains("New major version of npm available!"))
        .collect();
    let joined = kept.join("\n").trim().to_string();
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

/// Split a failure message at `Call log:` into the message and its steps.
pub fn extract_call_log(raw: &str) -> (Option<String>, Vec<String>) {
    let Some(index) = raw.find("Call log:") else {
        return (Some(raw.to_string()).filter(|m| !m.is_empty()), Vec::new());
    };

    let message = raw[..index].trim();
    let steps = raw[index + "Call log:".len()..]
        .lines()
        .map(|line| bullet_re().replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();

    let message = if message.is_empty() {
        None
    } else {
        Some(message.to_string())
    };
    (message, steps)
}

fn normalize_path(value: Option<&str>) -> String {
    value.unwrap_or("unknown").replace('\\', "/")
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn duration_field(value: &Value, key: &str) -> Option<u64> {
    value
        .get(key)
        .and_then(Value::as_f64)
        .filter(|d| *d >= 0.0)
        .map(|d| d.round() as u64)
}

fn array<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn collect_io(chunks: &[Value]) -> Vec<String> {
    chunks
        .iter()
        .filter_map(|entry| match entry {
            Value::String(s) => Some(s.as_str()),
            other => other.get("text").and_then(Value::as_str),
        })
        .map(|line| line.replace('\r', "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Parse a framework report into cases, in report order.
pub fn parse_report(raw: &Value) -> Vec<ParsedCase> {
    if let Some(results) = raw.get("testResults").and_then(Value::as_array) {
        return parse_jest(results);
    }
    if let Some(nodes) = raw.as_array() {
        let mut out = Vec::new();
        for node in nodes {
            walk_vitest(node, None, &mut out);
        }
        return out;
    }
    if let Some(suites) = raw.get("suites").and_then(Value::as_array) {
        let mut out = Vec::new();
        for suite in suites {
            walk_playwright(suite, &[], &mut out);
        }
        return out;
    }
    Vec::new()
}

fn parse_jest(results: &[Value]) -> Vec<ParsedCase> {
    let mut out = Vec::new();
    for file_result in results {
        let file = normalize_path(
            str_field(file_result, "name").or_else(|| str_field(file_result, "testFilePath")),
        );
        for assertion in array(file_result, "assertionResults") {
            let status = match str_field(assertion, "status") {
                Some("passed") => CaseStatus::Passed,
                Some("failed") => CaseStatus::Failed,
                _ => CaseStatus::Skipped,
            };
            let full_name = str_field(assertion, "fullName")
                .or_else(|| str_field(assertion, "title"))
                .unwrap_or("test")
                .to_string();
            let messages: Vec<&str> = array(assertion, "failureMessages")
                .iter()
                .filter_map(Value::as_str)
                .collect();

            let mut case = ParsedCase::new(file.clone(), full_name, status);
            case.duration_ms = duration_field(assertion, "duration").filter(|d| *d > 0);
            if !messages.is_empty() {
                case.message = Some(strip_ansi(&messages.join("\n"))).filter(|m| !m.is_empty());
            }
            out.push(case);
        }
    }
    out
}

fn walk_vitest(node: &Value, file_hint: Option<&str>, out: &mut Vec<ParsedCase>) {
    match str_field(node, "type") {
        Some("suite") => {
            let hint = str_field(node, "file").or(file_hint);
            for task in array(node, "tasks") {
                walk_vitest(task, hint, out);
            }
        }
        Some("test") => {
            let result = node.get("result").unwrap_or(&Value::Null);
            let status = match str_field(result, "state") {
                Some("pass") => CaseStatus::Passed,
                Some("fail") => CaseStatus::Failed,
                Some("skip") => CaseStatus::Skipped,
                _ => CaseStatus::Error,
            };
            let file = normalize_path(
                str_field(node, "file")
                    .or(file_hint)
                    .or_else(|| node.get("location").and_then(|l| str_field(l, "file"))),
            );
            let name_path: Vec<&str> = array(node, "namePath")
                .iter()
                .filter_map(Value::as_str)
                .collect();
            let full_name = if name_path.is_empty() {
                str_field(node, "name").unwrap_or("test").to_string()
            } else {
                name_path.join(" ")
            };

            let mut case = ParsedCase::new(file, full_name, status);
            case.duration_ms = duration_field(result, "duration");
            case.message = result
                .get("error")
                .and_then(|e| str_field(e, "message"))
                .map(strip_ansi)
                .filter(|m| !m.is_empty());
            out.push(case);
        }
        _ => {}
    }
}

/// Last result of a Playwright test, or `Null`.
fn last_result(test: &Value) -> &Value {
    array(test, "results").last().unwrap_or(&Value::Null)
}

fn playwright_status(test: &Value, last: &Value, include_test_status: bool) -> CaseStatus {
    let explicit = str_field(test, "outcome")
        .or_else(|| {
            if include_test_status {
                str_field(test, "status")
            } else {
                None
            }
        })
        .or_else(|| str_field(last, "status"));
    match explicit {
        Some(value) => CaseStatus::from_playwright(Some(value)),
        None if last.get("error").map_or(false, |e| !e.is_null()) => CaseStatus::Failed,
        None => CaseStatus::Error,
    }
}

fn playwright_message(last: &Value) -> (Option<String>, Vec<String>) {
    let error = last.get("error").unwrap_or(&Value::Null);
    let raw = str_field(error, "message").or_else(|| str_field(error, "stack"));
    match raw.map(strip_ansi).filter(|m| !m.is_empty()) {
        Some(cleaned) => extract_call_log(&cleaned),
        None => (None, Vec::new()),
    }
}

fn walk_playwright(suite: &Value, ancestors: &[String], out: &mut Vec<ParsedCase>) {
    let mut titles = ancestors.to_vec();
    if let Some(title) = str_field(suite, "title") {
        titles.push(title.to_string());
    }
    let suite_file = str_field(suite, "file");

    for test in array(suite, "tests") {
        let last = last_result(test);
        let (message, steps) = playwright_message(last);
        let title_path: Vec<&str> = array(test, "titlePath")
            .iter()
            .filter_map(Value::as_str)
            .collect();
        let full_name = if title_path.is_empty() {
            let mut parts = titles.clone();
            parts.push(str_field(test, "title").unwrap_or("test").to_string());
            parts.join(" > ")
        } else {
            title_path.join(" > ")
        };
        let file = normalize_path(
            test.get("location")
                .and_then(|l| str_field(l, "file"))
                .or(suite_file),
        );

        let mut case = ParsedCase::new(file, full_name, playwright_status(test, last, false));
        case.duration_ms = duration_field(last, "duration");
        case.message = message;
        case.steps = steps;
        case.stdout = collect_io(array(last, "stdout"));
        case.stderr = collect_io(array(last, "stderr"));
        out.push(case);
    }

    for spec in array(suite, "specs") {
        let mut parts = titles.clone();
        if let Some(title) = str_field(spec, "title") {
            parts.push(title.to_string());
        }
        let spec_file = str_field(spec, "file").or(suite_file);
        let file = normalize_path(spec_file);
        let full_name = if parts.is_empty() {
            spec_file.unwrap_or("test").to_string()
        } else {
            parts.join(" > ")
        };
        let spec_error = array(spec, "errors")
            .first()
            .and_then(|e| str_field(e, "message"))
            .map(strip_ansi)
            .filter(|m| !m.is_empty());

        for test in array(spec, "tests") {
            let last = last_result(test);
            let (message, steps) = playwright_message(last);

            let mut case =
                ParsedCase::new(file.clone(), full_name.clone(), playwright_status(test, last, true));
            case.duration_ms = duration_field(last, "duration");
            case.message = message.or_else(|| spec_error.clone());
            case.steps = steps;
            case.stdout = collect_io(array(last, "stdout"));
            case.stderr = collect_io(array(last, "stderr"));
            out.push(case);
        }
    }

    for child in array(suite, "suites") {
        walk_playwright(child, &titles, out);
    }
}
