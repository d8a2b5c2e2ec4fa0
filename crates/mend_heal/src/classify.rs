//! Failure classification.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::strategies::repair_host;

/// What kind of failure a message describes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FailureTag {
    MalformedUrl,
    NavTimeout,
    StrictLocator,
    /// Transport or browser connectivity; never rerun
    InfraError,
    Unclassified,
}

impl FailureTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedUrl => "malformed-url",
            Self::NavTimeout => "nav-timeout",
            Self::StrictLocator => "strict-locator",
            Self::InfraError => "infra-error",
            Self::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for FailureTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "malformed-url" => Ok(Self::MalformedUrl),
            "nav-timeout" => Ok(Self::NavTimeout),
            "strict-locator" => Ok(Self::StrictLocator),
            "infra-error" => Ok(Self::InfraError),
            "unclassified" => Ok(Self::Unclassified),
            other => Err(format!("unknown failure tag: {}", other)),
        }
    }
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s"'`<>)]+"#).expect("valid url regex"))
}

fn navigation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bgoto\b|navigat|waitForURL|waitForNavigation|waitForLoadState|load event")
            .expect("valid navigation regex")
    })
}

fn timeout_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)timeout|timed out").expect("valid timeout regex"))
}

fn strict_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)strict mode violation|resolved to \d+ elements").expect("valid strict regex")
    })
}

fn infra_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)ECONNREFUSED|ECONNRESET|ERR_CONNECTION_REFUSED|connection refused|socket hang up|browser has been closed|browser has disconnected|target (page, context or browser )?(has been )?closed|net::ERR_",
        )
        .expect("valid infra regex")
    })
}

/// Check whether the message shows a navigation to a malformed host.
fn has_malformed_navigation(message: &str) -> bool {
    if !navigation_re().is_match(message) {
        return false;
    }
    url_re().find_iter(message).any(|m| {
        Url::parse(m.as_str())
            .ok()
            .and_then(|url| url.host_str().and_then(repair_host))
            .is_some()
    })
}

/// Tag a failure message. Checks run in a fixed priority order.
pub fn classify_failure(message: &str) -> FailureTag {
    if has_malformed_navigation(message) {
        FailureTag::MalformedUrl
    } else if timeout_re().is_match(message) && navigation_re().is_match(message) {
        FailureTag::NavTimeout
    } else if strict_re().is_match(message) {
        FailureTag::StrictLocator
    } else if infra_re().is_match(message) {
        FailureTag::InfraError
    } else {
        FailureTag::Unclassified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert_eq!(
            classify_failure("page.goto: Timeout 30000ms exceeded.\nCall log:\n  - navigating to \"https://app.example.com.com/\""),
            FailureTag::MalformedUrl
        );
        assert_eq!(
            classify_failure("page.goto: Timeout 5000ms exceeded"),
            FailureTag::NavTimeout
        );
        assert_eq!(
            classify_failure("locator.click: Error: strict mode violation: locator('a') resolved to 2 elements"),
            FailureTag::StrictLocator
        );
        assert_eq!(
            classify_failure("page.goto: net::ERR_CONNECTION_REFUSED at http://localhost:3000/"),
            FailureTag::InfraError
        );
        assert_eq!(
            classify_failure("expect(received).toHaveText(expected)"),
            FailureTag::Unclassified
        );
    }

    #[test]
    fn test_single_letter_domain_is_not_malformed() {
        assert_eq!(
            classify_failure("page.goto: Timeout 5000ms exceeded.\nCall log:\n  - navigating to \"https://api.x.com/\""),
            FailureTag::NavTimeout
        );
        assert_eq!(
            classify_failure("page.goto: Timeout 5000ms exceeded.\nCall log:\n  - navigating to \"https://app.example.x.com/\""),
            FailureTag::MalformedUrl
        );
    }

    #[test]
    fn test_infra_variants() {
        for message in [
            "Error: socket hang up",
            "connect ECONNREFUSED 127.0.0.1:5432",
            "Browser has been closed",
            "Target page, context or browser has been closed",
        ] {
            assert_eq!(classify_failure(message), FailureTag::InfraError, "{}", message);
        }
    }

    #[test]
    fn test_classification_is_stable() {
        let message = "page.goto: Timeout 5000ms exceeded";
        assert_eq!(classify_failure(message), classify_failure(message));
    }

    #[test]
    fn test_tag_round_trip_names() {
        assert_eq!("infra-error".parse::<FailureTag>().unwrap(), FailureTag::InfraError);
        assert_eq!(FailureTag::NavTimeout.to_string(), "nav-timeout");
        assert!("bogus".parse::<FailureTag>().is_err());
    }
}
