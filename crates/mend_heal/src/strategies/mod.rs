//! Deterministic patch strategies.
//!
//! Each strategy is a pure transform from spec text to either a new text or
//! [`PatchOutcome::NoMatch`]. The input is never modified, so the collected
//! text stays valid as the "before" side of a diff.

pub mod malformed_url;
pub mod nav_timeout;
pub mod strict_locator;

use std::fmt;

pub use malformed_url::{fix_malformed_url, repair_host};
pub use nav_timeout::fix_nav_timeout;
pub use strict_locator::fix_strict_locator;

/// Timeout written into repaired navigation calls.
pub const NAV_TIMEOUT_MS: u64 = 20_000;

/// Navigation timeouts below this are raised.
pub const NAV_TIMEOUT_FLOOR_MS: u64 = 10_000;

/// Result of applying a strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// A new spec text and a one-line description of the change
    Patched { text: String, summary: String },
    /// The strategy does not apply; try the next one
    NoMatch,
}

impl PatchOutcome {
    pub fn patched(text: String, summary: impl Into<String>) -> Self {
        Self::Patched {
            text,
            summary: summary.into(),
        }
    }

    pub fn is_patched(&self) -> bool {
        matches!(self, Self::Patched { .. })
    }
}

/// Named deterministic strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    MalformedUrl,
    NavTimeout,
    StrictLocator,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MalformedUrl => "malformed-url",
            Self::NavTimeout => "nav-timeout",
            Self::StrictLocator => "strict-locator",
        }
    }

    /// Run the strategy against a spec.
    pub fn apply(&self, spec: &str, message: &str) -> PatchOutcome {
        match self {
            Self::MalformedUrl => fix_malformed_url(spec),
            Self::NavTimeout => fix_nav_timeout(spec),
            Self::StrictLocator => fix_strict_locator(spec, message),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Index just past the `)` closing the call whose `(` is at `open`.
///
/// Parentheses inside string literals are ignored.
pub(crate) fn find_call_end(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(open) != Some(&b'(') {
        return None;
    }
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut escaped = false;
    for (offset, &byte) in bytes[open..].iter().enumerate() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == q {
                quote = None;
            }
            continue;
        }
        match byte {
            b'\'' | b'"' | b'`' => quote = Some(byte),
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}
