//! Tagged step variants shared across the runs of a project.
//!
//! Steps arrive as JSON from operators and stored run parameters. They are
//! decoded into a closed enum and validated here, so downstream code never
//! inspects untyped blobs.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// A single browser step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TestStep {
    /// Navigate to a URL (absolute or relative to the base URL)
    Goto { url: String },

    /// Fill an input field
    Fill { selector: String, value: String },

    /// Click an element
    Click { selector: String },

    /// Assert an element contains text
    ExpectText { selector: String, text: String },

    /// Assert an element is visible
    ExpectVisible { selector: String },

    /// Attach files to a file input
    Upload { selector: String, files: Vec<String> },
}

impl TestStep {
    /// Short name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Goto { .. } => "goto",
            Self::Fill { .. } => "fill",
            Self::Click { .. } => "click",
            Self::ExpectText { .. } => "expect-text",
            Self::ExpectVisible { .. } => "expect-visible",
            Self::Upload { .. } => "upload",
        }
    }

    /// Check that required fields are present and non-empty.
    pub fn validate(&self) -> CoreResult<()> {
        let missing = |field: &str| {
            Err(CoreError::InvalidStep(format!(
                "{} step requires a non-empty {}",
                self.kind(),
                field
            )))
        };

        match self {
            Self::Goto { url } if url.trim().is_empty() => missing("url"),
            Self::Fill { selector, .. }
            | Self::Click { selector }
            | Self::ExpectText { selector, .. }
            | Self::ExpectVisible { selector }
            | Self::Upload { selector, .. }
                if selector.trim().is_empty() =>
            {
                missing("selector")
            }
            Self::ExpectText { text, .. } if text.is_empty() => missing("text"),
            Self::Upload { files, .. } if files.is_empty() => missing("files list"),
            _ => Ok(()),
        }
    }
}

/// Decode and validate a JSON array of steps.
pub fn parse_steps(value: &serde_json::Value) -> CoreResult<Vec<TestStep>> {
    let steps: Vec<TestStep> = serde_json::from_value(value.clone())
        .map_err(|e| CoreError::InvalidStep(e.to_string()))?;
    for step in &steps {
        step.validate()?;
    }
    Ok(steps)
}
