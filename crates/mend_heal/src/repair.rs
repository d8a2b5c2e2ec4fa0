//! AI-assisted repair contract.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::context::FailureContext;
use crate::error::{HealError, HealResult};

/// What the repair service is given. Stored as the attempt's prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RepairRequest {
    pub spec_path: String,
    pub failure_message: Option<String>,
    pub stdout: String,
    pub stderr: String,
    pub spec_content: String,
}

impl RepairRequest {
    /// Build a request, keeping the last `tail_chars` characters of each log.
    pub fn from_context(context: &FailureContext, tail_chars: usize) -> Self {
        Self {
            spec_path: context.relative_path.clone(),
            failure_message: context.message.clone(),
            stdout: tail(&context.stdout, tail_chars),
            stderr: tail(&context.stderr, tail_chars),
            spec_content: context.spec_text.clone(),
        }
    }
}

/// A complete replacement spec.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairResponse {
    pub updated_spec: String,
    pub summary: String,
    /// Unparsed model output
    pub raw: String,
}

/// External service that rewrites a failing spec.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepairService: Send + Sync {
    async fn repair(&self, request: &RepairRequest) -> HealResult<RepairResponse>;
}

/// Last `max_chars` characters of `text`.
pub fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

/// Call the repair service, giving up after `timeout_ms`.
pub async fn repair_with_timeout(
    service: &dyn RepairService,
    request: &RepairRequest,
    timeout_ms: u64,
) -> HealResult<RepairResponse> {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), service.repair(request)).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Repair of {} exceeded {} ms", request.spec_path, timeout_ms);
            Err(HealError::RepairTimeout(timeout_ms))
        }
    }
}
