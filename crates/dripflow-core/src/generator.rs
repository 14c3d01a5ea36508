//! Message generation port.
//!
//! A message step hands its template reference and the subject context to a
//! `MessageGenerator` (an LLM in production). The engine never transmits what
//! comes back; it only queues it.

use std::time::Duration;

use crate::flow::context::FlowContext;

/// Errors from a generation attempt. Both variants leave the execution
/// state untouched so the same step is retried on a later cycle.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The generator reported a failure (provider error, empty content, ...).
    #[error("generation failed: {0}")]
    Failed(String),

    /// The generator did not answer within the configured bound.
    #[error("generation timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Turns a message template plus context into deliverable content.
pub trait MessageGenerator: Send + Sync {
    /// Generate content for `template` using `context`.
    fn generate(
        &self,
        template: &str,
        context: &FlowContext,
    ) -> impl std::future::Future<Output = Result<String, GenerationError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_error_display() {
        let err = GenerationError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "generation timed out after 30s");

        let err = GenerationError::Failed("rate limited".to_string());
        assert!(err.to_string().contains("rate limited"));
    }
}
