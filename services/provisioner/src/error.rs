//! The flow error kind and its normalisation.
//!
//! Components return their own `thiserror` enums; facades bubble them up as
//! `anyhow::Error`. The dispatcher turns whatever arrives into one
//! `FlowError` with `FlowError::normalize`, exactly once.

use std::error::Error as StdError;

use stackflow_reconcile::{find_cancellation, PollTimeout};
use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::cloud::{CloudError, RequestError};
use crate::cluster_manager::ClusterManagerError;
use crate::context::ContextMismatch;
use crate::orchestrator::OrchestratorError;
use crate::store::StoreError;

/// Classification of a flow failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowErrorKind {
    /// The subject entered a cancelled lifecycle; not a failure.
    Cancelled,
    /// A bounded wait ran out of attempts.
    Timeout,
    /// Container orchestrator or management layer failure.
    Orchestration,
    /// Infrastructure operation failure.
    Operation,
    Store,
    /// A transition received the wrong context shape.
    InvalidContext,
    Internal,
}

impl FlowErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowErrorKind::Cancelled => "cancelled",
            FlowErrorKind::Timeout => "timeout",
            FlowErrorKind::Orchestration => "orchestration",
            FlowErrorKind::Operation => "operation",
            FlowErrorKind::Store => "store",
            FlowErrorKind::InvalidContext => "invalid_context",
            FlowErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FlowErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single error kind surfaced by flow transitions.
#[derive(Debug)]
pub struct FlowError {
    kind: FlowErrorKind,
    message: String,
    source: Option<anyhow::Error>,
    recoverable: bool,
}

impl FlowError {
    pub fn new(kind: FlowErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            recoverable: matches!(kind, FlowErrorKind::Timeout | FlowErrorKind::Store),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FlowErrorKind::Internal, message)
    }

    /// Normalises any error into a `FlowError`.
    ///
    /// A `FlowError` is returned unchanged. Otherwise a `Cancelled` anywhere
    /// in the chain wins, then the first recognised error in chain order
    /// decides the kind.
    pub fn normalize(err: anyhow::Error) -> Self {
        let err = match err.downcast::<FlowError>() {
            Ok(flow) => return flow,
            Err(err) => err,
        };

        let kind = if find_cancellation(err.as_ref()).is_some() {
            FlowErrorKind::Cancelled
        } else {
            err.chain()
                .find_map(classify)
                .unwrap_or(FlowErrorKind::Internal)
        };

        Self {
            message: chain_message(&err),
            source: Some(err),
            ..Self::new(kind, String::new())
        }
    }

    pub fn kind(&self) -> FlowErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether retrying the flow later may succeed.
    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind == FlowErrorKind::Cancelled
            || self
                .source
                .as_ref()
                .is_some_and(|e| find_cancellation(e.as_ref()).is_some())
    }
}

/// Joins the messages of the cause chain. A cause whose text already
/// appears in the message so far is skipped, so wrappers that display their
/// source are not repeated.
fn chain_message(err: &anyhow::Error) -> String {
    let mut message = String::new();
    for cause in err.chain() {
        let text = cause.to_string();
        if text.is_empty() || message.contains(&text) {
            continue;
        }
        if !message.is_empty() {
            message.push_str(": ");
        }
        message.push_str(&text);
    }
    message
}

fn classify(err: &(dyn StdError + 'static)) -> Option<FlowErrorKind> {
    if err.is::<PollTimeout>() {
        return Some(FlowErrorKind::Timeout);
    }
    if let Some(bootstrap) = err.downcast_ref::<BootstrapError>() {
        return Some(match bootstrap {
            BootstrapError::Timeout(_) => FlowErrorKind::Timeout,
            BootstrapError::Store(_) => FlowErrorKind::Store,
            _ => FlowErrorKind::Orchestration,
        });
    }
    if err.is::<OrchestratorError>() || err.is::<ClusterManagerError>() {
        return Some(FlowErrorKind::Orchestration);
    }
    if err.is::<OperationError>() || err.is::<CloudError>() || err.is::<RequestError>() {
        return Some(FlowErrorKind::Operation);
    }
    if err.is::<StoreError>() {
        return Some(FlowErrorKind::Store);
    }
    if err.is::<ContextMismatch>() {
        return Some(FlowErrorKind::InvalidContext);
    }
    None
}

impl std::fmt::Display for FlowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for FlowError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// Infrastructure operation failed.
#[derive(Debug, Error)]
pub enum OperationError {
    /// The result reported a hard failure.
    #[error("Failed to {action} the stack for {context} due to: {reason}")]
    Validation {
        action: &'static str,
        context: String,
        reason: String,
    },

    /// The cloud side reported an error for the whole operation.
    #[error("Failed to {action} the stack for {context} due to: {source}")]
    Upstream {
        action: &'static str,
        context: String,
        #[source]
        source: CloudError,
    },

    #[error("{0}")]
    Request(#[from] RequestError),

    #[error("could not hand {selector} request to the cloud connector")]
    Notify {
        selector: &'static str,
        #[source]
        source: CloudError,
    },

    #[error("image {image} could not be prepared")]
    ImageCheckFailed { image: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use stackflow_id::RequestId;
    use stackflow_reconcile::Cancelled;
    use std::time::Duration;

    #[derive(Debug, Error)]
    #[error("wrapper: {source}")]
    struct Wrapper {
        #[source]
        source: CloudError,
    }

    #[test]
    fn test_flow_error_is_not_rewrapped() {
        let original = FlowError::new(FlowErrorKind::Orchestration, "registrator failed");
        let normalized = FlowError::normalize(anyhow::Error::new(original));
        assert_eq!(normalized.kind(), FlowErrorKind::Orchestration);
        assert_eq!(normalized.message(), "registrator failed");
        assert!(normalized.source().is_none());
    }

    #[test]
    fn test_message_keeps_the_cause_behind_a_context() {
        let err = anyhow::Error::new(CloudError::Provider("metadata API returned 503".to_string()))
            .context("collecting instance metadata");

        let normalized = FlowError::normalize(err);
        assert_eq!(normalized.kind(), FlowErrorKind::Operation);
        assert!(normalized.message().starts_with("collecting instance metadata: "));
        assert!(normalized.message().contains("metadata API returned 503"));
    }

    #[test]
    fn test_message_does_not_repeat_displayed_sources() {
        let inner = CloudError::Provider("quota exceeded".to_string());
        let text = inner.to_string();
        let normalized = FlowError::normalize(anyhow::Error::new(Wrapper { source: inner }));
        assert_eq!(normalized.message(), format!("wrapper: {text}"));
    }

    #[test]
    fn test_nested_cancellation_is_detected() {
        let inner = CloudError::Cancelled(Cancelled::new("stack stk_1"));
        let wrapped = anyhow::Error::new(Wrapper { source: inner }).context("provision failed");

        let normalized = FlowError::normalize(wrapped);
        assert_eq!(normalized.kind(), FlowErrorKind::Cancelled);
        assert!(normalized.is_cancellation());
    }

    #[rstest]
    #[case(
        anyhow::Error::new(PollTimeout { condition: "x".into(), attempts: 3, interval: Duration::from_millis(1) }),
        FlowErrorKind::Timeout
    )]
    #[case(
        anyhow::Error::new(OrchestratorError::backend("bootstrap", "boom")),
        FlowErrorKind::Orchestration
    )]
    #[case(
        anyhow::Error::new(RequestError::Interrupted { selector: "launch-stack", request_id: RequestId::new() }),
        FlowErrorKind::Operation
    )]
    #[case(
        anyhow::Error::new(ContextMismatch { expected: "provisioning", actual: "failure" }),
        FlowErrorKind::InvalidContext
    )]
    #[case(anyhow::anyhow!("something odd"), FlowErrorKind::Internal)]
    fn test_classification(#[case] err: anyhow::Error, #[case] kind: FlowErrorKind) {
        let normalized = FlowError::normalize(err);
        assert_eq!(normalized.kind(), kind);
        assert!(!normalized.is_cancellation());
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(FlowError::new(FlowErrorKind::Timeout, "t").is_recoverable());
        assert!(FlowError::new(FlowErrorKind::Store, "s").is_recoverable());
        assert!(!FlowError::new(FlowErrorKind::Operation, "o").is_recoverable());
    }

    #[test]
    fn test_validation_message() {
        let err = OperationError::Validation {
            action: "create",
            context: "stack analytics".to_string(),
            reason: "quota exceeded".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to create the stack for stack analytics due to: quota exceeded"
        );
    }
}
