//! Request/response channel for asynchronous cloud operations.
//!
//! A caller creates a request with `request_channel`, hands the
//! `CloudRequest` to the connector and waits on the `PendingResult` with a
//! bound. Dropping the request without answering interrupts the waiter.

use std::marker::PhantomData;
use std::time::Duration;

use stackflow_id::RequestId;
use thiserror::Error;
use tokio::sync::oneshot;

use super::{CheckImageResult, CloudContext, CloudStack, LaunchStackResult, UpscaleStackResult};

/// A kind of asynchronous cloud request and its result type.
pub trait CloudPayload: Send + 'static {
    type Output: Send + 'static;

    /// Routing key of this request kind.
    const SELECTOR: &'static str;
}

#[derive(Debug, Clone)]
pub struct LaunchStack {
    pub stack: CloudStack,
}

impl CloudPayload for LaunchStack {
    type Output = LaunchStackResult;
    const SELECTOR: &'static str = "launch-stack";
}

#[derive(Debug, Clone)]
pub struct UpscaleStack {
    /// Only the instances to add.
    pub stack: CloudStack,
}

impl CloudPayload for UpscaleStack {
    type Output = UpscaleStackResult;
    const SELECTOR: &'static str = "upscale-stack";
}

#[derive(Debug, Clone)]
pub struct CheckImage {
    pub image: String,
}

impl CloudPayload for CheckImage {
    type Output = CheckImageResult;
    const SELECTOR: &'static str = "check-image";
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The answering side went away without replying.
    #[error("request {selector} ({request_id}) was interrupted before a result arrived")]
    Interrupted {
        selector: &'static str,
        request_id: RequestId,
    },

    #[error("request {selector} ({request_id}) timed out after {timeout:?}")]
    TimedOut {
        selector: &'static str,
        request_id: RequestId,
        timeout: Duration,
    },
}

/// The half of a request handed to the connector.
pub struct CloudRequest<P: CloudPayload> {
    pub id: RequestId,
    pub context: CloudContext,
    pub payload: P,
    reply: oneshot::Sender<P::Output>,
}

impl<P: CloudPayload> CloudRequest<P> {
    pub fn selector(&self) -> &'static str {
        P::SELECTOR
    }

    /// Delivers the result. Returns false when nobody waits for it anymore.
    pub fn complete(self, result: P::Output) -> bool {
        self.reply.send(result).is_ok()
    }
}

/// The half of a request the caller waits on.
pub struct PendingResult<P: CloudPayload> {
    id: RequestId,
    rx: oneshot::Receiver<P::Output>,
    _payload: PhantomData<fn() -> P>,
}

impl<P: CloudPayload> PendingResult<P> {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Waits at most `timeout` for the result.
    pub async fn wait(self, timeout: Duration) -> Result<P::Output, RequestError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(RequestError::Interrupted {
                selector: P::SELECTOR,
                request_id: self.id,
            }),
            Err(_) => Err(RequestError::TimedOut {
                selector: P::SELECTOR,
                request_id: self.id,
                timeout,
            }),
        }
    }
}

impl<P: CloudPayload + std::fmt::Debug> std::fmt::Debug for CloudRequest<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudRequest")
            .field("id", &self.id)
            .field("selector", &P::SELECTOR)
            .field("context", &self.context)
            .field("payload", &self.payload)
            .finish()
    }
}

impl<P: CloudPayload> std::fmt::Debug for PendingResult<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResult")
            .field("id", &self.id)
            .field("selector", &P::SELECTOR)
            .finish()
    }
}

/// Creates a linked request/result pair.
pub fn request_channel<P: CloudPayload>(
    context: CloudContext,
    payload: P,
) -> (CloudRequest<P>, PendingResult<P>) {
    let id = RequestId::new();
    let (reply, rx) = oneshot::channel();
    (
        CloudRequest {
            id,
            context,
            payload,
            reply,
        },
        PendingResult {
            id,
            rx,
            _payload: PhantomData,
        },
    )
}

/// Any request, as handed to `CloudConnector::notify`.
#[derive(Debug)]
pub enum ConnectorRequest {
    Launch(CloudRequest<LaunchStack>),
    Upscale(CloudRequest<UpscaleStack>),
    CheckImage(CloudRequest<CheckImage>),
}

impl ConnectorRequest {
    pub fn selector(&self) -> &'static str {
        match self {
            ConnectorRequest::Launch(r) => r.selector(),
            ConnectorRequest::Upscale(r) => r.selector(),
            ConnectorRequest::CheckImage(r) => r.selector(),
        }
    }
}

impl From<CloudRequest<LaunchStack>> for ConnectorRequest {
    fn from(request: CloudRequest<LaunchStack>) -> Self {
        ConnectorRequest::Launch(request)
    }
}

impl From<CloudRequest<UpscaleStack>> for ConnectorRequest {
    fn from(request: CloudRequest<UpscaleStack>) -> Self {
        ConnectorRequest::Upscale(request)
    }
}

impl From<CloudRequest<CheckImage>> for ConnectorRequest {
    fn from(request: CloudRequest<CheckImage>) -> Self {
        ConnectorRequest::CheckImage(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::ImageStatus;
    use stackflow_events::CloudPlatform;
    use stackflow_id::StackId;

    fn context() -> CloudContext {
        CloudContext {
            stack_id: StackId::new(),
            name: "analytics".to_string(),
            platform: CloudPlatform::Aws,
            region: "eu-west-1".to_string(),
            owner: "owner-1".to_string(),
        }
    }

    fn check_image() -> CheckImage {
        CheckImage {
            image: "ami-123".to_string(),
        }
    }

    #[tokio::test]
    async fn test_completed_request_delivers_result() {
        let (request, pending) = request_channel(context(), check_image());
        assert_eq!(request.selector(), "check-image");
        assert!(request.complete(CheckImageResult {
            status: ImageStatus::CreateFinished,
            progress: 100,
        }));

        let result = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(result.progress, 100);
    }

    #[tokio::test]
    async fn test_dropped_request_interrupts_waiter() {
        let (request, pending) = request_channel(context(), check_image());
        let id = pending.id();
        drop(request);

        let err = pending.wait(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(
            err,
            RequestError::Interrupted {
                selector: "check-image",
                request_id: id,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_request_times_out() {
        let (_request, pending) = request_channel(context(), check_image());
        let err = pending.wait(Duration::from_secs(30)).await.unwrap_err();
        assert!(matches!(err, RequestError::TimedOut { .. }));
    }
}
