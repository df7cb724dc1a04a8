//! Response capture around a request service.
//!
//! hyper commits a response by resolving the service future, so the status
//! is never observable from outside the service. [`Capture`] wraps any
//! service with the same `Service` capability, delegates the call untouched
//! and records the status the wrapped service commits. The response trace is
//! held back in a [`TracedBody`] until the body has been relayed.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use http::{HeaderMap, Request, Response, StatusCode};
use hyper::{
    body::{Body, Frame, SizeHint},
    service::Service as HyperService,
};

use crate::trace::Trace;

/// Status of a response as committed by the wrapped service.
///
/// Only the first commit is kept.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CapturedResponse {
    status: Option<StatusCode>,
}

impl CapturedResponse {
    pub fn commit(&mut self, status: StatusCode) {
        if self.status.is_none() {
            self.status = Some(status);
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Numeric code, `0` when nothing was committed.
    pub fn code(&self) -> u16 {
        self.status.map_or(0, |status| status.as_u16())
    }

    pub fn reason(&self) -> &'static str {
        self.status
            .and_then(|status| status.canonical_reason())
            .unwrap_or("")
    }
}

/// Response trace waiting for its body to finish.
struct PendingTrace {
    proxy: Arc<str>,
    trace: Arc<dyn Trace>,
    captured: CapturedResponse,
    headers: HeaderMap,
}

impl PendingTrace {
    fn emit(self) {
        self.trace.response(&self.proxy, &self.captured, &self.headers);
    }
}

/// Response body that emits the response trace once the body is complete.
///
/// Completion is the end of the stream, a body error, or the body being
/// dropped before the end (e.g. the client went away mid-body). The trace
/// is emitted exactly once.
pub struct TracedBody<B> {
    inner: B,
    pending: Option<PendingTrace>,
}

impl<B> TracedBody<B> {
    fn finish(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.emit();
        }
    }
}

impl<B> Body for TracedBody<B>
where
    B: Body + Unpin,
{
    type Data = B::Data;

    type Error = B::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let polled = Pin::new(&mut self.inner).poll_frame(cx);
        if matches!(polled, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            self.finish();
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for TracedBody<B> {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Service decorator that traces the request, then the completed response.
#[derive(Clone)]
pub struct Capture<S> {
    inner: S,
    proxy: Arc<str>,
    trace: Arc<dyn Trace>,
}

impl<S> Capture<S> {
    pub fn new(inner: S, proxy: Arc<str>, trace: Arc<dyn Trace>) -> Self {
        Self {
            inner,
            proxy,
            trace,
        }
    }
}

impl<S, ReqBody, ResBody> HyperService<Request<ReqBody>> for Capture<S>
where
    S: HyperService<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResBody: Body + Unpin + Send + 'static,
{
    type Response = Response<TracedBody<ResBody>>;

    type Error = S::Error;

    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<ReqBody>) -> Self::Future {
        let (parts, body) = req.into_parts();
        self.trace.request(&self.proxy, &parts);

        let future = self.inner.call(Request::from_parts(parts, body));
        let proxy = self.proxy.clone();
        let trace = self.trace.clone();

        Box::pin(async move {
            let mut captured = CapturedResponse::default();
            match future.await {
                Ok(response) => {
                    let (parts, body) = response.into_parts();
                    captured.commit(parts.status);
                    let pending = PendingTrace {
                        proxy,
                        trace,
                        captured,
                        headers: parts.headers.clone(),
                    };
                    let body = TracedBody {
                        inner: body,
                        pending: Some(pending),
                    };
                    Ok(Response::from_parts(parts, body))
                }
                Err(e) => {
                    trace.response(&proxy, &captured, &HeaderMap::new());
                    Err(e)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{convert::Infallible, sync::Mutex};

    use http::request;
    use http_body_util::BodyExt as _;
    use hyper::service::service_fn;

    #[derive(Default)]
    struct RecordingTrace {
        requests: Mutex<Vec<String>>,
        responses: Mutex<Vec<u16>>,
    }

    impl Trace for RecordingTrace {
        fn request(&self, proxy: &str, parts: &request::Parts) {
            self.requests
                .lock()
                .unwrap()
                .push(format!("{} {} {}", proxy, parts.method, parts.uri));
        }

        fn response(&self, _proxy: &str, captured: &CapturedResponse, _headers: &HeaderMap) {
            self.responses.lock().unwrap().push(captured.code());
        }
    }

    #[test]
    fn test_first_commit_wins() {
        let mut captured = CapturedResponse::default();
        assert_eq!(captured.code(), 0);
        assert_eq!(captured.reason(), "");

        captured.commit(StatusCode::NOT_FOUND);
        captured.commit(StatusCode::OK);

        assert_eq!(captured.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(captured.code(), 404);
        assert_eq!(captured.reason(), "Not Found");
    }

    #[tokio::test]
    async fn test_capture_records_relayed_status() {
        let trace = Arc::new(RecordingTrace::default());
        let inner = service_fn(|_req: Request<String>| async {
            Ok::<_, Infallible>(
                Response::builder()
                    .status(StatusCode::IM_A_TEAPOT)
                    .header("x-upstream", "yes")
                    .body(String::from("short and stout"))
                    .unwrap(),
            )
        });
        let capture = Capture::new(inner, Arc::from("portal"), trace.clone());

        let request = Request::builder()
            .method("POST")
            .uri("/admin/api/accounts.json")
            .body(String::new())
            .unwrap();
        let response = capture.call(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(response.headers().get("x-upstream").unwrap(), "yes");
        assert_eq!(
            *trace.requests.lock().unwrap(),
            vec!["portal POST /admin/api/accounts.json".to_string()]
        );
        // Nothing is traced until the body has been relayed.
        assert!(trace.responses.lock().unwrap().is_empty());

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"short and stout");
        assert_eq!(*trace.responses.lock().unwrap(), vec![418]);
    }

    #[tokio::test]
    async fn test_capture_traces_abandoned_body_once() {
        let trace = Arc::new(RecordingTrace::default());
        let inner = service_fn(|_req: Request<String>| async {
            Ok::<_, Infallible>(
                Response::builder()
                    .status(StatusCode::PARTIAL_CONTENT)
                    .body(String::from("never read"))
                    .unwrap(),
            )
        });
        let capture = Capture::new(inner, Arc::from("backend"), trace.clone());

        let response = capture.call(Request::new(String::new())).await.unwrap();
        assert!(trace.responses.lock().unwrap().is_empty());

        drop(response);
        assert_eq!(*trace.responses.lock().unwrap(), vec![206]);
    }

    #[tokio::test]
    async fn test_capture_traces_failed_call() {
        let trace = Arc::new(RecordingTrace::default());
        let inner =
            service_fn(|_req: Request<String>| async { Err::<Response<String>, _>("upstream gone") });
        let capture = Capture::new(inner, Arc::from("backend"), trace.clone());

        let result = capture.call(Request::new(String::new())).await;

        assert!(result.is_err());
        assert_eq!(trace.requests.lock().unwrap().len(), 1);
        assert_eq!(*trace.responses.lock().unwrap(), vec![0]);
    }
}
