//! # Resilient Request Client
//!
//! Issues one logical HTTP call as a bounded sequence of attempts.
//!
//! ## Workflow per attempt:
//! 1.  Rebuild the request (bodies are replayable, so every retry resends the
//!     same payload) and send it under the per-attempt timeout.
//! 2.  A 2xx response has its body read under the same deadline and is
//!     returned immediately, on any attempt. A body that stalls or breaks
//!     off counts as a timeout or transport failure of that attempt.
//! 3.  Anything else is shown to the retry predicate. If it says retry and
//!     attempts remain, sleep `delay_for_attempt(attempt)` and go again.
//! 4.  Otherwise the failure is classified into a `NetworkError` carrying the
//!     number of attempts made.
//!
//! A timed-out attempt is aborted and classified as `Timeout`. There is no
//! cross-attempt cancellation token; dropping the returned future abandons
//! the whole sequence.

use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, Response, StatusCode, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use serde::de::DeserializeOwned;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, warn};

use super::classify::NetworkError;
use super::retry::{AttemptFailure, RetryConfig};

/// Per-attempt timeout used unless overridden.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// One part of a multipart form. Stored as owned bytes so the form can be
/// rebuilt for every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormPart {
    /// Form field name.
    pub name: String,
    /// Raw field content.
    pub bytes: Vec<u8>,
    /// File name, for file fields.
    pub file_name: Option<String>,
    /// MIME type, for file fields.
    pub mime: Option<String>,
}

impl FormPart {
    /// A plain text field.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytes: value.into().into_bytes(),
            file_name: None,
            mime: None,
        }
    }

    /// A file field.
    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
        mime: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            bytes,
            file_name: Some(file_name.into()),
            mime,
        }
    }

    fn to_part(&self) -> Result<Part, NetworkError> {
        let mut part = Part::bytes(self.bytes.clone());
        if let Some(file_name) = &self.file_name {
            part = part.file_name(file_name.clone());
        }
        if let Some(mime) = &self.mime {
            part = part
                .mime_str(mime)
                .map_err(|e| NetworkError::validation(format!("invalid MIME type '{mime}': {e}")))?;
        }
        Ok(part)
    }
}

/// Request payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// JSON body, sent with `Content-Type: application/json`.
    Json(serde_json::Value),
    /// Multipart form; the transport sets the content type and boundary.
    Multipart(Vec<FormPart>),
}

impl RequestBody {
    fn apply(&self, request: RequestBuilder) -> Result<RequestBuilder, NetworkError> {
        match self {
            RequestBody::Empty => Ok(request),
            RequestBody::Json(value) => {
                let json = serde_json::to_vec(value)
                    .map_err(|e| NetworkError::validation(format!("cannot serialise body: {e}")))?;
                Ok(request.header(CONTENT_TYPE, "application/json").body(json))
            }
            RequestBody::Multipart(parts) => {
                let mut form = Form::new();
                for part in parts {
                    form = form.part(part.name.clone(), part.to_part()?);
                }
                Ok(request.multipart(form))
            }
        }
    }
}

/// HTTP client with per-attempt timeouts and bounded, backoff-governed
/// retries.
#[derive(Clone)]
pub struct ResilientClient {
    /// Middleware-enabled transport. No retry middleware is attached; the
    /// attempt loop lives in [`ResilientClient::send`].
    inner: ClientWithMiddleware,
    attempt_timeout: Duration,
}

impl fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientClient")
            .field("attempt_timeout", &self.attempt_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for ResilientClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ResilientClient {
    /// Client over a fresh `reqwest::Client` with the default timeout.
    pub fn new() -> Self {
        Self::from_client(reqwest::Client::new())
    }

    /// Client over a preconfigured `reqwest::Client`.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self::from_middleware(ClientBuilder::new(client).build())
    }

    /// Client over a caller-assembled middleware stack.
    pub fn from_middleware(inner: ClientWithMiddleware) -> Self {
        Self {
            inner,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    /// Override the per-attempt timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// The per-attempt timeout.
    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Send one logical request and return the first 2xx response, with its
    /// body already read.
    ///
    /// # Arguments
    /// * `method` - One of `GET`, `POST`, `PUT` or `DELETE`.
    /// * `url` - Absolute target URL.
    /// * `body` - Payload, rebuilt for every attempt.
    /// * `headers` - Extra headers sent with every attempt.
    /// * `retry` - Attempt budget, backoff and retry predicate.
    pub async fn send(
        &self,
        method: Method,
        url: Url,
        body: &RequestBody,
        headers: Option<&HeaderMap>,
        retry: &RetryConfig,
    ) -> Result<FetchedResponse, NetworkError> {
        self.send_counted(method, url, body, headers, retry)
            .await
            .map(|(response, _)| response)
    }

    /// Like [`send`](Self::send), also returning how many attempts it took.
    pub async fn send_counted(
        &self,
        method: Method,
        url: Url,
        body: &RequestBody,
        headers: Option<&HeaderMap>,
        retry: &RetryConfig,
    ) -> Result<(FetchedResponse, u32), NetworkError> {
        // 1. Reject bad settings before touching the network
        retry.validate()?;
        if ![Method::GET, Method::POST, Method::PUT, Method::DELETE].contains(&method) {
            return Err(NetworkError::validation(format!("unsupported method {method}")));
        }

        let mut attempt: u32 = 0;
        loop {
            let attempts = attempt + 1;

            // 2. Rebuild the request; the body is replayed on every attempt
            let mut request = self.inner.request(method.clone(), url.clone());
            if let Some(h) = headers {
                request = request.headers(h.clone());
            }
            let request = body.apply(request)?;

            // 3. Headers and body share one deadline
            let deadline = Instant::now() + self.attempt_timeout;
            debug!(%method, %url, attempt = attempts, "sending request");
            let failure = match timeout_at(deadline, request.send()).await {
                Ok(Ok(response)) if response.status().is_success() => {
                    match timeout_at(deadline, FetchedResponse::read(response)).await {
                        Ok(Ok(fetched)) => return Ok((fetched, attempts)),
                        Ok(Err(err)) => Failed::Transport(err),
                        Err(_elapsed) => Failed::Timeout,
                    }
                }
                Ok(Ok(response)) => {
                    let status = response.status().as_u16();
                    if !retry.should_retry(attempt, &AttemptFailure::Status(&response)) {
                        let body = timeout_at(deadline, response.text())
                            .await
                            .ok()
                            .and_then(Result::ok);
                        let err = NetworkError::from_status(status, body.as_deref(), attempts);
                        error!(%method, %url, status, attempts, "request failed: {}", err.message);
                        return Err(err);
                    }
                    warn!(%method, %url, status, attempt = attempts, "retryable status");
                    Failed::Retrying
                }
                Ok(Err(err)) => Failed::Transport(err),
                Err(_elapsed) => Failed::Timeout,
            };

            // 4. Let the predicate decide on transport failures and timeouts
            match failure {
                Failed::Retrying => {}
                Failed::Transport(err) => {
                    if !retry.should_retry(attempt, &AttemptFailure::Transport(&err)) {
                        error!(%method, %url, attempts, "transport failure: {err}");
                        return Err(NetworkError::transport(&err, attempts));
                    }
                    warn!(%method, %url, attempt = attempts, "transport failure, will retry: {err}");
                }
                Failed::Timeout => {
                    if !retry.should_retry(attempt, &AttemptFailure::Timeout) {
                        error!(%method, %url, attempts, "request timed out");
                        return Err(NetworkError::timeout(attempts));
                    }
                    warn!(%method, %url, attempt = attempts, "attempt timed out, will retry");
                }
            }

            // 5. Back off before the next attempt
            tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }
}

/// Outcome of an attempt that did not produce a final answer.
enum Failed {
    /// A retryable status; the predicate already agreed.
    Retrying,
    Transport(reqwest_middleware::Error),
    Timeout,
}

/// A 2xx response whose body was read within the attempt's timeout.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl FetchedResponse {
    async fn read(response: Response) -> Result<Self, reqwest_middleware::Error> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        Ok(Self {
            status,
            headers,
            body,
        })
    }

    /// The HTTP status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The raw body.
    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    /// The body as text; invalid UTF-8 is replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Split into status, headers and body.
    pub fn into_parts(self) -> (StatusCode, HeaderMap, Vec<u8>) {
        (self.status, self.headers, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieve::classify::NetworkErrorKind;
    use crate::retrieve::test_server::{refused_url, Reply, ScriptedServer};

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig::default()
            .with_max_retries(max_retries)
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
    }

    fn client() -> ResilientClient {
        let inner = reqwest::Client::builder()
            .no_proxy()
            .build()
            .expect("client builds");
        ResilientClient::from_client(inner)
    }

    #[tokio::test]
    async fn retries_transient_statuses_until_success() {
        let server = ScriptedServer::start(vec![
            Reply::json(503, r#"{"success":false}"#),
            Reply::json(503, r#"{"success":false}"#),
            Reply::json(200, r#"{"success":true,"data":[]}"#),
        ])
        .await;

        let (response, attempts) = client()
            .send_counted(Method::GET, server.url("/api/images"), &RequestBody::Empty, None, &fast_retry(3))
            .await
            .expect("third attempt succeeds");

        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(attempts, 3);
        assert_eq!(server.hits(), 3);
    }

    #[tokio::test]
    async fn exhausts_retries_on_persistent_server_errors() {
        for status in [500, 502, 503, 429, 408] {
            let server = ScriptedServer::start(vec![Reply::json(status, "{}")]).await;
            let err = client()
                .send(Method::GET, server.url("/x"), &RequestBody::Empty, None, &fast_retry(2))
                .await
                .expect_err("never succeeds");

            assert_eq!(err.attempts, 3, "status {status}");
            assert_eq!(err.status, status);
            assert_eq!(server.hits(), 3, "status {status}");
        }
    }

    #[tokio::test]
    async fn never_retries_permanent_client_errors() {
        for status in [400, 401, 403, 404, 422] {
            let server = ScriptedServer::start(vec![Reply::json(status, r#"{"error":"nope"}"#)]).await;
            let err = client()
                .send(Method::GET, server.url("/x"), &RequestBody::Empty, None, &fast_retry(3))
                .await
                .expect_err("fails immediately");

            assert_eq!(err.kind, NetworkErrorKind::ClientError { status });
            assert_eq!(err.attempts, 1);
            assert_eq!(server.hits(), 1, "status {status}");
        }
    }

    #[tokio::test]
    async fn success_short_circuits_on_first_attempt() {
        let server = ScriptedServer::start(vec![Reply::json(201, r#"{"success":true}"#)]).await;
        let (_, attempts) = client()
            .send_counted(Method::POST, server.url("/x"), &RequestBody::Json(serde_json::json!({"a": 1})), None, &fast_retry(3))
            .await
            .expect("created");
        assert_eq!(attempts, 1);

        let request = server.requests().remove(0);
        assert!(request.to_lowercase().contains("content-type: application/json"));
        assert!(request.ends_with(r#"{"a":1}"#));
    }

    #[tokio::test]
    async fn transport_failures_are_classified_after_retries() {
        let err = client()
            .send(Method::GET, refused_url("/x"), &RequestBody::Empty, None, &fast_retry(1))
            .await
            .expect_err("nothing listens there");

        assert_eq!(err.kind, NetworkErrorKind::TransportFailure);
        assert_eq!(err.status, 0);
        assert_eq!(err.attempts, 2);
    }

    #[tokio::test]
    async fn timed_out_attempts_become_timeout_errors() {
        let server = ScriptedServer::start(vec![Reply::Hang]).await;
        let err = client()
            .with_attempt_timeout(Duration::from_millis(50))
            .send(Method::GET, server.url("/slow"), &RequestBody::Empty, None, &fast_retry(1))
            .await
            .expect_err("server never answers");

        assert_eq!(err.kind, NetworkErrorKind::Timeout);
        assert_eq!(err.attempts, 2);
    }

    #[tokio::test]
    async fn backoff_sleeps_grow_between_attempts() {
        let server = ScriptedServer::start(vec![Reply::json(503, "{}")]).await;
        let retry = RetryConfig::default()
            .with_max_retries(3)
            .with_base_delay(Duration::from_millis(50))
            .with_max_delay(Duration::from_secs(1))
            .with_backoff_factor(2.0);

        let err = client()
            .send(Method::GET, server.url("/x"), &RequestBody::Empty, None, &retry)
            .await
            .expect_err("never succeeds");
        assert_eq!(err.attempts, 4);

        let times = server.hit_times();
        assert_eq!(times.len(), 4);
        for (n, pair) in times.windows(2).enumerate() {
            let gap = pair[1].duration_since(pair[0]);
            let expected = retry.delay_for_attempt(n as u32);
            assert!(gap >= expected, "gap {n} was {gap:?}, expected at least {expected:?}");
        }
    }

    #[tokio::test]
    async fn stalled_body_is_retried_as_a_timeout() {
        let server = ScriptedServer::start(vec![
            Reply::Stall {
                status: 200,
                partial: r#"{"success":"#.into(),
            },
            Reply::json(200, r#"{"success":true,"data":[]}"#),
        ])
        .await;

        let (response, attempts) = client()
            .with_attempt_timeout(Duration::from_millis(100))
            .send_counted(Method::GET, server.url("/api/images"), &RequestBody::Empty, None, &fast_retry(1))
            .await
            .expect("second attempt reads a full body");

        assert_eq!(attempts, 2);
        assert_eq!(response.text(), r#"{"success":true,"data":[]}"#);
    }

    #[tokio::test]
    async fn multipart_bodies_are_resent_on_retry() {
        let server = ScriptedServer::start(vec![
            Reply::json(502, "{}"),
            Reply::json(200, r#"{"success":true}"#),
        ])
        .await;
        let body = RequestBody::Multipart(vec![
            FormPart::text("title", "sunset"),
            FormPart::file("image", "sunset.png", vec![1, 2, 3], Some("image/png".into())),
        ]);

        client()
            .send(Method::POST, server.url("/api/upload"), &body, None, &fast_retry(2))
            .await
            .expect("second attempt succeeds");

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        for request in requests {
            assert!(request.contains("multipart/form-data"));
            assert!(request.contains("sunset.png"));
        }
    }

    #[tokio::test]
    async fn invalid_config_fails_before_any_request() {
        let server = ScriptedServer::start(vec![Reply::json(200, "{}")]).await;
        let err = client()
            .send(
                Method::GET,
                server.url("/x"),
                &RequestBody::Empty,
                None,
                &RetryConfig::default().with_backoff_factor(0.1),
            )
            .await
            .expect_err("rejected");

        assert!(matches!(err.kind, NetworkErrorKind::ValidationError { .. }));
        assert_eq!(server.hits(), 0);
    }
}
