//! # Gallery API Client
//!
//! Asynchronous API client for the gallery backend, built on
//! [`ResilientClient`]. It handles base URLs, bearer authentication, the JSON
//! response envelope, and retries.
//!
//! Every endpoint answers with
//! `{ success, data?, error?, pagination? }`. A `success: false` envelope is
//! a failure even on an HTTP-success status; it becomes an
//! `ApplicationError` and is never retried.
//!
//! Paths are always resolved below the base URL: a leading `/` is ignored, so
//! `/api/images` on `https://host/gallery/` reaches `/gallery/api/images`.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::classify::NetworkError;
use super::resilient::{FormPart, RequestBody, ResilientClient};
use super::retry::RetryConfig;

/// Pagination block attached to list responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// Current page, 1-based.
    pub page: u32,
    /// Number of pages.
    pub total_pages: u32,
    /// Number of items across all pages.
    pub total_items: u64,
    /// Whether a next page exists.
    pub has_next_page: bool,
    /// Whether a previous page exists.
    pub has_prev_page: bool,
}

/// Wire envelope. `data` stays untyped until `success` has been checked.
#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    data: Option<serde_json::Value>,
    error: Option<String>,
    pagination: Option<Pagination>,
}

/// A successful, unwrapped API response.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The envelope's `data`, if present.
    pub data: Option<T>,
    /// The envelope's `pagination`, if present.
    pub pagination: Option<Pagination>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// The headers returned by the server.
    pub headers: HeaderMap,
    /// Attempts it took to get this response.
    pub attempts: u32,
}

/// Envelope-aware client for the gallery API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// The retrying transport.
    inner: ResilientClient,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
    /// An optional Bearer token used for authorization.
    auth_token: Option<String>,
    /// Retry settings used unless a call supplies its own.
    retry: RetryConfig,
}

impl ApiClient {
    /// Creates a client for `base_url` with default retry settings.
    ///
    /// # Arguments
    /// * `base_url` - Absolute URL, e.g. `https://api.example.com/v1/`. A
    ///   missing trailing `/` is added so the last segment is kept.
    /// * `auth_token` - Sent as `Authorization: Bearer <token>` when present.
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self, NetworkError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| NetworkError::validation(format!("invalid base URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(NetworkError::validation(format!(
                "base URL '{base_url}' cannot be used as a base"
            )));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            inner: ResilientClient::new(),
            base_url,
            auth_token,
            retry: RetryConfig::default(),
        })
    }

    /// Replace the transport.
    pub fn with_client(mut self, client: ResilientClient) -> Self {
        self.inner = client;
        self
    }

    /// Replace the default retry settings.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// The base URL all paths are joined onto.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The default retry settings.
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// GET `path`.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>, NetworkError> {
        self.request(Method::GET, path, RequestBody::Empty, None, None).await
    }

    /// POST `body` as JSON to `path`.
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<ApiResponse<T>, NetworkError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, json_body(body)?, None, None).await
    }

    /// PUT `body` as JSON to `path`.
    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<ApiResponse<T>, NetworkError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::PUT, path, json_body(body)?, None, None).await
    }

    /// DELETE `path`.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>, NetworkError> {
        self.request(Method::DELETE, path, RequestBody::Empty, None, None).await
    }

    /// POST a multipart form to `path`.
    pub async fn upload<T: DeserializeOwned>(
        &self,
        path: &str,
        parts: Vec<FormPart>,
    ) -> Result<ApiResponse<T>, NetworkError> {
        self.request(Method::POST, path, RequestBody::Multipart(parts), None, None)
            .await
    }

    /// GET `path` with explicit retry settings.
    pub async fn get_with_retry<T: DeserializeOwned>(
        &self,
        path: &str,
        retry: &RetryConfig,
    ) -> Result<ApiResponse<T>, NetworkError> {
        self.request(Method::GET, path, RequestBody::Empty, None, Some(retry)).await
    }

    /// Performs a request and unwraps the envelope.
    ///
    /// # Arguments
    /// * `method` - HTTP method.
    /// * `path` - Path below the base URL, with or without a leading `/`.
    /// * `body` - Request payload.
    /// * `headers` - Extra headers; the bearer token is added on top.
    /// * `retry` - Overrides the client's default retry settings.
    ///
    /// # Errors
    /// Every failure is a classified `NetworkError`: validation errors for a
    /// bad path or body, the resilient client's errors for transport and
    /// status failures, and `ApplicationError` for `success: false` or an
    /// unreadable envelope.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
        headers: Option<HeaderMap>,
        retry: Option<&RetryConfig>,
    ) -> Result<ApiResponse<T>, NetworkError> {
        // 1. Resolve the path below the base URL
        let relative = path.trim_start_matches('/');
        let url = self
            .base_url
            .join(relative)
            .map_err(|e| NetworkError::validation(format!("invalid path '{path}': {e}")))?;

        // 2. Attach the bearer token
        let mut headers = headers.unwrap_or_default();
        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| NetworkError::validation("auth token contains invalid header characters"))?;
            headers.insert(AUTHORIZATION, value);
        }

        // 3. Send with retries; the body arrives already read
        let retry = retry.unwrap_or(&self.retry);
        let (response, attempts) = self
            .inner
            .send_counted(method, url, &body, Some(&headers), retry)
            .await?;
        let (status, resp_headers, bytes) = response.into_parts();
        let status = status.as_u16();

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(ApiResponse {
                data: None,
                pagination: None,
                status,
                headers: resp_headers,
                attempts,
            });
        }

        // 4. Check the envelope before typing its data
        let envelope: Envelope = serde_json::from_slice(&bytes).map_err(|e| {
            tracing::warn!(status, "unreadable response envelope: {e}");
            NetworkError::application("Invalid response from server", status, attempts)
        })?;

        if !envelope.success {
            let message = envelope.error.unwrap_or_else(|| "Request failed".to_string());
            tracing::warn!(status, attempts, "application error: {message}");
            return Err(NetworkError::application(message, status, attempts));
        }

        let data = envelope
            .data
            .map(serde_json::from_value::<T>)
            .transpose()
            .map_err(|e| {
                tracing::warn!(status, "response data has an unexpected shape: {e}");
                NetworkError::application("Invalid response from server", status, attempts)
            })?;

        Ok(ApiResponse {
            data,
            pagination: envelope.pagination,
            status,
            headers: resp_headers,
            attempts,
        })
    }
}

fn json_body<B: Serialize + ?Sized>(body: &B) -> Result<RequestBody, NetworkError> {
    serde_json::to_value(body)
        .map(RequestBody::Json)
        .map_err(|e| NetworkError::validation(format!("cannot serialise body: {e}")))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};

    use super::*;
    use crate::retrieve::classify::NetworkErrorKind;
    use crate::retrieve::test_server::{refused_url, Reply, ScriptedServer};

    fn api(base_url: &str, token: Option<&str>) -> ApiClient {
        let transport = reqwest::Client::builder()
            .no_proxy()
            .build()
            .expect("client builds");
        ApiClient::new(base_url, token.map(str::to_string))
            .expect("valid base url")
            .with_client(ResilientClient::from_client(transport))
            .with_retry(
                RetryConfig::default()
                    .with_base_delay(Duration::from_millis(1))
                    .with_max_delay(Duration::from_millis(5)),
            )
    }

    #[tokio::test]
    async fn get_recovers_from_two_503s() {
        let server = ScriptedServer::start(vec![
            Reply::json(503, r#"{"success":false,"error":"busy"}"#),
            Reply::json(503, r#"{"success":false,"error":"busy"}"#),
            Reply::json(200, r#"{"success":true,"data":[]}"#),
        ])
        .await;

        let res = api(&server.base_url(), None)
            .get::<Vec<Value>>("/api/images")
            .await
            .expect("third attempt succeeds");

        assert_eq!(res.data, Some(vec![]));
        assert_eq!(res.attempts, 3);
        assert_eq!(server.hits(), 3);
    }

    #[tokio::test]
    async fn success_false_fails_without_retry() {
        let server =
            ScriptedServer::start(vec![Reply::json(200, r#"{"success":false,"error":"duplicate label"}"#)]).await;

        let err = api(&server.base_url(), None)
            .post::<Value, _>("/api/labels", &json!({"name": "cats"}))
            .await
            .expect_err("application error");

        assert_eq!(
            err.kind,
            NetworkErrorKind::ApplicationError {
                message: "duplicate label".into()
            }
        );
        assert_eq!(err.user_friendly_message, "duplicate label");
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn pagination_and_bearer_token_round_trip() {
        let server = ScriptedServer::start(vec![Reply::json(
            200,
            r#"{"success":true,"data":[{"id":1}],"pagination":{"page":2,"totalPages":5,"totalItems":48,"hasNextPage":true,"hasPrevPage":true}}"#,
        )])
        .await;

        let res = api(&server.base_url(), Some("secret-123"))
            .get::<Vec<Value>>("/api/images?page=2")
            .await
            .expect("ok");

        let pagination = res.pagination.expect("pagination present");
        assert_eq!(pagination.page, 2);
        assert_eq!(pagination.total_items, 48);
        assert!(pagination.has_next_page);

        let request = server.requests().remove(0);
        assert!(request.starts_with("GET /api/images?page=2 HTTP/1.1"));
        assert!(request.to_lowercase().contains("authorization: bearer secret-123"));
    }

    #[tokio::test]
    async fn unreadable_envelope_is_an_application_error() {
        let server = ScriptedServer::start(vec![Reply::json(200, "not json")]).await;
        let err = api(&server.base_url(), None)
            .get::<Value>("/api/images")
            .await
            .expect_err("bad envelope");
        assert!(matches!(err.kind, NetworkErrorKind::ApplicationError { .. }));
        assert_eq!(err.user_friendly_message, "Invalid response from server");
    }

    #[tokio::test]
    async fn empty_body_is_a_success_without_data() {
        let server = ScriptedServer::start(vec![Reply::json(200, "")]).await;
        let res = api(&server.base_url(), None)
            .delete::<Value>("/api/images/7")
            .await
            .expect("ok");
        assert!(res.data.is_none());
        assert!(server.requests()[0].starts_with("DELETE /api/images/7"));
    }

    #[tokio::test]
    async fn transport_failures_surface_typed() {
        let base = refused_url("/");
        let err = api(base.as_str(), None)
            .get_with_retry::<Value>("/api/images", &RetryConfig::no_retry())
            .await
            .expect_err("refused");
        assert_eq!(err.kind, NetworkErrorKind::TransportFailure);
        assert_eq!(err.attempts, 1);
    }

    #[tokio::test]
    async fn success_false_keeps_the_server_error_whatever_the_data() {
        let server = ScriptedServer::start(vec![Reply::json(
            200,
            r#"{"success":false,"error":"duplicate label","data":{}}"#,
        )])
        .await;

        let err = api(&server.base_url(), None)
            .get::<Vec<Value>>("/api/labels")
            .await
            .expect_err("application error");

        assert_eq!(
            err.kind,
            NetworkErrorKind::ApplicationError {
                message: "duplicate label".into()
            }
        );
        assert_eq!(err.user_friendly_message, "duplicate label");
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn mistyped_data_on_success_is_an_invalid_response() {
        let server = ScriptedServer::start(vec![Reply::json(200, r#"{"success":true,"data":{"id":1}}"#)]).await;
        let err = api(&server.base_url(), None)
            .get::<Vec<Value>>("/api/images")
            .await
            .expect_err("object is not a list");
        assert!(matches!(err.kind, NetworkErrorKind::ApplicationError { .. }));
        assert_eq!(err.user_friendly_message, "Invalid response from server");
    }

    #[tokio::test]
    async fn paths_stay_below_a_prefixed_base_url() {
        let server = ScriptedServer::start(vec![Reply::json(200, r#"{"success":true,"data":[]}"#)]).await;

        let with_slash = format!("{}gallery/", server.base_url());
        api(&with_slash, None)
            .get::<Vec<Value>>("/api/images?page=1")
            .await
            .expect("ok");

        let without_slash = format!("{}gallery", server.base_url());
        api(&without_slash, None)
            .get::<Vec<Value>>("api/images?page=2")
            .await
            .expect("ok");

        let requests = server.requests();
        assert!(requests[0].starts_with("GET /gallery/api/images?page=1 HTTP/1.1"), "{}", requests[0]);
        assert!(requests[1].starts_with("GET /gallery/api/images?page=2 HTTP/1.1"), "{}", requests[1]);
    }

    #[tokio::test]
    async fn body_that_stalls_after_the_headers_times_out() {
        let server = ScriptedServer::start(vec![Reply::Stall {
            status: 200,
            partial: r#"{"success":"#.into(),
        }])
        .await;
        let transport = reqwest::Client::builder()
            .no_proxy()
            .build()
            .expect("client builds");
        let client = ApiClient::new(&server.base_url(), None)
            .expect("valid base url")
            .with_client(ResilientClient::from_client(transport).with_attempt_timeout(Duration::from_millis(200)));

        let err = tokio::time::timeout(
            Duration::from_secs(3),
            client.get_with_retry::<Value>("/api/images", &RetryConfig::no_retry()),
        )
        .await
        .expect("call is bounded by the attempt timeout")
        .expect_err("body never completes");

        assert_eq!(err.kind, NetworkErrorKind::Timeout);
        assert_eq!(err.attempts, 1);
    }

    #[test]
    fn rejects_relative_base_url() {
        let err = ApiClient::new("api/images", None).expect_err("relative url");
        assert!(matches!(err.kind, NetworkErrorKind::ValidationError { .. }));
    }
}
