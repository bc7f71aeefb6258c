//! # Resilient Client Live Checks
//!
//! Manual harness for `lib_sync::retrieve` against `httpbin.org`, a public
//! echo service that can be told to answer with any status or to stall.
//!
//! ## Covered:
//! - URL joining, bearer token and custom header forwarding.
//! - Retry exhaustion on a persistent 503, with the attempt count.
//! - Immediate failure on 404 with the user-facing message.
//! - Per-attempt timeout on a slow endpoint.
//! - JSON and multipart bodies.
//! - The envelope check of `ApiClient` on a non-envelope reply.
//! - A refused connection surfacing as a transport failure.
//!
//! Run with `cargo run -p project_tests --bin test_api_client`.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Result, ensure};
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use url::Url;

use lib_sync::retrieve::{
    ApiClient, FormPart, NetworkErrorKind, RequestBody, ResilientClient, RetryConfig,
};

/// The parts of an httpbin echo this harness looks at.
#[derive(Debug, Deserialize)]
struct HttpbinEcho {
    /// Echoed request headers.
    #[serde(default)]
    headers: HashMap<String, String>,
    /// URL as seen by httpbin.
    url: Option<String>,
    /// Parsed JSON body.
    json: Option<serde_json::Value>,
    /// Multipart text fields.
    #[serde(default)]
    form: HashMap<String, String>,
    /// Multipart file fields.
    #[serde(default)]
    files: HashMap<String, String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let base = Url::parse("https://httpbin.org/")?;
    let client = ResilientClient::new().with_attempt_timeout(Duration::from_secs(10));
    let quick_retry = RetryConfig::default()
        .with_max_retries(2)
        .with_base_delay(Duration::from_millis(200))
        .with_max_delay(Duration::from_secs(1));

    println!("--- Starting Resilient Client Checks ---");

    // --- CHECK 1: URL joining, auth and custom headers ---
    println!("\n[Check 1] URL joining & headers...");
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer test_secret_123"));
    headers.insert("X-Custom-Client", HeaderValue::from_static("sync-probe"));
    let (response, attempts) = client
        .send_counted(Method::GET, base.join("get")?, &RequestBody::Empty, Some(&headers), &quick_retry)
        .await?;
    let echo: HttpbinEcho = response.json()?;
    ensure!(attempts == 1, "expected one attempt, took {attempts}");
    println!("✅ URL: {:?}", echo.url);
    println!("✅ Auth: {:?}", echo.headers.get("Authorization"));
    println!("✅ Custom: {:?}", echo.headers.get("X-Custom-Client"));

    // --- CHECK 2: persistent 503 exhausts retries ---
    println!("\n[Check 2] Persistent 503 (expect 3 attempts)...");
    let started = Instant::now();
    let err = client
        .send(Method::GET, base.join("status/503")?, &RequestBody::Empty, None, &quick_retry)
        .await
        .expect_err("503 never succeeds");
    ensure!(err.kind == NetworkErrorKind::ServerError { status: 503 }, "unexpected kind {}", err.kind);
    ensure!(err.attempts == 3, "expected 3 attempts, got {}", err.attempts);
    println!(
        "✅ {} after {} attempts in {:?}: {}",
        err.kind,
        err.attempts,
        started.elapsed(),
        err.user_friendly_message
    );

    // --- CHECK 3: 404 is not retried ---
    println!("\n[Check 3] 404 (expect a single attempt)...");
    let err = client
        .send(Method::GET, base.join("status/404")?, &RequestBody::Empty, None, &quick_retry)
        .await
        .expect_err("404 fails");
    ensure!(err.attempts == 1, "404 was retried");
    println!("✅ {}: {}", err.kind, err.user_friendly_message);

    // --- CHECK 4: per-attempt timeout ---
    println!("\n[Check 4] Slow endpoint with a 1s attempt timeout...");
    let impatient = ResilientClient::new().with_attempt_timeout(Duration::from_secs(1));
    let err = impatient
        .send(Method::GET, base.join("delay/3")?, &RequestBody::Empty, None, &RetryConfig::no_retry())
        .await
        .expect_err("times out");
    ensure!(err.kind == NetworkErrorKind::Timeout, "unexpected kind {}", err.kind);
    println!("✅ {}: {}", err.kind, err.user_friendly_message);

    // --- CHECK 5: JSON body ---
    println!("\n[Check 5] POST JSON body...");
    let body = RequestBody::Json(serde_json::json!({ "message": "Hello from Rust" }));
    let response = client
        .send(Method::POST, base.join("post")?, &body, None, &quick_retry)
        .await?;
    let echo: HttpbinEcho = response.json()?;
    println!("✅ Server received: {:?}", echo.json);

    // --- CHECK 6: multipart body ---
    println!("\n[Check 6] POST multipart form...");
    let form = RequestBody::Multipart(vec![
        FormPart::text("title", "sunset"),
        FormPart::file("image", "pixel.png", vec![0x89, b'P', b'N', b'G'], Some("image/png".into())),
    ]);
    let response = client
        .send(Method::POST, base.join("post")?, &form, None, &quick_retry)
        .await?;
    let echo: HttpbinEcho = response.json()?;
    ensure!(echo.form.get("title").map(String::as_str) == Some("sunset"), "form field lost");
    ensure!(echo.files.contains_key("image"), "file part lost");
    println!("✅ Form: {:?}, files: {:?}", echo.form, echo.files.keys().collect::<Vec<_>>());

    // --- CHECK 7: envelope enforcement ---
    println!("\n[Check 7] ApiClient on a non-envelope reply...");
    let api = ApiClient::new(base.as_str(), Some("test_secret_123".into()))?.with_retry(quick_retry.clone());
    let err = api
        .get::<serde_json::Value>("get")
        .await
        .expect_err("httpbin does not speak the envelope");
    ensure!(
        matches!(err.kind, NetworkErrorKind::ApplicationError { .. }),
        "unexpected kind {}",
        err.kind
    );
    println!("✅ {}: {}", err.kind, err.user_friendly_message);

    // --- CHECK 8: refused connection ---
    println!("\n[Check 8] Refused connection...");
    let err = client
        .send(
            Method::GET,
            Url::parse("http://127.0.0.1:9/")?,
            &RequestBody::Empty,
            None,
            &RetryConfig::no_retry(),
        )
        .await
        .expect_err("nothing listens on port 9");
    ensure!(err.kind == NetworkErrorKind::TransportFailure, "unexpected kind {}", err.kind);
    println!("✅ {}: {}", err.kind, err.user_friendly_message);

    println!("\n--- All Checks Passed ---");
    Ok(())
}
