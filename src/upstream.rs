// Resilient fetcher for the third-party results service
// One POST per attempt, bounded retries, every failure folded into a LookupOutcome

use std::{error::Error as _, io, time::Instant};

use async_trait::async_trait;
use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    StatusCode, Url,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    outcome::{LookupOutcome, StudentResult},
    query::LookupQuery,
    retry::{retry_with_backoff, AttemptTimeout, RetryPolicy},
};

pub const DEFAULT_ENDPOINT: &str = "https://natiga.azhar.eg/WebService1.asmx/GetResult";

/// Term the upstream currently publishes results for.
pub const CURRENT_TERM_ID: u32 = 2;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.3";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("timeout: {0}")]
    Timeout(String),

    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("HTTP error! status: {0}")]
    ServerError(u16),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("{0}")]
    Other(String),
}

impl UpstreamError {
    /// Map a non-success status. Only gateway-style 5xx are worth retrying.
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            code @ (500 | 502 | 503 | 504) => UpstreamError::ServerError(code),
            code => UpstreamError::Other(format!("HTTP error! status: {code}")),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpstreamError::Timeout(_)
                | UpstreamError::ConnectionReset(_)
                | UpstreamError::ServerError(_)
        )
    }
}

impl From<AttemptTimeout> for UpstreamError {
    fn from(timeout: AttemptTimeout) -> Self {
        UpstreamError::Timeout(timeout.to_string())
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return UpstreamError::Timeout(err.to_string());
        }
        if err.is_connect() {
            // Refused connections and DNS failures will not heal within a lookup
            return match io_error_kind(&err) {
                Some(io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted) => {
                    UpstreamError::ConnectionReset(err.to_string())
                }
                Some(io::ErrorKind::TimedOut) => UpstreamError::Timeout(err.to_string()),
                _ => UpstreamError::Other(err.to_string()),
            };
        }
        if let Some(kind) = io_error_kind(&err) {
            if matches!(
                kind,
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ) {
                return UpstreamError::ConnectionReset(err.to_string());
            }
            if kind == io::ErrorKind::TimedOut {
                return UpstreamError::Timeout(err.to_string());
            }
        }
        if err.is_decode() {
            return UpstreamError::MalformedResponse(err.to_string());
        }
        UpstreamError::Other(err.to_string())
    }
}

fn io_error_kind(err: &reqwest::Error) -> Option<io::ErrorKind> {
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(io_err) = inner.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = inner.source();
    }
    None
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid upstream endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("failed to build HTTP client: {0}")]
    Init(#[from] reqwest::Error),
}

// Wire payload expected by the upstream web method
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRequest {
    #[serde(rename = "seatNum")]
    pub seat_num: u64,
    #[serde(rename = "nationalNum")]
    pub national_num: u64,
    #[serde(rename = "levelID")]
    pub level_id: u32,
    #[serde(rename = "termID")]
    pub term_id: u32,
    #[serde(rename = "govID")]
    pub gov_id: u32,
}

impl ResultRequest {
    pub fn from_query(query: &LookupQuery) -> Self {
        Self {
            // validation guarantees 4..=7 ascii digits
            seat_num: query.seat_number().parse().unwrap_or_default(),
            national_num: 0,
            level_id: query.level().id(),
            term_id: CURRENT_TERM_ID,
            gov_id: query.region().id(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResultEnvelope {
    #[serde(default)]
    d: Option<ResultRecord>,
}

// Fields arrive as strings or numbers depending on the record
#[derive(Debug, Default, Deserialize)]
struct ResultRecord {
    #[serde(rename = "SeatNO", default, deserialize_with = "lenient_text")]
    seat_no: Option<String>,
    #[serde(rename = "Name", default, deserialize_with = "lenient_text")]
    name: Option<String>,
    #[serde(rename = "Info1", default, deserialize_with = "lenient_text")]
    info1: Option<String>,
    #[serde(rename = "Info2", default, deserialize_with = "lenient_text")]
    info2: Option<String>,
    #[serde(rename = "Info3", default, deserialize_with = "lenient_text")]
    info3: Option<String>,
    #[serde(rename = "Info4", default, deserialize_with = "lenient_text")]
    info4: Option<String>,
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    };
    Ok(text.filter(|s| !s.is_empty()))
}

impl ResultEnvelope {
    fn into_result(self) -> Option<StudentResult> {
        let record = self.d?;
        let seat_number = record.seat_no?;
        Some(StudentResult {
            seat_number,
            student_name: record.name.unwrap_or_default(),
            region: record.info1.unwrap_or_default(),
            school: record.info2.unwrap_or_default(),
            total: record.info3,
            status: record.info4,
        })
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub endpoint: String,
    pub user_agent: String,
    /// Skip TLS certificate checks for this client only.
    pub accept_invalid_certs: bool,
    pub retry: RetryPolicy,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_invalid_certs: false,
            retry: RetryPolicy::default(),
        }
    }
}

#[async_trait]
pub trait ResultFetcher: Send + Sync + 'static {
    /// Look up one seat number. Never fails: errors end up in `LookupOutcome::Failed`.
    async fn fetch(&self, query: &LookupQuery) -> LookupOutcome;
}

pub struct HttpResultFetcher {
    client: reqwest::Client,
    endpoint: Url,
    policy: RetryPolicy,
}

impl HttpResultFetcher {
    pub fn new(config: UpstreamConfig) -> Result<Self, ClientError> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| ClientError::InvalidEndpoint(format!("{}: {e}", config.endpoint)))?;
        let headers = browser_headers(&endpoint, &config.user_agent)?;

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .http1_only()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            policy: config.retry,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn attempt(&self, body: Vec<u8>) -> Result<Option<StudentResult>, UpstreamError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::from_status(status));
        }

        let bytes = response.bytes().await?;
        let envelope: ResultEnvelope = serde_json::from_slice(&bytes)
            .map_err(|e| UpstreamError::MalformedResponse(e.to_string()))?;

        Ok(envelope.into_result())
    }
}

#[async_trait]
impl ResultFetcher for HttpResultFetcher {
    async fn fetch(&self, query: &LookupQuery) -> LookupOutcome {
        let payload = ResultRequest::from_query(query);
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(e) => {
                return LookupOutcome::Failed {
                    attempts: 0,
                    last_error: e.to_string(),
                }
            }
        };

        let started = Instant::now();
        let result = retry_with_backoff(&self.policy, UpstreamError::is_retryable, |attempt| {
            debug!(attempt, seat_number = query.seat_number(), "querying upstream");
            self.attempt(body.clone())
        })
        .await;

        let (outcome, attempts) = match result {
            Ok(done) => match done.value {
                Some(student) => (LookupOutcome::Found(student), done.attempts),
                None => (LookupOutcome::NotFound, done.attempts),
            },
            Err(failure) => (
                LookupOutcome::Failed {
                    attempts: failure.attempts,
                    last_error: failure.error.to_string(),
                },
                failure.attempts,
            ),
        };

        info!(
            seat_number = query.seat_number(),
            level = payload.level_id,
            region = payload.gov_id,
            attempts,
            outcome = outcome.kind(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "lookup finished"
        );

        outcome
    }
}

// The upstream rejects requests that do not look like its own page's XHR
fn browser_headers(endpoint: &Url, user_agent: &str) -> Result<HeaderMap, ClientError> {
    let host = endpoint
        .host_str()
        .ok_or_else(|| ClientError::InvalidEndpoint(format!("{endpoint}: missing host")))?;
    let host = match endpoint.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let origin = endpoint.origin().ascii_serialization();
    let referer = format!("{origin}/");

    let pairs: [(HeaderName, &str); 11] = [
        (header::HOST, &host),
        (header::ORIGIN, &origin),
        (header::REFERER, &referer),
        (header::USER_AGENT, user_agent),
        (header::CACHE_CONTROL, "no-cache"),
        (header::PRAGMA, "no-cache"),
        (header::TE, "trailers"),
        (header::ACCEPT, "application/json, text/javascript, */*; q=0.01"),
        (header::ACCEPT_LANGUAGE, "en-US,en;q=0.5"),
        (header::CONTENT_TYPE, "application/json; charset=utf-8"),
        (
            HeaderName::from_static("x-requested-with"),
            "XMLHttpRequest",
        ),
    ];

    let mut headers = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        let value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::InvalidEndpoint(format!("header {name}: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{validate, SearchFields};
    use serde_json::json;
    use std::{
        net::TcpListener,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };
    use wiremock::{
        matchers::{body_json, header, method, path},
        Mock, MockServer, Request, ResponseTemplate,
    };

    use crate::retry::Backoff;

    const RESULT_PATH: &str = "/WebService1.asmx/GetResult";

    fn query() -> LookupQuery {
        validate(&SearchFields {
            level: Some("2".into()),
            region: Some("101".into()),
            seat_number: Some("123456".into()),
        })
        .unwrap()
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            attempt_timeout: Some(Duration::from_millis(300)),
            backoff: Backoff::Linear {
                step: Duration::from_millis(50),
            },
        }
    }

    fn fetcher_for(endpoint: String) -> HttpResultFetcher {
        HttpResultFetcher::new(UpstreamConfig {
            endpoint,
            retry: fast_policy(),
            ..Default::default()
        })
        .unwrap()
    }

    fn fetcher(server: &MockServer) -> HttpResultFetcher {
        fetcher_for(format!("{}{RESULT_PATH}", server.uri()))
    }

    fn found_body() -> serde_json::Value {
        json!({
            "d": {
                "SeatNO": "123456",
                "Name": "محمد أحمد",
                "Info1": "القاهرة",
                "Info2": "مدرسة النور",
                "Info3": 245.5,
                "Info4": "ن"
            }
        })
    }

    async fn request_count(server: &MockServer) -> usize {
        server.received_requests().await.unwrap().len()
    }

    #[test]
    fn test_status_classification() {
        for code in [500, 502, 503, 504] {
            let err = UpstreamError::from_status(StatusCode::from_u16(code).unwrap());
            assert_eq!(err, UpstreamError::ServerError(code));
            assert!(err.is_retryable());
        }
        for code in [400, 404, 429, 501] {
            let err = UpstreamError::from_status(StatusCode::from_u16(code).unwrap());
            assert!(!err.is_retryable(), "status {code}");
        }
        assert!(UpstreamError::from(AttemptTimeout(Duration::from_secs(7))).is_retryable());
        assert!(!UpstreamError::MalformedResponse("x".into()).is_retryable());
    }

    #[test]
    fn test_request_payload_shape() {
        let payload = serde_json::to_value(ResultRequest::from_query(&query())).unwrap();
        assert_eq!(
            payload,
            json!({"seatNum": 123456, "nationalNum": 0, "levelID": 2, "termID": 2, "govID": 101})
        );
    }

    #[test]
    fn test_record_fields_accept_numbers_and_skip_empty() {
        let envelope: ResultEnvelope = serde_json::from_value(json!({
            "d": {"SeatNO": 1234, "Name": "x", "Info1": "a", "Info2": "b", "Info3": "", "Info4": null}
        }))
        .unwrap();
        let student = envelope.into_result().unwrap();
        assert_eq!(student.seat_number, "1234");
        assert_eq!(student.total, None);
        assert_eq!(student.status, None);
    }

    #[test]
    fn test_browser_headers_follow_endpoint() {
        let url = Url::parse("https://natiga.azhar.eg/WebService1.asmx/GetResult").unwrap();
        let headers = browser_headers(&url, DEFAULT_USER_AGENT).unwrap();
        assert_eq!(headers[reqwest::header::HOST], "natiga.azhar.eg");
        assert_eq!(headers[reqwest::header::ORIGIN], "https://natiga.azhar.eg");
        assert_eq!(headers[reqwest::header::REFERER], "https://natiga.azhar.eg/");
        assert_eq!(headers["x-requested-with"], "XMLHttpRequest");
    }

    #[test]
    fn test_rejects_invalid_endpoint() {
        let result = HttpResultFetcher::new(UpstreamConfig {
            endpoint: "not a url".into(),
            ..Default::default()
        });
        assert!(matches!(result, Err(ClientError::InvalidEndpoint(_))));
    }

    #[tokio::test]
    async fn test_found_on_first_attempt_with_expected_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(RESULT_PATH))
            .and(header("content-type", "application/json; charset=utf-8"))
            .and(header("x-requested-with", "XMLHttpRequest"))
            .and(header("origin", server.uri().as_str()))
            .and(body_json(json!({
                "seatNum": 123456, "nationalNum": 0, "levelID": 2, "termID": 2, "govID": 101
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(found_body()))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = fetcher(&server).fetch(&query()).await;

        assert_eq!(
            outcome,
            LookupOutcome::Found(StudentResult {
                seat_number: "123456".into(),
                student_name: "محمد أحمد".into(),
                region: "القاهرة".into(),
                school: "مدرسة النور".into(),
                total: Some("245.5".into()),
                status: Some("ن".into()),
            })
        );
    }

    #[tokio::test]
    async fn test_persistent_503_exhausts_three_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let outcome = fetcher(&server).fetch(&query()).await;

        assert_eq!(
            outcome,
            LookupOutcome::Failed {
                attempts: 3,
                last_error: "HTTP error! status: 503".into(),
            }
        );
        // 50ms then 100ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_recovers_after_two_bad_gateways() {
        let server = MockServer::start().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        Mock::given(method("POST"))
            .respond_with(move |_: &Request| {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    ResponseTemplate::new(502)
                } else {
                    ResponseTemplate::new(200).set_body_json(found_body())
                }
            })
            .mount(&server)
            .await;

        let outcome = fetcher(&server).fetch(&query()).await;

        assert!(matches!(outcome, LookupOutcome::Found(ref s) if s.seat_number == "123456"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(request_count(&server).await, 3);
    }

    #[tokio::test]
    async fn test_missing_seat_number_is_not_found_without_retry() {
        for body in [json!({"d": {}}), json!({"d": null}), json!({}), json!({"d": {"SeatNO": ""}})] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(200).set_body_json(body.clone()))
                .mount(&server)
                .await;

            let outcome = fetcher(&server).fetch(&query()).await;

            assert_eq!(outcome, LookupOutcome::NotFound, "body {body}");
            assert_eq!(request_count(&server).await, 1);
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let outcome = fetcher(&server).fetch(&query()).await;

        match outcome {
            LookupOutcome::Failed {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 1);
                assert!(last_error.starts_with("malformed response"), "{last_error}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_client_error_status_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let outcome = fetcher(&server).fetch(&query()).await;

        assert_eq!(
            outcome,
            LookupOutcome::Failed {
                attempts: 1,
                last_error: "HTTP error! status: 404".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out_every_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(found_body())
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let outcome = fetcher(&server).fetch(&query()).await;

        match outcome {
            LookupOutcome::Failed {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("timed out"), "{last_error}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        // 300 + 50 + 300 + 100 + 300
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1050), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_refused_connection_is_terminal() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let outcome = fetcher_for(format!("http://{addr}{RESULT_PATH}"))
            .fetch(&query())
            .await;

        match outcome {
            LookupOutcome::Failed {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 1);
                assert!(!last_error.starts_with("connection reset"), "{last_error}");
                assert!(!last_error.starts_with("timeout"), "{last_error}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
