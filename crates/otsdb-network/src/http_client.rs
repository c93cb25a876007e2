//! HTTP transport.
//!
//! Owns the `reqwest` client used for every call to the TSD's HTTP API.
//! Implements [`BatchTransport`] over `/api/put` and exposes GET/POST helpers
//! with OpenTSDB error-body mapping for the read endpoints.

use async_trait::async_trait;
use otsdb_core::config::ServerConfig;
use otsdb_core::error::CoreError;
use otsdb_core::models::batch::{Batch, BatchOutcome, PutSummary};
use otsdb_core::ports::transport::BatchTransport;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

const PUT_PATH: &str = "/api/put";

/// OpenTSDB error body: `{"error": {"code": 400, "message": "..."}}`
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

/// `BatchTransport` over the HTTP API
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    details: bool,
}

impl HttpTransport {
    /// Build a client with the configured request and connect timeouts.
    pub fn new(server: &ServerConfig, details: bool) -> Result<Self, CoreError> {
        Self::with_base_url(&server.base_url(), server, details)
    }

    /// Like [`new`](Self::new) but against an explicit base URL.
    pub fn with_base_url(
        base_url: &str,
        server: &ServerConfig,
        details: bool,
    ) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(server.request_timeout())
            .connect_timeout(server.connect_timeout())
            .build()
            .map_err(|e| CoreError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            details,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url, CoreError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| CoreError::Config(format!("invalid URL {}{path}: {e}", self.base_url)))?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    /// GET `path` and return the body of a successful response.
    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<String, CoreError> {
        let url = self.url(path, query)?;
        debug!("GET {url}");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_send_error(path, e))?;
        check_response(path, resp).await
    }

    /// POST a JSON body to `path` and return the body of a successful response.
    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<String, CoreError> {
        let url = self.url(path, &[])?;
        debug!("POST {url}");
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| map_send_error(path, e))?;
        check_response(path, resp).await
    }

    fn put_query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![("summary", "true".to_string())];
        if self.details {
            query.push(("details", "true".to_string()));
        }
        query
    }
}

/// Map a send failure (refused, DNS, timeout) to a transport error.
fn map_send_error(path: &str, e: reqwest::Error) -> CoreError {
    if e.is_timeout() {
        CoreError::Network(format!("{path} timed out: {e}"))
    } else {
        CoreError::Network(format!("{path} request failed: {e}"))
    }
}

/// Return the body of a 2xx response; map anything else to a typed error.
async fn check_response(path: &str, resp: reqwest::Response) -> Result<String, CoreError> {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_else(|e| {
        warn!("failed to read response body: {e}");
        String::new()
    });

    if status.is_success() {
        if let Ok(body) = serde_json::from_str::<ErrorBody>(&text) {
            return Err(CoreError::Server {
                status: status.as_u16(),
                message: body.error.message,
            });
        }
        return Ok(text);
    }

    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.error.message)
        .unwrap_or(text);

    match status.as_u16() {
        404 => Err(CoreError::NotFound {
            resource_type: "endpoint".to_string(),
            id: path.to_string(),
        }),
        503 => Err(CoreError::ServiceUnavailable(message)),
        code => Err(CoreError::Server {
            status: code,
            message,
        }),
    }
}

#[async_trait]
impl BatchTransport for HttpTransport {
    async fn submit(&self, batch: &Batch) -> Result<BatchOutcome, CoreError> {
        let url = self.url(PUT_PATH, &self.put_query())?;
        debug!("put batch {}: {} points", batch.index, batch.len());

        let resp = self
            .client
            .post(url)
            .json(&batch.points)
            .send()
            .await
            .map_err(|e| map_send_error(PUT_PATH, e))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| map_send_error(PUT_PATH, e))?;
        Ok(put_outcome(batch.len(), status.as_u16(), &text))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Interpret an `/api/put` response for a batch of `len` points.
///
/// A summary body is trusted when it accounts for at least one point;
/// otherwise the status code decides for the whole batch.
fn put_outcome(len: usize, status: u16, body: &str) -> BatchOutcome {
    if let Ok(summary) = serde_json::from_str::<PutSummary>(body) {
        if summary.success + summary.failed > 0 {
            let failed = summary.failed.min(len);
            return BatchOutcome {
                status: Some(status),
                success: len - failed,
                failed,
                errors: summary.errors.into_iter().map(|e| e.error).collect(),
            };
        }
    }

    if (200..300).contains(&status) {
        BatchOutcome::accepted(len, Some(status))
    } else {
        let message = serde_json::from_str::<ErrorBody>(body)
            .map(|b| b.error.message)
            .unwrap_or_else(|_| format!("HTTP {status}"));
        BatchOutcome::rejected(len, Some(status), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otsdb_core::models::data_point::{DataPoint, Tags};
    use std::time::Duration;

    fn server_config() -> ServerConfig {
        ServerConfig {
            request_timeout_ms: 2_000,
            connect_timeout_ms: 500,
            ..Default::default()
        }
    }

    fn batch(n: usize) -> Batch {
        Batch {
            index: 0,
            points: (0..n)
                .map(|i| DataPoint {
                    metric: "test.m".to_string(),
                    timestamp: 1_000 + i as i64,
                    value: i as f64,
                    tags: Tags::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn transport_creation() {
        let transport = HttpTransport::new(&ServerConfig::default(), true).unwrap();
        assert_eq!(transport.base_url(), "http://localhost:4242");
        assert_eq!(transport.name(), "http");
    }

    #[test]
    fn put_query_respects_details() {
        let with = HttpTransport::new(&server_config(), true).unwrap();
        let without = HttpTransport::new(&server_config(), false).unwrap();
        assert_eq!(with.put_query().len(), 2);
        assert_eq!(without.put_query(), vec![("summary", "true".to_string())]);
    }

    #[test]
    fn put_outcome_interpretation() {
        let ok = put_outcome(10, 204, "");
        assert_eq!((ok.success, ok.failed), (10, 0));

        let partial = put_outcome(
            10,
            400,
            r#"{"success":8,"failed":2,"errors":[{"datapoint":{},"error":"bad tag"},{"datapoint":{},"error":"bad tag"}]}"#,
        );
        assert_eq!((partial.success, partial.failed), (8, 2));
        assert_eq!(partial.errors.len(), 2);

        let down = put_outcome(10, 500, "oops");
        assert_eq!((down.success, down.failed), (0, 10));

        let error_body = put_outcome(
            10,
            400,
            r#"{"error":{"code":400,"message":"Missing metric"}}"#,
        );
        assert_eq!(error_body.failed, 10);
        assert_eq!(error_body.errors, vec!["Missing metric".to_string()]);
    }

    #[tokio::test]
    async fn submit_posts_json_array() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/put")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("summary".into(), "true".into()),
                mockito::Matcher::UrlEncoded("details".into(), "true".into()),
            ]))
            .match_body(mockito::Matcher::Regex(
                r#"^\[\{"metric":"test.m","timestamp":1000,"value":0\.0"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":3,"failed":0,"errors":[]}"#)
            .create_async()
            .await;

        let transport =
            HttpTransport::with_base_url(&server.url(), &server_config(), true).unwrap();
        let outcome = transport.submit(&batch(3)).await.unwrap();
        assert_eq!(outcome.success, 3);
        assert!(outcome.is_complete());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn submit_partial_failure() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/put")
            .match_query(mockito::Matcher::Any)
            .with_status(400)
            .with_body(r#"{"success":2,"failed":1,"errors":[{"datapoint":{"metric":"test.m"},"error":"Unable to parse value to a number"}]}"#)
            .create_async()
            .await;

        let transport =
            HttpTransport::with_base_url(&server.url(), &server_config(), true).unwrap();
        let outcome = transport.submit(&batch(3)).await.unwrap();
        assert_eq!(outcome.status, Some(400));
        assert_eq!(outcome.failed, 1);
        assert!(!outcome.is_complete());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn submit_connection_refused_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let base_url = format!("http://{addr}");
        let transport = HttpTransport::with_base_url(&base_url, &server_config(), true).unwrap();
        let err = transport.submit(&batch(1)).await.unwrap_err();
        assert!(matches!(err, CoreError::Network(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn get_maps_error_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/query")
            .match_query(mockito::Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":{"code":400,"message":"No such name for 'metrics': 'nope'"}}"#)
            .create_async()
            .await;

        let transport =
            HttpTransport::with_base_url(&server.url(), &server_config(), true).unwrap();
        let err = transport
            .get("/api/query", &[("m", "sum:nope".to_string())])
            .await
            .unwrap_err();
        match err {
            CoreError::Server { status, message } => {
                assert_eq!(status, 400);
                assert!(message.contains("No such name"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_404_and_503() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server
            .mock("GET", "/api/nope")
            .with_status(404)
            .create_async()
            .await;
        let _busy = server
            .mock("GET", "/api/stats")
            .with_status(503)
            .with_body("Service Unavailable")
            .create_async()
            .await;

        let transport =
            HttpTransport::with_base_url(&server.url(), &server_config(), true).unwrap();
        assert!(matches!(
            transport.get("/api/nope", &[]).await,
            Err(CoreError::NotFound { .. })
        ));
        assert!(matches!(
            transport.get("/api/stats", &[]).await,
            Err(CoreError::ServiceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        // accepts the connection but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let config = ServerConfig {
            request_timeout_ms: 200,
            connect_timeout_ms: 200,
            ..Default::default()
        };
        let base_url = format!("http://{addr}");
        let transport = HttpTransport::with_base_url(&base_url, &config, true).unwrap();
        let err = transport.submit(&batch(2)).await.unwrap_err();
        assert!(matches!(err, CoreError::Network(ref m) if m.contains("timed out")));
    }
}
