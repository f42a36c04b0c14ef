//! Shipping a sealed batch to the collector.

use crate::batch::Batch;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Header carrying the collector API key.
pub const API_KEY_HEADER: &str = "x-ft-api-key";

/// Content type of a batch body: one JSON record per line.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("collector responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("collector did not acknowledge batch: {0}")]
    Rejected(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Sends one batch somewhere. Retry is handled by the caller.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, batch: &Batch) -> Result<(), DispatchError>;
}

#[cfg(feature = "http")]
pub use http_dispatcher::HttpDispatcher;

#[cfg(feature = "http")]
mod http_dispatcher {
    use super::*;
    use siphon_core::config::CollectorConfig;
    use tracing::debug;

    /// POSTs batches as NDJSON. A 2xx response counts as success only when its
    /// JSON body has `"message": "success"`.
    ///
    /// With an empty URL or API key every dispatch succeeds without touching
    /// the network.
    #[derive(Debug, Clone)]
    pub struct HttpDispatcher {
        client: reqwest::Client,
        url: String,
        api_key: String,
    }

    impl HttpDispatcher {
        pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, DispatchError> {
            let client = reqwest::Client::builder()
                .build()
                .map_err(|e| DispatchError::Client(e.to_string()))?;
            Ok(Self::with_client(client, url, api_key))
        }

        pub fn with_client(
            client: reqwest::Client,
            url: impl Into<String>,
            api_key: impl Into<String>,
        ) -> Self {
            Self {
                client,
                url: url.into(),
                api_key: api_key.into(),
            }
        }

        pub fn from_config(config: &CollectorConfig) -> Result<Self, DispatchError> {
            let client = reqwest::Client::builder()
                .timeout(config.timeout())
                .build()
                .map_err(|e| DispatchError::Client(e.to_string()))?;
            Ok(Self::with_client(client, &config.url, &config.api_key))
        }

        pub fn is_enabled(&self) -> bool {
            !self.url.is_empty() && !self.api_key.is_empty()
        }
    }

    #[async_trait]
    impl Dispatcher for HttpDispatcher {
        async fn dispatch(&self, batch: &Batch) -> Result<(), DispatchError> {
            if !self.is_enabled() {
                return Ok(());
            }

            let response = self
                .client
                .post(&self.url)
                .header(API_KEY_HEADER, &self.api_key)
                .header(reqwest::header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)
                .body(batch.body())
                .send()
                .await
                .map_err(|e| DispatchError::Transport(e.to_string()))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| DispatchError::Transport(e.to_string()))?;

            if !status.is_success() {
                return Err(DispatchError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            if !is_success_ack(&body) {
                return Err(DispatchError::Rejected(body));
            }

            debug!(records = batch.len(), bytes = batch.size_bytes(), "Collector accepted batch");
            Ok(())
        }
    }

    fn is_success_ack(body: &str) -> bool {
        serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(|m| m == "success"))
            .unwrap_or(false)
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use mockito::{Matcher, Server};

        fn batch() -> Batch {
            let mut batch = Batch::new();
            batch.push(br#"{"n":1}"#.to_vec(), 1);
            batch.push(br#"{"n":2}"#.to_vec(), 2);
            batch
        }

        // ── disabled ─────────────────────────────────────────────────

        #[tokio::test]
        async fn empty_url_is_noop_success() {
            let dispatcher = HttpDispatcher::new("", "key").unwrap();
            assert!(!dispatcher.is_enabled());
            assert!(dispatcher.dispatch(&batch()).await.is_ok());
        }

        #[tokio::test]
        async fn empty_api_key_makes_no_request() {
            let mut server = Server::new_async().await;
            let mock = server
                .mock("POST", "/logs")
                .expect(0)
                .create_async()
                .await;

            let dispatcher = HttpDispatcher::new(format!("{}/logs", server.url()), "").unwrap();
            assert!(dispatcher.dispatch(&batch()).await.is_ok());
            mock.assert_async().await;
        }

        // ── request shape ────────────────────────────────────────────

        #[tokio::test]
        async fn posts_ndjson_with_api_key() {
            let mut server = Server::new_async().await;
            let mock = server
                .mock("POST", "/logs")
                .match_header("x-ft-api-key", "secret")
                .match_header("content-type", "application/x-ndjson")
                .match_body(Matcher::Exact("{\"n\":1}\n{\"n\":2}\n".to_string()))
                .with_status(200)
                .with_body(r#"{"message":"success"}"#)
                .expect(1)
                .create_async()
                .await;

            let dispatcher = HttpDispatcher::new(format!("{}/logs", server.url()), "secret").unwrap();
            dispatcher.dispatch(&batch()).await.unwrap();
            mock.assert_async().await;
        }

        // ── acknowledgement ──────────────────────────────────────────

        #[tokio::test]
        async fn non_2xx_is_status_error() {
            let mut server = Server::new_async().await;
            let _mock = server
                .mock("POST", "/logs")
                .with_status(503)
                .with_body("unavailable")
                .create_async()
                .await;

            let dispatcher = HttpDispatcher::new(format!("{}/logs", server.url()), "k").unwrap();
            match dispatcher.dispatch(&batch()).await {
                Err(DispatchError::Status { status, body }) => {
                    assert_eq!(status, 503);
                    assert_eq!(body, "unavailable");
                }
                other => panic!("expected status error, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn ok_without_success_message_is_rejected() {
            let mut server = Server::new_async().await;
            let _mock = server
                .mock("POST", "/logs")
                .with_status(200)
                .with_body(r#"{"message":"quota exceeded"}"#)
                .create_async()
                .await;

            let dispatcher = HttpDispatcher::new(format!("{}/logs", server.url()), "k").unwrap();
            assert!(matches!(
                dispatcher.dispatch(&batch()).await,
                Err(DispatchError::Rejected(_))
            ));
        }

        #[tokio::test]
        async fn transport_failure_is_reported() {
            // Nothing listens on port 1.
            let dispatcher = HttpDispatcher::new("http://127.0.0.1:1/logs", "k").unwrap();
            assert!(matches!(
                dispatcher.dispatch(&batch()).await,
                Err(DispatchError::Transport(_))
            ));
        }

        #[test]
        fn success_ack_requires_exact_message() {
            assert!(is_success_ack(r#"{"message":"success"}"#));
            assert!(is_success_ack(r#"{"message":"success","count":2}"#));
            assert!(!is_success_ack(r#"{"message":"Success"}"#));
            assert!(!is_success_ack(r#"{"status":"success"}"#));
            assert!(!is_success_ack("success"));
            assert!(!is_success_ack(""));
        }
    }
}
