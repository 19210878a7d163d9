//! Status delivery by HTTP POST.

use std::time::Duration;

use serde::Serialize;
use url::Url;

use crate::observability::metrics;
use crate::reconcile::{Configurable, Schema};
use crate::report::{SinkError, StatusSink};

/// Body of one POSTed status event.
#[derive(Debug, Serialize)]
pub struct StatusEvent<'a> {
    pub event: &'static str,
    pub path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

/// POSTs every event as JSON to `url`.
pub struct HttpPostSink {
    pub url: String,
    pub timeout_secs: u64,
    client: reqwest::Client,
}

impl Default for HttpPostSink {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: 10,
            client: reqwest::Client::new(),
        }
    }
}

impl Configurable for HttpPostSink {
    fn declare(schema: &mut Schema<Self>) {
        schema.field("url", |s: &mut HttpPostSink| &mut s.url);
        schema.field("timeoutSecs", |s: &mut HttpPostSink| &mut s.timeout_secs);
        // an unusable URL keeps the previous one
        schema.pre_change("url", |_s: &mut HttpPostSink, next: &String| match Url::parse(next) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(url = %next, error = %e, "rejecting status sink url");
                false
            }
        });
        schema.pre_change("timeoutSecs", |_s: &mut HttpPostSink, next: &u64| *next > 0);
    }
}

impl HttpPostSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    fn post(&self, event: StatusEvent<'_>) -> Result<(), SinkError> {
        if self.url.is_empty() {
            return Err(SinkError::NotConfigured("httppost"));
        }
        let url = Url::parse(&self.url).map_err(|e| SinkError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SinkError::NoRuntime)?;

        let request_id = uuid::Uuid::new_v4().to_string();
        let request = self
            .client
            .post(url.clone())
            .header("x-request-id", request_id.as_str())
            .timeout(Duration::from_secs(self.timeout_secs))
            .json(&event);
        let kind = event.event;

        runtime.spawn(async move {
            match request.send().await.and_then(|r| r.error_for_status()) {
                Ok(response) => {
                    tracing::debug!(url = %url, request_id = %request_id, status = %response.status(), event = kind, "status delivered")
                }
                Err(e) => {
                    metrics::record_sink_failure("httppost");
                    tracing::warn!(url = %url, request_id = %request_id, error = %e, event = kind, "status delivery failed");
                }
            }
        });
        Ok(())
    }
}

impl StatusSink for HttpPostSink {
    fn kind(&self) -> &'static str {
        "httppost"
    }

    fn report_config_reload(&self, path: &str) -> Result<(), SinkError> {
        self.post(StatusEvent {
            event: "reload",
            path,
            cause: None,
        })
    }

    fn report_config_is_bad(&self, path: &str, cause: &dyn std::error::Error) -> Result<(), SinkError> {
        self.post(StatusEvent {
            event: "bad_config",
            path,
            cause: Some(cause.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::reconcile::Reconciler;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_posts_reload_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/status"))
            .and(header_exists("x-request-id"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sink = HttpPostSink::new(format!("{}/status", server.uri()));
        sink.report_config_reload("/srv/vms/a.json").unwrap();

        let mut delivered = Vec::new();
        for _ in 0..50 {
            delivered = server.received_requests().await.unwrap_or_default();
            if !delivered.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(delivered.len(), 1);
        let body: serde_json::Value = serde_json::from_slice(&delivered[0].body).unwrap();
        assert_eq!(body["event"], "reload");
        assert_eq!(body["path"], "/srv/vms/a.json");
    }

    #[test]
    fn test_unconfigured_and_invalid_url() {
        let sink = HttpPostSink::default();
        assert!(matches!(sink.report_config_reload("/a"), Err(SinkError::NotConfigured(_))));

        let mut sink = HttpPostSink::new("http://ok.example/");
        let doc = Document::from(serde_json::json!({"url": "not a url", "timeoutSecs": 3}));
        let report = Reconciler::new().apply(&mut sink, &doc).unwrap();
        assert_eq!(sink.url, "http://ok.example/");
        assert_eq!(sink.timeout_secs, 3);
        assert_eq!(report.vetoed, vec!["url"]);
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let mut sink = HttpPostSink::new("http://ok.example/");
        let doc = Document::from(serde_json::json!({"timeoutSecs": 0}));
        let report = Reconciler::new().apply(&mut sink, &doc).unwrap();
        assert_eq!(sink.timeout_secs, 10);
        assert_eq!(report.vetoed, vec!["timeoutSecs"]);
    }

    #[test]
    fn test_no_runtime() {
        let sink = HttpPostSink::new("http://ok.example/");
        assert!(matches!(sink.report_config_reload("/a"), Err(SinkError::NoRuntime)));
    }
}
