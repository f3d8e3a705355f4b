//! HTTP status source.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use vup_models::{RemoteJobId, RemoteStatus};

use crate::config::StatusApiConfig;
use crate::error::{RefreshError, RefreshResult};
use crate::refresh::StatusSource;

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: RemoteStatus,
}

/// [`StatusSource`] backed by `GET {base}/jobs/{id}`.
#[derive(Debug, Clone)]
pub struct HttpStatusSource {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpStatusSource {
    pub fn new(config: &StatusApiConfig) -> RefreshResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("vup-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RefreshError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            token: config.token.clone(),
        })
    }

    fn job_url(&self, job: &RemoteJobId) -> RefreshResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RefreshError::config("Base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(["jobs", job.as_str()]);
        Ok(url)
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn poll(&self, job: &RemoteJobId) -> RefreshResult<RemoteStatus> {
        let url = self.job_url(job)?;
        debug!(job_id = %job, url = %url, "Requesting job status");

        let mut request = self.http.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RefreshError::from_http_status(job, status.as_u16(), body));
        }

        let body = response.bytes().await?;
        let parsed: StatusResponse = serde_json::from_slice(&body)
            .map_err(|e| RefreshError::Decode(format!("{}: {}", e, String::from_utf8_lossy(&body))))?;
        Ok(parsed.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn source_for(server: &MockServer) -> HttpStatusSource {
        let config = StatusApiConfig::new(&format!("{}/api", server.uri()))
            .unwrap()
            .with_token("secret")
            .with_timeout(Duration::from_millis(500));
        HttpStatusSource::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_poll_parses_status_and_aliases() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/jobs/J1"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "transcode_starting",
                "title": "ignored"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/jobs/J2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "available"})),
            )
            .mount(&server)
            .await;

        let source = source_for(&server).await;
        assert_eq!(
            source.poll(&RemoteJobId::from_string("J1")).await,
            Ok(RemoteStatus::Transcoding)
        );
        assert_eq!(
            source.poll(&RemoteJobId::from_string("J2")).await,
            Ok(RemoteStatus::Ready)
        );
    }

    #[tokio::test]
    async fn test_poll_maps_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/jobs/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/jobs/busy"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let source = source_for(&server).await;

        let missing = RemoteJobId::from_string("missing");
        assert_eq!(
            source.poll(&missing).await,
            Err(RefreshError::JobNotFound(missing.clone()))
        );

        let err = source
            .poll(&RemoteJobId::from_string("busy"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RefreshError::Http {
                status: 503,
                message: "maintenance".to_string()
            }
        );
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_poll_rejects_unknown_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/jobs/J"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "exploded"})),
            )
            .mount(&server)
            .await;

        let source = source_for(&server).await;
        let err = source.poll(&RemoteJobId::from_string("J")).await.unwrap_err();
        assert!(matches!(err, RefreshError::Decode(_)));
    }

    #[tokio::test]
    async fn test_poll_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/jobs/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "ready"}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let source = source_for(&server).await;
        let err = source
            .poll(&RemoteJobId::from_string("slow"))
            .await
            .unwrap_err();
        assert_eq!(err, RefreshError::Timeout);
    }

    #[test]
    fn test_job_url_escapes_id() {
        let config = StatusApiConfig::new("https://api.example.com/v1").unwrap();
        let source = HttpStatusSource::new(&config).unwrap();
        let url = source.job_url(&RemoteJobId::from_string("a/b")).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/jobs/a%2Fb");
    }
}
