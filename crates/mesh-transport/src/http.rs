//! Direct HTTP transport

use crate::wire::{self, GenerateBody};
use async_trait::async_trait;
use mesh_core::{
    Error, GenerateRequest, HealthReport, InferenceNode, NodeTransport, OrchestratorConfig, Result,
    TransportKind,
};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Transport that calls the node's HTTP API directly
pub struct DirectTransport {
    name: String,
    health_url: String,
    generate_url: String,
    client: Client,
}

impl DirectTransport {
    /// Create a new direct transport for a node
    pub fn new(node: &InferenceNode, config: &OrchestratorConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: node.name.clone(),
            health_url: wire::endpoint_url(&node.address, &config.health_path),
            generate_url: wire::endpoint_url(&node.address, &config.generate_path),
            client,
        })
    }
}

#[async_trait]
impl NodeTransport for DirectTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Direct
    }

    async fn health(&self, timeout: Duration) -> Result<HealthReport> {
        debug!(node = %self.name, url = %self.health_url, "Probing node");

        let response = self
            .client
            .get(&self.health_url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::probe_timeout(format!("{}: no reply within {:?}", self.name, timeout))
                } else {
                    Error::probe_unreachable(format!("{}: {}", self.name, e))
                }
            })?;

        if !response.status().is_success() {
            return Err(Error::probe_unreachable(format!(
                "{}: health check returned {}",
                self.name,
                response.status()
            )));
        }

        // The payload is optional metadata; a body that fails to arrive does not
        // change the health decision.
        let body = response.text().await.unwrap_or_default();

        Ok(HealthReport {
            models: wire::parse_models(&body),
        })
    }

    async fn generate(&self, request: &GenerateRequest, timeout: Duration) -> Result<String> {
        debug!(node = %self.name, model = %request.model, stream = request.stream, "Sending generate request");

        let response = self
            .client
            .post(&self.generate_url)
            .timeout(timeout)
            .json(&GenerateBody::from(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::attempt_failed(&self.name, format!("timed out after {:?}", timeout))
                } else {
                    Error::attempt_failed(&self.name, format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                Error::attempt_failed(&self.name, format!("timed out after {:?}", timeout))
            } else {
                Error::attempt_failed(&self.name, format!("failed to read reply: {}", e))
            }
        })?;

        if !status.is_success() {
            return Err(Error::attempt_failed(
                &self.name,
                format!("HTTP {}: {}", status, wire::excerpt(&body)),
            ));
        }

        wire::parse_generate_body(&body, request.stream)
            .map_err(|reason| Error::attempt_failed(&self.name, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn transport_for(server: &MockServer) -> DirectTransport {
        let node = InferenceNode::new("gpu-a", server.uri());
        DirectTransport::new(&node, &OrchestratorConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_health_success_records_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"name": "llama3:latest"}]
            })))
            .mount(&server)
            .await;

        let transport = transport_for(&server).await;
        let report = transport.health(Duration::from_secs(2)).await.unwrap();
        assert_eq!(report.models, vec!["llama3:latest"]);
        assert_eq!(transport.kind(), TransportKind::Direct);
    }

    #[tokio::test]
    async fn test_health_failure_kinds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let transport = transport_for(&server).await;
        let err = transport.health(Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(err.category(), "probe_unreachable");

        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(800)))
            .mount(&server)
            .await;

        let err = transport
            .health(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "probe_timeout");
    }

    #[tokio::test]
    async fn test_health_connection_refused() {
        let node = InferenceNode::new("gone", "http://127.0.0.1:9");
        let transport = DirectTransport::new(&node, &OrchestratorConfig::default()).unwrap();
        let err = transport.health(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ProbeUnreachable(_) | Error::ProbeTimeout(_)
        ));
    }

    #[tokio::test]
    async fn test_generate_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "llama3",
                "prompt": "hi",
                "stream": false
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"response": "hello", "done": true})),
            )
            .mount(&server)
            .await;

        let transport = transport_for(&server).await;
        let text = transport
            .generate(&GenerateRequest::new("llama3", "hi"), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn test_generate_stream() {
        let server = MockServer::start().await;
        let body = "{\"response\":\"he\",\"done\":false}\n{\"response\":\"llo\",\"done\":true}\n";
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let transport = transport_for(&server).await;
        let request = GenerateRequest::new("llama3", "hi").with_stream(true);
        let text = transport
            .generate(&request, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn test_generate_failures_are_attempt_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let transport = transport_for(&server).await;
        let err = transport
            .generate(&GenerateRequest::new("llama3", "hi"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::GenerationAttemptFailed { ref node, .. } if node == "gpu-a"));
        assert!(err.to_string().contains("boom"));

        server.reset().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"response": "late"}))
                    .set_delay(Duration::from_millis(800)),
            )
            .mount(&server)
            .await;

        let err = transport
            .generate(
                &GenerateRequest::new("llama3", "hi"),
                Duration::from_millis(100),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
