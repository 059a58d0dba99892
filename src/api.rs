use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ApiError;
use crate::model::{Agent, CoreInstance, MetricSeries, MetricsSnapshot, Pipeline, Project};

/// Resource-listing calls the dashboard needs from the cloud API.
#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<Project>, ApiError>;
    async fn list_agents(&self, project_id: &str) -> Result<Vec<Agent>, ApiError>;
    async fn list_core_instances(&self, project_id: &str) -> Result<Vec<CoreInstance>, ApiError>;
    async fn list_pipelines(&self, core_instance_id: &str) -> Result<Vec<Pipeline>, ApiError>;
    async fn agent_metrics(&self, agent_id: &str, start: &str, interval: &str) -> Result<MetricsSnapshot, ApiError>;
}

/// Bearer-authenticated JSON client for the cloud REST API.
#[derive(Clone)]
pub struct HttpCloudApi {
    http: Client,
    base_url: String,
    token: String,
}

impl HttpCloudApi {
    pub fn new(http: Client, base_url: &str, token: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl CloudApi for HttpCloudApi {
    async fn list_projects(&self) -> Result<Vec<Project>, ApiError> {
        self.get_json("/v1/projects", &[]).await
    }

    async fn list_agents(&self, project_id: &str) -> Result<Vec<Agent>, ApiError> {
        self.get_json(&format!("/v1/projects/{project_id}/agents"), &[]).await
    }

    async fn list_core_instances(&self, project_id: &str) -> Result<Vec<CoreInstance>, ApiError> {
        self.get_json(&format!("/v1/projects/{project_id}/core_instances"), &[]).await
    }

    async fn list_pipelines(&self, core_instance_id: &str) -> Result<Vec<Pipeline>, ApiError> {
        self.get_json(&format!("/v1/core_instances/{core_instance_id}/pipelines"), &[]).await
    }

    async fn agent_metrics(&self, agent_id: &str, start: &str, interval: &str) -> Result<MetricsSnapshot, ApiError> {
        let payload: MetricsResponse = self
            .get_json(
                &format!("/v1/agents/{agent_id}/metrics"),
                &[("start", start), ("interval", interval)],
            )
            .await?;
        Ok(payload.into_snapshot())
    }
}

/// `{"error": "..."}` bodies carry the useful part; anything else is passed through.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) if body.trim().is_empty() => "empty response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct MetricsResponse {
    #[serde(default)]
    measurements: BTreeMap<String, MeasurementBody>,
}

#[derive(Debug, Default, Deserialize)]
struct MeasurementBody {
    #[serde(default)]
    plugins: BTreeMap<String, PluginBody>,
}

#[derive(Debug, Default, Deserialize)]
struct PluginBody {
    #[serde(default)]
    metrics: BTreeMap<String, MetricSeries>,
}

impl MetricsResponse {
    fn into_snapshot(self) -> MetricsSnapshot {
        let measurements = self
            .measurements
            .into_iter()
            .map(|(name, m)| {
                let plugins = m
                    .plugins
                    .into_iter()
                    .map(|(plugin, body)| (plugin, body.metrics))
                    .collect();
                (name, plugins)
            })
            .collect();
        MetricsSnapshot { measurements }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api_for(server: &MockServer) -> HttpCloudApi {
        HttpCloudApi::new(Client::new(), &server.uri(), "tok")
    }

    #[tokio::test]
    async fn test_list_projects_sends_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/projects"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "p1", "name": "default", "membersCount": 3},
                {"id": "p2", "name": "staging"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let projects = api_for(&server).list_projects().await.unwrap();
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0].members_count, 3);
        assert_eq!(projects[1].name, "staging");
    }

    #[tokio::test]
    async fn test_unauthorized_is_distinct() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/p1/agents"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = api_for(&server).list_agents("p1").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
    }

    #[tokio::test]
    async fn test_error_body_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/core_instances/c1/pipelines"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({"error": "core instance not found"})))
            .mount(&server)
            .await;

        match api_for(&server).list_pipelines("c1").await {
            Err(ApiError::Status { status, message }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "core instance not found");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_agent_metrics_decodes_nested_series() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/agents/a1/metrics"))
            .and(query_param("start", "-1h"))
            .and(query_param("interval", "1m"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "measurements": {
                    "fluentbit_output": {
                        "plugins": {
                            "stdout.0": {
                                "metrics": {
                                    "proc_records": [
                                        {"time": 1700000000, "value": 10.0},
                                        {"time": 1700000060, "value": 12.5}
                                    ]
                                }
                            }
                        }
                    }
                }
            })))
            .mount(&server)
            .await;

        let snapshot = api_for(&server).agent_metrics("a1", "-1h", "1m").await.unwrap();
        let series = &snapshot.measurements["fluentbit_output"]["stdout.0"]["proc_records"];
        assert_eq!(series.len(), 2);
        assert_eq!(series[1].value, Some(12.5));
        assert_eq!(series[0].timestamp.unix_timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/projects"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{"))
            .mount(&server)
            .await;

        let err = api_for(&server).list_projects().await.unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }
}
