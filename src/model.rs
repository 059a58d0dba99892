use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::error::{ApiError, AuthError};

/// Device-authorization response issued by the provider for one login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: Option<String>,
    pub expires_in: Duration,
    pub interval: Duration,
    pub issued_at: OffsetDateTime,
}

/// OAuth access token plus its client-side expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCredential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    #[serde(with = "time::serde::timestamp")]
    pub expires_at: OffsetDateTime,
}

impl AccessCredential {
    /// Builds a credential whose expiry is anchored at `received_at`.
    ///
    /// Fails when `expires_in` puts the expiry outside the representable range.
    pub fn issued(
        access_token: String,
        refresh_token: Option<String>,
        expires_in: u64,
        received_at: OffsetDateTime,
    ) -> Result<Self, AuthError> {
        let expires_at = time::Duration::try_from(Duration::from_secs(expires_in))
            .ok()
            .and_then(|lifetime| received_at.checked_add(lifetime))
            .ok_or_else(|| AuthError::Decode(format!("expires_in {expires_in} is out of range")))?;
        Ok(Self { access_token, refresh_token, expires_in, expires_at })
    }

    /// True when the token is expired or will be within `leeway` of `now`.
    pub fn is_expired(&self, now: OffsetDateTime, leeway: Duration) -> bool {
        now + leeway >= self.expires_at
    }
}

/// Canonical decoding of one token-endpoint round trip.
#[derive(Debug)]
pub enum PollOutcome {
    Pending,
    SlowDown,
    Expired,
    Denied,
    Success(AccessCredential),
    TransportError(AuthError),
}

/// Anything the fan-out helper can deduplicate.
pub trait Identified {
    fn id(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "membersCount")]
    pub members_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub edition: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CoreInstance {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "replicasCount")]
    pub replicas_count: u32,
    #[serde(default)]
    pub status: String,
}

impl Identified for Pipeline {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct MetricPoint {
    #[serde(rename = "time", with = "time::serde::timestamp")]
    pub timestamp: OffsetDateTime,
    pub value: Option<f64>,
}

pub type MetricSeries = Vec<MetricPoint>;

/// measurement -> plugin -> metric -> series. Swapped wholesale, never edited.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub measurements: BTreeMap<String, BTreeMap<String, BTreeMap<String, MetricSeries>>>,
}

impl MetricsSnapshot {
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Flattened `(measurement, plugin, metric, last value)` rows.
    pub fn latest_values(&self) -> Vec<(&str, &str, &str, Option<f64>)> {
        let mut rows = Vec::new();
        for (measurement, plugins) in &self.measurements {
            for (plugin, metrics) in plugins {
                for (metric, series) in metrics {
                    let last = series.iter().rev().find_map(|p| p.value);
                    rows.push((measurement.as_str(), plugin.as_str(), metric.as_str(), last));
                }
            }
        }
        rows
    }
}

/// One agent's metrics, as fetched by the per-agent fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentMetrics {
    pub agent: Agent,
    pub snapshot: MetricsSnapshot,
}

impl Identified for AgentMetrics {
    fn id(&self) -> &str {
        &self.agent.id
    }
}

impl MetricsSnapshot {
    /// Merges per-agent snapshots; plugin keys become `agent/plugin`.
    pub fn from_agents(parts: Vec<AgentMetrics>) -> Self {
        let mut merged = MetricsSnapshot::default();
        for AgentMetrics { agent, snapshot } in parts {
            for (measurement, plugins) in snapshot.measurements {
                let target = merged.measurements.entry(measurement).or_default();
                for (plugin, metrics) in plugins {
                    target.insert(format!("{}/{}", agent.name, plugin), metrics);
                }
            }
        }
        merged
    }
}

/// Result channel payload of the metrics refresh loop.
pub type MetricsUpdate = Result<Arc<MetricsSnapshot>, ApiError>;

/// Data that may still be in flight for the current screen.
#[derive(Debug, Clone, PartialEq)]
pub enum Loadable<T> {
    Loading,
    Ready(T),
    Failed(String),
}

impl<T> Loadable<T> {
    pub fn ready(&self) -> Option<&T> {
        match self {
            Loadable::Ready(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Loadable::Loading)
    }
}

/// Generation tag of an async scope (one login attempt, one project view).
pub type Epoch = u64;

/// Everything the session reducer reacts to: user intents, async results, timers.
#[derive(Debug)]
pub enum AppEvent {
    LoginRequested,
    CredentialLoaded { credential: AccessCredential, now: OffsetDateTime },
    CredentialRefreshed { epoch: Epoch, result: Result<AccessCredential, AuthError> },
    DeviceCodeReceived {
        epoch: Epoch,
        result: Result<DeviceAuthorization, AuthError>,
        received_at: Instant,
    },
    PollOutcomeReceived { epoch: Epoch, outcome: PollOutcome },
    ProjectsFetched { epoch: Epoch, result: Result<Vec<Project>, ApiError> },
    AgentsFetched { epoch: Epoch, result: Result<Vec<Agent>, ApiError> },
    PipelinesFetched { epoch: Epoch, result: Result<Vec<Pipeline>, ApiError> },
    MetricsTick { epoch: Epoch, update: MetricsUpdate },
    UserSelectedProject(Project),
    UserReloadedProjects,
    UserWentBack,
    UserCancelled,
    UserRetried,
    UserLoggedOut,
    Tick(Instant),
}

/// Side effects requested by the reducer; results come back as [`AppEvent`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    RequestDeviceCode { epoch: Epoch },
    SchedulePoll { epoch: Epoch, device_code: String, after: Duration },
    RefreshCredential { epoch: Epoch, refresh_token: String },
    Authenticate { credential: AccessCredential, persist: bool },
    DeleteCredential,
    FetchProjects { epoch: Epoch },
    FetchAgents { epoch: Epoch, project_id: String },
    FetchPipelines { epoch: Epoch, project_id: String },
    StartMetrics { epoch: Epoch, project_id: String },
    CancelLogin,
    CancelView,
}
